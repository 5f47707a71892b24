//! Crash-recovery snapshot of the changed-event queues and merge denials.

use crate::engine::types::ShardSnapshot;
use crate::error::BankResult;

use std::path::Path;

pub fn save(path: impl AsRef<Path>, snapshot: &ShardSnapshot) -> BankResult<()> {
    let bytes = bincode::serialize(snapshot)?;
    std::fs::write(path.as_ref(), bytes)?;
    tracing::info!(
        "Saved snapshot to {}: {} changed events, {} denials",
        path.as_ref().display(),
        snapshot.changed.len(),
        snapshot.blacklist.len()
    );
    Ok(())
}

/// Reads and deletes the snapshot. `None` when it is missing or unreadable.
pub fn restore(path: impl AsRef<Path>) -> Option<ShardSnapshot> {
    let path = path.as_ref();
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("Failed to read snapshot {}: {}", path.display(), e);
            return None;
        }
    };

    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!("Failed to delete snapshot {}: {}", path.display(), e);
    }

    match bincode::deserialize::<ShardSnapshot>(&bytes) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            tracing::warn!("Discarding unreadable snapshot {}: {}", path.display(), e);
            None
        }
    }
}
