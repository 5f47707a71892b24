//! Event Model
//!
//! The cluster entity and the pure scoring functions the clustering engine is built on.
//!
//! ## Core Mechanisms
//! - **Word summary**: every member contributes its ranked core words with a
//!   rank-decaying weight (`v^1.1`); the event keeps the heaviest words as its summary.
//! - **Overlap**: a symmetric `[0, 100]` score of how well two summaries line up,
//!   penalized when the shared words sit deep in either ranking.
//! - **Merge level**: the overlap two events must reach, rising with elapsed time,
//!   time range and strain, and decaying with size down to a floor.
//!
//! ## Submodules
//! - **`types`**: identifiers, digests, flags.
//! - **`event`**: the `Event` entity.
//! - **`overlap`**: weight and overlap functions.
//! - **`model`**: merge level, can-merge predicate, denial timeout.

pub mod event;
pub mod model;
pub mod overlap;
pub mod types;
