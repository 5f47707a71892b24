//! Event Storage Module
//!
//! Persistence contract of the clustering engines.
//!
//! ## Core Concepts
//! - **Rows**: events and member messages are `(id, language, blob)` rows with
//!   insert-or-update semantics and id-ordered paged loads per language set.
//! - **Blobs**: versioned bincode bodies; a row that cannot be decoded is reported as
//!   corrupt so the loader can delete it and move on.
//! - **Messages**: the message table keeps members' ranked core words, so the in-memory
//!   core-word cache can be refilled on demand.
//!
//! ## Submodules
//! - **`store`**: the `EventStore` trait and row types.
//! - **`memory`**: `MemoryStore`, the concurrent in-process implementation.
//! - **`codec`**: blob encoding.

pub mod codec;
pub mod memory;
pub mod store;
