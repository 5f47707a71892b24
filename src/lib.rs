//! Event Bank Library
//!
//! A shard of the news event clustering service. The bank groups incoming message
//! digests into events, keeps those events coherent over time and trades events with
//! its ring neighbours to balance load. The binary (`main.rs`) wires it to HTTP.
//!
//! ## Architecture Modules
//! - **`event`**: the event entity with its word summary, overlap and merge-level model.
//! - **`index`**: the per-engine arena of events and the structures around it: the
//!   changed-event queue, merge denials and the core-word cache.
//! - **`engine`**: the clustering engine. Insert, merge, recompose, maintain, push.
//! - **`executor`**: the per-engine cooperative task queue and its worker.
//! - **`storage`**: the persistence contract, its in-memory implementation and the
//!   versioned blob codec.
//! - **`session`**: login, presence, language partitions and the handoff snapshot.
//! - **`bank`**: the HTTP routes and the clients of neighbour banks and the message bank.
//! - **`config`** / **`error`**: settings and the error taxonomy.

pub mod bank;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod executor;
pub mod index;
pub mod session;
pub mod storage;
