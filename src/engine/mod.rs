//! Clustering Engine Module
//!
//! Incremental clustering of message digests into events, one engine per language
//! partition.
//!
//! ## Core Mechanisms
//! 1. **Insertion**: a digest whose message has no owner becomes a singleton event,
//!    queued for merging. Known messages return their current owner.
//! 2. **Merging**: the merge cycle pops the smallest changed event, scores candidates
//!    sharing words with it and merges it into the best one above the pair's merge
//!    level, unless a denial for the pair of shapes is still active.
//! 3. **Recomposition**: the traversal revises dissenters and splits, separates or
//!    remakes events whose members disagree; the worst member of an unsplittable event
//!    is detached into a new singleton.
//! 4. **Maintenance**: obsolete members are cleaned up, dirty events flushed to the
//!    store, and the traversal period tunes itself on the merge backlog.
//! 5. **Rebalancing**: a fraction of events migrates to a ring neighbour per pass,
//!    steered by the event's spin. Failed pushes roll back.
//!
//! ## Submodules
//! - **`manager`**: `EventManager`, the locked engine with its task loop and RPC
//!   entry points.
//! - **`state`**: `ShardState` and traversal self-tuning.
//! - **`clustering`**: insertion, candidate search, merging.
//! - **`recompose`**: split, separate, remake, dissenter revision.
//! - **`maintenance`**: loading, traversal, cleanup, flush, snapshot handoff.
//! - **`push`**: migration to neighbour banks.
//! - **`inspect`**: read-only lookups and what-if introspection.
//! - **`peers`**: seams to neighbour banks and the ownership sink.
//! - **`types`**: transfer, status and introspection types.

pub mod clustering;
pub mod inspect;
pub mod maintenance;
pub mod manager;
pub mod peers;
pub mod push;
pub mod recompose;
pub mod state;
pub mod types;

#[cfg(test)]
mod tests;
