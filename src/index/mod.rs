//! Cluster Index Module
//!
//! In-memory state of one clustering engine, apart from the engine's own bookkeeping.
//!
//! ## Core Mechanisms
//! - **Arena**: `ClusterIndex` owns every event under a small integer handle. The id map,
//!   message ownership and the inverted word index store handles only.
//! - **Inverted index**: word → events whose summary holds the word. Callers unreference
//!   an event's words before re-deriving its summary and reference them afterwards.
//! - **Changed queue**: events awaiting a merge attempt, in cardinality order.
//! - **Merge denials**: time-boxed memory of event-hash pairs that must not merge.
//! - **Core-word cache**: members' ranked core words with access-time eviction.
//!
//! ## Submodules
//! - **`arena`**: `ClusterIndex`.
//! - **`changed`**: `ChangedEvents` and the cardinality key.
//! - **`blacklist`**: `MergeBlacklist`.
//! - **`cache`**: `CoreWordCache`.

pub mod arena;
pub mod blacklist;
pub mod cache;
pub mod changed;
