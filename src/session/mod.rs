//! Session Module
//!
//! Membership of the bank in the ring of banks, and the lifetime of its engines.
//!
//! ## Core Concepts
//! - **Session**: granted by the directory on login, it fixes the ring order and so
//!   the left and right neighbours events are pushed to.
//! - **States**: `LoggingIn` retries the login every `login_retry_period`; `Active`
//!   reports presence every `report_presence_period`. A logout verdict stops every
//!   engine and returns to `LoggingIn`.
//! - **Backets**: languages found in the store are grouped into at most `backets`
//!   engines, heaviest first. Languages first seen at runtime get an engine of their
//!   own while there is room, otherwise join the lightest one.
//! - **Snapshot**: on teardown the changed-event queues and merge denials of all
//!   engines are written to `<cache_file>.chn` and handed back on the next login.
//!   Without a snapshot every loaded event is rebuilt.
//!
//! ## Submodules
//! - **`service`**: `BankService`, the state machine and RPC routing.
//! - **`directory`**: the directory client and its standalone stand-in.
//! - **`snapshot`**: save and restore of the handoff file.
//! - **`protocol`**: directory endpoints and DTOs.
//! - **`types`**: sessions, neighbours, bank status.

pub mod directory;
pub mod protocol;
pub mod service;
pub mod snapshot;
pub mod types;
