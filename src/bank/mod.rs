//! Bank RPC Module
//!
//! The HTTP face of a bank: the routes clients and neighbour banks call, and the
//! clients this bank uses to call others.
//!
//! ## Core Mechanisms
//! - **Routes**: every handler forwards to `BankService` and maps `BankError` onto a
//!   status code (`NotReady` becomes 503, so callers know to retry).
//! - **Pushes**: `PeerClient` delivers migrating events to a ring neighbour. A non-2xx
//!   answer counts as a failed push and the sending engine rolls the events back.
//! - **Ownership sink**: ownership changes are posted to the message bank, or only
//!   logged when the bank runs without one.
//!
//! ## Submodules
//! - **`protocol`**: endpoints and DTOs.
//! - **`handlers`**: axum handlers and the router.
//! - **`client`**: retrying POST helper, peer client, ownership sinks.

pub mod client;
pub mod handlers;
pub mod protocol;

#[cfg(test)]
mod tests;
