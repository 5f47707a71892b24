//! Collaborator seams of the clustering engine.
//!
//! The engine never talks to the network itself: neighbour pushes and ownership
//! notifications go through these traits, so the HTTP clients can be swapped for
//! in-process doubles.

use super::types::{PushPack, Side};
use crate::error::BankResult;
use crate::event::types::MessageEvent;

use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The bank's view of its ring neighbours.
pub trait BankPeers: Send + Sync {
    /// Number of banks in the ring, this one included.
    fn bank_count(&self) -> usize;

    /// Whether there is anybody to push events to.
    fn has_neighbour(&self) -> bool;

    /// Delivers events with their member digests to the neighbour on `side`. An `Ok`
    /// means the neighbour took ownership.
    fn push_events(&self, side: Side, pack: PushPack) -> BoxFuture<'_, BankResult<()>>;
}

/// Receiver of message ownership changes, normally the message bank.
pub trait MessageEventSink: Send + Sync {
    fn post_message_events(&self, events: Vec<MessageEvent>) -> BoxFuture<'_, BankResult<()>>;
}

/// Peers of a bank that is alone in the ring.
pub struct NoPeers;

impl BankPeers for NoPeers {
    fn bank_count(&self) -> usize {
        1
    }

    fn has_neighbour(&self) -> bool {
        false
    }

    fn push_events(&self, _side: Side, _pack: PushPack) -> BoxFuture<'_, BankResult<()>> {
        Box::pin(async { Err(crate::error::BankError::transport("no neighbour banks")) })
    }
}
