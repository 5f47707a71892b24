//! Bank Network Protocol
//!
//! Endpoints and DTOs of the bank's RPC surface, the neighbour push and the ownership
//! notifications sent to the message bank. All bodies are JSON.

use crate::engine::types::{EventPushInfo, EventQuery, EventRelation};
use crate::event::types::{MessageDigest, MessageEvent, MessageId};

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Insert digests and learn their owning events.
pub const ENDPOINT_DIGESTS: &str = "/digests";
/// Owners of known messages.
pub const ENDPOINT_MESSAGE_EVENTS: &str = "/messages/events";
/// Detach messages from their events.
pub const ENDPOINT_DELETE_MESSAGES: &str = "/messages/delete";
/// Event snapshots and what-if introspection.
pub const ENDPOINT_EVENTS: &str = "/events";
/// Events migrating from a neighbour bank.
pub const ENDPOINT_PUSH_EVENTS: &str = "/internal/push_events";
pub const ENDPOINT_STATUS: &str = "/status";
/// Served by the message bank, not by this one.
pub const ENDPOINT_MESSAGE_OWNERS: &str = "/messages/owners";

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct PostDigestsRequest {
    pub digests: Vec<MessageDigest>,
}

/// Owners aligned with the posted digests.
#[derive(Debug, Serialize, Deserialize)]
pub struct PostDigestsResponse {
    pub events: Vec<MessageEvent>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageIdsRequest {
    pub ids: Vec<MessageId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OwningEventsResponse {
    pub events: Vec<MessageEvent>,
    /// Messages held by this bank across all engines.
    pub total_message_count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetEventsRequest {
    pub queries: Vec<EventQuery>,
}

/// Unknown event ids are left out.
#[derive(Debug, Serialize, Deserialize)]
pub struct GetEventsResponse {
    pub events: Vec<EventRelation>,
}

/// Pushed events with every member digest, each tagged with its event id.
#[derive(Debug, Serialize, Deserialize)]
pub struct PushEventsRequest {
    pub digests: Vec<MessageDigest>,
    pub events: Vec<EventPushInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageOwnersRequest {
    pub events: Vec<MessageEvent>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EmptyResponse {}
