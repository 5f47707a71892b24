//! Directory Protocol
//!
//! Endpoints and DTOs of the directory service a bank logs into.

use super::types::{BankSession, Presence};

use serde::{Deserialize, Serialize};

pub const ENDPOINT_LOGIN: &str = "/bank/login";
pub const ENDPOINT_PING: &str = "/bank/ping";

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub bank_addr: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub session: BankSession,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PingRequest {
    pub bank_addr: String,
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    pub presence: Presence,
}
