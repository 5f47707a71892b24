//! Error taxonomy shared by every bank subsystem.
//!
//! - `NotReady`: the shard is loading, unloaded, or the session is still logging in.
//!   Callers are expected to retry.
//! - `Store` / `Transport`: persistence or peer failures. Logged, the running task is
//!   rescheduled with a delay, the shard keeps going.
//! - `Corrupt`: an unreadable persisted blob. The row is deleted and the load continues.
//! - `Invariant`: an internal map disagrees with another one. Indicates a bug.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BankError {
    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Persistence error: {0}")]
    Store(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Corrupted blob {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BankResult<T> = std::result::Result<T, BankError>;

impl BankError {
    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady(_))
    }
}

impl IntoResponse for BankError {
    fn into_response(self) -> Response {
        let status = match &self {
            BankError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            BankError::Transport(_) => StatusCode::BAD_GATEWAY,
            BankError::Invariant(msg) => {
                tracing::error!("Invariant violated while serving request: {}", msg);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
