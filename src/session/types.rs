use crate::engine::types::ShardStatus;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    LoggingIn,
    Active,
}

/// The bank's place in the ring as handed out by the directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BankSession {
    pub session_id: String,
    /// Addresses of every bank in ring order, this one included.
    pub banks: Vec<String>,
}

/// Directory verdict on a presence report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Presence {
    Alive,
    Logout,
}

/// Ring neighbours of a bank. Both are absent when the bank is alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Neighbours {
    pub left: Option<String>,
    pub right: Option<String>,
}

impl Neighbours {
    /// Left is the previous bank of the ring, right the next one, wrapping around.
    pub fn of(session: &BankSession, bank_addr: &str) -> Self {
        let banks = &session.banks;
        let Some(pos) = banks.iter().position(|b| b == bank_addr) else {
            return Self::default();
        };

        if banks.len() < 2 {
            return Self::default();
        }

        let left = (pos + banks.len() - 1) % banks.len();
        let right = (pos + 1) % banks.len();

        Self {
            left: Some(banks[left].clone()),
            right: Some(banks[right].clone()),
        }
    }

    pub fn is_alone(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankStatus {
    pub state: SessionState,
    pub bank_addr: String,
    pub session_id: Option<String>,
    pub neighbours: Neighbours,
    pub shards: Vec<ShardStatus>,
}
