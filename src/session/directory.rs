use super::protocol::*;
use super::types::{BankSession, Presence};
use crate::bank::client::{check_status, post_with_retry};
use crate::engine::peers::BoxFuture;
use crate::error::{BankError, BankResult};

use std::time::Duration;

const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(5);
const DIRECTORY_ATTEMPTS: usize = 2;

/// The service handing out bank sessions and ring order.
pub trait Directory: Send + Sync {
    fn login(&self, bank_addr: &str) -> BoxFuture<'_, BankResult<BankSession>>;

    fn ping(&self, bank_addr: &str, session_id: &str) -> BoxFuture<'_, BankResult<Presence>>;
}

pub struct HttpDirectory {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpDirectory {
    pub fn new(http_client: reqwest::Client, base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        }
    }

    async fn post_login(&self, bank_addr: String) -> BankResult<BankSession> {
        let url = format!("{}{}", self.base_url, ENDPOINT_LOGIN);
        let payload = LoginRequest { bank_addr };

        let response = post_with_retry(
            &self.http_client,
            &url,
            &payload,
            DIRECTORY_TIMEOUT,
            DIRECTORY_ATTEMPTS,
        )
        .await?;
        let response = check_status(&url, response).await?;

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| BankError::transport(format!("{}: bad login response: {}", url, e)))?;
        Ok(body.session)
    }

    async fn post_ping(&self, bank_addr: String, session_id: String) -> BankResult<Presence> {
        let url = format!("{}{}", self.base_url, ENDPOINT_PING);
        let payload = PingRequest {
            bank_addr,
            session_id,
        };

        let response = post_with_retry(
            &self.http_client,
            &url,
            &payload,
            DIRECTORY_TIMEOUT,
            DIRECTORY_ATTEMPTS,
        )
        .await?;
        let response = check_status(&url, response).await?;

        let body: PingResponse = response
            .json()
            .await
            .map_err(|e| BankError::transport(format!("{}: bad ping response: {}", url, e)))?;
        Ok(body.presence)
    }
}

impl Directory for HttpDirectory {
    fn login(&self, bank_addr: &str) -> BoxFuture<'_, BankResult<BankSession>> {
        Box::pin(self.post_login(bank_addr.to_string()))
    }

    fn ping(&self, bank_addr: &str, session_id: &str) -> BoxFuture<'_, BankResult<Presence>> {
        Box::pin(self.post_ping(bank_addr.to_string(), session_id.to_string()))
    }
}

/// Directory of a bank running on its own: a single-bank ring that never logs out.
pub struct StandaloneDirectory;

impl Directory for StandaloneDirectory {
    fn login(&self, bank_addr: &str) -> BoxFuture<'_, BankResult<BankSession>> {
        let session = BankSession {
            session_id: uuid::Uuid::new_v4().to_string(),
            banks: vec![bank_addr.to_string()],
        };
        Box::pin(async move { Ok(session) })
    }

    fn ping(&self, _bank_addr: &str, _session_id: &str) -> BoxFuture<'_, BankResult<Presence>> {
        Box::pin(async { Ok(Presence::Alive) })
    }
}
