//! Outbound HTTP: pushes to ring neighbours and ownership notifications to the
//! message bank.

use super::protocol::*;
use crate::engine::peers::{BankPeers, BoxFuture, MessageEventSink};
use crate::engine::types::{PushPack, Side};
use crate::error::{BankError, BankResult};
use crate::event::types::MessageEvent;
use crate::session::types::Neighbours;

use std::time::Duration;

const PUSH_TIMEOUT: Duration = Duration::from_secs(10);
const PUSH_ATTEMPTS: usize = 3;
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);
const NOTIFY_ATTEMPTS: usize = 2;

/// POSTs a JSON payload, retrying transport failures with exponential backoff. Any
/// HTTP response, successful or not, ends the retries.
pub async fn post_with_retry<T: serde::Serialize>(
    client: &reqwest::Client,
    url: &str,
    payload: &T,
    timeout: Duration,
    attempts: usize,
) -> BankResult<reqwest::Response> {
    let mut delay_ms = 150u64;

    for attempt in 0..attempts {
        let response = client.post(url).json(payload).timeout(timeout).send().await;

        match response {
            Ok(resp) => return Ok(resp),
            Err(e) => {
                if attempt + 1 == attempts {
                    return Err(BankError::transport(format!("{}: {}", url, e)));
                }
                let jitter = rand::random::<u64>() % 50;
                tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                delay_ms = (delay_ms * 2).min(1200);
            }
        }
    }

    Err(BankError::transport(format!("{}: retry attempts exhausted", url)))
}

/// Fails on non-success statuses, keeping the server's error text.
pub async fn check_status(url: &str, response: reqwest::Response) -> BankResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
        return Err(BankError::not_ready(format!("{}: {}", url, body)));
    }
    Err(BankError::transport(format!("{} returned {}: {}", url, status, body)))
}

/// `BankPeers` over HTTP, bound to the neighbours of one session.
pub struct PeerClient {
    http_client: reqwest::Client,
    neighbours: Neighbours,
    bank_count: usize,
}

impl PeerClient {
    pub fn new(http_client: reqwest::Client, neighbours: Neighbours, bank_count: usize) -> Self {
        Self {
            http_client,
            neighbours,
            bank_count,
        }
    }

    async fn push(&self, side: Side, pack: PushPack) -> BankResult<()> {
        let neighbour = match side {
            Side::Left => self.neighbours.left.as_ref(),
            Side::Right => self.neighbours.right.as_ref(),
        };
        let Some(neighbour) = neighbour else {
            return Err(BankError::transport(format!("no {:?} neighbour", side)));
        };

        let url = format!("{}{}", neighbour, ENDPOINT_PUSH_EVENTS);
        let payload = PushEventsRequest {
            digests: pack.digests,
            events: pack.events,
        };

        let response =
            post_with_retry(&self.http_client, &url, &payload, PUSH_TIMEOUT, PUSH_ATTEMPTS).await?;
        check_status(&url, response).await?;

        tracing::debug!("Pushed {} events to {}", payload.events.len(), neighbour);
        Ok(())
    }
}

impl BankPeers for PeerClient {
    fn bank_count(&self) -> usize {
        self.bank_count
    }

    fn has_neighbour(&self) -> bool {
        !self.neighbours.is_alone()
    }

    fn push_events(&self, side: Side, pack: PushPack) -> BoxFuture<'_, BankResult<()>> {
        Box::pin(self.push(side, pack))
    }
}

/// Posts ownership changes to the message bank.
pub struct HttpMessageSink {
    http_client: reqwest::Client,
    url: String,
}

impl HttpMessageSink {
    pub fn new(http_client: reqwest::Client, message_bank: &str) -> Self {
        Self {
            http_client,
            url: format!("{}{}", message_bank.trim_end_matches('/'), ENDPOINT_MESSAGE_OWNERS),
        }
    }

    async fn post(&self, events: Vec<MessageEvent>) -> BankResult<()> {
        let payload = MessageOwnersRequest { events };
        let response = post_with_retry(
            &self.http_client,
            &self.url,
            &payload,
            NOTIFY_TIMEOUT,
            NOTIFY_ATTEMPTS,
        )
        .await?;
        check_status(&self.url, response).await?;
        Ok(())
    }
}

impl MessageEventSink for HttpMessageSink {
    fn post_message_events(&self, events: Vec<MessageEvent>) -> BoxFuture<'_, BankResult<()>> {
        Box::pin(self.post(events))
    }
}

/// Sink of a bank running without a message bank: changes are only logged.
pub struct LoggingSink;

impl MessageEventSink for LoggingSink {
    fn post_message_events(&self, events: Vec<MessageEvent>) -> BoxFuture<'_, BankResult<()>> {
        let owned = events.iter().filter(|e| e.event_id.is_some()).count();
        tracing::debug!(
            "Ownership changes: {} assigned, {} released",
            owned,
            events.len() - owned
        );
        Box::pin(async { Ok(()) })
    }
}
