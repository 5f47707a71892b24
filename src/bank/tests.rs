//! Bank RPC Tests
//!
//! ## Test Scopes
//! - **Routes**: digests, ownership lookups, introspection and status over real HTTP,
//!   including 503 while the bank is logging in.
//! - **Push**: delivery of an event to a neighbour bank, and failures when the
//!   neighbour is missing or not ready.
//! - **Sink**: ownership notifications reaching the message bank.

#[cfg(test)]
mod tests {
    use crate::bank::client::{HttpMessageSink, LoggingSink, PeerClient, post_with_retry};
    use crate::bank::handlers::router;
    use crate::bank::protocol::*;
    use crate::config::BankConfig;
    use crate::engine::peers::{BankPeers, MessageEventSink};
    use crate::engine::types::*;
    use crate::event::types::*;
    use crate::session::directory::StandaloneDirectory;
    use crate::session::service::BankService;
    use crate::session::types::{BankStatus, Neighbours, SessionState};
    use crate::storage::memory::MemoryStore;

    use axum::{Json, Router, extract::Extension, routing::post};
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn bank(dir: &Path, name: &str) -> Arc<BankService> {
        let mut config = BankConfig::default();
        config.cache_file = dir.join(name).to_string_lossy().into_owned();
        BankService::new(
            Arc::new(config),
            format!("http://{}", name),
            MemoryStore::new(),
            Arc::new(StandaloneDirectory),
            Arc::new(LoggingSink),
        )
    }

    fn digest(id: u64, words: &[WordId]) -> MessageDigest {
        MessageDigest {
            id: MessageId(id),
            published: now_secs() - 60,
            lang: Lang(1),
            core_words: words.to_vec(),
            event_id: None,
        }
    }

    /// POSTs digests until the engine of their language has loaded.
    async fn post_digests(client: &reqwest::Client, base: &str, digests: Vec<MessageDigest>) -> Vec<MessageEvent> {
        let url = format!("{}{}", base, ENDPOINT_DIGESTS);
        for _ in 0..200 {
            let response = client
                .post(&url)
                .json(&PostDigestsRequest {
                    digests: digests.clone(),
                })
                .send()
                .await
                .unwrap();

            if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
            assert!(response.status().is_success());
            return response.json::<PostDigestsResponse>().await.unwrap().events;
        }
        panic!("bank never became ready");
    }

    // ============================================================
    // ROUTES
    // ============================================================

    #[tokio::test]
    async fn test_routes_answer_503_while_logging_in() {
        // ARRANGE
        let dir = tempfile::tempdir().unwrap();
        let service = bank(dir.path(), "a");
        let base = serve(router(service)).await;
        let client = reqwest::Client::new();

        // ACT
        let response = client
            .post(format!("{}{}", base, ENDPOINT_MESSAGE_EVENTS))
            .json(&MessageIdsRequest {
                ids: vec![MessageId(1)],
            })
            .send()
            .await
            .unwrap();
        let status: BankStatus = client
            .get(format!("{}{}", base, ENDPOINT_STATUS))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        // ASSERT
        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("logging in"));
        assert_eq!(status.state, SessionState::LoggingIn);
    }

    #[tokio::test]
    async fn test_digest_lookup_and_introspection_over_http() {
        // ARRANGE
        let dir = tempfile::tempdir().unwrap();
        let service = bank(dir.path(), "a");
        service.login().await.unwrap();
        let base = serve(router(service.clone())).await;
        let client = reqwest::Client::new();

        // ACT
        let owners = post_digests(&client, &base, vec![digest(1, &[1, 2, 3, 4, 5])]).await;
        let event_id = owners[0].event_id.expect("digest should get an event");

        let lookup: OwningEventsResponse = client
            .post(format!("{}{}", base, ENDPOINT_MESSAGE_EVENTS))
            .json(&MessageIdsRequest {
                ids: vec![MessageId(1), MessageId(2)],
            })
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let queries = vec![
            EventQuery {
                id: event_id,
                relation: None,
                split: None,
                separate: None,
            },
            EventQuery {
                id: EventId::new(),
                relation: None,
                split: None,
                separate: None,
            },
        ];
        let events: GetEventsResponse = client
            .post(format!("{}{}", base, ENDPOINT_EVENTS))
            .json(&GetEventsRequest { queries })
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let deleted = client
            .post(format!("{}{}", base, ENDPOINT_DELETE_MESSAGES))
            .json(&MessageIdsRequest {
                ids: vec![MessageId(1)],
            })
            .send()
            .await
            .unwrap();

        // ASSERT
        assert_eq!(lookup.events[0].event_id, Some(event_id));
        assert_eq!(lookup.events[1].event_id, None);
        assert_eq!(lookup.total_message_count, 1);

        assert_eq!(events.events.len(), 1);
        assert_eq!(events.events[0].event.id, event_id);
        assert_eq!(events.events[0].event.messages.len(), 1);

        assert!(deleted.status().is_success());

        service.shutdown().await.unwrap();
    }

    // ============================================================
    // PUSH
    // ============================================================

    #[tokio::test]
    async fn test_push_hands_event_to_neighbour_bank() {
        // ARRANGE
        let dir = tempfile::tempdir().unwrap();
        let neighbour = bank(dir.path(), "b");
        neighbour.login().await.unwrap();
        let base = serve(router(neighbour.clone())).await;
        let client = reqwest::Client::new();
        post_digests(&client, &base, vec![digest(1, &[1, 2, 3])]).await;

        let peers = PeerClient::new(
            client.clone(),
            Neighbours {
                left: None,
                right: Some(base.clone()),
            },
            2,
        );
        let event_id = EventId::new();
        let mut pushed = digest(10, &[7, 8, 9]);
        pushed.event_id = Some(event_id);
        let pack = PushPack {
            digests: vec![pushed],
            events: vec![EventPushInfo {
                id: event_id,
                spin: 1,
                flags: 0,
                dissenters: 0,
            }],
        };

        // ACT
        let result = peers.push_events(Side::Right, pack).await;

        // ASSERT
        assert!(result.is_ok());
        assert!(peers.has_neighbour());
        let (owners, _) = neighbour.get_owning_events(&[MessageId(10)]).await.unwrap();
        assert_eq!(owners[0].event_id, Some(event_id));

        neighbour.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_push_fails_without_ready_neighbour() {
        // ARRANGE
        let dir = tempfile::tempdir().unwrap();
        let base = serve(router(bank(dir.path(), "b"))).await;
        let peers = PeerClient::new(
            reqwest::Client::new(),
            Neighbours {
                left: Some(base),
                right: None,
            },
            2,
        );

        // ACT
        let not_ready = peers.push_events(Side::Left, PushPack::default()).await;
        let missing = peers.push_events(Side::Right, PushPack::default()).await;

        // ASSERT
        assert!(not_ready.unwrap_err().is_not_ready());
        assert!(!missing.unwrap_err().is_not_ready());
    }

    #[tokio::test]
    async fn test_post_with_retry_gives_up_on_closed_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = post_with_retry(
            &reqwest::Client::new(),
            &format!("http://{}/anything", addr),
            &EmptyResponse {},
            Duration::from_millis(200),
            2,
        )
        .await;

        assert!(result.is_err());
    }

    // ============================================================
    // SINK
    // ============================================================

    #[tokio::test]
    async fn test_ownership_changes_reach_message_bank() {
        // ARRANGE
        let received: Arc<Mutex<Vec<MessageEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                ENDPOINT_MESSAGE_OWNERS,
                post(
                    |Extension(received): Extension<Arc<Mutex<Vec<MessageEvent>>>>,
                     Json(req): Json<MessageOwnersRequest>| async move {
                        received.lock().unwrap().extend(req.events);
                        Json(EmptyResponse {})
                    },
                ),
            )
            .layer(Extension(received.clone()));
        let base = serve(app).await;
        let sink = HttpMessageSink::new(reqwest::Client::new(), &base);

        // ACT
        let result = sink
            .post_message_events(vec![MessageEvent::unowned(MessageId(5))])
            .await;

        // ASSERT
        assert!(result.is_ok());
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].id, MessageId(5));
    }
}
