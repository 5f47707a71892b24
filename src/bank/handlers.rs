use axum::{
    Json, Router,
    extract::Extension,
    routing::{get, post},
};
use std::sync::Arc;

use super::protocol::*;
use crate::error::BankResult;
use crate::session::service::BankService;
use crate::session::types::BankStatus;

pub fn router(service: Arc<BankService>) -> Router {
    Router::new()
        .route(ENDPOINT_DIGESTS, post(handle_post_digests))
        .route(ENDPOINT_MESSAGE_EVENTS, post(handle_get_owning_events))
        .route(ENDPOINT_DELETE_MESSAGES, post(handle_delete_messages))
        .route(ENDPOINT_EVENTS, post(handle_get_events))
        .route(ENDPOINT_PUSH_EVENTS, post(handle_push_events))
        .route(ENDPOINT_STATUS, get(handle_status))
        .layer(Extension(service))
}

pub async fn handle_post_digests(
    Extension(service): Extension<Arc<BankService>>,
    Json(req): Json<PostDigestsRequest>,
) -> BankResult<Json<PostDigestsResponse>> {
    let events = service.post_digests(req.digests).await?;
    Ok(Json(PostDigestsResponse { events }))
}

pub async fn handle_get_owning_events(
    Extension(service): Extension<Arc<BankService>>,
    Json(req): Json<MessageIdsRequest>,
) -> BankResult<Json<OwningEventsResponse>> {
    let (events, total_message_count) = service.get_owning_events(&req.ids).await?;
    Ok(Json(OwningEventsResponse {
        events,
        total_message_count,
    }))
}

pub async fn handle_delete_messages(
    Extension(service): Extension<Arc<BankService>>,
    Json(req): Json<MessageIdsRequest>,
) -> BankResult<Json<EmptyResponse>> {
    tracing::debug!("Delete requested for {} messages", req.ids.len());
    service.delete_messages(req.ids).await?;
    Ok(Json(EmptyResponse {}))
}

pub async fn handle_get_events(
    Extension(service): Extension<Arc<BankService>>,
    Json(req): Json<GetEventsRequest>,
) -> BankResult<Json<GetEventsResponse>> {
    let events = service.get_events(&req.queries).await?;
    Ok(Json(GetEventsResponse { events }))
}

/// Neighbour push. Success tells the sender it may drop its copies.
pub async fn handle_push_events(
    Extension(service): Extension<Arc<BankService>>,
    Json(req): Json<PushEventsRequest>,
) -> BankResult<Json<EmptyResponse>> {
    let offered = req.events.len();
    let accepted = service.accept_pushed(req.digests, req.events).await?;
    tracing::debug!("Accepted {} of {} pushed events", accepted, offered);
    Ok(Json(EmptyResponse {}))
}

pub async fn handle_status(Extension(service): Extension<Arc<BankService>>) -> Json<BankStatus> {
    Json(service.status().await)
}
