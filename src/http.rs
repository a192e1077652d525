//! HTTP surface: the SSE stream endpoint, the storage webhook, and a few
//! JSON helpers around them.

use crate::error::RelayError;
use crate::relay::{HealthReport, Relay};
use crate::types::{Event, EventType, Timestamp};
use crate::webhook::WebhookPayload;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

/// Build the router over a shared relay.
pub fn router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route("/events/:subject_id", get(stream_events).post(publish_event))
        .route("/events/:subject_id/missed", get(missed_events))
        .route("/webhook/storage", post(storage_webhook))
        .route("/health", get(health))
        .with_state(relay)
}

/// Resolves on Ctrl-C, after cancelling every open session so streaming
/// responses end and graceful shutdown can complete.
pub async fn shutdown_signal(relay: Arc<Relay>) {
    wait_for_signal(tokio::signal::ctrl_c()).await;
    relay.shutdown_token().cancel();
}

/// Wait for the signal future. A failure to listen is logged and treated as
/// a signal.
async fn wait_for_signal<F>(signal: F)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => warn!("received shutdown signal"),
        Err(e) => warn!(error = %e, "failed to listen for shutdown signal, shutting down"),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SinceQuery {
    /// Kept as a raw string: an unusable value is corrected, not rejected.
    pub since: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub source_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub success: bool,
    pub source_key: String,
    pub occurred_at: Timestamp,
    pub persisted: bool,
    pub delivered: usize,
}

#[derive(Debug, Serialize)]
pub struct MissedResponse {
    pub count: usize,
    pub since: Timestamp,
    pub events: Vec<Event>,
}

#[derive(Debug, Serialize)]
pub struct Ack {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Error returned from JSON handlers.
#[derive(Debug)]
pub struct ApiError(RelayError);

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RelayError::MalformedKey { .. }
            | RelayError::InvalidWatermark(_)
            | RelayError::UnknownMutation(_) => StatusCode::BAD_REQUEST,
            RelayError::ObjectNotFound(_) => StatusCode::NOT_FOUND,
            e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(Ack::failed(self.0.to_string()))).into_response()
    }
}

async fn stream_events(
    State(relay): State<Arc<Relay>>,
    Path(subject_id): Path<String>,
    Query(query): Query<SinceQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    debug!(subject = %subject_id, since = ?query.since, "stream requested");
    let frames = relay.open_stream(&subject_id, query.since.as_deref());
    let stream = ReceiverStream::new(frames)
        .map(|frame| Ok::<_, Infallible>(SseEvent::default().data(frame.to_json())));
    Sse::new(stream)
}

async fn publish_event(
    State(relay): State<Arc<Relay>>,
    Path(subject_id): Path<String>,
    Json(request): Json<PublishRequest>,
) -> Result<(StatusCode, Json<PublishResponse>), ApiError> {
    let outcome = relay
        .publish(
            &subject_id,
            request.event_type,
            request.payload,
            request.source_key,
        )
        .await?;

    Ok((
        StatusCode::OK,
        Json(PublishResponse {
            success: true,
            source_key: outcome.event.source_key,
            occurred_at: outcome.event.occurred_at,
            persisted: outcome.persisted,
            delivered: outcome.broadcast.delivered,
        }),
    ))
}

async fn missed_events(
    State(relay): State<Arc<Relay>>,
    Path(subject_id): Path<String>,
    Query(query): Query<SinceQuery>,
) -> Json<MissedResponse> {
    let (since, events) = relay.missed(&subject_id, query.since.as_deref()).await;
    Json(MissedResponse {
        count: events.len(),
        since,
        events,
    })
}

/// Always acknowledges a well-formed body; processing happens off the
/// request path so the storage backend never waits on fan-out.
async fn storage_webhook(
    State(relay): State<Arc<Relay>>,
    body: Result<Json<WebhookPayload>, JsonRejection>,
) -> (StatusCode, Json<Ack>) {
    match body {
        Ok(Json(payload)) => {
            info!(event = %payload.event, key = %payload.key, "storage webhook");
            relay.submit_webhook(payload);
            (StatusCode::OK, Json(Ack::ok()))
        }
        Err(rejection) => {
            warn!(error = %rejection, "unreadable webhook body");
            (StatusCode::BAD_REQUEST, Json(Ack::failed(rejection.body_text())))
        }
    }
}

async fn health(State(relay): State<Arc<Relay>>) -> Json<HealthReport> {
    Json(relay.health())
}
