use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{self, Stream};
use muse::{ActionCacheStats, MuseError, TurnEvent};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::models::{ErrorResponse, PhaseResponse, StaleResponse, TurnRequest};
use crate::state::AppState;

/// Set by the auth layer in front of this service
const USER_HEADER: &str = "x-user-id";

pub struct ApiError(StatusCode, String);

impl From<MuseError> for ApiError {
    fn from(e: MuseError) -> Self {
        let status = match &e {
            MuseError::Validation(_) => StatusCode::BAD_REQUEST,
            MuseError::NotFound(_) => StatusCode::NOT_FOUND,
            MuseError::Provider { .. } | MuseError::Timeout(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("request failed: {}", e);
        }
        ApiError(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorResponse { error: self.1 })).into_response()
    }
}

fn user_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError(StatusCode::UNAUTHORIZED, format!("missing {USER_HEADER} header")))
}

pub async fn health_check() -> StatusCode {
    StatusCode::OK
}

/// Run a turn and stream its events as SSE
pub async fn post_turn(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<TurnRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let user = user_id(&headers)?;
    let handle = state.muse.turn(&user, &conversation_id, &payload.message).await?;
    tracing::debug!(
        user = %user,
        conversation = %conversation_id,
        phase = %handle.phase.phase,
        fallback = handle.classification.is_fallback(),
        "turn started"
    );

    // Post-processing keeps running after the response is gone
    drop(handle.background);
    Ok(Sse::new(event_stream(handle.events)).keep_alive(KeepAlive::default()))
}

fn event_stream(events: mpsc::Receiver<TurnEvent>) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(events, |mut events| async move {
        let event = events.recv().await?;
        let name = match &event {
            TurnEvent::Token { .. } => "token",
            TurnEvent::Done { .. } => "done",
        };
        Some((Event::default().event(name).json_data(&event), events))
    })
}

pub async fn get_phase(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<PhaseResponse>, ApiError> {
    let user = user_id(&headers)?;
    let report = state.muse.phase(&user).await?;
    Ok(Json(PhaseResponse { report }))
}

/// Stale memories are only reported here; deletion is a CLI admin task
pub async fn get_stale_memories(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StaleResponse>, ApiError> {
    let user = user_id(&headers)?;
    let report = state.muse.stale(&user).await?;
    Ok(Json(report.into()))
}

pub async fn get_cache_stats(State(state): State<Arc<AppState>>) -> Json<ActionCacheStats> {
    Json(state.muse.cache_stats().await)
}
