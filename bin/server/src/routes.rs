//! HTTP routes.
//!
//! A thin mapping onto the engine and the session store:
//!
//! - `POST /chat`: run one turn
//! - `GET /health`: liveness
//! - `GET /sessions/{session_id}/history`: latest history plus recent records
//! - `DELETE /sessions/{session_id}`: soft-delete a session

use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::fmt;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use waypoint_conversation::SessionRecord;
use waypoint_core::SessionId;

/// Records returned by the history endpoint.
const HISTORY_RECORD_LIMIT: u32 = 10;

/// Body of `POST /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub session_id: String,
}

/// Reply to `POST /chat`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub session_id: String,
    pub status: String,
}

/// Reply to `GET /sessions/{session_id}/history`.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: SessionId,
    pub history: Vec<String>,
    pub records: Vec<SessionRecord>,
}

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .route("/sessions/{session_id}/history", get(history))
        .route("/sessions/{session_id}", delete(delete_session))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn storage_error(e: impl fmt::Debug) -> ApiError {
    ApiError::Storage {
        details: format!("{e:?}"),
    }
}

fn parse_session_id(raw: &str) -> Result<SessionId, ApiError> {
    SessionId::new(raw).map_err(|_| ApiError::InvalidRequest {
        reason: "session_id is required".to_string(),
    })
}

/// Runs one conversational turn.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let session_id = parse_session_id(&request.session_id)?;
    if request.message.trim().is_empty() {
        return Err(ApiError::InvalidRequest {
            reason: "message is required".to_string(),
        });
    }

    let outcome = state
        .engine
        .process(&session_id, &request.message)
        .await
        .map_err(|e| ApiError::Engine {
            details: format!("{e:?}"),
        })?;

    Ok(Json(ChatResponse {
        answer: outcome.answer,
        session_id: session_id.to_string(),
        status: "success".to_string(),
    }))
}

/// Reports that the server and engine are up.
pub async fn health() -> Json<JsonValue> {
    Json(json!({
        "status": "healthy",
        "workflow_engine": "ready",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Returns the latest history and the newest records of a session.
pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(raw_session_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let session_id = parse_session_id(&raw_session_id)?;
    let history = state
        .store()
        .latest_history(&session_id)
        .await
        .map_err(storage_error)?;
    let records = state
        .store()
        .recent_records(&session_id, HISTORY_RECORD_LIMIT)
        .await
        .map_err(storage_error)?;

    Ok(Json(HistoryResponse {
        session_id,
        history,
        records,
    }))
}

/// Soft-deletes every active record of a session.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(raw_session_id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let session_id = parse_session_id(&raw_session_id)?;
    let deleted = state
        .store()
        .soft_delete(&session_id)
        .await
        .map_err(storage_error)?;
    tracing::info!(%session_id, deleted, "session deleted");

    Ok(Json(json!({
        "status": "deleted",
        "session_id": session_id,
        "deleted_records": deleted,
    })))
}
