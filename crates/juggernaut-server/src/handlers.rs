//! HTTP handlers.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::instrument;

use juggernaut_core::ids::SessionId;
use juggernaut_core::mode::AgentMode;
use juggernaut_engine::services::Persistence;
use juggernaut_engine::SessionRequest;

use crate::error::ApiError;
use crate::event_bridge;
use crate::server::AppState;

/// Response header carrying the id of a newly started session.
pub const SESSION_ID_HEADER: &str = "x-session-id";

const DEFAULT_LIST_LIMIT: u32 = 20;
const MAX_LIST_LIMIT: u32 = 200;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    pub prompt: String,
    #[serde(default)]
    pub mode: Option<AgentMode>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_steps: Option<u32>,
    #[serde(default)]
    pub max_seconds: Option<u64>,
}

impl CreateSessionBody {
    fn into_request(self) -> Result<SessionRequest, ApiError> {
        if self.prompt.trim().is_empty() {
            return Err(ApiError::BadRequest("prompt must not be empty".into()));
        }
        if self.max_steps == Some(0) {
            return Err(ApiError::BadRequest("maxSteps must be at least 1".into()));
        }
        if matches!(self.model.as_deref(), Some(m) if m.trim().is_empty()) {
            return Err(ApiError::BadRequest("model must not be empty".into()));
        }
        Ok(SessionRequest {
            prompt: self.prompt,
            mode: self.mode,
            model: self.model,
            max_steps: self.max_steps,
            max_seconds: self.max_seconds,
            session_id: None,
        })
    }
}

/// POST /sessions: start a session and stream its events.
#[instrument(skip_all)]
pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> Result<Response, ApiError> {
    let request = body.into_request()?;
    let handle = state.controller.start(request);
    let session_id = handle.session_id.clone();
    tracing::info!(%session_id, "session accepted");

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(session_id.as_str()) {
        headers.insert(SESSION_ID_HEADER, value);
    }

    let stream = event_bridge::bridge(handle, state.sessions.clone());
    Ok((headers, Sse::new(stream).keep_alive(KeepAlive::default())).into_response())
}

/// DELETE /sessions/{id}: cancel a running session.
#[instrument(skip(state))]
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = SessionId::from_raw(id);
    if state.sessions.cancel(&id) {
        tracing::info!(session_id = %id, "session cancelled");
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(ApiError::NotFound(format!("no running session {id}")))
    }
}

/// GET /sessions/{id}: the persisted session record.
#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let persistence = persistence(&state)?;
    let id = SessionId::from_raw(id);
    let row = persistence.sessions.get(&id)?;
    Ok(Json(serde_json::json!({
        "session": row,
        "running": state.sessions.contains(&id),
    })))
}

/// GET /sessions/{id}/messages: the append-only message log.
#[instrument(skip(state))]
pub async fn session_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let persistence = persistence(&state)?;
    let id = SessionId::from_raw(id);
    // 404 for unknown sessions rather than an empty log.
    persistence.sessions.get(&id)?;
    let messages = persistence.messages.list(&id)?;
    Ok(Json(serde_json::json!({
        "sessionId": id,
        "messages": messages,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
}

/// GET /sessions: most recent sessions first.
#[instrument(skip(state))]
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let persistence = persistence(&state)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let sessions = persistence.sessions.list_recent(limit)?;
    Ok(Json(serde_json::json!({ "sessions": sessions })))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "activeSessions": state.sessions.len(),
        "persistence": state.controller.services().persistence.is_some(),
    }))
}

fn persistence(state: &AppState) -> Result<&Persistence, ApiError> {
    state
        .controller
        .services()
        .persistence
        .as_deref()
        .ok_or(ApiError::PersistenceDisabled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(json: serde_json::Value) -> CreateSessionBody {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn body_uses_camel_case() {
        let request = body(serde_json::json!({
            "prompt": "check the deploy",
            "mode": "ops",
            "maxSteps": 4,
            "maxSeconds": 30
        }))
        .into_request()
        .unwrap();
        assert_eq!(request.mode, Some(AgentMode::Ops));
        assert_eq!(request.max_steps, Some(4));
        assert_eq!(request.max_seconds, Some(30));
        assert!(request.session_id.is_none());
    }

    #[test]
    fn empty_prompt_rejected() {
        let err = body(serde_json::json!({"prompt": "   "})).into_request().unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn zero_steps_rejected() {
        let err = body(serde_json::json!({"prompt": "x", "maxSteps": 0}))
            .into_request()
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(msg) if msg.contains("maxSteps")));
    }

    #[test]
    fn unknown_mode_fails_to_parse() {
        let parsed: Result<CreateSessionBody, _> =
            serde_json::from_value(serde_json::json!({"prompt": "x", "mode": "turbo"}));
        assert!(parsed.is_err());
    }
}
