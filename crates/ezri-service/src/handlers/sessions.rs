//! Session handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use validator::Validate;

use ezri_core::{
    MessageRole, NewSession, Session, SessionConfig, SessionId, SessionMessage, SessionStatus,
    SessionType, DEFAULT_SESSION_MINUTES,
};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::services::sessions::{self, EndSession, SessionEnd, TranscriptEntry};
use crate::state::AppState;

/// Session creation request.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CreateSessionRequest {
    /// `instant` (default) or `scheduled`.
    #[serde(default, alias = "type")]
    pub session_type: Option<SessionType>,
    /// Title.
    #[validate(length(max = 200))]
    pub title: Option<String>,
    /// Requested minutes (default 5).
    #[validate(range(min = 1, max = 240))]
    pub duration_minutes: Option<i64>,
    /// Planned start.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Presentation settings; unknown keys are rejected.
    #[serde(default)]
    pub config: SessionConfig,
}

impl CreateSessionRequest {
    fn into_new_session(self, forced: Option<SessionType>) -> NewSession {
        NewSession {
            session_type: forced.or(self.session_type).unwrap_or_default(),
            title: self.title,
            duration_minutes: self.duration_minutes.unwrap_or(DEFAULT_SESSION_MINUTES),
            scheduled_at: self.scheduled_at,
            config: self.config,
        }
    }
}

/// Create a session.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiJson(body): ApiJson<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let session = sessions::create_session(&state, &auth.user_id, body.into_new_session(None)).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Create a scheduled session.
pub async fn schedule_session(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiJson(body): ApiJson<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let input = body.into_new_session(Some(SessionType::Scheduled));
    let session = sessions::create_session(&state, &auth.user_id, input).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Session list filter.
#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    /// Only sessions in this state.
    pub status: Option<SessionStatus>,
}

/// List the caller's sessions, newest first.
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<Vec<Session>>, ApiError> {
    Ok(Json(
        sessions::list_sessions(&state, &auth.user_id, query.status).await?,
    ))
}

/// One of the caller's sessions.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let session_id = session_id(&id)?;
    Ok(Json(
        sessions::get_session(&state, &auth.user_id, &session_id).await?,
    ))
}

/// Session end request.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EndSessionRequest {
    /// Client-measured duration, at most one day.
    #[validate(range(min = 0, max = 86_400))]
    pub duration_seconds: Option<i64>,
    /// Recording location.
    #[validate(url)]
    pub recording_url: Option<String>,
    /// Transcript to store.
    #[serde(default)]
    pub transcript: Vec<TranscriptEntry>,
}

/// End a session and bill it.
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<EndSessionRequest>,
) -> Result<Json<SessionEnd>, ApiError> {
    let session_id = session_id(&id)?;
    let input = EndSession {
        duration_seconds: body.duration_seconds,
        recording_url: body.recording_url,
        transcript: body.transcript,
    };
    Ok(Json(
        sessions::end_session(&state, &auth.user_id, &session_id, input).await?,
    ))
}

/// Message creation request.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CreateMessageRequest {
    /// Author role.
    pub role: MessageRole,
    /// Text.
    #[validate(length(min = 1, max = 20000))]
    pub content: String,
}

/// Append a message to a session.
pub async fn create_message(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<CreateMessageRequest>,
) -> Result<(StatusCode, Json<SessionMessage>), ApiError> {
    let session_id = session_id(&id)?;
    let message =
        sessions::create_message(&state, &auth.user_id, &session_id, body.role, body.content)
            .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// A session's transcript, oldest first.
pub async fn get_transcript(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<SessionMessage>>, ApiError> {
    let session_id = session_id(&id)?;
    Ok(Json(
        sessions::transcript(&state, &auth.user_id, &session_id).await?,
    ))
}

/// Flip a session's favorite flag.
pub async fn toggle_favorite(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let session_id = session_id(&id)?;
    Ok(Json(
        sessions::toggle_favorite(&state, &auth.user_id, &session_id).await?,
    ))
}

/// A malformed id cannot name an owned session.
fn session_id(raw: &str) -> Result<SessionId, ApiError> {
    raw.parse().map_err(|_| ApiError::SessionNotFound)
}
