//! Session lifecycle: creation gates, completion and billing, transcripts.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use ezri_core::{
    ActivityEvent, Deduction, MessageRole, NewSession, Session, SessionId, SessionMessage,
    SessionStatus, SessionType, UserId,
};
use ezri_store::SessionCompletion;

use crate::error::ApiError;
use crate::services::ledger;
use crate::state::AppState;

/// A transcript entry supplied when a session ends.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptEntry {
    /// Author role.
    pub role: MessageRole,
    /// Text content.
    pub content: String,
    /// Client time in epoch milliseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Input for ending a session.
#[derive(Debug, Clone, Default)]
pub struct EndSession {
    /// Client-measured duration, used when the session never started.
    pub duration_seconds: Option<i64>,
    /// Recording location.
    pub recording_url: Option<String>,
    /// Transcript to persist.
    pub transcript: Vec<TranscriptEntry>,
}

/// A non-fatal problem encountered while ending a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndWarning {
    /// Minutes could not be deducted.
    CreditDeduction {
        /// What failed.
        message: String,
    },
    /// The transcript could not be stored.
    TranscriptPersist {
        /// What failed.
        message: String,
    },
    /// Minutes used that neither pool covered.
    UncoveredMinutes {
        /// Minutes absorbed.
        minutes: i64,
    },
}

/// Outcome of ending a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEnd {
    /// The completed session.
    pub session: Session,
    /// Minutes billed by this call.
    pub minutes_used: i64,
    /// The deduction applied, if any.
    pub deduction: Option<Deduction>,
    /// The session had already been completed; nothing was billed.
    pub already_completed: bool,
    /// Non-fatal problems.
    pub warnings: Vec<EndWarning>,
}

/// Create a session after checking profile, trial and balance.
pub async fn create_session(
    state: &AppState,
    user_id: &UserId,
    input: NewSession,
) -> Result<Session, ApiError> {
    if input.session_type == SessionType::Scheduled && input.scheduled_at.is_none() {
        return Err(ApiError::validation(
            "scheduled_at is required for scheduled sessions",
        ));
    }

    let now = state.clock.now();

    let profile = state
        .store
        .get_profile(user_id)
        .await?
        .ok_or(ApiError::ProfileNotFound)?;

    if let Some(subscription) = state.store.active_subscription(user_id).await? {
        if subscription.is_expired_trial(now) {
            tracing::info!(user_id = %user_id, "Session refused: trial expired");
            return Err(ApiError::TrialExpired);
        }
    }

    let balance = profile.balance();
    if !balance.covers(input.duration_minutes) {
        tracing::info!(
            user_id = %user_id,
            required = input.duration_minutes,
            available = balance.total(),
            "Session refused: insufficient credits"
        );
        return Err(ApiError::InsufficientCredits {
            required: input.duration_minutes,
            available: balance.total(),
            shortfall: balance.shortfall(input.duration_minutes),
        });
    }

    let session = Session::create(*user_id, input, now);
    state.store.insert_session(&session).await?;

    tracing::info!(
        user_id = %user_id,
        session_id = %session.id,
        session_type = %session.session_type,
        status = %session.status,
        "Session created"
    );
    Ok(session)
}

/// End a session, bill the minutes used and store the transcript.
///
/// Completion is claimed before billing, so concurrent or repeated calls
/// bill at most once. Billing and transcript failures do not fail the call;
/// they are returned as warnings.
pub async fn end_session(
    state: &AppState,
    user_id: &UserId,
    session_id: &SessionId,
    input: EndSession,
) -> Result<SessionEnd, ApiError> {
    let session = get_session(state, user_id, session_id).await?;
    if session.is_completed() {
        return Ok(already_completed(session));
    }

    let now = state.clock.now();
    let minutes_used = session.minutes_used(now, input.duration_seconds);

    let completion = SessionCompletion {
        ended_at: now,
        duration_minutes: minutes_used,
        recording_url: input.recording_url.as_deref(),
    };
    let Some(session) = state
        .store
        .complete_session(user_id, session_id, completion)
        .await?
    else {
        let session = get_session(state, user_id, session_id).await?;
        return Ok(already_completed(session));
    };

    let mut warnings = Vec::new();

    let deduction = if minutes_used > 0 {
        match ledger::deduct(state, user_id, minutes_used).await {
            Ok(deduction) => {
                if deduction.uncovered > 0 {
                    tracing::warn!(
                        user_id = %user_id,
                        session_id = %session_id,
                        uncovered = deduction.uncovered,
                        "Session used more minutes than available"
                    );
                    warnings.push(EndWarning::UncoveredMinutes {
                        minutes: deduction.uncovered,
                    });
                }
                Some(deduction)
            }
            Err(e) => {
                tracing::error!(
                    user_id = %user_id,
                    session_id = %session_id,
                    minutes_used,
                    error = %e,
                    "Failed to deduct session minutes"
                );
                warnings.push(EndWarning::CreditDeduction {
                    message: e.to_string(),
                });
                None
            }
        }
    } else {
        None
    };

    if !input.transcript.is_empty() {
        let messages: Vec<_> = input
            .transcript
            .into_iter()
            .map(|entry| transcript_message(state, session_id, entry, now))
            .collect();

        if let Err(e) = state.store.append_messages(&messages).await {
            tracing::error!(
                session_id = %session_id,
                count = messages.len(),
                error = %e,
                "Failed to store transcript"
            );
            warnings.push(EndWarning::TranscriptPersist {
                message: e.to_string(),
            });
        }
    }

    tracing::info!(
        user_id = %user_id,
        session_id = %session_id,
        minutes_used,
        warnings = warnings.len(),
        "Session ended"
    );

    Ok(SessionEnd {
        session,
        minutes_used,
        deduction,
        already_completed: false,
        warnings,
    })
}

fn already_completed(session: Session) -> SessionEnd {
    tracing::debug!(session_id = %session.id, "Session already completed");
    SessionEnd {
        session,
        minutes_used: 0,
        deduction: None,
        already_completed: true,
        warnings: Vec::new(),
    }
}

fn transcript_message(
    state: &AppState,
    session_id: &SessionId,
    entry: TranscriptEntry,
    now: DateTime<Utc>,
) -> SessionMessage {
    let at = entry
        .timestamp
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or(now);
    SessionMessage::new(*session_id, entry.role, entry.content, at)
        .with_id(state.message_ids.next(at))
}

/// Append one message to a session and record it in the activity feed.
pub async fn create_message(
    state: &AppState,
    user_id: &UserId,
    session_id: &SessionId,
    role: MessageRole,
    content: String,
) -> Result<SessionMessage, ApiError> {
    get_session(state, user_id, session_id).await?;

    let now = state.clock.now();
    let message =
        SessionMessage::new(*session_id, role, content, now).with_id(state.message_ids.next(now));
    let activity = ActivityEvent::for_message(*user_id, &message);

    state.store.append_message(&message, &activity).await?;
    Ok(message)
}

/// Flip the favorite flag of a session.
pub async fn toggle_favorite(
    state: &AppState,
    user_id: &UserId,
    session_id: &SessionId,
) -> Result<Session, ApiError> {
    state
        .store
        .toggle_session_favorite(user_id, session_id, state.clock.now())
        .await?
        .ok_or(ApiError::SessionNotFound)
}

/// A session owned by `user_id`.
pub async fn get_session(
    state: &AppState,
    user_id: &UserId,
    session_id: &SessionId,
) -> Result<Session, ApiError> {
    state
        .store
        .get_session(user_id, session_id)
        .await?
        .ok_or(ApiError::SessionNotFound)
}

/// Sessions of `user_id`, newest first.
pub async fn list_sessions(
    state: &AppState,
    user_id: &UserId,
    status: Option<SessionStatus>,
) -> Result<Vec<Session>, ApiError> {
    Ok(state.store.list_sessions(user_id, status).await?)
}

/// Transcript of a session owned by `user_id`, oldest first.
pub async fn transcript(
    state: &AppState,
    user_id: &UserId,
    session_id: &SessionId,
) -> Result<Vec<SessionMessage>, ApiError> {
    get_session(state, user_id, session_id).await?;
    Ok(state.store.list_messages(session_id).await?)
}
