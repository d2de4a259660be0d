//! Companion sessions.
//!
//! Lifecycle: `scheduled -> active -> completed`. Instant sessions are
//! created `active`; scheduled sessions wait for an external trigger to
//! start them. `started_at` is set only when a session becomes active, and
//! `ended_at` plus the final `duration_minutes` only when it completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SessionId, UserId};

/// Minutes requested when a session does not state a duration.
pub const DEFAULT_SESSION_MINUTES: i64 = 5;

/// How a session is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    /// Starts immediately.
    #[default]
    Instant,
    /// Starts at a planned time.
    Scheduled,
}

text_enum!(SessionType, "session type", {
    Instant => "instant",
    Scheduled => "scheduled",
});

impl SessionType {
    /// Title used when the caller does not supply one.
    #[must_use]
    pub const fn default_title(&self) -> &'static str {
        match self {
            Self::Instant => "Instant Session",
            Self::Scheduled => "Scheduled Session",
        }
    }
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Waiting for its start time.
    Scheduled,
    /// In progress.
    Active,
    /// Ended.
    Completed,
}

text_enum!(SessionStatus, "session status", {
    Scheduled => "scheduled",
    Active => "active",
    Completed => "completed",
});

/// Companion presentation settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Voice identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// Avatar identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Validated input for creating a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    /// Instant or scheduled.
    pub session_type: SessionType,
    /// Optional title.
    pub title: Option<String>,
    /// Requested length in minutes.
    pub duration_minutes: i64,
    /// Planned start, required for scheduled sessions.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Presentation settings.
    pub config: SessionConfig,
}

/// A companion session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Identifier.
    pub id: SessionId,
    /// Owner.
    pub user_id: UserId,
    /// Instant or scheduled.
    pub session_type: SessionType,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// Title.
    pub title: String,
    /// Planned start.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// When the session became active.
    pub started_at: Option<DateTime<Utc>>,
    /// When the session completed.
    pub ended_at: Option<DateTime<Utc>>,
    /// Requested minutes, replaced by minutes used on completion.
    pub duration_minutes: i64,
    /// Recording location supplied when the session ended.
    pub recording_url: Option<String>,
    /// Favorite flag.
    pub is_favorite: bool,
    /// Presentation settings.
    pub config: SessionConfig,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Build a session for `user_id` from validated input.
    #[must_use]
    pub fn create(user_id: UserId, input: NewSession, now: DateTime<Utc>) -> Self {
        let title = input
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| input.session_type.default_title().to_string());

        let (status, started_at) = match input.session_type {
            SessionType::Instant => (SessionStatus::Active, Some(now)),
            SessionType::Scheduled => (SessionStatus::Scheduled, None),
        };

        Self {
            id: SessionId::generate(),
            user_id,
            session_type: input.session_type,
            status,
            title,
            scheduled_at: input.scheduled_at,
            started_at,
            ended_at: None,
            duration_minutes: input.duration_minutes,
            recording_url: None,
            is_favorite: false,
            config: input.config,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the session has completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    /// Minutes to bill if the session ended at `now`.
    ///
    /// Measured from `started_at` when the session was started, otherwise
    /// from the client's `duration_seconds_hint`, otherwise zero.
    #[must_use]
    pub fn minutes_used(&self, now: DateTime<Utc>, duration_seconds_hint: Option<i64>) -> i64 {
        match (self.started_at, duration_seconds_hint) {
            (Some(started), _) => minutes_for_seconds((now - started).num_seconds()),
            (None, Some(seconds)) => minutes_for_seconds(seconds),
            (None, None) => 0,
        }
    }

    /// Mark completed at `now`, recording the minutes used.
    pub fn complete(&mut self, now: DateTime<Utc>, minutes_used: i64, recording_url: Option<String>) {
        self.status = SessionStatus::Completed;
        self.ended_at = Some(now);
        self.duration_minutes = minutes_used;
        if recording_url.is_some() {
            self.recording_url = recording_url;
        }
        self.updated_at = now;
    }
}

/// Whole minutes for `seconds`, rounding up. Negative input yields zero.
#[must_use]
pub fn minutes_for_seconds(seconds: i64) -> i64 {
    if seconds <= 0 {
        0
    } else {
        seconds / 60 + i64::from(seconds % 60 != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 18, 30, 0).unwrap()
    }

    fn instant() -> NewSession {
        NewSession {
            session_type: SessionType::Instant,
            title: None,
            duration_minutes: DEFAULT_SESSION_MINUTES,
            scheduled_at: None,
            config: SessionConfig::default(),
        }
    }

    #[test]
    fn instant_session_starts_active() {
        let s = Session::create(UserId::generate(), instant(), t0());
        assert_eq!(s.status, SessionStatus::Active);
        assert_eq!(s.started_at, Some(t0()));
        assert_eq!(s.title, "Instant Session");
        assert!(s.ended_at.is_none());
    }

    #[test]
    fn scheduled_session_waits() {
        let at = t0() + Duration::hours(2);
        let input = NewSession {
            session_type: SessionType::Scheduled,
            scheduled_at: Some(at),
            title: Some("  ".into()),
            ..instant()
        };
        let s = Session::create(UserId::generate(), input, t0());
        assert_eq!(s.status, SessionStatus::Scheduled);
        assert_eq!(s.started_at, None);
        assert_eq!(s.scheduled_at, Some(at));
        assert_eq!(s.title, "Scheduled Session");
    }

    #[test]
    fn minutes_round_up() {
        assert_eq!(minutes_for_seconds(0), 0);
        assert_eq!(minutes_for_seconds(1), 1);
        assert_eq!(minutes_for_seconds(60), 1);
        assert_eq!(minutes_for_seconds(61), 2);
        assert_eq!(minutes_for_seconds(-30), 0);
        assert_eq!(minutes_for_seconds(i64::MAX), i64::MAX / 60 + 1);
        assert_eq!(minutes_for_seconds(i64::MIN), 0);
    }

    #[test]
    fn minutes_used_prefers_started_at_over_hint() {
        let s = Session::create(UserId::generate(), instant(), t0());
        let end = t0() + Duration::seconds(7 * 60);
        assert_eq!(s.minutes_used(end, Some(3600)), 7);
        assert_eq!(s.minutes_used(end + Duration::seconds(1), None), 8);
    }

    #[test]
    fn minutes_used_falls_back_to_hint_then_zero() {
        let input = NewSession {
            session_type: SessionType::Scheduled,
            scheduled_at: Some(t0()),
            ..instant()
        };
        let s = Session::create(UserId::generate(), input, t0());
        assert_eq!(s.minutes_used(t0(), Some(125)), 3);
        assert_eq!(s.minutes_used(t0(), None), 0);
    }

    #[test]
    fn clock_skew_never_bills_negative_minutes() {
        let s = Session::create(UserId::generate(), instant(), t0());
        assert_eq!(s.minutes_used(t0() - Duration::minutes(3), None), 0);
    }

    #[test]
    fn complete_sets_end_fields() {
        let mut s = Session::create(UserId::generate(), instant(), t0());
        let end = t0() + Duration::minutes(4);
        s.complete(end, 4, Some("https://cdn.example.com/r.mp3".into()));
        assert!(s.is_completed());
        assert_eq!(s.ended_at, Some(end));
        assert_eq!(s.duration_minutes, 4);
        assert!(s.recording_url.is_some());
    }

    #[test]
    fn config_rejects_unknown_keys() {
        let ok: SessionConfig = serde_json::from_str(r#"{"voice":"calm"}"#).unwrap();
        assert_eq!(ok.voice.as_deref(), Some("calm"));
        assert!(serde_json::from_str::<SessionConfig>(r#"{"voice":"calm","mood":"x"}"#).is_err());
    }
}
