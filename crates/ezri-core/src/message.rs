//! Session transcript messages and activity events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ActivityId, MessageId, SessionId, UserId};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The end user.
    User,
    /// The AI companion.
    Assistant,
    /// System prompt or notice.
    System,
}

text_enum!(MessageRole, "message role", {
    User => "user",
    Assistant => "assistant",
    System => "system",
});

/// One transcript entry. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Identifier, time-ordered.
    pub id: MessageId,
    /// Session the message belongs to.
    pub session_id: SessionId,
    /// Author role.
    pub role: MessageRole,
    /// Text content.
    pub content: String,
    /// When the message was produced.
    pub created_at: DateTime<Utc>,
}

impl SessionMessage {
    /// A message stamped at `created_at`.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        role: MessageRole,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::at(created_at),
            session_id,
            role,
            content: content.into(),
            created_at,
        }
    }

    /// Replace the identifier, e.g. with one from a shared generator.
    #[must_use]
    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = id;
        self
    }
}

/// Kinds of activity feed events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// A message was added to a session.
    SessionMessage,
}

text_enum!(ActivityKind, "activity kind", {
    SessionMessage => "session_message",
});

/// An activity feed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// Identifier.
    pub id: ActivityId,
    /// User the event belongs to.
    pub user_id: UserId,
    /// What happened.
    pub kind: ActivityKind,
    /// The session concerned.
    pub session_id: SessionId,
    /// When it happened.
    pub created_at: DateTime<Utc>,
}

impl ActivityEvent {
    /// The event recorded alongside a new session message.
    #[must_use]
    pub fn for_message(user_id: UserId, message: &SessionMessage) -> Self {
        Self {
            id: ActivityId::generate(),
            user_id,
            kind: ActivityKind::SessionMessage,
            session_id: message.session_id,
            created_at: message.created_at,
        }
    }
}
