//! Database schema and migrations.
//!
//! Migrations live in `crates/ezri-store/migrations` and are embedded at
//! compile time.

use sqlx::migrate::Migrator;

/// Embedded migrations for the PostgreSQL backend.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Table names.
pub mod table {
    /// User profiles and minute balances, keyed by user id.
    pub const PROFILES: &str = "profiles";

    /// Subscription rows, many per user.
    pub const SUBSCRIPTIONS: &str = "subscriptions";

    /// Companion sessions.
    pub const SESSIONS: &str = "sessions";

    /// Transcript messages, keyed by ULID.
    pub const SESSION_MESSAGES: &str = "session_messages";

    /// Activity feed events.
    pub const ACTIVITY_EVENTS: &str = "activity_events";
}

/// All tables, children before parents.
#[must_use]
pub fn all_tables() -> Vec<&'static str> {
    vec![
        table::ACTIVITY_EVENTS,
        table::SESSION_MESSAGES,
        table::SESSIONS,
        table::SUBSCRIPTIONS,
        table::PROFILES,
    ]
}
