//! Storage layer for Ezri.
//!
//! Two backends implement the [`Store`] trait:
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`, used in production. Migrations are
//!   embedded (see [`schema::MIGRATOR`]).
//! - [`MemoryStore`]: a mutex-guarded in-memory store for tests and local
//!   development.
//!
//! Every operation that must not interleave with another writer is a single
//! statement or a single transaction in the PostgreSQL backend, and runs
//! under one lock acquisition in the in-memory backend:
//!
//! - provisioning a profile together with its trial subscription
//! - deducting minutes from both pools
//! - claiming a session's completion
//! - appending a message together with its activity event
//!
//! # Example
//!
//! ```no_run
//! use ezri_core::{Profile, Subscription, UserId};
//! use ezri_store::{MemoryStore, Store};
//!
//! # async fn run() -> ezri_store::Result<()> {
//! let store = MemoryStore::new();
//! let user_id = UserId::generate();
//! let now = chrono::Utc::now();
//!
//! let outcome = store
//!     .provision_profile(&Profile::new(user_id, "a@example.com", now), &Subscription::trial(user_id, now))
//!     .await?;
//! assert!(outcome.created);
//!
//! let deduction = store.deduct_credits(&user_id, 7, now).await?;
//! assert_eq!(deduction.balance.credits, 23);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ezri_core::{
    ActivityEvent, CreditBalance, Deduction, Profile, Session, SessionId, SessionMessage,
    SessionStatus, Subscription, UserId,
};

/// Result of provisioning a profile.
#[derive(Debug, Clone)]
pub struct Provisioned {
    /// The stored profile, whether new or pre-existing.
    pub profile: Profile,
    /// Whether this call created it.
    pub created: bool,
}

/// Fields written when a session completes.
#[derive(Debug, Clone)]
pub struct SessionCompletion<'a> {
    /// Completion time.
    pub ended_at: DateTime<Utc>,
    /// Minutes used.
    pub duration_minutes: i64,
    /// Recording location, if supplied.
    pub recording_url: Option<&'a str>,
}

/// The storage trait defining all database operations.
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Profile Operations
    // =========================================================================

    /// Get a profile by user ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_profile(&self, user_id: &UserId) -> Result<Option<Profile>>;

    /// Create `profile` and its `trial` subscription unless a profile with the
    /// same id exists. Both rows are written or neither is.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn provision_profile(&self, profile: &Profile, trial: &Subscription) -> Result<Provisioned>;

    /// Update the descriptive fields of a profile (email, name, role,
    /// permissions, onboarding flag). Minute balances are not touched.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the profile doesn't exist.
    async fn update_profile(&self, profile: &Profile) -> Result<()>;

    /// Delete a profile and everything it owns.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the profile doesn't exist.
    async fn delete_profile(&self, user_id: &UserId) -> Result<()>;

    /// List profiles, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_profiles(&self, limit: usize, offset: usize) -> Result<Vec<Profile>>;

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Deduct `minutes` atomically, subscription pool first, neither pool
    /// going below zero.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the profile doesn't exist.
    async fn deduct_credits(
        &self,
        user_id: &UserId,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Deduction>;

    /// Overwrite the subscription pool, leaving purchased minutes alone.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the profile doesn't exist.
    async fn set_credits(
        &self,
        user_id: &UserId,
        credits: i64,
        now: DateTime<Utc>,
    ) -> Result<CreditBalance>;

    /// Add to the purchased pool.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the profile doesn't exist.
    async fn add_purchased_credits(
        &self,
        user_id: &UserId,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<CreditBalance>;

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    /// The most recently created active subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn active_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>>;

    /// The most recently created subscription in any status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn latest_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>>;

    /// Look up a subscription by the payment provider's id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_subscription_by_provider_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<Subscription>>;

    /// Insert or update a subscription row by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// All subscription rows for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_subscriptions(&self, user_id: &UserId) -> Result<Vec<Subscription>>;

    // =========================================================================
    // Session Operations
    // =========================================================================

    /// Insert a new session.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_session(&self, session: &Session) -> Result<()>;

    /// Get a session owned by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_session(&self, user_id: &UserId, session_id: &SessionId)
        -> Result<Option<Session>>;

    /// List a user's sessions, newest first, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_sessions(
        &self,
        user_id: &UserId,
        status: Option<SessionStatus>,
    ) -> Result<Vec<Session>>;

    /// Mark a session completed if it is owned by `user_id` and not already
    /// completed. Returns the updated session, or `None` when no row was
    /// changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn complete_session(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        completion: SessionCompletion<'_>,
    ) -> Result<Option<Session>>;

    /// Flip the favorite flag of an owned session.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn toggle_session_favorite(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>>;

    /// Number of completed sessions for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn count_completed_sessions(&self, user_id: &UserId) -> Result<i64>;

    // =========================================================================
    // Message Operations
    // =========================================================================

    /// Append one message and its activity event in a single transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails; nothing is written.
    async fn append_message(&self, message: &SessionMessage, activity: &ActivityEvent)
        -> Result<()>;

    /// Append a batch of transcript messages in a single transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails; nothing is written.
    async fn append_messages(&self, messages: &[SessionMessage]) -> Result<()>;

    /// Messages of a session in chronological order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_messages(&self, session_id: &SessionId) -> Result<Vec<SessionMessage>>;

    /// Recent activity for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_activity(&self, user_id: &UserId, limit: usize) -> Result<Vec<ActivityEvent>>;
}
