//! PostgreSQL storage implementation.
//!
//! Enum columns are stored as their lowercase text form and parsed back on
//! read; identifiers are native `UUID` except message ids, which are ULID
//! text so that they sort chronologically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use ezri_core::{
    ActivityEvent, CreditBalance, Deduction, Profile, Session, SessionConfig, SessionId,
    SessionMessage, SessionStatus, Subscription, UserId,
};

use crate::error::{Result, StoreError};
use crate::schema::MIGRATOR;
use crate::{Provisioned, SessionCompletion, Store};

const PROFILE_COLUMNS: &str = "id, email, full_name, role, permissions, credits, \
     purchased_credits, onboarding_completed, created_at, updated_at";

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan_type, status, start_date, end_date, \
     billing_cycle, next_billing_at, provider_subscription_id, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, user_id, session_type, status, title, scheduled_at, \
     started_at, ended_at, duration_minutes, recording_url, is_favorite, config, created_at, \
     updated_at";

/// PostgreSQL-backed storage implementation.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to `database_url` with at most `max_connections` pooled
    /// connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Row types
// ============================================================================

#[derive(Debug, FromRow)]
struct ProfileRow {
    id: Uuid,
    email: String,
    full_name: Option<String>,
    role: String,
    permissions: Vec<String>,
    credits: i64,
    purchased_credits: i64,
    onboarding_completed: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = StoreError;

    fn try_from(row: ProfileRow) -> Result<Self> {
        Ok(Self {
            id: UserId::from_uuid(row.id),
            email: row.email,
            full_name: row.full_name,
            role: row.role.parse()?,
            permissions: row.permissions,
            credits: row.credits,
            purchased_credits: row.purchased_credits,
            onboarding_completed: row.onboarding_completed,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    plan_type: String,
    status: String,
    start_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
    billing_cycle: String,
    next_billing_at: Option<DateTime<Utc>>,
    provider_subscription_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self> {
        Ok(Self {
            id: row.id.into(),
            user_id: row.user_id.into(),
            plan_type: row.plan_type.parse()?,
            status: row.status.parse()?,
            start_date: row.start_date,
            end_date: row.end_date,
            billing_cycle: row.billing_cycle.parse()?,
            next_billing_at: row.next_billing_at,
            provider_subscription_id: row.provider_subscription_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: Uuid,
    session_type: String,
    status: String,
    title: String,
    scheduled_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    duration_minutes: i64,
    recording_url: Option<String>,
    is_favorite: bool,
    config: Json<SessionConfig>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for Session {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self> {
        Ok(Self {
            id: row.id.into(),
            user_id: row.user_id.into(),
            session_type: row.session_type.parse()?,
            status: row.status.parse()?,
            title: row.title,
            scheduled_at: row.scheduled_at,
            started_at: row.started_at,
            ended_at: row.ended_at,
            duration_minutes: row.duration_minutes,
            recording_url: row.recording_url,
            is_favorite: row.is_favorite,
            config: row.config.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    session_id: Uuid,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for SessionMessage {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Self {
            id: row.id.parse()?,
            session_id: row.session_id.into(),
            role: row.role.parse()?,
            content: row.content,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ActivityRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    session_id: Uuid,
    created_at: DateTime<Utc>,
}

impl TryFrom<ActivityRow> for ActivityEvent {
    type Error = StoreError;

    fn try_from(row: ActivityRow) -> Result<Self> {
        Ok(Self {
            id: row.id.into(),
            user_id: row.user_id.into(),
            kind: row.kind.parse()?,
            session_id: row.session_id.into(),
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct BalanceRow {
    credits: i64,
    purchased_credits: i64,
}

impl From<BalanceRow> for CreditBalance {
    fn from(row: BalanceRow) -> Self {
        Self::new(row.credits, row.purchased_credits)
    }
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn page(limit: usize, offset: usize) -> (i64, i64) {
    (
        i64::try_from(limit).unwrap_or(i64::MAX),
        i64::try_from(offset).unwrap_or(i64::MAX),
    )
}

async fn insert_subscription<'e, E>(executor: E, sub: &Subscription) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r"
        INSERT INTO subscriptions (
            id, user_id, plan_type, status, start_date, end_date,
            billing_cycle, next_billing_at, provider_subscription_id, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (id) DO UPDATE SET
            plan_type = EXCLUDED.plan_type,
            status = EXCLUDED.status,
            start_date = EXCLUDED.start_date,
            end_date = EXCLUDED.end_date,
            billing_cycle = EXCLUDED.billing_cycle,
            next_billing_at = EXCLUDED.next_billing_at,
            provider_subscription_id = EXCLUDED.provider_subscription_id,
            updated_at = EXCLUDED.updated_at
        ",
    )
    .bind(sub.id.as_uuid())
    .bind(sub.user_id.as_uuid())
    .bind(sub.plan_type.as_str())
    .bind(sub.status.as_str())
    .bind(sub.start_date)
    .bind(sub.end_date)
    .bind(sub.billing_cycle.as_str())
    .bind(sub.next_billing_at)
    .bind(sub.provider_subscription_id.as_deref())
    .bind(sub.created_at)
    .bind(sub.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

async fn insert_message<'e, E>(executor: E, message: &SessionMessage) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r"
        INSERT INTO session_messages (id, session_id, role, content, created_at)
        VALUES ($1, $2, $3, $4, $5)
        ",
    )
    .bind(message.id.to_string())
    .bind(message.session_id.as_uuid())
    .bind(message.role.as_str())
    .bind(&message.content)
    .bind(message.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // Profile Operations
    // =========================================================================

    async fn get_profile(&self, user_id: &UserId) -> Result<Option<Profile>> {
        let row: Option<ProfileRow> =
            sqlx::query_as(&format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1"))
                .bind(user_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        row.map(Profile::try_from).transpose()
    }

    async fn provision_profile(&self, profile: &Profile, trial: &Subscription) -> Result<Provisioned> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r"
            INSERT INTO profiles (
                id, email, full_name, role, permissions, credits, purchased_credits,
                onboarding_completed, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(profile.id.as_uuid())
        .bind(&profile.email)
        .bind(profile.full_name.as_deref())
        .bind(profile.role.as_str())
        .bind(&profile.permissions)
        .bind(profile.credits)
        .bind(profile.purchased_credits)
        .bind(profile.onboarding_completed)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if inserted {
            insert_subscription(&mut *tx, trial).await?;
        }

        let row: ProfileRow =
            sqlx::query_as(&format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1"))
                .bind(profile.id.as_uuid())
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;

        Ok(Provisioned {
            profile: row.try_into()?,
            created: inserted,
        })
    }

    async fn update_profile(&self, profile: &Profile) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE profiles
            SET email = $2, full_name = $3, role = $4, permissions = $5,
                onboarding_completed = $6, updated_at = $7
            WHERE id = $1
            ",
        )
        .bind(profile.id.as_uuid())
        .bind(&profile.email)
        .bind(profile.full_name.as_deref())
        .bind(profile.role.as_str())
        .bind(&profile.permissions)
        .bind(profile.onboarding_completed)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::profile_not_found(profile.id));
        }
        Ok(())
    }

    async fn delete_profile(&self, user_id: &UserId) -> Result<()> {
        let result = sqlx::query("DELETE FROM profiles WHERE id = $1")
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::profile_not_found(user_id));
        }
        Ok(())
    }

    async fn list_profiles(&self, limit: usize, offset: usize) -> Result<Vec<Profile>> {
        let (limit, offset) = page(limit, offset);
        let rows: Vec<ProfileRow> = sqlx::query_as(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    async fn deduct_credits(
        &self,
        user_id: &UserId,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Deduction> {
        let minutes = minutes.max(0);

        // The CTE locks the row and hands the pre-update balance to RETURNING,
        // so the split between pools is computed from the same snapshot the
        // UPDATE applied.
        let previous: Option<BalanceRow> = sqlx::query_as(
            r"
            WITH prev AS (
                SELECT id, credits, purchased_credits
                FROM profiles
                WHERE id = $1
                FOR UPDATE
            )
            UPDATE profiles p
            SET credits = GREATEST(prev.credits - $2, 0),
                purchased_credits = GREATEST(
                    prev.purchased_credits - GREATEST($2 - prev.credits, 0),
                    0
                ),
                updated_at = $3
            FROM prev
            WHERE p.id = prev.id
            RETURNING prev.credits AS credits, prev.purchased_credits AS purchased_credits
            ",
        )
        .bind(user_id.as_uuid())
        .bind(minutes)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let previous: CreditBalance = previous
            .ok_or_else(|| StoreError::profile_not_found(user_id))?
            .into();
        Ok(previous.deduct(minutes))
    }

    async fn set_credits(
        &self,
        user_id: &UserId,
        credits: i64,
        now: DateTime<Utc>,
    ) -> Result<CreditBalance> {
        let row: Option<BalanceRow> = sqlx::query_as(
            r"
            UPDATE profiles
            SET credits = GREATEST($2, 0), updated_at = $3
            WHERE id = $1
            RETURNING credits, purchased_credits
            ",
        )
        .bind(user_id.as_uuid())
        .bind(credits)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CreditBalance::from)
            .ok_or_else(|| StoreError::profile_not_found(user_id))
    }

    async fn add_purchased_credits(
        &self,
        user_id: &UserId,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<CreditBalance> {
        let row: Option<BalanceRow> = sqlx::query_as(
            r"
            UPDATE profiles
            SET purchased_credits = GREATEST(purchased_credits + $2, 0), updated_at = $3
            WHERE id = $1
            RETURNING credits, purchased_credits
            ",
        )
        .bind(user_id.as_uuid())
        .bind(minutes)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CreditBalance::from)
            .ok_or_else(|| StoreError::profile_not_found(user_id))
    }

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    async fn active_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE user_id = $1 AND status = 'active' \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn latest_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE user_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn find_subscription_by_provider_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE provider_subscription_id = $1"
        ))
        .bind(provider_subscription_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn put_subscription(&self, subscription: &Subscription) -> Result<()> {
        insert_subscription(&self.pool, subscription).await
    }

    async fn list_subscriptions(&self, user_id: &UserId) -> Result<Vec<Subscription>> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    // =========================================================================
    // Session Operations
    // =========================================================================

    async fn insert_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO sessions (
                id, user_id, session_type, status, title, scheduled_at, started_at,
                ended_at, duration_minutes, recording_url, is_favorite, config,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ",
        )
        .bind(session.id.as_uuid())
        .bind(session.user_id.as_uuid())
        .bind(session.session_type.as_str())
        .bind(session.status.as_str())
        .bind(&session.title)
        .bind(session.scheduled_at)
        .bind(session.started_at)
        .bind(session.ended_at)
        .bind(session.duration_minutes)
        .bind(session.recording_url.as_deref())
        .bind(session.is_favorite)
        .bind(Json(&session.config))
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1 AND user_id = $2"
        ))
        .bind(session_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Session::try_from).transpose()
    }

    async fn list_sessions(
        &self,
        user_id: &UserId,
        status: Option<SessionStatus>,
    ) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_id = $1 AND ($2::TEXT IS NULL OR status = $2) \
             ORDER BY created_at DESC"
        ))
        .bind(user_id.as_uuid())
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn complete_session(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        completion: SessionCompletion<'_>,
    ) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "UPDATE sessions \
             SET status = 'completed', ended_at = $3, duration_minutes = $4, \
                 recording_url = COALESCE($5, recording_url), updated_at = $3 \
             WHERE id = $1 AND user_id = $2 AND status <> 'completed' \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(session_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(completion.ended_at)
        .bind(completion.duration_minutes)
        .bind(completion.recording_url)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Session::try_from).transpose()
    }

    async fn toggle_session_favorite(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "UPDATE sessions SET is_favorite = NOT is_favorite, updated_at = $3 \
             WHERE id = $1 AND user_id = $2 \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(session_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Session::try_from).transpose()
    }

    async fn count_completed_sessions(&self, user_id: &UserId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sessions WHERE user_id = $1 AND status = 'completed'",
        )
        .bind(user_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // =========================================================================
    // Message Operations
    // =========================================================================

    async fn append_message(
        &self,
        message: &SessionMessage,
        activity: &ActivityEvent,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        insert_message(&mut *tx, message).await?;

        sqlx::query(
            r"
            INSERT INTO activity_events (id, user_id, kind, session_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(activity.id.as_uuid())
        .bind(activity.user_id.as_uuid())
        .bind(activity.kind.as_str())
        .bind(activity.session_id.as_uuid())
        .bind(activity.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn append_messages(&self, messages: &[SessionMessage]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for message in messages {
            insert_message(&mut *tx, message).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_messages(&self, session_id: &SessionId) -> Result<Vec<SessionMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r"
            SELECT id, session_id, role, content, created_at
            FROM session_messages
            WHERE session_id = $1
            ORDER BY created_at ASC, id ASC
            ",
        )
        .bind(session_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn list_activity(&self, user_id: &UserId, limit: usize) -> Result<Vec<ActivityEvent>> {
        let (limit, _) = page(limit, 0);
        let rows: Vec<ActivityRow> = sqlx::query_as(
            r"
            SELECT id, user_id, kind, session_id, created_at
            FROM activity_events
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            ",
        )
        .bind(user_id.as_uuid())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }
}
