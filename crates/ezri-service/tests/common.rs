//! Common test utilities for Ezri service integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum_test::{TestResponse, TestServer};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;

use ezri_core::{
    ActivityEvent, Clock, CreditBalance, Deduction, ManualClock, Profile, Role, Session,
    SessionId, SessionMessage, SessionStatus, Subscription, UserId,
};
use ezri_service::auth::JwtClaims;
use ezri_service::{create_router, AppState, ServiceConfig};
use ezri_store::{MemoryStore, Provisioned, SessionCompletion, Store, StoreError};

/// Shared secret for HS256 test tokens.
pub const JWT_SECRET: &str = "test-jwt-secret";

/// Webhook signing secret used by tests.
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Start of every test's manual clock.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 10, 18, 0, 0).unwrap()
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The backing store, for arranging and inspecting state directly.
    pub store: Arc<MemoryStore>,
    /// The service clock.
    pub clock: Arc<ManualClock>,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
}

impl TestHarness {
    /// Create a new test harness with a fresh store.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a harness after adjusting the default test configuration.
    pub fn with_config(adjust: impl FnOnce(&mut ServiceConfig)) -> Self {
        Self::build(adjust, |store| store as Arc<dyn Store>)
    }

    /// Create a harness whose service sees the memory store through `wrap`.
    pub fn with_store(wrap: impl FnOnce(Arc<MemoryStore>) -> Arc<dyn Store>) -> Self {
        Self::build(|_| {}, wrap)
    }

    fn build(
        adjust: impl FnOnce(&mut ServiceConfig),
        wrap: impl FnOnce(Arc<MemoryStore>) -> Arc<dyn Store>,
    ) -> Self {
        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            jwt_secret: Some(JWT_SECRET.into()),
            stripe_webhook_secret: Some(WEBHOOK_SECRET.into()),
            ..ServiceConfig::default()
        };
        adjust(&mut config);

        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));

        let state = AppState::with_clock(
            wrap(store.clone()),
            config,
            clock.clone() as Arc<dyn Clock>,
        );
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            clock,
            test_user_id: UserId::generate(),
        }
    }

    /// Get the authorization header for the test user.
    pub fn user_auth_header(&self) -> String {
        auth_header_for(&self.test_user_id)
    }

    /// Provision the test user's profile through the API.
    pub async fn init_user(&self) -> TestResponse {
        self.server
            .post("/api/users/init")
            .add_header("authorization", self.user_auth_header())
            .await
    }

    /// Provision a second user and return it.
    pub async fn init_other_user(&self) -> UserId {
        let user_id = UserId::generate();
        self.server
            .post("/api/users/init")
            .add_header("authorization", auth_header_for(&user_id))
            .await
            .assert_status(axum::http::StatusCode::CREATED);
        user_id
    }

    /// Give `user_id` a stored role. Call before the user's next request so
    /// the role cache is not holding an older value.
    pub async fn set_role(&self, user_id: &UserId, role: Role) {
        let mut profile = self
            .store
            .get_profile(user_id)
            .await
            .unwrap()
            .expect("profile exists");
        profile.role = role;
        self.store.update_profile(&profile).await.unwrap();
    }

    /// Set both minute pools of the test user.
    pub async fn set_balance(&self, credits: i64, purchased: i64) {
        self.store
            .set_credits(&self.test_user_id, credits, t0())
            .await
            .unwrap();
        if purchased > 0 {
            self.store
                .add_purchased_credits(&self.test_user_id, purchased, t0())
                .await
                .unwrap();
        }
    }

    /// Create an instant session for the test user and return its id.
    pub async fn start_session(&self, duration_minutes: i64) -> String {
        let response = self
            .server
            .post("/api/sessions")
            .add_header("authorization", self.user_auth_header())
            .json(&json!({ "duration_minutes": duration_minutes }))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);
        let body: serde_json::Value = response.json();
        body["id"].as_str().unwrap().to_string()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// An HS256 token for `user_id`.
pub fn token_for(user_id: &UserId) -> String {
    let claims = JwtClaims {
        sub: user_id.to_string(),
        email: Some(format!("{user_id}@example.com")),
        role: Some("authenticated".into()),
        exp: Utc::now().timestamp() + 3600,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

/// Authorization header value for `user_id`.
pub fn auth_header_for(user_id: &UserId) -> String {
    format!("Bearer {}", token_for(user_id))
}

// ============================================================================
// Failure injection
// ============================================================================

/// Store operations a [`FaultyStore`] fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// Fail `get_profile`.
    pub profile_reads: bool,
    /// Fail `deduct_credits`.
    pub deductions: bool,
    /// Fail `append_messages`.
    pub transcripts: bool,
}

/// Delegates to a memory store except for the operations named in [`Faults`].
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    faults: Faults,
}

impl FaultyStore {
    pub fn wrap(inner: Arc<MemoryStore>, faults: Faults) -> Arc<dyn Store> {
        Arc::new(Self { inner, faults })
    }
}

fn connection_reset() -> StoreError {
    StoreError::Database("connection reset".into())
}

#[async_trait]
impl Store for FaultyStore {
    async fn get_profile(&self, user_id: &UserId) -> ezri_store::Result<Option<Profile>> {
        if self.faults.profile_reads {
            return Err(connection_reset());
        }
        self.inner.get_profile(user_id).await
    }

    async fn provision_profile(
        &self,
        profile: &Profile,
        trial: &Subscription,
    ) -> ezri_store::Result<Provisioned> {
        self.inner.provision_profile(profile, trial).await
    }

    async fn update_profile(&self, profile: &Profile) -> ezri_store::Result<()> {
        self.inner.update_profile(profile).await
    }

    async fn delete_profile(&self, user_id: &UserId) -> ezri_store::Result<()> {
        self.inner.delete_profile(user_id).await
    }

    async fn list_profiles(&self, limit: usize, offset: usize) -> ezri_store::Result<Vec<Profile>> {
        self.inner.list_profiles(limit, offset).await
    }

    async fn deduct_credits(
        &self,
        user_id: &UserId,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> ezri_store::Result<Deduction> {
        if self.faults.deductions {
            return Err(connection_reset());
        }
        self.inner.deduct_credits(user_id, minutes, now).await
    }

    async fn set_credits(
        &self,
        user_id: &UserId,
        credits: i64,
        now: DateTime<Utc>,
    ) -> ezri_store::Result<CreditBalance> {
        self.inner.set_credits(user_id, credits, now).await
    }

    async fn add_purchased_credits(
        &self,
        user_id: &UserId,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> ezri_store::Result<CreditBalance> {
        self.inner.add_purchased_credits(user_id, minutes, now).await
    }

    async fn active_subscription(&self, user_id: &UserId) -> ezri_store::Result<Option<Subscription>> {
        self.inner.active_subscription(user_id).await
    }

    async fn latest_subscription(&self, user_id: &UserId) -> ezri_store::Result<Option<Subscription>> {
        self.inner.latest_subscription(user_id).await
    }

    async fn find_subscription_by_provider_id(
        &self,
        provider_subscription_id: &str,
    ) -> ezri_store::Result<Option<Subscription>> {
        self.inner
            .find_subscription_by_provider_id(provider_subscription_id)
            .await
    }

    async fn put_subscription(&self, subscription: &Subscription) -> ezri_store::Result<()> {
        self.inner.put_subscription(subscription).await
    }

    async fn list_subscriptions(&self, user_id: &UserId) -> ezri_store::Result<Vec<Subscription>> {
        self.inner.list_subscriptions(user_id).await
    }

    async fn insert_session(&self, session: &Session) -> ezri_store::Result<()> {
        self.inner.insert_session(session).await
    }

    async fn get_session(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> ezri_store::Result<Option<Session>> {
        self.inner.get_session(user_id, session_id).await
    }

    async fn list_sessions(
        &self,
        user_id: &UserId,
        status: Option<SessionStatus>,
    ) -> ezri_store::Result<Vec<Session>> {
        self.inner.list_sessions(user_id, status).await
    }

    async fn complete_session(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        completion: SessionCompletion<'_>,
    ) -> ezri_store::Result<Option<Session>> {
        self.inner.complete_session(user_id, session_id, completion).await
    }

    async fn toggle_session_favorite(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> ezri_store::Result<Option<Session>> {
        self.inner.toggle_session_favorite(user_id, session_id, now).await
    }

    async fn count_completed_sessions(&self, user_id: &UserId) -> ezri_store::Result<i64> {
        self.inner.count_completed_sessions(user_id).await
    }

    async fn append_message(
        &self,
        message: &SessionMessage,
        activity: &ActivityEvent,
    ) -> ezri_store::Result<()> {
        self.inner.append_message(message, activity).await
    }

    async fn append_messages(&self, messages: &[SessionMessage]) -> ezri_store::Result<()> {
        if self.faults.transcripts {
            return Err(connection_reset());
        }
        self.inner.append_messages(messages).await
    }

    async fn list_messages(&self, session_id: &SessionId) -> ezri_store::Result<Vec<SessionMessage>> {
        self.inner.list_messages(session_id).await
    }

    async fn list_activity(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> ezri_store::Result<Vec<ActivityEvent>> {
        self.inner.list_activity(user_id, limit).await
    }
}
