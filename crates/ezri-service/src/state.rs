//! Application state.

use std::sync::Arc;

use chrono::Duration;

use ezri_core::{Clock, MessageIdGenerator, SystemClock, UserId};
use ezri_store::Store;

use crate::auth::{JwksCache, RoleGrant};
use crate::cache::TtlCache;
use crate::config::ServiceConfig;
use crate::services::ledger::ProfileView;
use crate::stripe::StripeClient;

/// Application state shared across handlers.
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Time source.
    pub clock: Arc<dyn Clock>,

    /// Stripe client for payments (optional).
    pub stripe: Option<Arc<StripeClient>>,

    /// Identity provider signing keys.
    pub jwks: JwksCache,

    /// Stored roles by user.
    pub roles: TtlCache<UserId, RoleGrant>,

    /// Profile views by user.
    pub profiles: TtlCache<UserId, ProfileView>,

    /// Ids for transcript messages, ordered within a millisecond.
    pub message_ids: MessageIdGenerator,
}

impl AppState {
    /// Create application state using the system clock.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create application state with an explicit time source.
    #[must_use]
    pub fn with_clock(store: Arc<dyn Store>, config: ServiceConfig, clock: Arc<dyn Clock>) -> Self {
        let stripe = config.stripe_api_key.as_ref().and_then(|key| {
            match StripeClient::new(key, config.stripe_api_base.clone()) {
                Ok(client) => {
                    tracing::info!("Stripe integration enabled");
                    Some(Arc::new(client))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create Stripe client");
                    None
                }
            }
        });

        if stripe.is_none() {
            tracing::warn!("Stripe not configured - payments will not be available");
        }
        if config.stripe_webhook_secret.is_none() {
            tracing::warn!("Stripe webhook secret not configured - webhooks will be refused");
        }

        let jwks = JwksCache::new(
            config.jwks_url(),
            Duration::seconds(config.jwks_cache_ttl_seconds),
            clock.clone(),
        );
        let roles = TtlCache::new(
            Duration::seconds(config.role_cache_ttl_seconds),
            clock.clone(),
        );
        let profiles = TtlCache::new(
            Duration::seconds(config.profile_cache_ttl_seconds),
            clock.clone(),
        );

        Self {
            store,
            config,
            clock,
            stripe,
            jwks,
            roles,
            profiles,
            message_ids: MessageIdGenerator::new(),
        }
    }

    /// Check if Stripe is configured.
    #[must_use]
    pub fn has_stripe(&self) -> bool {
        self.stripe.is_some()
    }

    /// The Stripe client, or 503 when payments are not configured.
    pub fn stripe(&self) -> Result<&StripeClient, crate::ApiError> {
        self.stripe
            .as_deref()
            .ok_or_else(|| crate::ApiError::ServiceUnavailable("Payments are not configured".into()))
    }

    /// Drop everything cached for `user_id` after a write.
    pub async fn invalidate_user(&self, user_id: &UserId) {
        self.profiles.invalidate(user_id).await;
        self.roles.invalidate(user_id).await;
    }
}
