//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, billing, health, sessions, users, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Users (JWT auth)
/// - `POST /api/users/init` - Provision profile and trial
/// - `GET|PATCH|DELETE /api/users/me` - Profile view, update, delete
/// - `POST /api/users/onboarding` - Complete onboarding
/// - `GET /api/users/credits` - Minute balance
///
/// ## Sessions (JWT auth)
/// - `GET|POST /api/sessions` - List, create
/// - `POST /api/sessions/schedule` - Create a scheduled session
/// - `GET /api/sessions/:id` - Get
/// - `POST /api/sessions/:id/end` - End and bill
/// - `POST /api/sessions/:id/messages` - Append a message
/// - `GET /api/sessions/:id/transcript` - Transcript
/// - `POST /api/sessions/:id/favorite` - Toggle favorite
///
/// ## Billing (JWT auth)
/// - `GET /api/billing/subscription` - Current plan
/// - `POST /api/billing/subscription/cancel` - Cancel
/// - `GET /api/billing/history` - Subscription history
/// - `POST /api/billing/checkout` - Plan checkout
/// - `POST /api/billing/credits/checkout` - Minute pack checkout
/// - `POST /api/billing/portal` - Billing portal
///
/// ## Admin (JWT auth, `super_admin` or `org_admin`)
/// - `GET /api/admin/users` - List profiles
/// - `GET /api/admin/users/:user_id` - User detail
/// - `POST /api/admin/users/:user_id/credits` - Grant minutes
///
/// ## Webhooks (signature verification)
/// - `POST /api/billing/webhook` - Stripe events
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let state = Arc::new(state);

    let api_routes = Router::new()
        // Users
        .route("/users/init", post(users::init_profile))
        .route(
            "/users/me",
            get(users::get_me)
                .patch(users::update_me)
                .delete(users::delete_me),
        )
        .route("/users/onboarding", post(users::complete_onboarding))
        .route("/users/credits", get(users::get_credits))
        // Sessions
        .route(
            "/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route("/sessions/schedule", post(sessions::schedule_session))
        .route("/sessions/:id", get(sessions::get_session))
        .route("/sessions/:id/end", post(sessions::end_session))
        .route("/sessions/:id/messages", post(sessions::create_message))
        .route("/sessions/:id/transcript", get(sessions::get_transcript))
        .route("/sessions/:id/favorite", post(sessions::toggle_favorite))
        // Billing
        .route("/billing/subscription", get(billing::get_subscription))
        .route(
            "/billing/subscription/cancel",
            post(billing::cancel_subscription),
        )
        .route("/billing/history", get(billing::get_history))
        .route("/billing/checkout", post(billing::create_checkout))
        .route(
            "/billing/credits/checkout",
            post(billing::create_credit_checkout),
        )
        .route("/billing/portal", post(billing::create_portal))
        // Admin
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/:user_id", get(admin::get_user))
        .route("/admin/users/:user_id/credits", post(admin::grant_credits))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // Webhooks (no rate limit - controlled by the provider)
        .route("/api/billing/webhook", post(webhooks::stripe_webhook))
        .nest("/api", api_routes)
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
