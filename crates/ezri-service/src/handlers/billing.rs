//! Subscription and payment handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::Validate;

use ezri_core::{BillingCycle, PlanType, Subscription};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::services::subscriptions::{
    self, CheckoutRedirect, CurrentSubscription, PortalRedirect,
};
use crate::state::AppState;

/// The caller's current plan.
pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<CurrentSubscription>, ApiError> {
    Ok(Json(subscriptions::current(&state, &auth.user_id).await?))
}

/// Cancellation response.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    /// Human-readable result.
    pub message: &'static str,
    /// The cancelled subscription.
    pub subscription: Subscription,
}

/// Cancel the caller's active subscription.
pub async fn cancel_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<CancelResponse>, ApiError> {
    let subscription = subscriptions::cancel(&state, &auth.user_id).await?;
    Ok(Json(CancelResponse {
        message: "Subscription cancelled",
        subscription,
    }))
}

/// The caller's subscription records, newest first.
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Vec<Subscription>>, ApiError> {
    Ok(Json(subscriptions::history(&state, &auth.user_id).await?))
}

/// Plan checkout request.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CheckoutRequest {
    /// `core` or `pro`.
    pub plan_type: PlanType,
    /// Defaults to monthly.
    #[serde(default)]
    pub billing_cycle: BillingCycle,
}

/// Start a plan checkout.
pub async fn create_checkout(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiJson(body): ApiJson<CheckoutRequest>,
) -> Result<Json<CheckoutRedirect>, ApiError> {
    let redirect = subscriptions::plan_checkout(
        &state,
        &auth.user_id,
        auth.email.as_deref(),
        body.plan_type,
        body.billing_cycle,
    )
    .await?;
    Ok(Json(redirect))
}

/// Minute pack checkout request.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CreditCheckoutRequest {
    /// Minutes to buy.
    #[validate(range(min = 1, max = 1000))]
    pub minutes: i64,
}

/// Start a minute pack checkout.
pub async fn create_credit_checkout(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiJson(body): ApiJson<CreditCheckoutRequest>,
) -> Result<Json<CheckoutRedirect>, ApiError> {
    let redirect = subscriptions::credit_checkout(
        &state,
        &auth.user_id,
        auth.email.as_deref(),
        body.minutes,
    )
    .await?;
    Ok(Json(redirect))
}

/// Open the billing portal.
pub async fn create_portal(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<PortalRedirect>, ApiError> {
    Ok(Json(subscriptions::portal(&state, &auth.user_id).await?))
}
