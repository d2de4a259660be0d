//! Payment provider webhooks.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::services::subscriptions::{self, EventOutcome};
use crate::state::AppState;
use crate::stripe::{verify_signature, WebhookEvent, DEFAULT_TOLERANCE_SECS};

/// Webhook acknowledgement.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// The event was received and verified.
    pub received: bool,
    /// Processing failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Handle Stripe webhooks.
///
/// Only a missing secret (503), a bad signature or an unparseable payload
/// (400) are rejected. Processing failures are logged and acknowledged so
/// the provider does not retry them.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let secret = state
        .config
        .stripe_webhook_secret
        .as_deref()
        .ok_or_else(|| {
            tracing::error!("Stripe webhook received but no webhook secret configured");
            ApiError::ServiceUnavailable("Webhook secret not configured".into())
        })?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Stripe signature".into()))?;

    verify_signature(
        secret,
        &body,
        signature,
        state.clock.now().timestamp(),
        DEFAULT_TOLERANCE_SECS,
    )
    .map_err(|e| {
        tracing::warn!(error = %e, "Invalid Stripe webhook signature");
        ApiError::BadRequest("Invalid webhook signature".into())
    })?;

    let event: WebhookEvent =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_type = %event.event_type,
        event_id = %event.id,
        "Received Stripe webhook"
    );

    let error = match subscriptions::apply_event(&state, &event).await {
        Ok(EventOutcome::Applied) => None,
        Ok(EventOutcome::Ignored(reason)) => {
            tracing::debug!(event_type = %event.event_type, reason, "Stripe event ignored");
            None
        }
        Err(e) => {
            tracing::error!(
                event_type = %event.event_type,
                event_id = %event.id,
                error = %e,
                "Failed to process Stripe webhook"
            );
            Some(e.to_string())
        }
    };

    Ok(Json(WebhookResponse {
        received: true,
        error,
    }))
}
