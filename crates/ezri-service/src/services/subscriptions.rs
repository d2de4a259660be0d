//! Subscription state: the current plan, cancellation, checkout, and the
//! payment provider events that drive it.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use ezri_core::{
    BillingCycle, PlanType, Subscription, SubscriptionId, SubscriptionStatus, UserId,
};

use crate::error::ApiError;
use crate::services::ledger;
use crate::state::AppState;
use crate::stripe::{
    CheckoutSession, CreditCheckout, Invoice, StripeSubscription, SubscriptionCheckout,
    WebhookEvent,
};

// ============================================================================
// Read paths
// ============================================================================

/// The plan currently governing a user.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentSubscription {
    /// Record id; `None` for the default view of a user without a record.
    pub id: Option<SubscriptionId>,
    /// Owner.
    pub user_id: UserId,
    /// Plan.
    pub plan_type: PlanType,
    /// Status.
    pub status: SubscriptionStatus,
    /// Start.
    pub start_date: DateTime<Utc>,
    /// End, if known.
    pub end_date: Option<DateTime<Utc>>,
    /// Billing cadence.
    pub billing_cycle: BillingCycle,
    /// Next renewal.
    pub next_billing_at: Option<DateTime<Utc>>,
    /// Minutes granted per period.
    pub monthly_minutes: i64,
    /// No record exists; this is the default trial view.
    pub is_default: bool,
}

impl From<Subscription> for CurrentSubscription {
    fn from(sub: Subscription) -> Self {
        Self {
            id: Some(sub.id),
            user_id: sub.user_id,
            plan_type: sub.plan_type,
            status: sub.status,
            start_date: sub.start_date,
            end_date: sub.end_date,
            billing_cycle: sub.billing_cycle,
            next_billing_at: sub.next_billing_at,
            monthly_minutes: sub.plan_type.monthly_minutes(),
            is_default: false,
        }
    }
}

/// The active subscription of `user_id`, or a default trial view.
pub async fn current(state: &AppState, user_id: &UserId) -> Result<CurrentSubscription, ApiError> {
    if let Some(sub) = state.store.active_subscription(user_id).await? {
        return Ok(sub.into());
    }

    Ok(CurrentSubscription {
        id: None,
        user_id: *user_id,
        plan_type: PlanType::Trial,
        status: SubscriptionStatus::Active,
        start_date: state.clock.now(),
        end_date: None,
        billing_cycle: BillingCycle::Monthly,
        next_billing_at: None,
        monthly_minutes: PlanType::Trial.monthly_minutes(),
        is_default: true,
    })
}

/// All subscription records of `user_id`, newest first.
pub async fn history(state: &AppState, user_id: &UserId) -> Result<Vec<Subscription>, ApiError> {
    Ok(state.store.list_subscriptions(user_id).await?)
}

/// Cancel the active subscription of `user_id`.
///
/// The provider subscription, if any, is cancelled on a best-effort basis.
pub async fn cancel(state: &AppState, user_id: &UserId) -> Result<Subscription, ApiError> {
    let mut sub = state
        .store
        .active_subscription(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Active subscription not found".into()))?;

    sub.cancel(state.clock.now());
    state.store.put_subscription(&sub).await?;
    state.invalidate_user(user_id).await;

    tracing::info!(user_id = %user_id, subscription_id = %sub.id, "Subscription cancelled");

    if let (Some(provider_id), Some(stripe)) = (&sub.provider_subscription_id, &state.stripe) {
        if let Err(e) = stripe.cancel_subscription(provider_id).await {
            tracing::error!(
                user_id = %user_id,
                provider_subscription_id = %provider_id,
                error = %e,
                "Failed to cancel provider subscription"
            );
        }
    }

    Ok(sub)
}

// ============================================================================
// Checkout
// ============================================================================

/// A hosted payment page to redirect the user to.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRedirect {
    /// Provider session id.
    pub session_id: String,
    /// Redirect URL.
    pub url: Option<String>,
}

impl From<CheckoutSession> for CheckoutRedirect {
    fn from(session: CheckoutSession) -> Self {
        Self {
            session_id: session.id,
            url: session.url,
        }
    }
}

/// Start a checkout for a paid plan.
pub async fn plan_checkout(
    state: &AppState,
    user_id: &UserId,
    email: Option<&str>,
    plan_type: PlanType,
    billing_cycle: BillingCycle,
) -> Result<CheckoutRedirect, ApiError> {
    if !plan_type.is_paid() {
        return Err(ApiError::validation("Only paid plans can be purchased"));
    }
    let stripe = state.stripe()?;
    let price_id = state
        .config
        .plan_prices
        .price_id(plan_type, billing_cycle)
        .ok_or_else(|| {
            ApiError::ServiceUnavailable(format!(
                "No price configured for {plan_type} ({billing_cycle})"
            ))
        })?;

    let success_url = format!("{}/billing?checkout=success", frontend(state));
    let cancel_url = format!("{}/billing?checkout=cancelled", frontend(state));

    let session = stripe
        .create_subscription_checkout(&SubscriptionCheckout {
            user_id: *user_id,
            email,
            plan_type,
            billing_cycle,
            price_id,
            success_url: &success_url,
            cancel_url: &cancel_url,
        })
        .await?;

    tracing::info!(user_id = %user_id, plan = %plan_type, session_id = %session.id, "Plan checkout created");
    Ok(session.into())
}

/// Start a checkout for a one-off pack of `minutes`.
pub async fn credit_checkout(
    state: &AppState,
    user_id: &UserId,
    email: Option<&str>,
    minutes: i64,
) -> Result<CheckoutRedirect, ApiError> {
    let stripe = state.stripe()?;

    let success_url = format!("{}/billing?credits=success", frontend(state));
    let cancel_url = format!("{}/billing?credits=cancelled", frontend(state));

    let session = stripe
        .create_credit_checkout(&CreditCheckout {
            user_id: *user_id,
            email,
            minutes,
            unit_amount_cents: state.config.credit_price_cents,
            success_url: &success_url,
            cancel_url: &cancel_url,
        })
        .await?;

    tracing::info!(user_id = %user_id, minutes, session_id = %session.id, "Credit checkout created");
    Ok(session.into())
}

/// A billing portal link.
#[derive(Debug, Clone, Serialize)]
pub struct PortalRedirect {
    /// Portal URL.
    pub url: String,
}

/// Open the provider billing portal for the customer behind the user's
/// paid subscription.
pub async fn portal(state: &AppState, user_id: &UserId) -> Result<PortalRedirect, ApiError> {
    let stripe = state.stripe()?;

    let provider_id = state
        .store
        .list_subscriptions(user_id)
        .await?
        .into_iter()
        .find_map(|s| s.provider_subscription_id)
        .ok_or_else(|| ApiError::BadRequest("No billing account found".into()))?;

    let remote = stripe.retrieve_subscription(&provider_id).await?;
    let customer = remote
        .customer
        .ok_or_else(|| ApiError::BadRequest("No billing account found".into()))?;

    let return_url = format!("{}/billing", frontend(state));
    let session = stripe.create_portal_session(&customer, &return_url).await?;
    Ok(PortalRedirect { url: session.url })
}

fn frontend(state: &AppState) -> &str {
    state.config.frontend_url.trim_end_matches('/')
}

// ============================================================================
// Provider events
// ============================================================================

/// What a webhook event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// State was changed.
    Applied,
    /// Nothing to do, with the reason.
    Ignored(&'static str),
}

/// Apply a verified provider event.
pub async fn apply_event(state: &AppState, event: &WebhookEvent) -> Result<EventOutcome, ApiError> {
    let object = event.data.object.clone();
    let parse = |e: serde_json::Error| ApiError::validation(format!("Malformed event object: {e}"));

    match event.event_type.as_str() {
        "checkout.session.completed" => {
            checkout_completed(state, serde_json::from_value(object).map_err(parse)?).await
        }
        "customer.subscription.updated" => {
            subscription_updated(state, serde_json::from_value(object).map_err(parse)?).await
        }
        "customer.subscription.deleted" => {
            subscription_deleted(state, serde_json::from_value(object).map_err(parse)?).await
        }
        "invoice.payment_succeeded" => {
            invoice_paid(state, serde_json::from_value(object).map_err(parse)?).await
        }
        _ => Ok(EventOutcome::Ignored("unhandled event type")),
    }
}

async fn checkout_completed(
    state: &AppState,
    session: CheckoutSession,
) -> Result<EventOutcome, ApiError> {
    let Some(user_id) = metadata(&session.metadata, &["user_id", "userId"])
        .or(session.client_reference_id.as_deref())
        .and_then(|id| id.parse::<UserId>().ok())
    else {
        tracing::warn!(session_id = %session.id, "Checkout session has no user id");
        return Ok(EventOutcome::Ignored("missing user id"));
    };

    if metadata(&session.metadata, &["type"]) == Some("credits") {
        let minutes = metadata(&session.metadata, &["minutes", "credits"])
            .and_then(|m| m.parse::<i64>().ok())
            .unwrap_or(0);
        if minutes <= 0 {
            return Ok(EventOutcome::Ignored("credit purchase without minutes"));
        }
        ledger::add_purchased_credits(state, &user_id, minutes).await?;
        return Ok(EventOutcome::Applied);
    }

    let Some(plan_type) = metadata(&session.metadata, &["plan_type", "planType"])
        .and_then(|p| p.parse::<PlanType>().ok())
    else {
        tracing::warn!(session_id = %session.id, "Checkout session has no plan type");
        return Ok(EventOutcome::Ignored("missing plan type"));
    };
    let Some(provider_id) = session.subscription.as_deref() else {
        return Ok(EventOutcome::Ignored("checkout without subscription"));
    };

    let remote = state.stripe()?.retrieve_subscription(provider_id).await?;
    let now = state.clock.now();

    let existing = match state
        .store
        .find_subscription_by_provider_id(&remote.id)
        .await?
    {
        Some(sub) => Some(sub),
        None => state.store.latest_subscription(&user_id).await?,
    };

    let billing_cycle = remote
        .interval()
        .map(BillingCycle::from_interval)
        .or_else(|| {
            metadata(&session.metadata, &["billing_cycle", "billingCycle"])
                .and_then(|c| c.parse().ok())
        })
        .unwrap_or_default();

    let mut sub = existing.unwrap_or_else(|| {
        Subscription::paid(user_id, plan_type, billing_cycle, None, now)
    });
    sub.plan_type = plan_type;
    sub.billing_cycle = billing_cycle;
    sub.provider_subscription_id = Some(remote.id.clone());
    apply_remote(&mut sub, &remote, now);
    if let Some(start) = remote.current_period_start.and_then(from_unix) {
        sub.start_date = start;
    }

    if sub.is_active() {
        retire_other_active(state, &user_id, &sub.id).await?;
    }
    state.store.put_subscription(&sub).await?;
    ledger::renew_credits(state, &user_id, plan_type).await?;

    tracing::info!(
        user_id = %user_id,
        plan = %plan_type,
        provider_subscription_id = %remote.id,
        "Subscription activated from checkout"
    );
    Ok(EventOutcome::Applied)
}

async fn subscription_updated(
    state: &AppState,
    remote: StripeSubscription,
) -> Result<EventOutcome, ApiError> {
    let Some(mut sub) = state
        .store
        .find_subscription_by_provider_id(&remote.id)
        .await?
    else {
        return Ok(EventOutcome::Ignored("unknown subscription"));
    };

    apply_remote(&mut sub, &remote, state.clock.now());
    if let Some(interval) = remote.interval() {
        sub.billing_cycle = BillingCycle::from_interval(interval);
    }
    state.store.put_subscription(&sub).await?;
    state.invalidate_user(&sub.user_id).await;

    tracing::info!(subscription_id = %sub.id, status = %sub.status, "Subscription updated");
    Ok(EventOutcome::Applied)
}

async fn subscription_deleted(
    state: &AppState,
    remote: StripeSubscription,
) -> Result<EventOutcome, ApiError> {
    let Some(mut sub) = state
        .store
        .find_subscription_by_provider_id(&remote.id)
        .await?
    else {
        return Ok(EventOutcome::Ignored("unknown subscription"));
    };

    sub.cancel(state.clock.now());
    state.store.put_subscription(&sub).await?;
    state.invalidate_user(&sub.user_id).await;

    tracing::info!(subscription_id = %sub.id, "Subscription cancelled by provider");
    Ok(EventOutcome::Applied)
}

async fn invoice_paid(state: &AppState, invoice: Invoice) -> Result<EventOutcome, ApiError> {
    if invoice.billing_reason.as_deref() == Some("subscription_create") {
        return Ok(EventOutcome::Ignored("first invoice is handled by checkout"));
    }
    let Some(provider_id) = invoice.subscription.as_deref() else {
        return Ok(EventOutcome::Ignored("invoice without subscription"));
    };

    let remote = state.stripe()?.retrieve_subscription(provider_id).await?;
    let Some(mut sub) = state
        .store
        .find_subscription_by_provider_id(&remote.id)
        .await?
    else {
        return Ok(EventOutcome::Ignored("unknown subscription"));
    };

    apply_remote(&mut sub, &remote, state.clock.now());
    state.store.put_subscription(&sub).await?;
    ledger::renew_credits(state, &sub.user_id, sub.plan_type).await?;

    tracing::info!(
        subscription_id = %sub.id,
        invoice_id = %invoice.id,
        "Subscription renewed"
    );
    Ok(EventOutcome::Applied)
}

/// Copy provider status and period end onto `sub`.
fn apply_remote(sub: &mut Subscription, remote: &StripeSubscription, now: DateTime<Utc>) {
    sub.status = SubscriptionStatus::from_provider(&remote.status);
    if let Some(end) = remote.current_period_end.and_then(from_unix) {
        sub.end_date = Some(end);
        sub.next_billing_at = Some(end);
    }
    sub.updated_at = now;
}

/// Cancel any active subscription of `user_id` other than `keep`.
async fn retire_other_active(
    state: &AppState,
    user_id: &UserId,
    keep: &SubscriptionId,
) -> Result<(), ApiError> {
    let now = state.clock.now();
    for mut other in state.store.list_subscriptions(user_id).await? {
        if other.id != *keep && other.is_active() {
            other.cancel(now);
            state.store.put_subscription(&other).await?;
        }
    }
    Ok(())
}

fn metadata<'a>(map: &'a HashMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| map.get(*k)).map(String::as_str)
}

fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}
