//! Stripe API types.

use std::collections::HashMap;

use serde::Deserialize;

/// Stripe Checkout session object.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    /// Session ID.
    pub id: String,
    /// Checkout URL to redirect the user to.
    #[serde(default)]
    pub url: Option<String>,
    /// `payment` or `subscription`.
    #[serde(default)]
    pub mode: Option<String>,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Subscription created by the session, in subscription mode.
    #[serde(default)]
    pub subscription: Option<String>,
    /// Client reference ID (our `user_id`).
    #[serde(default)]
    pub client_reference_id: Option<String>,
    /// Payment status.
    #[serde(default)]
    pub payment_status: Option<String>,
    /// Metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Billing portal session.
#[derive(Debug, Clone, Deserialize)]
pub struct PortalSession {
    /// Session ID.
    pub id: String,
    /// Portal URL.
    pub url: String,
}

/// Stripe subscription object.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    /// Subscription ID.
    pub id: String,
    /// Provider status (`active`, `trialing`, `past_due`, `canceled`, ...).
    pub status: String,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Current period start (Unix seconds).
    #[serde(default)]
    pub current_period_start: Option<i64>,
    /// Current period end (Unix seconds).
    #[serde(default)]
    pub current_period_end: Option<i64>,
    /// Metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Subscription items.
    #[serde(default)]
    pub items: Option<StripeList<SubscriptionItem>>,
}

impl StripeSubscription {
    /// Billing interval of the first item's price (`month`, `year`).
    #[must_use]
    pub fn interval(&self) -> Option<&str> {
        self.items
            .as_ref()?
            .data
            .first()?
            .price
            .recurring
            .as_ref()
            .map(|r| r.interval.as_str())
    }
}

/// Subscription line item.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    /// Price of the item.
    pub price: Price,
}

/// Price object.
#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    /// Price ID.
    pub id: String,
    /// Recurrence, for subscription prices.
    #[serde(default)]
    pub recurring: Option<Recurring>,
}

/// Price recurrence.
#[derive(Debug, Clone, Deserialize)]
pub struct Recurring {
    /// `month` or `year`.
    pub interval: String,
}

/// Stripe invoice object.
#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    /// Invoice ID.
    pub id: String,
    /// Subscription the invoice belongs to.
    #[serde(default)]
    pub subscription: Option<String>,
    /// Why the invoice was created (`subscription_create`, `subscription_cycle`, ...).
    #[serde(default)]
    pub billing_reason: Option<String>,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
}

/// Stripe list wrapper.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeList<T> {
    /// Items.
    pub data: Vec<T>,
    /// Whether more items exist.
    #[serde(default)]
    pub has_more: bool,
}

/// Webhook event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Event ID.
    pub id: String,
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload.
    pub data: WebhookEventData,
}

/// Webhook event payload.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    /// The object the event is about.
    pub object: serde_json::Value,
}

/// Stripe error response.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorResponse {
    /// Error details.
    pub error: StripeErrorDetail,
}

/// Stripe error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorDetail {
    /// Error type.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error message.
    #[serde(default)]
    pub message: String,
    /// Error code.
    #[serde(default)]
    pub code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_interval_from_first_item() {
        let sub: StripeSubscription = serde_json::from_value(serde_json::json!({
            "id": "sub_1",
            "status": "active",
            "current_period_end": 1_700_000_000,
            "items": {
                "data": [{ "price": { "id": "price_1", "recurring": { "interval": "year" } } }]
            }
        }))
        .unwrap();
        assert_eq!(sub.interval(), Some("year"));
    }

    #[test]
    fn subscription_without_items_has_no_interval() {
        let sub: StripeSubscription =
            serde_json::from_value(serde_json::json!({ "id": "sub_1", "status": "canceled" }))
                .unwrap();
        assert_eq!(sub.interval(), None);
    }
}
