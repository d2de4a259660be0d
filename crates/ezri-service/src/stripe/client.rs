//! Stripe API client implementation.

use std::time::Duration;

use reqwest::Client;

use ezri_core::{BillingCycle, PlanType, UserId};

use super::types::{CheckoutSession, PortalSession, StripeErrorResponse, StripeSubscription};

/// Error type for Stripe operations.
#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stripe API returned an error.
    #[error("Stripe API error: {error_type} - {message}")]
    Api {
        /// Error type.
        error_type: String,
        /// Error message.
        message: String,
        /// Error code.
        code: Option<String>,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid webhook signature.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Subscription checkout request.
#[derive(Debug, Clone)]
pub struct SubscriptionCheckout<'a> {
    /// Purchasing user.
    pub user_id: UserId,
    /// Email to prefill on the checkout page.
    pub email: Option<&'a str>,
    /// Plan being bought.
    pub plan_type: PlanType,
    /// Billing cycle.
    pub billing_cycle: BillingCycle,
    /// Stripe price for the plan and cycle.
    pub price_id: &'a str,
    /// Redirect after payment.
    pub success_url: &'a str,
    /// Redirect on cancel.
    pub cancel_url: &'a str,
}

/// One-off minute pack checkout request.
#[derive(Debug, Clone)]
pub struct CreditCheckout<'a> {
    /// Purchasing user.
    pub user_id: UserId,
    /// Email to prefill on the checkout page.
    pub email: Option<&'a str>,
    /// Minutes being bought.
    pub minutes: i64,
    /// Price of one minute, in cents.
    pub unit_amount_cents: i64,
    /// Redirect after payment.
    pub success_url: &'a str,
    /// Redirect on cancel.
    pub cancel_url: &'a str,
}

/// Stripe API client.
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl StripeClient {
    /// Create a new Stripe client against `base_url` (normally
    /// `https://api.stripe.com/v1`).
    ///
    /// # Errors
    ///
    /// Returns `StripeError::Configuration` if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, StripeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StripeError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create a Checkout session for a recurring plan.
    pub async fn create_subscription_checkout(
        &self,
        req: &SubscriptionCheckout<'_>,
    ) -> Result<CheckoutSession, StripeError> {
        let user_id = req.user_id.to_string();
        let mut params = vec![
            ("mode", "subscription".to_string()),
            ("success_url", req.success_url.to_string()),
            ("cancel_url", req.cancel_url.to_string()),
            ("client_reference_id", user_id.clone()),
            ("line_items[0][price]", req.price_id.to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("metadata[user_id]", user_id.clone()),
            ("metadata[plan_type]", req.plan_type.to_string()),
            ("metadata[billing_cycle]", req.billing_cycle.to_string()),
            ("subscription_data[metadata][user_id]", user_id),
            (
                "subscription_data[metadata][plan_type]",
                req.plan_type.to_string(),
            ),
        ];
        if let Some(email) = req.email {
            params.push(("customer_email", email.to_string()));
        }

        tracing::debug!(
            user_id = %req.user_id,
            plan_type = %req.plan_type,
            billing_cycle = %req.billing_cycle,
            "Creating Stripe subscription checkout"
        );

        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&params)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Create a Checkout session for a one-off minute pack.
    pub async fn create_credit_checkout(
        &self,
        req: &CreditCheckout<'_>,
    ) -> Result<CheckoutSession, StripeError> {
        let user_id = req.user_id.to_string();
        let mut params = vec![
            ("mode", "payment".to_string()),
            ("success_url", req.success_url.to_string()),
            ("cancel_url", req.cancel_url.to_string()),
            ("client_reference_id", user_id.clone()),
            ("line_items[0][price_data][currency]", "usd".to_string()),
            (
                "line_items[0][price_data][product_data][name]",
                "Session minutes".to_string(),
            ),
            (
                "line_items[0][price_data][product_data][description]",
                format!("{} session minutes", req.minutes),
            ),
            (
                "line_items[0][price_data][unit_amount]",
                req.unit_amount_cents.to_string(),
            ),
            ("line_items[0][quantity]", req.minutes.to_string()),
            ("metadata[user_id]", user_id),
            ("metadata[type]", "credits".to_string()),
            ("metadata[minutes]", req.minutes.to_string()),
        ];
        if let Some(email) = req.email {
            params.push(("customer_email", email.to_string()));
        }

        tracing::debug!(
            user_id = %req.user_id,
            minutes = req.minutes,
            "Creating Stripe credit checkout"
        );

        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&params)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Create a billing portal session for `customer_id`.
    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, StripeError> {
        let params = [("customer", customer_id), ("return_url", return_url)];

        let response = self
            .client
            .post(format!("{}/billing_portal/sessions", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&params)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Retrieve a subscription by ID.
    pub async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<StripeSubscription, StripeError> {
        let response = self
            .client
            .get(format!("{}/subscriptions/{}", self.base_url, subscription_id))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Cancel a subscription immediately.
    pub async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<StripeSubscription, StripeError> {
        let response = self
            .client
            .delete(format!("{}/subscriptions/{}", self.base_url, subscription_id))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, StripeError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let error_body: Result<StripeErrorResponse, _> = response.json().await;

        match error_body {
            Ok(stripe_error) => Err(StripeError::Api {
                error_type: stripe_error.error.error_type,
                message: stripe_error.error.message,
                code: stripe_error.error.code,
            }),
            Err(_) => Err(StripeError::Api {
                error_type: "unknown".to_string(),
                message: format!("HTTP {status}"),
                code: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = StripeClient::new("sk_test_xxx", "http://localhost:12111/v1/").unwrap();
        assert_eq!(client.base_url, "http://localhost:12111/v1");
    }
}
