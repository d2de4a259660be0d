//! Stripe integration.
//!
//! Stripe handles:
//! - Plan subscriptions and minute packs via Checkout
//! - The customer billing portal
//! - Webhook events that drive subscription state

pub mod client;
pub mod signature;
pub mod types;

pub use client::{CreditCheckout, StripeClient, StripeError, SubscriptionCheckout};
pub use signature::{sign, verify_signature, DEFAULT_TOLERANCE_SECS};
pub use types::*;
