//! Ezri HTTP API Service.
//!
//! This crate provides the HTTP API for session and credit accounting:
//!
//! - Profile provisioning and the two-pool minute ledger
//! - Session lifecycle with billing on completion
//! - Subscription state driven by Stripe checkout and webhooks
//! - An administrative surface for support staff
//!
//! # Authentication
//!
//! Callers present an identity provider JWT. `HS*` tokens are verified with
//! the shared secret, asymmetric tokens with the provider's JWKS. The
//! application role comes from the caller's stored profile, not the token.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::unused_async)]

pub mod auth;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod routes;
pub mod services;
pub mod state;
pub mod stripe;

pub use auth::{AdminUser, AuthUser, JwksCache};
pub use config::{PlanPrices, ServiceConfig};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
pub use stripe::{StripeClient, StripeError};
