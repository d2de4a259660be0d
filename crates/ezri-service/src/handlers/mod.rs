//! HTTP request handlers.

pub mod admin;
pub mod billing;
pub mod health;
pub mod sessions;
pub mod users;
pub mod webhooks;
