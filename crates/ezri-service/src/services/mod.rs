//! Domain operations behind the HTTP handlers.
//!
//! Handlers parse and authorize; these functions enforce the ledger and
//! lifecycle rules against the store.

pub mod ledger;
pub mod sessions;
pub mod subscriptions;
