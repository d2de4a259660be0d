//! Core types for Ezri session and credit accounting.
//!
//! This crate provides the domain types shared by the store and the HTTP service:
//!
//! - **Identifiers**: `UserId`, `SessionId`, `SubscriptionId`, `ActivityId`, `MessageId`
//! - **Profiles**: `Profile`, `Role`, `CreditBalance`, `Deduction`
//! - **Subscriptions**: `Subscription`, `PlanType`, `SubscriptionStatus`, `BillingCycle`
//! - **Sessions**: `Session`, `SessionType`, `SessionStatus`, `SessionConfig`
//! - **Messages**: `SessionMessage`, `MessageRole`, `ActivityEvent`
//! - **Time**: `Clock`, `SystemClock`, `ManualClock`
//!
//! # Minutes
//!
//! All credit amounts are whole minutes of session time, stored as `i64`.
//! A profile holds two pools: `credits` granted by the subscription plan and
//! `purchased_credits` bought as top-ups. Usable balance is their sum.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

/// Defines a fieldless enum that is stored and transmitted as a lowercase string.
///
/// Generates `as_str`, `Display`, and `FromStr` (failing with `ParseError`).
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// The canonical string form.
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err($crate::error::ParseError::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub mod clock;
pub mod error;
pub mod ids;
pub mod message;
pub mod profile;
pub mod session;
pub mod subscription;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ParseError;
pub use ids::{
    ActivityId, IdError, MessageId, MessageIdGenerator, SessionId, SubscriptionId, UserId,
};
pub use message::{ActivityEvent, ActivityKind, MessageRole, SessionMessage};
pub use profile::{CreditBalance, Deduction, Profile, Role};
pub use session::{
    minutes_for_seconds, NewSession, Session, SessionConfig, SessionStatus, SessionType,
    DEFAULT_SESSION_MINUTES,
};
pub use subscription::{
    BillingCycle, PlanType, Subscription, SubscriptionStatus, CORE_PLAN_MINUTES,
    PRO_PLAN_MINUTES, TRIAL_DAYS, TRIAL_PLAN_MINUTES,
};
