//! User profiles and the minute ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PlanType, UserId};

/// Application role stored on the profile.
///
/// Distinct from any `role` claim carried in the identity token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// End user.
    #[default]
    User,
    /// Therapist.
    Therapist,
    /// Organisation administrator.
    OrgAdmin,
    /// Platform administrator.
    SuperAdmin,
}

text_enum!(Role, "role", {
    User => "user",
    Therapist => "therapist",
    OrgAdmin => "org_admin",
    SuperAdmin => "super_admin",
});

impl Role {
    /// Roles allowed on the administrative surface.
    pub const ADMINS: &'static [Role] = &[Role::SuperAdmin, Role::OrgAdmin];

    /// Whether a user may pick this role for themselves during onboarding.
    #[must_use]
    pub const fn is_self_assignable(&self) -> bool {
        matches!(self, Self::User | Self::Therapist)
    }
}

/// A user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// User id (the identity provider's subject).
    pub id: UserId,
    /// Email address.
    pub email: String,
    /// Display name.
    pub full_name: Option<String>,
    /// Application role.
    pub role: Role,
    /// Extra permission strings.
    pub permissions: Vec<String>,
    /// Subscription minutes remaining.
    pub credits: i64,
    /// Purchased top-up minutes remaining.
    pub purchased_credits: i64,
    /// Whether onboarding has been completed.
    pub onboarding_completed: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// A newly provisioned profile holding the trial allowance.
    #[must_use]
    pub fn new(id: UserId, email: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            email: email.into(),
            full_name: None,
            role: Role::User,
            permissions: Vec::new(),
            credits: PlanType::Trial.monthly_minutes(),
            purchased_credits: 0,
            onboarding_completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// The two minute pools.
    #[must_use]
    pub const fn balance(&self) -> CreditBalance {
        CreditBalance {
            credits: self.credits,
            purchased_credits: self.purchased_credits,
        }
    }
}

/// The two minute pools of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreditBalance {
    /// Subscription minutes.
    pub credits: i64,
    /// Purchased minutes.
    pub purchased_credits: i64,
}

impl CreditBalance {
    /// Create a balance.
    #[must_use]
    pub const fn new(credits: i64, purchased_credits: i64) -> Self {
        Self {
            credits,
            purchased_credits,
        }
    }

    /// Usable minutes across both pools.
    #[must_use]
    pub const fn total(&self) -> i64 {
        self.credits + self.purchased_credits
    }

    /// Whether the balance covers `minutes`.
    #[must_use]
    pub const fn covers(&self, minutes: i64) -> bool {
        self.total() >= minutes
    }

    /// Minutes missing to cover `minutes`, zero if covered.
    #[must_use]
    pub fn shortfall(&self, minutes: i64) -> i64 {
        (minutes - self.total()).max(0)
    }

    /// Consume `minutes`, subscription pool first, then purchased.
    ///
    /// Neither pool goes below zero. Whatever cannot be covered is reported
    /// as `uncovered` and otherwise dropped. Negative input consumes nothing.
    #[must_use]
    pub fn deduct(&self, minutes: i64) -> Deduction {
        let minutes = minutes.max(0);
        let credits = self.credits.max(0);
        let purchased = self.purchased_credits.max(0);

        let from_credits = minutes.min(credits);
        let from_purchased = (minutes - from_credits).min(purchased);

        Deduction {
            minutes,
            from_credits,
            from_purchased,
            uncovered: minutes - from_credits - from_purchased,
            balance: Self {
                credits: credits - from_credits,
                purchased_credits: purchased - from_purchased,
            },
        }
    }
}

/// Outcome of a deduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deduction {
    /// Minutes requested.
    pub minutes: i64,
    /// Taken from the subscription pool.
    pub from_credits: i64,
    /// Taken from the purchased pool.
    pub from_purchased: i64,
    /// Requested minutes that neither pool could cover.
    pub uncovered: i64,
    /// Balance after the deduction.
    pub balance: CreditBalance,
}
