//! Subscription types.
//!
//! A user may accumulate many subscription rows over time. The one that
//! governs access is the most recently created row whose status is
//! [`SubscriptionStatus::Active`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{SubscriptionId, UserId};

// ============================================================================
// Constants
// ============================================================================

/// Minutes granted to a trial profile.
pub const TRIAL_PLAN_MINUTES: i64 = 30;

/// Minutes granted per billing period on the Core plan.
pub const CORE_PLAN_MINUTES: i64 = 200;

/// Minutes granted per billing period on the Pro plan.
pub const PRO_PLAN_MINUTES: i64 = 400;

/// Length of the free trial in days.
pub const TRIAL_DAYS: i64 = 7;

/// Available plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    /// Seven-day trial.
    Trial,
    /// Core paid plan.
    Core,
    /// Pro paid plan.
    Pro,
}

text_enum!(PlanType, "plan type", {
    Trial => "trial",
    Core => "core",
    Pro => "pro",
});

impl PlanType {
    /// Minutes the plan grants each billing period.
    #[must_use]
    pub const fn monthly_minutes(&self) -> i64 {
        match self {
            Self::Trial => TRIAL_PLAN_MINUTES,
            Self::Core => CORE_PLAN_MINUTES,
            Self::Pro => PRO_PLAN_MINUTES,
        }
    }

    /// Whether the plan is purchasable.
    #[must_use]
    pub const fn is_paid(&self) -> bool {
        !matches!(self, Self::Trial)
    }
}

/// Status of a subscription row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Currently governs the user's access.
    Active,
    /// Cancelled by the user or the payment provider.
    Cancelled,
    /// Lapsed.
    Expired,
}

text_enum!(SubscriptionStatus, "subscription status", {
    Active => "active",
    Cancelled => "cancelled",
    Expired => "expired",
});

impl SubscriptionStatus {
    /// Map a payment provider subscription status onto ours.
    ///
    /// `active`, `trialing` and `past_due` keep access; `canceled` is a
    /// cancellation; anything else (`unpaid`, `incomplete_expired`, ...) is
    /// treated as expired.
    #[must_use]
    pub fn from_provider(status: &str) -> Self {
        match status {
            "active" | "trialing" | "past_due" => Self::Active,
            "canceled" | "cancelled" => Self::Cancelled,
            _ => Self::Expired,
        }
    }
}

/// Billing cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    /// Billed every month.
    #[default]
    Monthly,
    /// Billed every year.
    Yearly,
}

text_enum!(BillingCycle, "billing cycle", {
    Monthly => "monthly",
    Yearly => "yearly",
});

impl BillingCycle {
    /// Map a provider price interval (`month`, `year`) onto a cycle.
    #[must_use]
    pub fn from_interval(interval: &str) -> Self {
        if interval == "year" {
            Self::Yearly
        } else {
            Self::Monthly
        }
    }
}

/// A subscription record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Record identifier.
    pub id: SubscriptionId,
    /// Owner.
    pub user_id: UserId,
    /// Plan.
    pub plan_type: PlanType,
    /// Status.
    pub status: SubscriptionStatus,
    /// Start of the subscription.
    pub start_date: DateTime<Utc>,
    /// End of the subscription or current period, if known.
    pub end_date: Option<DateTime<Utc>>,
    /// Billing cadence.
    pub billing_cycle: BillingCycle,
    /// When the next renewal charge is due.
    pub next_billing_at: Option<DateTime<Utc>>,
    /// The payment provider's subscription id, for paid plans.
    pub provider_subscription_id: Option<String>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// A fresh seven-day trial starting at `now`.
    #[must_use]
    pub fn trial(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: SubscriptionId::generate(),
            user_id,
            plan_type: PlanType::Trial,
            status: SubscriptionStatus::Active,
            start_date: now,
            end_date: Some(now + Duration::days(TRIAL_DAYS)),
            billing_cycle: BillingCycle::Monthly,
            next_billing_at: None,
            provider_subscription_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A new active paid subscription.
    #[must_use]
    pub fn paid(
        user_id: UserId,
        plan_type: PlanType,
        billing_cycle: BillingCycle,
        provider_subscription_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SubscriptionId::generate(),
            user_id,
            plan_type,
            status: SubscriptionStatus::Active,
            start_date: now,
            end_date: None,
            billing_cycle,
            next_billing_at: None,
            provider_subscription_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this row currently governs access.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// Whether this is an active trial whose end date has passed.
    ///
    /// Session creation is refused while this holds.
    #[must_use]
    pub fn is_expired_trial(&self, now: DateTime<Utc>) -> bool {
        self.plan_type == PlanType::Trial
            && self.is_active()
            && self.end_date.is_some_and(|end| now > end)
    }

    /// Cancel at `now`.
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = SubscriptionStatus::Cancelled;
        self.end_date = Some(now);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn plan_minutes() {
        assert_eq!(PlanType::Trial.monthly_minutes(), 30);
        assert_eq!(PlanType::Core.monthly_minutes(), 200);
        assert_eq!(PlanType::Pro.monthly_minutes(), 400);
        assert!(!PlanType::Trial.is_paid());
        assert!(PlanType::Pro.is_paid());
    }

    #[test]
    fn trial_expires_after_seven_days() {
        let trial = Subscription::trial(UserId::generate(), t0());
        assert_eq!(trial.end_date, Some(t0() + Duration::days(7)));
        assert!(!trial.is_expired_trial(t0() + Duration::days(7)));
        assert!(trial.is_expired_trial(t0() + Duration::days(7) + Duration::seconds(1)));
    }

    #[test]
    fn cancelled_trial_is_not_an_expired_trial() {
        let mut trial = Subscription::trial(UserId::generate(), t0());
        trial.cancel(t0());
        assert!(!trial.is_expired_trial(t0() + Duration::days(30)));
        assert_eq!(trial.status, SubscriptionStatus::Cancelled);
    }

    #[test]
    fn paid_plans_never_count_as_expired_trials() {
        let sub = Subscription::paid(
            UserId::generate(),
            PlanType::Core,
            BillingCycle::Monthly,
            Some("sub_123".into()),
            t0(),
        );
        assert!(!sub.is_expired_trial(t0() + Duration::days(365)));
    }

    #[test]
    fn provider_status_mapping() {
        assert_eq!(SubscriptionStatus::from_provider("trialing"), SubscriptionStatus::Active);
        assert_eq!(SubscriptionStatus::from_provider("past_due"), SubscriptionStatus::Active);
        assert_eq!(SubscriptionStatus::from_provider("canceled"), SubscriptionStatus::Cancelled);
        assert_eq!(SubscriptionStatus::from_provider("unpaid"), SubscriptionStatus::Expired);
    }

    #[test]
    fn text_forms_parse_back() {
        assert_eq!("pro".parse::<PlanType>().unwrap(), PlanType::Pro);
        assert_eq!("yearly".parse::<BillingCycle>().unwrap(), BillingCycle::Yearly);
        assert!("gold".parse::<PlanType>().is_err());
        assert_eq!(SubscriptionStatus::Cancelled.to_string(), "cancelled");
    }
}
