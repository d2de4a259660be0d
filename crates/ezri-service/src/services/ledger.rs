//! Profile and credit ledger operations.

use serde::Serialize;

use ezri_core::{CreditBalance, Deduction, PlanType, Profile, Subscription, UserId};
use ezri_store::{Provisioned, StoreError};

use crate::error::ApiError;
use crate::state::AppState;

/// Minutes available to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CreditSummary {
    /// Subscription minutes.
    pub credits: i64,
    /// Purchased top-up minutes.
    pub purchased_credits: i64,
    /// Sum of both pools.
    pub total: i64,
}

impl From<CreditBalance> for CreditSummary {
    fn from(balance: CreditBalance) -> Self {
        Self {
            credits: balance.credits,
            purchased_credits: balance.purchased_credits,
            total: balance.total(),
        }
    }
}

/// A profile with its subscription and usage, as shown on the account page.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileView {
    /// The profile.
    pub profile: Profile,
    /// The active subscription, if any.
    pub subscription: Option<Subscription>,
    /// Minute balance.
    pub credits: CreditSummary,
    /// Number of completed sessions.
    pub completed_sessions: i64,
}

/// Current minute balance of `user_id`.
pub async fn get_credits(state: &AppState, user_id: &UserId) -> Result<CreditSummary, ApiError> {
    let profile = state
        .store
        .get_profile(user_id)
        .await?
        .ok_or(ApiError::ProfileNotFound)?;
    Ok(profile.balance().into())
}

/// Create the profile and trial subscription for `user_id` if missing.
///
/// Safe to call concurrently: exactly one caller creates the profile and
/// the others receive it with `created = false`.
pub async fn ensure_profile(
    state: &AppState,
    user_id: &UserId,
    email: Option<&str>,
) -> Result<Provisioned, ApiError> {
    if let Some(profile) = state.store.get_profile(user_id).await? {
        return Ok(Provisioned {
            profile,
            created: false,
        });
    }

    let email = email
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::BadRequest("User email is required to initialize profile".into()))?;

    let now = state.clock.now();
    let outcome = state
        .store
        .provision_profile(
            &Profile::new(*user_id, email, now),
            &Subscription::trial(*user_id, now),
        )
        .await?;

    if outcome.created {
        tracing::info!(user_id = %user_id, "Profile provisioned with trial");
        state.invalidate_user(user_id).await;
    }

    Ok(outcome)
}

/// Take `minutes` from the subscription pool, then the purchased pool.
///
/// Never fails for lack of balance; the uncovered remainder is reported on
/// the returned `Deduction`.
pub async fn deduct(
    state: &AppState,
    user_id: &UserId,
    minutes: i64,
) -> Result<Deduction, ApiError> {
    let deduction = state
        .store
        .deduct_credits(user_id, minutes, state.clock.now())
        .await?;
    state.invalidate_user(user_id).await;

    tracing::info!(
        user_id = %user_id,
        minutes,
        from_credits = deduction.from_credits,
        from_purchased = deduction.from_purchased,
        uncovered = deduction.uncovered,
        "Minutes deducted"
    );
    Ok(deduction)
}

/// Reset the subscription pool to the allowance of `plan`.
pub async fn renew_credits(
    state: &AppState,
    user_id: &UserId,
    plan: PlanType,
) -> Result<CreditBalance, ApiError> {
    let balance = state
        .store
        .set_credits(user_id, plan.monthly_minutes(), state.clock.now())
        .await?;
    state.invalidate_user(user_id).await;

    tracing::info!(user_id = %user_id, plan = %plan, credits = balance.credits, "Credits renewed");
    Ok(balance)
}

/// Add bought minutes to the purchased pool.
pub async fn add_purchased_credits(
    state: &AppState,
    user_id: &UserId,
    minutes: i64,
) -> Result<CreditBalance, ApiError> {
    if minutes <= 0 {
        return Err(ApiError::validation("Minutes must be positive"));
    }

    let balance = state
        .store
        .add_purchased_credits(user_id, minutes, state.clock.now())
        .await?;
    state.invalidate_user(user_id).await;

    tracing::info!(
        user_id = %user_id,
        minutes,
        purchased_credits = balance.purchased_credits,
        "Purchased credits added"
    );
    Ok(balance)
}

/// The profile view of `user_id`, served from cache when fresh.
pub async fn profile_view(state: &AppState, user_id: &UserId) -> Result<ProfileView, ApiError> {
    if let Some(view) = state.profiles.get(user_id).await {
        return Ok(view);
    }

    let profile = state
        .store
        .get_profile(user_id)
        .await?
        .ok_or(ApiError::ProfileNotFound)?;
    let subscription = state.store.active_subscription(user_id).await?;
    let completed_sessions = state.store.count_completed_sessions(user_id).await?;

    let view = ProfileView {
        credits: profile.balance().into(),
        profile,
        subscription,
        completed_sessions,
    };
    state.profiles.insert(*user_id, view.clone()).await;
    Ok(view)
}

/// Fields a user may change on their own profile.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    /// New display name.
    pub full_name: Option<String>,
    /// New role; only self-assignable roles are accepted.
    pub role: Option<ezri_core::Role>,
    /// Mark onboarding complete.
    pub complete_onboarding: bool,
}

/// Apply `changes` to the profile of `user_id`.
pub async fn update_profile(
    state: &AppState,
    user_id: &UserId,
    changes: ProfileChanges,
) -> Result<Profile, ApiError> {
    let mut profile = state
        .store
        .get_profile(user_id)
        .await?
        .ok_or(ApiError::ProfileNotFound)?;

    if let Some(role) = changes.role {
        if !role.is_self_assignable() {
            return Err(ApiError::Forbidden(format!("Role {role} cannot be self-assigned")));
        }
        profile.role = role;
    }
    if let Some(name) = changes.full_name {
        let name = name.trim();
        profile.full_name = (!name.is_empty()).then(|| name.to_string());
    }
    if changes.complete_onboarding {
        profile.onboarding_completed = true;
    }
    profile.updated_at = state.clock.now();

    state.store.update_profile(&profile).await?;
    state.invalidate_user(user_id).await;
    Ok(profile)
}

/// Delete the profile of `user_id` and everything it owns.
pub async fn delete_profile(state: &AppState, user_id: &UserId) -> Result<(), ApiError> {
    match state.store.delete_profile(user_id).await {
        Ok(()) => {}
        Err(StoreError::NotFound { .. }) => return Err(ApiError::ProfileNotFound),
        Err(e) => return Err(e.into()),
    }
    state.invalidate_user(user_id).await;
    tracing::info!(user_id = %user_id, "Profile deleted");
    Ok(())
}
