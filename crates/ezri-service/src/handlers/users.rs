//! Profile and balance handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use validator::Validate;

use ezri_core::{Profile, Role};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::services::ledger::{self, CreditSummary, ProfileChanges, ProfileView};
use crate::state::AppState;

/// Provision the caller's profile and trial on first sign-in.
///
/// Returns 201 when the profile was created, 200 when it already existed.
pub async fn init_profile(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<(StatusCode, Json<Profile>), ApiError> {
    let outcome = ledger::ensure_profile(&state, &auth.user_id, auth.email.as_deref()).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.profile)))
}

/// The caller's profile, subscription and balance.
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ProfileView>, ApiError> {
    Ok(Json(ledger::profile_view(&state, &auth.user_id).await?))
}

/// Profile update request.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    /// Display name.
    #[validate(length(max = 200))]
    pub full_name: Option<String>,
}

/// Update the caller's descriptive profile fields.
pub async fn update_me(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiJson(body): ApiJson<UpdateProfileRequest>,
) -> Result<Json<Profile>, ApiError> {
    let changes = ProfileChanges {
        full_name: body.full_name,
        ..ProfileChanges::default()
    };
    Ok(Json(ledger::update_profile(&state, &auth.user_id, changes).await?))
}

/// Delete the caller's profile and everything it owns.
pub async fn delete_me(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<StatusCode, ApiError> {
    ledger::delete_profile(&state, &auth.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Onboarding request.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct OnboardingRequest {
    /// Display name.
    #[validate(length(min = 1, max = 200))]
    pub full_name: String,
    /// Chosen role (`user` or `therapist`).
    #[serde(default)]
    pub role: Option<Role>,
}

/// Complete onboarding.
pub async fn complete_onboarding(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiJson(body): ApiJson<OnboardingRequest>,
) -> Result<Json<Profile>, ApiError> {
    let changes = ProfileChanges {
        full_name: Some(body.full_name),
        role: body.role,
        complete_onboarding: true,
    };
    let profile = ledger::update_profile(&state, &auth.user_id, changes).await?;
    tracing::info!(user_id = %auth.user_id, role = %profile.role, "Onboarding completed");
    Ok(Json(profile))
}

/// The caller's minute balance.
pub async fn get_credits(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<CreditSummary>, ApiError> {
    Ok(Json(ledger::get_credits(&state, &auth.user_id).await?))
}
