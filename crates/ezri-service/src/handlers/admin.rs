//! Administrative handlers (`super_admin`, `org_admin`).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::Validate;

use ezri_core::{ActivityEvent, Profile, UserId};

use crate::auth::AdminUser;
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::services::ledger::{self, CreditSummary, ProfileView};
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 100;
const RECENT_ACTIVITY_LIMIT: usize = 20;

/// Paging parameters.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// 1-based page.
    pub page: Option<usize>,
    /// Page size.
    pub limit: Option<usize>,
}

/// A page of profiles.
#[derive(Debug, Serialize)]
pub struct UserPage {
    /// Profiles, newest first.
    pub users: Vec<Profile>,
    /// Page number.
    pub page: usize,
    /// Page size.
    pub limit: usize,
}

/// List profiles.
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<UserPage>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let users = state
        .store
        .list_profiles(limit, (page - 1) * limit)
        .await?;
    Ok(Json(UserPage { users, page, limit }))
}

/// A user as seen by an administrator.
#[derive(Debug, Serialize)]
pub struct UserDetail {
    /// Profile, subscription and balance.
    #[serde(flatten)]
    pub view: ProfileView,
    /// Latest activity, newest first.
    pub recent_activity: Vec<ActivityEvent>,
}

/// One user's profile view and recent activity.
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Path(user_id): Path<String>,
) -> Result<Json<UserDetail>, ApiError> {
    let user_id = target(&user_id)?;
    let view = ledger::profile_view(&state, &user_id)
        .await
        .map_err(user_not_found)?;
    let recent_activity = state
        .store
        .list_activity(&user_id, RECENT_ACTIVITY_LIMIT)
        .await?;
    Ok(Json(UserDetail {
        view,
        recent_activity,
    }))
}

/// Credit grant request.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GrantCreditsRequest {
    /// Minutes to add to the purchased pool.
    #[validate(range(min = 1, max = 10000))]
    pub minutes: i64,
    /// Why the grant was made.
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

/// Grant purchased minutes to a user.
pub async fn grant_credits(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<String>,
    ApiJson(body): ApiJson<GrantCreditsRequest>,
) -> Result<Json<CreditSummary>, ApiError> {
    let user_id = target(&user_id)?;
    let balance = ledger::add_purchased_credits(&state, &user_id, body.minutes)
        .await
        .map_err(user_not_found)?;

    tracing::info!(
        admin_id = %admin.user_id,
        user_id = %user_id,
        minutes = body.minutes,
        reason = body.reason.as_deref().unwrap_or(""),
        "Admin granted credits"
    );
    Ok(Json(balance.into()))
}

fn target(raw: &str) -> Result<UserId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::NotFound("User not found".into()))
}

fn user_not_found(err: ApiError) -> ApiError {
    match err {
        ApiError::ProfileNotFound => ApiError::NotFound("User not found".into()),
        other => other,
    }
}
