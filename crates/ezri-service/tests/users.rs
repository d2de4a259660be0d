//! Profile and ledger integration tests.

mod common;

use axum::http::StatusCode;
use common::{auth_header_for, TestHarness};
use serde_json::json;

use ezri_store::Store;

// ============================================================================
// Provisioning
// ============================================================================

#[tokio::test]
async fn init_creates_profile_with_trial() {
    let harness = TestHarness::new();

    let response = harness.init_user().await;

    response.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["id"], harness.test_user_id.to_string());
    assert_eq!(body["credits"], 30);
    assert_eq!(body["purchased_credits"], 0);
    assert_eq!(body["role"], "user");

    let response = harness
        .server
        .get("/api/billing/subscription")
        .add_header("authorization", harness.user_auth_header())
        .await;
    response.assert_status_ok();
    let sub: serde_json::Value = response.json();
    assert_eq!(sub["plan_type"], "trial");
    assert_eq!(sub["status"], "active");
    assert_eq!(sub["is_default"], false);
    assert_eq!(sub["end_date"], "2024-06-17T18:00:00Z");
}

#[tokio::test]
async fn init_is_idempotent() {
    let harness = TestHarness::new();

    harness.init_user().await.assert_status(StatusCode::CREATED);

    let response = harness.init_user().await;
    response.assert_status_ok();

    let history = harness
        .server
        .get("/api/billing/history")
        .add_header("authorization", harness.user_auth_header())
        .await;
    let rows: Vec<serde_json::Value> = history.json();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn concurrent_init_creates_one_profile() {
    let harness = TestHarness::new();

    let responses = futures::future::join_all((0..8).map(|_| harness.init_user())).await;

    let created = responses
        .iter()
        .filter(|r| r.status_code() == StatusCode::CREATED)
        .count();
    assert_eq!(created, 1);
    assert!(responses
        .iter()
        .all(|r| r.status_code().is_success()));

    let subs = harness
        .store
        .list_subscriptions(&harness.test_user_id)
        .await
        .unwrap();
    assert_eq!(subs.len(), 1);
}

#[tokio::test]
async fn init_without_auth_fails() {
    let harness = TestHarness::new();

    let response = harness.server.post("/api/users/init").await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn garbage_token_is_unauthorized() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/api/users/me")
        .add_header("authorization", "Bearer not-a-jwt")
        .await;

    response.assert_status_unauthorized();
}

// ============================================================================
// Profile
// ============================================================================

#[tokio::test]
async fn me_requires_profile() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/api/users/me")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "profile_not_found");
}

#[tokio::test]
async fn me_returns_profile_view() {
    let harness = TestHarness::new();
    harness.init_user().await;

    let response = harness
        .server
        .get("/api/users/me")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["profile"]["id"], harness.test_user_id.to_string());
    assert_eq!(body["subscription"]["plan_type"], "trial");
    assert_eq!(body["credits"]["total"], 30);
    assert_eq!(body["completed_sessions"], 0);
}

#[tokio::test]
async fn update_me_changes_name_only() {
    let harness = TestHarness::new();
    harness.init_user().await;

    let response = harness
        .server
        .patch("/api/users/me")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "full_name": "Sam Rivera" }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["full_name"], "Sam Rivera");
    assert_eq!(body["credits"], 30);
}

#[tokio::test]
async fn update_me_rejects_balance_fields() {
    let harness = TestHarness::new();
    harness.init_user().await;

    let response = harness
        .server
        .patch("/api/users/me")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "credits": 9999 }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn onboarding_sets_role_and_flag() {
    let harness = TestHarness::new();
    harness.init_user().await;

    let response = harness
        .server
        .post("/api/users/onboarding")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "full_name": "Dr. Lee", "role": "therapist" }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["role"], "therapist");
    assert_eq!(body["onboarding_completed"], true);
}

#[tokio::test]
async fn onboarding_cannot_grant_admin() {
    let harness = TestHarness::new();
    harness.init_user().await;

    let response = harness
        .server
        .post("/api/users/onboarding")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "full_name": "Mallory", "role": "super_admin" }))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn delete_me_removes_everything() {
    let harness = TestHarness::new();
    harness.init_user().await;
    harness.start_session(5).await;

    harness
        .server
        .delete("/api/users/me")
        .add_header("authorization", harness.user_auth_header())
        .await
        .assert_status(StatusCode::NO_CONTENT);

    assert!(harness
        .store
        .get_profile(&harness.test_user_id)
        .await
        .unwrap()
        .is_none());
    assert!(harness
        .store
        .list_sessions(&harness.test_user_id, None)
        .await
        .unwrap()
        .is_empty());
}

// ============================================================================
// Credits
// ============================================================================

#[tokio::test]
async fn credits_report_both_pools_and_total() {
    let harness = TestHarness::new();
    harness.init_user().await;
    harness.set_balance(3, 5).await;

    let response = harness
        .server
        .get("/api/users/credits")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body, json!({ "credits": 3, "purchased_credits": 5, "total": 8 }));
}

#[tokio::test]
async fn users_are_isolated() {
    let harness = TestHarness::new();
    harness.init_user().await;
    let other = harness.init_other_user().await;
    harness.set_balance(12, 0).await;

    let response = harness
        .server
        .get("/api/users/credits")
        .add_header("authorization", auth_header_for(&other))
        .await;

    let body: serde_json::Value = response.json();
    assert_eq!(body["credits"], 30);
}
