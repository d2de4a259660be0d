//! Session lifecycle integration tests.

mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::{auth_header_for, t0, FaultyStore, Faults, TestHarness};
use serde_json::json;

use ezri_store::Store;

async fn end(harness: &TestHarness, id: &str, body: serde_json::Value) -> serde_json::Value {
    let response = harness
        .server
        .post(&format!("/api/sessions/{id}/end"))
        .add_header("authorization", harness.user_auth_header())
        .json(&body)
        .await;
    response.assert_status_ok();
    response.json()
}

async fn credits(harness: &TestHarness) -> serde_json::Value {
    harness
        .server
        .get("/api/users/credits")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json()
}

// ============================================================================
// Creation gates
// ============================================================================

#[tokio::test]
async fn create_instant_session() {
    let harness = TestHarness::new();
    harness.init_user().await;

    let response = harness
        .server
        .post("/api/sessions")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "config": { "voice": "calm", "avatar": "fox" } }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "active");
    assert_eq!(body["session_type"], "instant");
    assert_eq!(body["title"], "Instant Session");
    assert_eq!(body["duration_minutes"], 5);
    assert_eq!(body["started_at"], "2024-06-10T18:00:00Z");
    assert_eq!(body["config"]["voice"], "calm");
    assert_eq!(body["is_favorite"], false);
}

#[tokio::test]
async fn create_requires_profile() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/api/sessions")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "profile_not_found");
}

#[tokio::test]
async fn create_refused_after_trial_expires() {
    let harness = TestHarness::new();
    harness.init_user().await;
    harness.clock.advance(Duration::days(8));

    let response = harness
        .server
        .post("/api/sessions")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "trial_expired");
}

#[tokio::test]
async fn create_allowed_on_last_trial_day() {
    let harness = TestHarness::new();
    harness.init_user().await;
    harness.clock.advance(Duration::days(7));

    let response = harness
        .server
        .post("/api/sessions")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({}))
        .await;

    response.assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn create_refused_when_balance_short() {
    let harness = TestHarness::new();
    harness.init_user().await;
    harness.set_balance(2, 1).await;

    let response = harness
        .server
        .post("/api/sessions")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "duration_minutes": 5 }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "insufficient_credits");
    assert_eq!(
        body["error"]["details"],
        json!({ "required": 5, "available": 3, "shortfall": 2 })
    );
}

#[tokio::test]
async fn create_allowed_when_balance_exactly_covers() {
    let harness = TestHarness::new();
    harness.init_user().await;
    harness.set_balance(2, 3).await;

    harness.start_session(5).await;
}

#[tokio::test]
async fn create_with_empty_balance_reports_full_shortfall() {
    let harness = TestHarness::new();
    harness.init_user().await;
    harness.set_balance(0, 0).await;

    let response = harness
        .server
        .post("/api/sessions")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({}))
        .await;

    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["details"]["shortfall"], 5);
}

#[tokio::test]
async fn unknown_config_key_is_rejected() {
    let harness = TestHarness::new();
    harness.init_user().await;

    let response = harness
        .server
        .post("/api/sessions")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "config": { "voice": "calm", "temperature": 2 } }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn out_of_range_duration_is_rejected() {
    let harness = TestHarness::new();
    harness.init_user().await;

    let response = harness
        .server
        .post("/api/sessions")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "duration_minutes": 0 }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert!(body["error"]["details"]["duration_minutes"].is_array());
}

#[tokio::test]
async fn scheduled_session_requires_time() {
    let harness = TestHarness::new();
    harness.init_user().await;

    let response = harness
        .server
        .post("/api/sessions/schedule")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "title": "Evening check-in" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn scheduled_session_waits_and_bills_from_hint() {
    let harness = TestHarness::new();
    harness.init_user().await;

    let response = harness
        .server
        .post("/api/sessions/schedule")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "scheduled_at": "2024-06-11T09:00:00Z" }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let session: serde_json::Value = response.json();
    assert_eq!(session["status"], "scheduled");
    assert_eq!(session["title"], "Scheduled Session");
    assert!(session["started_at"].is_null());

    let id = session["id"].as_str().unwrap();
    let body = end(&harness, id, json!({ "duration_seconds": 125 })).await;
    assert_eq!(body["minutes_used"], 3);
    assert_eq!(credits(&harness).await["credits"], 27);
}

#[tokio::test]
async fn oversized_duration_hint_is_rejected() {
    let harness = TestHarness::new();
    harness.init_user().await;

    let session: serde_json::Value = harness
        .server
        .post("/api/sessions/schedule")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "scheduled_at": "2024-06-11T09:00:00Z" }))
        .await
        .json();
    let id = session["id"].as_str().unwrap();

    let response = harness
        .server
        .post(&format!("/api/sessions/{id}/end"))
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "duration_seconds": i64::MAX }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "validation_error");

    let stored: serde_json::Value = harness
        .server
        .get(&format!("/api/sessions/{id}"))
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(stored["status"], "scheduled");

    let body = end(&harness, id, json!({ "duration_seconds": 86_400 })).await;
    assert_eq!(body["minutes_used"], 1440);
    assert_eq!(body["warnings"][0]["kind"], "uncovered_minutes");
}

// ============================================================================
// Ending and billing
// ============================================================================

#[tokio::test]
async fn end_bills_elapsed_minutes_rounded_up() {
    let harness = TestHarness::new();
    harness.init_user().await;
    harness.set_balance(10, 0).await;
    let id = harness.start_session(5).await;

    harness.clock.advance(Duration::seconds(6 * 60 + 1));
    let body = end(&harness, &id, json!({ "duration_seconds": 30 })).await;

    assert_eq!(body["minutes_used"], 7);
    assert_eq!(body["already_completed"], false);
    assert_eq!(body["session"]["status"], "completed");
    assert_eq!(body["session"]["duration_minutes"], 7);
    assert_eq!(body["session"]["ended_at"], "2024-06-10T18:06:01Z");
    assert_eq!(body["warnings"], json!([]));
    assert_eq!(credits(&harness).await, json!({ "credits": 3, "purchased_credits": 0, "total": 3 }));
}

#[tokio::test]
async fn end_spills_into_purchased_pool() {
    let harness = TestHarness::new();
    harness.init_user().await;
    harness.set_balance(3, 5).await;
    let id = harness.start_session(5).await;

    harness.clock.advance(Duration::minutes(6));
    let body = end(&harness, &id, json!({})).await;

    assert_eq!(body["deduction"]["from_credits"], 3);
    assert_eq!(body["deduction"]["from_purchased"], 3);
    assert_eq!(credits(&harness).await, json!({ "credits": 0, "purchased_credits": 2, "total": 2 }));
}

#[tokio::test]
async fn overrun_is_absorbed_and_reported() {
    let harness = TestHarness::new();
    harness.init_user().await;
    harness.set_balance(5, 0).await;
    let id = harness.start_session(5).await;

    harness.clock.advance(Duration::minutes(10));
    let body = end(&harness, &id, json!({})).await;

    assert_eq!(body["minutes_used"], 10);
    assert_eq!(
        body["warnings"],
        json!([{ "kind": "uncovered_minutes", "minutes": 5 }])
    );
    assert_eq!(credits(&harness).await["total"], 0);
}

#[tokio::test]
async fn ending_twice_bills_once() {
    let harness = TestHarness::new();
    harness.init_user().await;
    let id = harness.start_session(5).await;

    harness.clock.advance(Duration::minutes(4));
    let first = end(&harness, &id, json!({})).await;
    assert_eq!(first["minutes_used"], 4);

    harness.clock.advance(Duration::minutes(4));
    let second = end(&harness, &id, json!({})).await;
    assert_eq!(second["already_completed"], true);
    assert_eq!(second["minutes_used"], 0);
    assert_eq!(second["session"]["duration_minutes"], 4);

    assert_eq!(credits(&harness).await["credits"], 26);
}

#[tokio::test]
async fn concurrent_ends_bill_once() {
    let harness = TestHarness::new();
    harness.init_user().await;
    let id = harness.start_session(5).await;
    harness.clock.advance(Duration::minutes(5));

    let results = futures::future::join_all((0..5).map(|_| end(&harness, &id, json!({})))).await;

    let billed = results
        .iter()
        .filter(|r| r["already_completed"] == false)
        .count();
    assert_eq!(billed, 1);
    assert_eq!(credits(&harness).await["credits"], 25);
}

#[tokio::test]
async fn cannot_end_another_users_session() {
    let harness = TestHarness::new();
    harness.init_user().await;
    let id = harness.start_session(5).await;
    let other = harness.init_other_user().await;

    let response = harness
        .server
        .post(&format!("/api/sessions/{id}/end"))
        .add_header("authorization", auth_header_for(&other))
        .json(&json!({}))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "session_not_found");
}

#[tokio::test]
async fn malformed_session_id_is_not_found() {
    let harness = TestHarness::new();
    harness.init_user().await;

    let response = harness
        .server
        .get("/api/sessions/not-a-uuid")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
}

// ============================================================================
// Transcripts and messages
// ============================================================================

#[tokio::test]
async fn transcript_round_trips_in_order() {
    let harness = TestHarness::new();
    harness.init_user().await;
    let id = harness.start_session(5).await;
    harness.clock.advance(Duration::minutes(2));

    let started = t0().timestamp_millis();
    end(
        &harness,
        &id,
        json!({
            "transcript": [
                { "role": "assistant", "content": "Hi, how are you today?", "timestamp": started + 1_000 },
                { "role": "user", "content": "A bit tired.", "timestamp": started + 5_000 },
                { "role": "assistant", "content": "Let's take a breath.", "timestamp": started + 5_000 },
                { "role": "user", "content": "Okay." }
            ]
        }),
    )
    .await;

    let response = harness
        .server
        .get(&format!("/api/sessions/{id}/transcript"))
        .add_header("authorization", harness.user_auth_header())
        .await;
    response.assert_status_ok();
    let messages: Vec<serde_json::Value> = response.json();

    let contents: Vec<_> = messages.iter().map(|m| m["content"].as_str().unwrap()).collect();
    assert_eq!(
        contents,
        ["Hi, how are you today?", "A bit tired.", "Let's take a breath.", "Okay."]
    );
    assert_eq!(messages[0]["created_at"], "2024-06-10T18:00:01Z");
    assert_eq!(messages[3]["created_at"], "2024-06-10T18:02:00Z");
}

#[tokio::test]
async fn messages_append_to_transcript() {
    let harness = TestHarness::new();
    harness.init_user().await;
    let id = harness.start_session(5).await;

    for (role, content) in [("user", "Hello"), ("assistant", "Hi there")] {
        harness
            .server
            .post(&format!("/api/sessions/{id}/messages"))
            .add_header("authorization", harness.user_auth_header())
            .json(&json!({ "role": role, "content": content }))
            .await
            .assert_status(StatusCode::CREATED);
    }

    let messages: Vec<serde_json::Value> = harness
        .server
        .get(&format!("/api/sessions/{id}/transcript"))
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["content"], "Hello");
    assert_eq!(messages[1]["role"], "assistant");

    let activity = harness
        .store
        .list_activity(&harness.test_user_id, 10)
        .await
        .unwrap();
    assert_eq!(activity.len(), 2);
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let harness = TestHarness::new();
    harness.init_user().await;
    let id = harness.start_session(5).await;

    let response = harness
        .server
        .post(&format!("/api/sessions/{id}/messages"))
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "role": "user", "content": "" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

// ============================================================================
// Listing and favorites
// ============================================================================

#[tokio::test]
async fn list_filters_by_status() {
    let harness = TestHarness::new();
    harness.init_user().await;
    let first = harness.start_session(5).await;
    harness.clock.advance(Duration::minutes(1));
    harness.start_session(5).await;
    end(&harness, &first, json!({})).await;

    let completed: Vec<serde_json::Value> = harness
        .server
        .get("/api/sessions")
        .add_query_param("status", "completed")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0]["id"], first.as_str());

    let all: Vec<serde_json::Value> = harness
        .server
        .get("/api/sessions")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(all.len(), 2);
    assert_eq!(all[1]["id"], first.as_str());
}

#[tokio::test]
async fn favorite_toggles() {
    let harness = TestHarness::new();
    harness.init_user().await;
    let id = harness.start_session(5).await;

    for expected in [true, false] {
        let body: serde_json::Value = harness
            .server
            .post(&format!("/api/sessions/{id}/favorite"))
            .add_header("authorization", harness.user_auth_header())
            .await
            .json();
        assert_eq!(body["is_favorite"], expected);
    }
}

// ============================================================================
// Best-effort billing
// ============================================================================

#[tokio::test]
async fn failed_deduction_still_ends_session_with_warning() {
    let harness = TestHarness::with_store(|store| {
        FaultyStore::wrap(store, Faults { deductions: true, ..Faults::default() })
    });
    harness.init_user().await;
    let id = harness.start_session(5).await;
    harness.clock.advance(Duration::minutes(3));

    let body = end(
        &harness,
        &id,
        json!({ "transcript": [{ "role": "user", "content": "Thanks" }] }),
    )
    .await;

    assert_eq!(body["session"]["status"], "completed");
    assert_eq!(body["minutes_used"], 3);
    assert!(body["deduction"].is_null());
    assert_eq!(body["warnings"][0]["kind"], "credit_deduction");

    let messages = harness
        .store
        .list_messages(&id.parse().unwrap())
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(credits(&harness).await["credits"], 30);
}

#[tokio::test]
async fn failed_transcript_write_still_ends_session_with_warning() {
    let harness = TestHarness::with_store(|store| {
        FaultyStore::wrap(store, Faults { transcripts: true, ..Faults::default() })
    });
    harness.init_user().await;
    let id = harness.start_session(5).await;
    harness.clock.advance(Duration::minutes(2));

    let body = end(
        &harness,
        &id,
        json!({ "transcript": [{ "role": "user", "content": "See you next week" }] }),
    )
    .await;

    assert_eq!(body["session"]["status"], "completed");
    assert_eq!(body["minutes_used"], 2);
    assert_eq!(body["deduction"]["from_credits"], 2);
    let warnings = body["warnings"].as_array().unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["kind"], "transcript_persist");

    let messages = harness
        .store
        .list_messages(&id.parse().unwrap())
        .await
        .unwrap();
    assert!(messages.is_empty());
    assert_eq!(credits(&harness).await["credits"], 28);
}
