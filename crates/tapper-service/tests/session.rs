//! Session, onboarding and referral integration tests.

#![cfg(feature = "rocksdb-backend")]

mod common;

use common::TestHarness;
use serde_json::{json, Value};
use tapper_core::{StartPayload, UserId};

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn missing_gateway_key_is_unauthorized() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/me").await;

    response.assert_status_unauthorized();
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn wrong_gateway_key_is_unauthorized() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/me")
        .add_header(
            axum::http::HeaderName::from_static("x-api-key"),
            axum::http::HeaderValue::from_static("nope"),
        )
        .add_header(
            axum::http::HeaderName::from_static("x-telegram-user-id"),
            axum::http::HeaderValue::from_static("42"),
        )
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn missing_user_id_is_bad_request() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/me")
        .add_header(
            axum::http::HeaderName::from_static("x-api-key"),
            axum::http::HeaderValue::from_static(common::GATEWAY_KEY),
        )
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn stream_requires_gateway_key() {
    let harness = TestHarness::new();

    harness
        .server
        .get("/v1/me/stream")
        .await
        .assert_status_unauthorized();
}

// ============================================================================
// Session
// ============================================================================

#[tokio::test]
async fn start_session_creates_user_once() {
    let harness = TestHarness::new();

    let first = harness.start_session().await;
    assert_eq!(first["created"], true);
    assert_eq!(first["referral_recorded"], false);
    assert_eq!(first["snapshot"]["balance"], 0);
    assert_eq!(first["snapshot"]["remaining_taps_today"], 10);

    let second = harness.start_session().await;
    assert_eq!(second["created"], false);
}

#[tokio::test]
async fn me_for_unknown_user_is_not_found() {
    let harness = TestHarness::new();

    let response = harness.get("/v1/me").await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn complete_onboarding_sets_flag() {
    let harness = TestHarness::new();
    harness.start_session().await;

    let response = harness.post("/v1/onboarding/complete").await;
    response.assert_status_ok();

    let me: Value = harness.get("/v1/me").await.json();
    assert_eq!(me["flags"]["onboarding_completed"], true);
}

// ============================================================================
// Referrals
// ============================================================================

#[tokio::test]
async fn referral_credits_referrer_once() {
    let harness = TestHarness::new();
    let a = UserId::generate();
    let b = UserId::generate();
    let c = UserId::generate();
    harness.start_session_for(&a, json!({})).await;
    harness.start_session_for(&c, json!({})).await;

    let first = harness
        .start_session_for(&b, json!({ "referrer_id": a.to_string() }))
        .await;
    assert_eq!(first["referral_recorded"], true);

    let second = harness
        .start_session_for(&b, json!({ "referrer_id": c.to_string() }))
        .await;
    assert_eq!(second["referral_recorded"], false);
    assert_eq!(second["referral_status"], "already_referred");

    assert_eq!(harness.balance_of(&a).await, 100);
    assert_eq!(harness.balance_of(&b).await, 0);
    assert_eq!(harness.balance_of(&c).await, 0);

    let referrals: Value = TestHarness::as_user(harness.server.get("/v1/referrals"), &b)
        .await
        .json();
    assert_eq!(referrals["referred_by"], a.to_string());

    let referrals: Value = TestHarness::as_user(harness.server.get("/v1/referrals"), &a)
        .await
        .json();
    assert_eq!(referrals["referral_count"], 1);
    assert_eq!(referrals["points_per_referral"], 100);
}

#[tokio::test]
async fn self_referral_is_ignored() {
    let harness = TestHarness::new();
    let user = harness.test_user_id.clone();

    let body = harness
        .start_session_for(&user, json!({ "referrer_id": user.to_string() }))
        .await;

    assert_eq!(body["referral_recorded"], false);
    assert_eq!(body["referral_status"], "self_referral");
    assert_eq!(harness.balance_of(&user).await, 0);

    let referrals: Value = harness.get("/v1/referrals").await.json();
    assert_eq!(referrals["referral_count"], 0);
    assert!(referrals["referred_by"].is_null());
}

#[tokio::test]
async fn start_param_carries_referrer() {
    let harness = TestHarness::new();
    let referrer = UserId::generate();
    harness.start_session_for(&referrer, json!({})).await;

    let start_param = StartPayload {
        source: Some("channel".into()),
        referrer_id: Some(referrer.clone()),
    }
    .encode();

    let body = harness
        .start_session_for(&harness.test_user_id, json!({ "start_param": start_param }))
        .await;

    assert_eq!(body["referral_recorded"], true);
    assert_eq!(harness.balance_of(&referrer).await, 100);
}

#[tokio::test]
async fn malformed_start_param_is_ignored() {
    let harness = TestHarness::new();

    let body = harness
        .start_session_for(&harness.test_user_id, json!({ "start_param": "%%%not-base64" }))
        .await;

    assert_eq!(body["created"], true);
    assert_eq!(body["referral_recorded"], false);
}

#[tokio::test]
async fn referral_after_onboarding_is_rejected() {
    let harness = TestHarness::new();
    let referrer = UserId::generate();
    harness.start_session_for(&referrer, json!({})).await;
    harness.start_session().await;
    harness
        .post("/v1/onboarding/complete")
        .await
        .assert_status_ok();

    let body = harness
        .start_session_for(
            &harness.test_user_id,
            json!({ "referrer_id": referrer.to_string() }),
        )
        .await;

    assert_eq!(body["referral_recorded"], false);
    assert_eq!(body["referral_status"], "window_closed");
    assert_eq!(harness.balance_of(&referrer).await, 0);
}

#[tokio::test]
async fn invalid_referrer_id_is_bad_request() {
    let harness = TestHarness::new();

    harness
        .post("/v1/session")
        .json(&json!({ "referrer_id": "" }))
        .await
        .assert_status_bad_request();
}
