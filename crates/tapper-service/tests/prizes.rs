//! Prize catalog and redemption integration tests.

#![cfg(feature = "rocksdb-backend")]

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use serde_json::{json, Value};

#[tokio::test]
async fn catalog_lists_prizes() {
    let harness = TestHarness::new();

    let body: Value = harness.get("/v1/prizes").await.json();

    let prizes = body["prizes"].as_array().unwrap();
    assert_eq!(prizes.len(), 2);
    assert_eq!(prizes[0]["id"], 1);
    assert_eq!(prizes[0]["points"], 600);
}

#[tokio::test]
async fn redemption_debits_once_per_request_id() {
    let harness = TestHarness::new();
    harness.start_session().await;
    harness.fund(1000).await;

    let request = json!({ "prize_id": 1, "request_id": "req-1" });

    let first: Value = harness
        .post("/v1/prizes/redeem")
        .json(&request)
        .await
        .json();
    assert_eq!(first["redeemed"], true);
    assert_eq!(first["balance"], 400);
    assert_eq!(first["exchange"]["points_spent"], 600);
    assert!(first["bot_url"].as_str().unwrap().starts_with("https://"));

    let replay: Value = harness
        .post("/v1/prizes/redeem")
        .json(&request)
        .await
        .json();
    assert_eq!(replay["redeemed"], false);
    assert_eq!(replay["balance"], 400);
    assert_eq!(replay["exchange"]["exchange_id"], first["exchange"]["exchange_id"]);

    let exchanges: Value = harness.get("/v1/prizes/exchanges").await.json();
    assert_eq!(exchanges["exchanges"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn insufficient_points_debits_nothing() {
    let harness = TestHarness::new();
    harness.start_session().await;
    harness.fund(100).await;

    let response = harness
        .post("/v1/prizes/redeem")
        .json(&json!({ "prize_id": 2, "request_id": "req-poor" }))
        .await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "insufficient_points");
    assert_eq!(body["error"]["details"]["required"], 600);

    assert_eq!(harness.balance_of(&harness.test_user_id).await, 100);
    let exchanges: Value = harness.get("/v1/prizes/exchanges").await.json();
    assert!(exchanges["exchanges"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_prize_is_bad_request() {
    let harness = TestHarness::new();
    harness.start_session().await;

    harness
        .post("/v1/prizes/redeem")
        .json(&json!({ "prize_id": 99, "request_id": "req-x" }))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn empty_request_id_is_bad_request() {
    let harness = TestHarness::new();
    harness.start_session().await;
    harness.fund(1000).await;

    harness
        .post("/v1/prizes/redeem")
        .json(&json!({ "prize_id": 1, "request_id": " " }))
        .await
        .assert_status_bad_request();

    assert_eq!(harness.balance_of(&harness.test_user_id).await, 1000);
}
