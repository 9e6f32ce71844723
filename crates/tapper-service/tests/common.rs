//! Common test utilities for tapper integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use axum_test::{TestRequest, TestServer};
use serde_json::{json, Value};
use tempfile::TempDir;

use tapper_core::UserId;
use tapper_service::{create_router, AppState, ServiceConfig, StaticMembership};
use tapper_store::RocksStore;

/// Gateway key used by the harness.
pub const GATEWAY_KEY: &str = "test-gateway-key";

/// Admin key used by the harness.
pub const ADMIN_KEY: &str = "test-admin-key";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
}

impl TestHarness {
    /// Create a harness whose channel verifier reports every user as a member.
    pub fn new() -> Self {
        Self::with_membership(true)
    }

    /// Create a harness with a fixed channel membership answer.
    pub fn with_membership(is_member: bool) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = RocksStore::open(temp_dir.path()).expect("Failed to open store");

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            gateway_api_key: Some(GATEWAY_KEY.into()),
            admin_api_key: Some(ADMIN_KEY.into()),
            cors_origins: vec!["*".into()],
            ..ServiceConfig::default()
        };

        let state = AppState::new(Arc::new(store), config)
            .with_verifier(Arc::new(StaticMembership(is_member)));
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");
        let test_user_id = UserId::generate();

        Self {
            server,
            _temp_dir: temp_dir,
            test_user_id,
        }
    }

    /// Attach gateway headers for `user_id` to a request.
    pub fn as_user(request: TestRequest, user_id: &UserId) -> TestRequest {
        request
            .add_header(header("x-api-key"), value(GATEWAY_KEY))
            .add_header(header("x-telegram-user-id"), value(user_id.as_str()))
    }

    /// Attach admin headers to a request.
    pub fn as_admin(request: TestRequest) -> TestRequest {
        request
            .add_header(header("x-admin-key"), value(ADMIN_KEY))
            .add_header(header("x-admin-id"), value("ops"))
    }

    /// POST as the test user.
    pub fn post(&self, path: &str) -> TestRequest {
        Self::as_user(self.server.post(path), &self.test_user_id)
    }

    /// GET as the test user.
    pub fn get(&self, path: &str) -> TestRequest {
        Self::as_user(self.server.get(path), &self.test_user_id)
    }

    /// Start a session for `user_id` with an optional request body.
    pub async fn start_session_for(&self, user_id: &UserId, body: Value) -> Value {
        let response = Self::as_user(self.server.post("/v1/session"), user_id)
            .json(&body)
            .await;
        response.assert_status_ok();
        response.json()
    }

    /// Start a session for the test user.
    pub async fn start_session(&self) -> Value {
        self.start_session_for(&self.test_user_id, json!({})).await
    }

    /// Current balance of `user_id`.
    pub async fn balance_of(&self, user_id: &UserId) -> i64 {
        let response = Self::as_user(self.server.get("/v1/me"), user_id).await;
        response.assert_status_ok();
        let body: Value = response.json();
        body["balance"].as_i64().expect("balance is a number")
    }

    /// Credit the test user through the admin endpoint.
    pub async fn fund(&self, delta: i64) {
        Self::as_admin(self.server.post("/v1/admin/points"))
            .json(&json!({
                "user_id": self.test_user_id.to_string(),
                "delta": delta,
                "reason": "test funding"
            }))
            .await
            .assert_status_ok();
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn header(name: &'static str) -> HeaderName {
    HeaderName::from_static(name)
}

fn value(raw: &str) -> HeaderValue {
    HeaderValue::from_str(raw).expect("valid header value")
}
