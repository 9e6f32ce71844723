//! Tapper HTTP client implementation.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder};
use tapper_core::{Snapshot, UserId};

use crate::error::ClientError;
use crate::types::{
    AdjustPointsRequest, AdjustPointsResponse, AdminUsersResponse, ApiErrorResponse,
    ExchangesResponse, GrantResponse, KeywordRequest, OnboardingResponse, PrizesResponse,
    QuizRequest, RedeemRequest, RedeemResponse, ReferralsResponse, SessionResponse, StartSession,
    TapResponse,
};
use crate::watch::SnapshotWatch;

/// Tapper API client.
///
/// Every user-scoped call is made on behalf of `user_id` with the gateway key.
#[derive(Debug, Clone)]
pub struct TapperClient {
    client: Client,
    base_url: String,
    gateway_key: String,
    admin_key: Option<String>,
}

impl TapperClient {
    /// Create a new tapper client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the tapper service (e.g., `"http://tapper:8080"`)
    /// * `gateway_key` - Shared gateway key
    #[must_use]
    pub fn new(base_url: impl Into<String>, gateway_key: impl Into<String>) -> Self {
        Self::with_options(base_url, gateway_key, ClientOptions::default())
    }

    /// Create a new tapper client with custom options.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built (should not happen with default settings).
    #[must_use]
    pub fn with_options(
        base_url: impl Into<String>,
        gateway_key: impl Into<String>,
        options: ClientOptions,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            gateway_key: gateway_key.into(),
            admin_key: options.admin_key,
        }
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Register or refresh a user and apply referral attribution.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn start_session(
        &self,
        user_id: &UserId,
        session: &StartSession,
    ) -> Result<SessionResponse, ClientError> {
        let request = self.user_request(Method::POST, "/v1/session", user_id).json(session);
        self.send(request).await
    }

    /// Mark onboarding as completed. Closes the referral window.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn complete_onboarding(
        &self,
        user_id: &UserId,
    ) -> Result<OnboardingResponse, ClientError> {
        let request = self.user_request(Method::POST, "/v1/onboarding/complete", user_id);
        self.send(request).await
    }

    /// Get the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn snapshot(&self, user_id: &UserId) -> Result<Snapshot, ClientError> {
        let request = self.user_request(Method::GET, "/v1/me", user_id);
        self.send(request).await
    }

    /// Watch a user's snapshot by polling every `interval`.
    ///
    /// The first snapshot is fetched before this returns; unchanged polls are
    /// not delivered and a slow reader only sees the latest value.
    ///
    /// # Errors
    ///
    /// Returns an error if the first snapshot cannot be fetched.
    pub async fn watch_snapshot(
        &self,
        user_id: &UserId,
        interval: Duration,
    ) -> Result<SnapshotWatch, ClientError> {
        let initial = self.snapshot(user_id).await?;
        Ok(SnapshotWatch::spawn(
            self.clone(),
            user_id.clone(),
            initial,
            interval,
        ))
    }

    // =========================================================================
    // Rewards
    // =========================================================================

    /// Tap once.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn tap(&self, user_id: &UserId) -> Result<TapResponse, ClientError> {
        let request = self.user_request(Method::POST, "/v1/taps", user_id);
        self.send(request).await
    }

    /// Claim the quiz reward.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn complete_quiz(&self, user_id: &UserId) -> Result<GrantResponse, ClientError> {
        let request = self
            .user_request(Method::POST, "/v1/tasks/quiz", user_id)
            .json(&QuizRequest { completed: true });
        self.send(request).await
    }

    /// Submit the keyword answer.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Validation` for a wrong or empty keyword.
    pub async fn submit_keyword(
        &self,
        user_id: &UserId,
        keyword: &str,
    ) -> Result<GrantResponse, ClientError> {
        let request = self
            .user_request(Method::POST, "/v1/tasks/keyword", user_id)
            .json(&KeywordRequest { keyword });
        self.send(request).await
    }

    /// Verify the channel subscription and claim its reward.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Validation` if the user is not subscribed.
    pub async fn verify_subscription(
        &self,
        user_id: &UserId,
    ) -> Result<GrantResponse, ClientError> {
        let request = self.user_request(Method::POST, "/v1/tasks/subscription", user_id);
        self.send(request).await
    }

    /// Get the referral summary.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn referrals(&self, user_id: &UserId) -> Result<ReferralsResponse, ClientError> {
        let request = self.user_request(Method::GET, "/v1/referrals", user_id);
        self.send(request).await
    }

    // =========================================================================
    // Prizes
    // =========================================================================

    /// List the prize catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn prizes(&self, user_id: &UserId) -> Result<PrizesResponse, ClientError> {
        let request = self.user_request(Method::GET, "/v1/prizes", user_id);
        self.send(request).await
    }

    /// Redeem a prize with a fresh request id.
    ///
    /// Use [`Self::redeem_with_request_id`] to retry safely.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InsufficientPoints` if the balance is too low.
    pub async fn redeem(
        &self,
        user_id: &UserId,
        prize_id: u32,
    ) -> Result<RedeemResponse, ClientError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.redeem_with_request_id(user_id, prize_id, &request_id)
            .await
    }

    /// Redeem a prize. Repeating a `request_id` returns the original exchange.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InsufficientPoints` if the balance is too low.
    pub async fn redeem_with_request_id(
        &self,
        user_id: &UserId,
        prize_id: u32,
        request_id: &str,
    ) -> Result<RedeemResponse, ClientError> {
        let request = self
            .user_request(Method::POST, "/v1/prizes/redeem", user_id)
            .json(&RedeemRequest {
                prize_id,
                request_id,
            });
        self.send(request).await
    }

    /// List the user's prize exchanges.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn exchanges(&self, user_id: &UserId) -> Result<ExchangesResponse, ClientError> {
        let request = self.user_request(Method::GET, "/v1/prizes/exchanges", user_id);
        self.send(request).await
    }

    // =========================================================================
    // Admin
    // =========================================================================

    /// List users (admin key required).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if no admin key is configured.
    pub async fn admin_list_users(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<AdminUsersResponse, ClientError> {
        let request = self
            .admin_request(Method::GET, "/v1/admin/users")?
            .query(&[("limit", limit), ("offset", offset)]);
        self.send(request).await
    }

    /// Adjust a user's balance (admin key required).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if no admin key is configured.
    pub async fn admin_adjust_points(
        &self,
        user_id: &UserId,
        delta: i64,
        reason: Option<&str>,
    ) -> Result<AdjustPointsResponse, ClientError> {
        let request = self
            .admin_request(Method::POST, "/v1/admin/points")?
            .json(&AdjustPointsRequest {
                user_id: user_id.as_str(),
                delta,
                reason,
            });
        self.send(request).await
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    fn user_request(&self, method: Method, path: &str, user_id: &UserId) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .header("x-api-key", &self.gateway_key)
            .header("x-telegram-user-id", user_id.as_str())
    }

    fn admin_request(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        let admin_key = self
            .admin_key
            .as_ref()
            .ok_or_else(|| ClientError::Configuration("admin key not configured".into()))?;

        Ok(self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header("x-admin-key", admin_key))
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        // Try to parse error response
        let error_body: Result<ApiErrorResponse, _> = response.json().await;

        match error_body {
            Ok(api_error) => {
                let code = api_error.error.code.as_str();
                let message = api_error.error.message.clone();
                let detail = |key: &str| {
                    api_error
                        .error
                        .details
                        .as_ref()
                        .and_then(|d| d.get(key))
                        .and_then(serde_json::Value::as_i64)
                        .unwrap_or(0)
                };

                // Map specific error codes to typed errors
                match code {
                    "insufficient_points" => Err(ClientError::InsufficientPoints {
                        balance: detail("balance"),
                        required: detail("required"),
                    }),
                    "unauthorized" => Err(ClientError::Unauthorized),
                    "bad_request" => Err(ClientError::Validation(message)),
                    "not_found" => Err(ClientError::NotFound(message)),
                    "unavailable" => Err(ClientError::Unavailable(message)),
                    _ => Err(ClientError::Api {
                        code: code.to_string(),
                        message,
                        status: status.as_u16(),
                    }),
                }
            }
            Err(_) => Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            }),
        }
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Admin key for admin endpoints.
    pub admin_key: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            admin_key: None,
        }
    }
}

impl ClientOptions {
    /// Create options carrying an admin key.
    #[must_use]
    pub fn with_admin_key(key: impl Into<String>) -> Self {
        Self {
            admin_key: Some(key.into()),
            ..Self::default()
        }
    }
}
