//! Request and response types for the tapper client.

use serde::{Deserialize, Serialize};

pub use tapper_core::{Prize, Snapshot, SnapshotFlags};

/// Session start parameters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartSession {
    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Telegram username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Avatar URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Raw start parameter from the launch link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_param: Option<String>,
    /// Explicit referrer id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer_id: Option<String>,
}

/// Session start response.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionResponse {
    /// User ID.
    pub user_id: String,
    /// Whether the user was created by this call.
    pub created: bool,
    /// Whether a referral was recorded by this call.
    pub referral_recorded: bool,
    /// Why a supplied referral was not recorded.
    #[serde(default)]
    pub referral_status: Option<String>,
    /// Current state of the user.
    pub snapshot: Snapshot,
}

/// Onboarding completion response.
#[derive(Debug, Clone, Deserialize)]
pub struct OnboardingResponse {
    /// Onboarding is completed.
    pub onboarding_completed: bool,
}

/// Tap response.
#[derive(Debug, Clone, Deserialize)]
pub struct TapResponse {
    /// Whether the tap counted.
    pub accepted: bool,
    /// Balance after the tap.
    pub new_balance: i64,
    /// Taps counted today.
    pub taps_today: u32,
    /// Taps left today.
    pub remaining_taps_today: u32,
}

/// Task reward response.
#[derive(Debug, Clone, Deserialize)]
pub struct GrantResponse {
    /// Whether this call granted the reward.
    pub granted: bool,
    /// Balance after the call.
    pub new_balance: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct QuizRequest {
    pub completed: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct KeywordRequest<'a> {
    pub keyword: &'a str,
}

/// Referral summary.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferralsResponse {
    /// Users referred by the caller.
    pub referral_count: u64,
    /// Who referred the caller.
    #[serde(default)]
    pub referred_by: Option<String>,
    /// Bonus per referral.
    pub points_per_referral: i64,
}

/// Prize catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct PrizesResponse {
    /// Available prizes.
    pub prizes: Vec<Prize>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RedeemRequest<'a> {
    pub prize_id: u32,
    pub request_id: &'a str,
}

/// A recorded prize exchange.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Exchange {
    /// Exchange ID.
    pub exchange_id: String,
    /// Idempotency key of the redemption.
    pub request_id: String,
    /// Prize catalog id.
    pub prize_id: u32,
    /// Prize name.
    pub prize_name: String,
    /// Points debited.
    pub points_spent: i64,
    /// Timestamp (RFC 3339).
    pub created_at: String,
}

/// Redemption response.
#[derive(Debug, Clone, Deserialize)]
pub struct RedeemResponse {
    /// Whether this call debited the balance.
    pub redeemed: bool,
    /// Balance after the call.
    pub balance: i64,
    /// The exchange.
    pub exchange: Exchange,
    /// Where the prize is delivered.
    #[serde(default)]
    pub bot_url: Option<String>,
}

/// Exchange history.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangesResponse {
    /// Exchanges (newest first).
    pub exchanges: Vec<Exchange>,
}

/// Admin view of a user.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminUser {
    /// User ID.
    pub user_id: String,
    /// Display name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Telegram username.
    #[serde(default)]
    pub username: Option<String>,
    /// Current balance.
    pub points: i64,
    /// Onboarding finished.
    pub onboarding_completed: bool,
    /// Keyword task done.
    pub keyword_completed: bool,
    /// Granted reward kinds.
    pub completed: Vec<String>,
    /// Users referred.
    pub referral_count: u64,
    /// Acquisition source.
    #[serde(default)]
    pub start_source: Option<String>,
    /// Prize exchanges.
    pub exchanges: Vec<Exchange>,
    /// Created timestamp.
    pub created_at: String,
    /// Last session timestamp.
    pub last_seen_at: String,
}

/// Admin user page.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminUsersResponse {
    /// Users (newest first).
    pub users: Vec<AdminUser>,
    /// Whether more users follow.
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct AdjustPointsRequest<'a> {
    pub user_id: &'a str,
    pub delta: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'a str>,
}

/// Admin adjustment response.
#[derive(Debug, Clone, Deserialize)]
pub struct AdjustPointsResponse {
    /// User ID.
    pub user_id: String,
    /// Balance after the adjustment.
    pub balance: i64,
}

/// API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorBody,
}

/// API error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Additional details.
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
