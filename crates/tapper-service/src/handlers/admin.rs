//! Administration handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use tapper_core::UserId;

use crate::auth::AdminAuth;
use crate::engine::UserOverview;
use crate::error::ApiError;
use crate::handlers::prizes::ExchangeResponse;
use crate::state::AppState;

/// Maximum page size for user listings.
const MAX_PAGE_SIZE: usize = 100;

/// User list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    /// Maximum number of users to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// Admin view of a user.
#[derive(Debug, Serialize)]
pub struct AdminUserResponse {
    /// User ID.
    pub user_id: String,
    /// Display name.
    pub first_name: Option<String>,
    /// Telegram username.
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
    pub start_source: Option<String>,
    /// Prize exchanges.
    pub exchanges: Vec<ExchangeResponse>,
    /// Created timestamp.
    pub created_at: String,
    /// Last session timestamp.
    pub last_seen_at: String,
}

impl From<&UserOverview> for AdminUserResponse {
    fn from(view: &UserOverview) -> Self {
        let user = &view.user;
        Self {
            user_id: user.user_id.to_string(),
            first_name: user.first_name.clone(),
            username: user.username.clone(),
            points: user.points,
            onboarding_completed: user.onboarding_completed,
            keyword_completed: user.keyword_completed,
            completed: view.completed.iter().map(ToString::to_string).collect(),
            referral_count: view.referral_count,
            start_source: user.start_source.clone(),
            exchanges: view.exchanges.iter().map(ExchangeResponse::from).collect(),
            created_at: user.created_at.to_rfc3339(),
            last_seen_at: user.last_seen_at.to_rfc3339(),
        }
    }
}

/// User list response.
#[derive(Debug, Serialize)]
pub struct ListUsersResponse {
    /// Users (newest first).
    pub users: Vec<AdminUserResponse>,
    /// Whether there are more users.
    pub has_more: bool,
}

/// List users with their activity.
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<ListUsersResponse>, ApiError> {
    // Fetch one more than requested to determine has_more
    let limit = query.limit.min(MAX_PAGE_SIZE);
    let overviews = state.engine.user_overviews(limit + 1, query.offset).await?;

    let has_more = overviews.len() > limit;
    let users = overviews
        .iter()
        .take(limit)
        .map(AdminUserResponse::from)
        .collect();

    Ok(Json(ListUsersResponse { users, has_more }))
}

/// Point adjustment request.
#[derive(Debug, Deserialize)]
pub struct AdjustPointsRequest {
    /// User ID to adjust.
    pub user_id: String,
    /// Signed amount to add.
    pub delta: i64,
    /// Reason for the adjustment.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Point adjustment response.
#[derive(Debug, Serialize)]
pub struct AdjustPointsResponse {
    /// User ID.
    pub user_id: String,
    /// Balance after the adjustment.
    pub balance: i64,
}

/// Apply an admin point adjustment.
pub async fn adjust_points(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<AdjustPointsRequest>,
) -> Result<Json<AdjustPointsResponse>, ApiError> {
    let user_id = body
        .user_id
        .parse::<UserId>()
        .map_err(|e| ApiError::BadRequest(format!("invalid user_id: {e}")))?;

    if body.delta == 0 {
        return Err(ApiError::BadRequest("delta must not be zero".into()));
    }

    tracing::info!(
        admin_id = %admin.admin_id,
        user_id = %user_id,
        delta = body.delta,
        reason = ?body.reason,
        "Admin adjusting points"
    );

    let balance = state
        .engine
        .adjust_points(&user_id, body.delta, &admin.admin_id)
        .await?;

    Ok(Json(AdjustPointsResponse {
        user_id: user_id.to_string(),
        balance,
    }))
}
