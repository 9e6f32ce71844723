//! Referral handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Referral statistics response.
#[derive(Debug, Serialize)]
pub struct ReferralsResponse {
    /// Users referred by the caller.
    pub referral_count: u64,
    /// Who referred the caller.
    pub referred_by: Option<String>,
    /// Points earned per referral.
    pub points_per_referral: i64,
}

/// Get referral statistics.
pub async fn get_referrals(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ReferralsResponse>, ApiError> {
    let info = state.engine.referral_info(&auth.user_id).await?;

    Ok(Json(ReferralsResponse {
        referral_count: info.referral_count,
        referred_by: info.referred_by.map(|id| id.to_string()),
        points_per_referral: state.engine.rewards().referral_points,
    }))
}
