//! Tap handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::auth::AuthUser;
use crate::engine::TapResult;
use crate::error::ApiError;
use crate::state::AppState;

/// Tap response.
#[derive(Debug, Serialize)]
pub struct TapResponse {
    /// Whether the tap was counted. False once the daily cap is reached.
    pub accepted: bool,
    /// Balance after the tap.
    pub new_balance: i64,
    /// Taps counted today.
    pub taps_today: u32,
    /// Taps left today.
    pub remaining_taps_today: u32,
}

impl From<TapResult> for TapResponse {
    fn from(result: TapResult) -> Self {
        Self {
            accepted: result.accepted,
            new_balance: result.new_balance,
            taps_today: result.taps_today,
            remaining_taps_today: result.remaining_taps_today,
        }
    }
}

/// Register a tap.
pub async fn tap(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<TapResponse>, ApiError> {
    let result = state.engine.tap(&auth.user_id).await?;
    Ok(Json(result.into()))
}
