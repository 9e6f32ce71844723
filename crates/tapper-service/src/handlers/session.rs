//! Session and onboarding handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use tapper_core::{Snapshot, StartPayload, UserId, UserProfile};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Start session request.
#[derive(Debug, Default, Deserialize)]
pub struct StartSessionRequest {
    /// Display name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Telegram username.
    #[serde(default)]
    pub username: Option<String>,
    /// Avatar URL.
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Raw start parameter (base64 JSON) from the launch link.
    #[serde(default)]
    pub start_param: Option<String>,
    /// Explicit referrer. Takes precedence over the start parameter.
    #[serde(default)]
    pub referrer_id: Option<String>,
}

/// Start session response.
#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    /// User ID.
    pub user_id: String,
    /// Whether the user was created by this request.
    pub created: bool,
    /// Whether a referral was recorded by this request.
    pub referral_recorded: bool,
    /// Why a supplied referral was not recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_status: Option<String>,
    /// Current state of the user.
    pub snapshot: Snapshot,
}

/// Register or refresh the user and apply referral attribution.
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<StartSessionRequest>,
) -> Result<Json<StartSessionResponse>, ApiError> {
    let payload = body
        .start_param
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .map(StartPayload::decode_lenient)
        .unwrap_or_default();

    let referrer_id = match body.referrer_id.as_deref() {
        Some(raw) => Some(
            raw.parse::<UserId>()
                .map_err(|e| ApiError::BadRequest(format!("invalid referrer_id: {e}")))?,
        ),
        None => payload.referrer_id,
    };

    let profile = UserProfile {
        user_id: auth.user_id.clone(),
        first_name: body.first_name,
        username: body.username,
        avatar_url: body.avatar_url,
        start_source: payload.source,
    };

    let engine = &state.engine;
    let upsert = engine.ensure_user(&profile).await?;
    let onboard = engine.onboard(&auth.user_id, referrer_id.as_ref()).await?;
    let snapshot = engine.snapshot(&auth.user_id).await?;

    Ok(Json(StartSessionResponse {
        user_id: auth.user_id.to_string(),
        created: upsert.created,
        referral_recorded: onboard.referral_recorded,
        referral_status: onboard
            .referral
            .filter(|outcome| !outcome.is_recorded())
            .map(|outcome| outcome.as_str().to_string()),
        snapshot,
    }))
}

/// Onboarding completion response.
#[derive(Debug, Serialize)]
pub struct OnboardingResponse {
    /// Always true once the call succeeds.
    pub onboarding_completed: bool,
}

/// Mark onboarding as completed.
pub async fn complete_onboarding(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<OnboardingResponse>, ApiError> {
    state.engine.complete_onboarding(&auth.user_id).await?;

    Ok(Json(OnboardingResponse {
        onboarding_completed: true,
    }))
}

/// Get the current snapshot.
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Snapshot>, ApiError> {
    Ok(Json(state.engine.snapshot(&auth.user_id).await?))
}
