//! Task completion handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use tapper_core::Task;

use crate::auth::AuthUser;
use crate::engine::GrantResult;
use crate::error::ApiError;
use crate::state::AppState;

/// Grant response.
#[derive(Debug, Serialize)]
pub struct GrantResponse {
    /// Whether this request granted the reward.
    pub granted: bool,
    /// Balance after the request.
    pub new_balance: i64,
}

impl From<GrantResult> for GrantResponse {
    fn from(result: GrantResult) -> Self {
        Self {
            granted: result.granted,
            new_balance: result.new_balance,
        }
    }
}

/// Quiz completion request.
#[derive(Debug, Deserialize)]
pub struct QuizRequest {
    /// Whether the quiz was finished.
    pub completed: bool,
}

/// Complete the quiz.
pub async fn complete_quiz(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<QuizRequest>,
) -> Result<Json<GrantResponse>, ApiError> {
    let result = state
        .engine
        .complete_task(&auth.user_id, Task::Quiz, body.completed)
        .await?;
    Ok(Json(result.into()))
}

/// Keyword submission request.
#[derive(Debug, Deserialize)]
pub struct KeywordRequest {
    /// The submitted keyword.
    pub keyword: String,
}

/// Submit the keyword.
pub async fn submit_keyword(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<KeywordRequest>,
) -> Result<Json<GrantResponse>, ApiError> {
    let result = state
        .engine
        .submit_keyword(&auth.user_id, &body.keyword)
        .await?;
    Ok(Json(result.into()))
}

/// Verify the channel subscription and grant its reward.
pub async fn verify_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<GrantResponse>, ApiError> {
    let verifier = state
        .verifier
        .as_ref()
        .ok_or_else(|| ApiError::ExternalService("channel verification is not configured".into()))?;

    let result = state
        .engine
        .verify_subscription(&auth.user_id, verifier.as_ref())
        .await?;
    Ok(Json(result.into()))
}
