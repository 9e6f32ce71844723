//! Prize catalog and redemption handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use tapper_core::{Prize, PrizeExchange};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Prize catalog response.
#[derive(Debug, Serialize)]
pub struct PrizesResponse {
    /// Available prizes.
    pub prizes: Vec<Prize>,
}

/// List the prize catalog.
pub async fn list_prizes(State(state): State<Arc<AppState>>) -> Json<PrizesResponse> {
    Json(PrizesResponse {
        prizes: state.engine.catalog().to_vec(),
    })
}

/// Prize exchange response.
#[derive(Debug, Serialize)]
pub struct ExchangeResponse {
    /// Exchange ID.
    pub exchange_id: String,
    /// Client request id.
    pub request_id: String,
    /// Prize catalog id.
    pub prize_id: u32,
    /// Prize name.
    pub prize_name: String,
    /// Points debited.
    pub points_spent: i64,
    /// Timestamp.
    pub created_at: String,
}

impl From<&PrizeExchange> for ExchangeResponse {
    fn from(exchange: &PrizeExchange) -> Self {
        Self {
            exchange_id: exchange.exchange_id.to_string(),
            request_id: exchange.request_id.clone(),
            prize_id: exchange.prize_id,
            prize_name: exchange.prize_name.clone(),
            points_spent: exchange.points_spent,
            created_at: exchange.created_at.to_rfc3339(),
        }
    }
}

/// Redemption request.
#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    /// Prize catalog id.
    pub prize_id: u32,
    /// Client-generated idempotency key.
    pub request_id: String,
}

/// Redemption response.
#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    /// Whether this request debited the balance (false on replay).
    pub redeemed: bool,
    /// Balance after the request.
    pub balance: i64,
    /// The exchange recorded for the request id.
    pub exchange: ExchangeResponse,
    /// Where the prize is delivered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_url: Option<String>,
}

/// Redeem a prize.
pub async fn redeem_prize(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<RedeemRequest>,
) -> Result<Json<RedeemResponse>, ApiError> {
    let result = state
        .engine
        .redeem(&auth.user_id, body.prize_id, &body.request_id)
        .await?;

    let bot_url = state
        .engine
        .catalog()
        .iter()
        .find(|p| p.id == result.exchange.prize_id)
        .map(|p| p.bot_url.clone());

    Ok(Json(RedeemResponse {
        redeemed: result.redeemed,
        balance: result.balance,
        exchange: ExchangeResponse::from(&result.exchange),
        bot_url,
    }))
}

/// Exchange list response.
#[derive(Debug, Serialize)]
pub struct ExchangesResponse {
    /// Exchanges (newest first).
    pub exchanges: Vec<ExchangeResponse>,
}

/// List the caller's exchanges.
pub async fn list_exchanges(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ExchangesResponse>, ApiError> {
    let exchanges = state.engine.exchanges(&auth.user_id).await?;

    Ok(Json(ExchangesResponse {
        exchanges: exchanges.iter().map(ExchangeResponse::from).collect(),
    }))
}
