//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, health, prizes, referrals, session, stream, taps, tasks};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for tap endpoints.
/// Taps are the highest-volume calls, so they get their own budget.
const TAP_MAX_CONCURRENT_REQUESTS: usize = 200;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Session (gateway auth)
/// - `POST /v1/session` - Register or refresh the user, apply referral
/// - `POST /v1/onboarding/complete` - Finish onboarding
/// - `GET /v1/me` - Current snapshot
/// - `GET /v1/me/stream` - Snapshot stream (WebSocket)
///
/// ## Rewards (gateway auth)
/// - `POST /v1/taps` - Tap
/// - `POST /v1/tasks/quiz` - Quiz reward
/// - `POST /v1/tasks/keyword` - Keyword reward
/// - `POST /v1/tasks/subscription` - Channel subscription reward
/// - `GET /v1/referrals` - Referral summary
///
/// ## Prizes (gateway auth)
/// - `GET /v1/prizes` - Catalog
/// - `POST /v1/prizes/redeem` - Redeem a prize
/// - `GET /v1/prizes/exchanges` - Caller's exchanges
///
/// ## Admin (admin key auth)
/// - `GET /v1/admin/users` - List users
/// - `POST /v1/admin/points` - Adjust a balance
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    // Taps sit beside the general API so only their own limit applies
    let tap_routes = Router::new()
        .route("/v1/taps", post(taps::tap))
        .layer(ConcurrencyLimitLayer::new(TAP_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Session
        .route("/session", post(session::start_session))
        .route("/onboarding/complete", post(session::complete_onboarding))
        .route("/me", get(session::get_me))
        // Tasks
        .route("/tasks/quiz", post(tasks::complete_quiz))
        .route("/tasks/keyword", post(tasks::submit_keyword))
        .route("/tasks/subscription", post(tasks::verify_subscription))
        .route("/referrals", get(referrals::get_referrals))
        // Prizes
        .route("/prizes", get(prizes::list_prizes))
        .route("/prizes/redeem", post(prizes::redeem_prize))
        .route("/prizes/exchanges", get(prizes::list_exchanges))
        // Admin
        .route("/admin/users", get(admin::list_users))
        .route("/admin/points", post(admin::adjust_points))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    // Long-lived streams are kept out of the request timeout and the
    // concurrency budget
    let stream_routes = Router::new().route("/v1/me/stream", get(stream::snapshot_stream));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        .merge(tap_routes)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .merge(stream_routes)
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
