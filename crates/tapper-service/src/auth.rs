//! Authentication extractors.
//!
//! This module provides extractors for:
//! - `AuthUser` - End-user identity forwarded by the trusted gateway
//! - `AdminAuth` - Admin authentication for privileged endpoints
//!
//! The gateway validates Telegram init data, then calls the service with the
//! shared `X-Api-Key` and the verified id in `X-Telegram-User-Id`. The service
//! never sees raw Telegram credentials.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use tapper_core::UserId;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the gateway key.
pub const GATEWAY_KEY_HEADER: &str = "x-api-key";

/// Header carrying the verified Telegram user id.
pub const USER_ID_HEADER: &str = "x-telegram-user-id";

/// Header carrying the admin key.
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Optional header naming the admin, for audit logging.
pub const ADMIN_ID_HEADER: &str = "x-admin-id";

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

/// An authenticated end user.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user ID.
    pub user_id: UserId,
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        state: &'life1 Arc<AppState>,
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Self, Self::Rejection>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            let api_key = header(parts, GATEWAY_KEY_HEADER).ok_or(ApiError::Unauthorized)?;

            // Validate against configured gateway key
            let expected_key = state
                .config
                .gateway_api_key
                .as_ref()
                .ok_or(ApiError::Unauthorized)?;

            if api_key != expected_key {
                return Err(ApiError::Unauthorized);
            }

            let user_id = header(parts, USER_ID_HEADER)
                .ok_or_else(|| ApiError::BadRequest("missing X-Telegram-User-Id".into()))?
                .parse::<UserId>()
                .map_err(|e| ApiError::BadRequest(format!("invalid user id: {e}")))?;

            Ok(AuthUser { user_id })
        })
    }
}

/// Admin authentication via API key with admin scope.
///
/// Requires the `X-Admin-Key` header to match the configured admin key.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// Admin identifier (for audit logging).
    pub admin_id: String,
}

impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        state: &'life1 Arc<AppState>,
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Self, Self::Rejection>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            let admin_key = header(parts, ADMIN_KEY_HEADER).ok_or(ApiError::Unauthorized)?;

            // Validate against configured admin API key
            let expected_key = state
                .config
                .admin_api_key
                .as_ref()
                .ok_or(ApiError::Unauthorized)?;

            if admin_key != expected_key {
                return Err(ApiError::Unauthorized);
            }

            let admin_id = header(parts, ADMIN_ID_HEADER)
                .unwrap_or("admin")
                .to_string();

            tracing::info!(admin_id = %admin_id, "Admin authenticated");

            Ok(AdminAuth { admin_id })
        })
    }
}
