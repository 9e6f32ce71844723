//! Application state.

use std::sync::Arc;

use tapper_store::Store;

use crate::config::ServiceConfig;
use crate::engine::PointsEngine;
use crate::verify::{MembershipVerifier, TelegramMembership};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The points engine.
    pub engine: Arc<PointsEngine>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Channel membership verifier (optional).
    pub verifier: Option<Arc<dyn MembershipVerifier>>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let engine = Arc::new(PointsEngine::new(
            store,
            config.rewards.clone(),
            config.keyword.clone(),
        ));

        // Create the Telegram verifier if a bot token is configured
        let verifier = config.telegram_bot_token.as_ref().and_then(|token| {
            match TelegramMembership::new(
                &config.telegram_api_url,
                token,
                &config.telegram_channel,
            ) {
                Ok(client) => {
                    tracing::info!(
                        channel = %config.telegram_channel,
                        "Telegram membership verification enabled"
                    );
                    Some(Arc::new(client) as Arc<dyn MembershipVerifier>)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create Telegram client");
                    None
                }
            }
        });

        if verifier.is_none() {
            tracing::warn!(
                "Telegram not configured - channel subscription rewards are unavailable"
            );
        }

        if config.gateway_api_key.is_none() {
            tracing::warn!("GATEWAY_API_KEY not set - all user requests will be rejected");
        }

        Self {
            engine,
            config,
            verifier,
        }
    }

    /// Replace the membership verifier.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn MembershipVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }
}
