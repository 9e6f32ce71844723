//! Channel membership verification.
//!
//! The subscription task is granted only after the Telegram Bot API confirms
//! that the user is a member of the configured channel.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use tapper_core::{PointsError, UserId};

/// Member statuses that count as subscribed.
const SUBSCRIBED_STATUSES: [&str; 3] = ["member", "administrator", "creator"];

/// Timeout for Bot API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for membership checks.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The Bot API returned an error.
    #[error("Telegram API error: {status} - {description}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error description from the API.
        description: String,
    },

    /// The user id is not a Telegram numeric id.
    #[error("not a Telegram user id: {0}")]
    InvalidUserId(String),
}

impl From<VerifyError> for PointsError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::InvalidUserId(id) => {
                Self::Validation(format!("not a Telegram user id: {id}"))
            }
            other => Self::ExternalService {
                service: "telegram".into(),
                message: other.to_string(),
            },
        }
    }
}

/// Checks whether a user is subscribed to the rewarded channel.
#[async_trait]
pub trait MembershipVerifier: Send + Sync {
    /// Return whether `user_id` is currently a member.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot answer.
    async fn is_member(&self, user_id: &UserId) -> Result<bool, VerifyError>;
}

/// Verifier backed by the Telegram Bot API `getChatMember` method.
#[derive(Debug, Clone)]
pub struct TelegramMembership {
    client: Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
}

#[derive(Debug, Serialize)]
struct GetChatMemberRequest<'a> {
    chat_id: &'a str,
    user_id: i64,
}

#[derive(Debug, Deserialize)]
struct BotApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<ChatMember>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    status: String,
}

impl TelegramMembership {
    /// Create a verifier for `channel` (with or without a leading `@`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        bot_token: impl Into<String>,
        channel: &str,
    ) -> Result<Self, VerifyError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            chat_id: format!("@{}", channel.trim_start_matches('@')),
        })
    }
}

#[async_trait]
impl MembershipVerifier for TelegramMembership {
    async fn is_member(&self, user_id: &UserId) -> Result<bool, VerifyError> {
        let telegram_id: i64 = user_id
            .as_str()
            .parse()
            .map_err(|_| VerifyError::InvalidUserId(user_id.to_string()))?;

        let url = format!("{}/bot{}/getChatMember", self.base_url, self.bot_token);
        let response = self
            .client
            .post(&url)
            .json(&GetChatMemberRequest {
                chat_id: &self.chat_id,
                user_id: telegram_id,
            })
            .send()
            .await?;

        let status = response.status();
        let body: BotApiResponse = response.json().await?;

        if body.ok {
            let member_status = body.result.map(|m| m.status).unwrap_or_default();
            tracing::debug!(user_id = %user_id, status = %member_status, "Chat member status");
            return Ok(SUBSCRIBED_STATUSES.contains(&member_status.as_str()));
        }

        // 400 "user not found": the user never joined the chat.
        if status == reqwest::StatusCode::BAD_REQUEST {
            tracing::debug!(
                user_id = %user_id,
                description = ?body.description,
                "Chat member lookup rejected, treating as not subscribed"
            );
            return Ok(false);
        }

        Err(VerifyError::Api {
            status: status.as_u16(),
            description: body.description.unwrap_or_default(),
        })
    }
}

/// Verifier with a fixed answer. Used when no bot token is configured in
/// development and by tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticMembership(pub bool);

#[async_trait]
impl MembershipVerifier for StaticMembership {
    async fn is_member(&self, _user_id: &UserId) -> Result<bool, VerifyError> {
        Ok(self.0)
    }
}
