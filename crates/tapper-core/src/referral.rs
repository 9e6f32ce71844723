//! Referral edges and start payload decoding.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// A durable `referred -> referrer` link. At most one exists per referred user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralEdge {
    /// The user who shared the link.
    pub referrer_id: UserId,
    /// The user who joined through it.
    pub referred_id: UserId,
    /// When the edge was recorded.
    pub created_at: DateTime<Utc>,
}

/// Result of a referral attempt.
///
/// Only [`ReferralOutcome::Recorded`] has side effects; every other variant is
/// an expected no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferralOutcome {
    /// The edge was stored and the referrer credited.
    Recorded {
        /// Referrer balance after the bonus.
        referrer_balance: i64,
    },
    /// Referrer and referred are the same user.
    SelfReferral,
    /// The referrer does not exist.
    UnknownReferrer,
    /// The referred user already has a referrer.
    AlreadyReferred,
    /// The edge would close a cycle in the referral graph.
    Cycle,
    /// The referred user has finished onboarding; attribution is closed.
    WindowClosed,
}

impl ReferralOutcome {
    /// Whether the referral was recorded by this call.
    #[must_use]
    pub const fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded { .. })
    }

    /// Short label for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Recorded { .. } => "recorded",
            Self::SelfReferral => "self_referral",
            Self::UnknownReferrer => "unknown_referrer",
            Self::AlreadyReferred => "already_referred",
            Self::Cycle => "cycle",
            Self::WindowClosed => "window_closed",
        }
    }
}

/// Decoded start payload passed to the app on launch.
///
/// On the wire this is base64 of a JSON object such as
/// `{"source":"channel","referrer_id":"12345"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartPayload {
    /// Acquisition source tag.
    pub source: Option<String>,
    /// Referrer identity, if the link was a referral link.
    pub referrer_id: Option<UserId>,
}

#[derive(Deserialize)]
struct RawStartPayload {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    referrer_id: Option<serde_json::Value>,
}

impl StartPayload {
    /// Decode a start payload.
    ///
    /// Standard and URL-safe alphabets are accepted, with or without padding.
    /// A numeric `referrer_id` is accepted as well as a string one.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not base64 or not the expected JSON.
    /// An unusable `referrer_id` is not an error; it decodes to `None`.
    pub fn decode(raw: &str) -> Result<Self, StartPayloadError> {
        let raw = raw.trim();
        let bytes = [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD]
            .iter()
            .find_map(|engine| engine.decode(raw).ok())
            .ok_or(StartPayloadError::Base64)?;

        let parsed: RawStartPayload =
            serde_json::from_slice(&bytes).map_err(|e| StartPayloadError::Json(e.to_string()))?;

        let referrer_id = parsed.referrer_id.and_then(|value| match value {
            serde_json::Value::String(s) => UserId::new(s).ok(),
            serde_json::Value::Number(n) => n.as_i64().map(UserId::from),
            _ => None,
        });

        Ok(Self {
            source: parsed.source.filter(|s| !s.is_empty()),
            referrer_id,
        })
    }

    /// Decode a payload, logging and discarding malformed input.
    #[must_use]
    pub fn decode_lenient(raw: &str) -> Self {
        Self::decode(raw).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Ignoring malformed start payload");
            Self::default()
        })
    }

    /// Encode the payload (used by share links and tests).
    #[must_use]
    pub fn encode(&self) -> String {
        let mut object = serde_json::Map::new();
        if let Some(source) = &self.source {
            object.insert("source".into(), source.clone().into());
        }
        if let Some(referrer) = &self.referrer_id {
            object.insert("referrer_id".into(), referrer.to_string().into());
        }
        STANDARD.encode(serde_json::Value::Object(object).to_string())
    }
}

/// Errors decoding a start payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartPayloadError {
    /// Not valid base64.
    #[error("start payload is not valid base64")]
    Base64,
    /// Not the expected JSON object.
    #[error("start payload is not valid JSON: {0}")]
    Json(String),
}
