//! Reward kinds, point values and completion records.
//!
//! Every one-time award is identified by a [`RewardKind`]. The storage layer
//! keeps at most one [`CompletionRecord`] per `(user_id, reward_kind)`; that
//! uniqueness is what makes grants idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::user::Flag;
use crate::UserId;

// ============================================================================
// Constants
// ============================================================================

/// Points credited per accepted tap.
pub const TAP_POINTS: i64 = 2;

/// Maximum accepted taps per user per calendar day.
pub const DAILY_TAP_CAP: u32 = 10;

/// Points for completing the quiz.
pub const QUIZ_POINTS: i64 = 200;

/// Points for the keyword task.
pub const KEYWORD_POINTS: i64 = 100;

/// Points for a verified channel subscription.
pub const SUBSCRIPTION_POINTS: i64 = 150;

/// Points credited to a referrer per distinct referred user.
pub const REFERRAL_POINTS: i64 = 100;

const REFERRAL_PREFIX: &str = "referral:";

/// A category of non-repeatable reward.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RewardKind {
    /// Quiz completion.
    Quiz,
    /// Keyword task.
    Keyword,
    /// Verified channel subscription.
    ChannelSubscription,
    /// Referral bonus for bringing in the given user.
    Referral(UserId),
}

impl RewardKind {
    /// Storage key of the reward kind (`quiz`, `keyword`,
    /// `telegram_subscription`, `referral:<user_id>`).
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Quiz => "quiz".to_string(),
            Self::Keyword => "keyword".to_string(),
            Self::ChannelSubscription => "telegram_subscription".to_string(),
            Self::Referral(referred) => format!("{REFERRAL_PREFIX}{referred}"),
        }
    }

    /// The user flag set together with this grant, if any.
    #[must_use]
    pub const fn flag(&self) -> Option<Flag> {
        match self {
            Self::Keyword => Some(Flag::KeywordCompleted),
            _ => None,
        }
    }
}

impl fmt::Display for RewardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl FromStr for RewardKind {
    type Err = RewardKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quiz" => Ok(Self::Quiz),
            "keyword" => Ok(Self::Keyword),
            "telegram_subscription" => Ok(Self::ChannelSubscription),
            other => other
                .strip_prefix(REFERRAL_PREFIX)
                .and_then(|id| UserId::new(id).ok())
                .map(Self::Referral)
                .ok_or_else(|| RewardKindError(other.to_string())),
        }
    }
}

impl Serialize for RewardKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key())
    }
}

impl<'de> Deserialize<'de> for RewardKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Unknown reward kind key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown reward kind: {0}")]
pub struct RewardKindError(pub String);

/// A user-completable task (reward kinds other than referrals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    /// The quiz.
    Quiz,
    /// The keyword task.
    Keyword,
    /// Channel subscription.
    ChannelSubscription,
}

impl Task {
    /// The reward kind granted by this task.
    #[must_use]
    pub const fn reward_kind(self) -> RewardKind {
        match self {
            Self::Quiz => RewardKind::Quiz,
            Self::Keyword => RewardKind::Keyword,
            Self::ChannelSubscription => RewardKind::ChannelSubscription,
        }
    }
}

/// Point values and limits.
///
/// Defaults are the product-visible values; deployments may override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardConfig {
    /// Points per accepted tap.
    pub tap_points: i64,
    /// Accepted taps per user per day.
    pub daily_tap_cap: u32,
    /// Quiz completion points.
    pub quiz_points: i64,
    /// Keyword task points.
    pub keyword_points: i64,
    /// Channel subscription points.
    pub subscription_points: i64,
    /// Referral bonus for the referrer.
    pub referral_points: i64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            tap_points: TAP_POINTS,
            daily_tap_cap: DAILY_TAP_CAP,
            quiz_points: QUIZ_POINTS,
            keyword_points: KEYWORD_POINTS,
            subscription_points: SUBSCRIPTION_POINTS,
            referral_points: REFERRAL_POINTS,
        }
    }
}

impl RewardConfig {
    /// Points granted for a reward kind.
    #[must_use]
    pub const fn points_for(&self, kind: &RewardKind) -> i64 {
        match kind {
            RewardKind::Quiz => self.quiz_points,
            RewardKind::Keyword => self.keyword_points,
            RewardKind::ChannelSubscription => self.subscription_points,
            RewardKind::Referral(_) => self.referral_points,
        }
    }

    /// Tap policy derived from this configuration.
    #[must_use]
    pub const fn tap_policy(&self) -> TapPolicy {
        TapPolicy {
            cap: self.daily_tap_cap,
            points: self.tap_points,
        }
    }
}

/// Per-day tap limit and the points credited for each accepted tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapPolicy {
    /// Maximum accepted taps per day.
    pub cap: u32,
    /// Points per accepted tap.
    pub points: i64,
}

/// Durable proof that a reward was granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// The user who received the reward.
    pub user_id: UserId,
    /// The reward kind.
    pub reward_kind: RewardKind,
    /// Points credited with this record.
    pub points_awarded: i64,
    /// When the reward was granted.
    pub completed_at: DateTime<Utc>,
}

/// Result of a grant attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    /// The record was created and the balance credited.
    Granted {
        /// Balance after the credit.
        balance: i64,
    },
    /// A record already existed; nothing changed.
    AlreadyGranted,
}

impl GrantOutcome {
    /// Whether this call performed the grant.
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}
