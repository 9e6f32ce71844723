//! User records owned by the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Profile fields supplied by the identity source for the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// The user ID.
    pub user_id: UserId,
    /// Display name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Telegram username, without the leading `@`.
    #[serde(default)]
    pub username: Option<String>,
    /// Avatar URL.
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Acquisition source decoded from the start payload.
    #[serde(default)]
    pub start_source: Option<String>,
}

impl UserProfile {
    /// Create a profile with only the identity set.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            first_name: None,
            username: None,
            avatar_url: None,
            start_source: None,
        }
    }
}

/// A user's ledger row: balance, completion flags and profile.
///
/// Balance and flags are mutated only through the grant engine, the rate
/// limiter and the referral manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// The user ID.
    pub user_id: UserId,
    /// Current point balance.
    pub points: i64,
    /// Whether the onboarding flow has been completed.
    pub onboarding_completed: bool,
    /// Whether the keyword task has been completed.
    pub keyword_completed: bool,
    /// Display name.
    pub first_name: Option<String>,
    /// Telegram username.
    pub username: Option<String>,
    /// Avatar URL.
    pub avatar_url: Option<String>,
    /// Acquisition source from the first start payload that carried one.
    pub start_source: Option<String>,
    /// When the user was first seen.
    pub created_at: DateTime<Utc>,
    /// When the user last opened a session.
    pub last_seen_at: DateTime<Utc>,
}

impl User {
    /// Create a new user with zero balance from a session profile.
    #[must_use]
    pub fn new(profile: &UserProfile, now: DateTime<Utc>) -> Self {
        Self {
            user_id: profile.user_id.clone(),
            points: 0,
            onboarding_completed: false,
            keyword_completed: false,
            first_name: profile.first_name.clone(),
            username: profile.username.clone(),
            avatar_url: profile.avatar_url.clone(),
            start_source: profile.start_source.clone(),
            created_at: now,
            last_seen_at: now,
        }
    }

    /// Refresh profile fields and the last-seen timestamp for a returning user.
    ///
    /// Balance and flags are left untouched. A missing start source does not
    /// erase a previously recorded one.
    pub fn touch(&mut self, profile: &UserProfile, now: DateTime<Utc>) {
        self.first_name.clone_from(&profile.first_name);
        self.username.clone_from(&profile.username);
        self.avatar_url.clone_from(&profile.avatar_url);
        if profile.start_source.is_some() {
            self.start_source.clone_from(&profile.start_source);
        }
        self.last_seen_at = now;
    }

    /// Read a completion flag.
    #[must_use]
    pub const fn flag(&self, flag: Flag) -> bool {
        match flag {
            Flag::OnboardingCompleted => self.onboarding_completed,
            Flag::KeywordCompleted => self.keyword_completed,
        }
    }

    /// Set a completion flag, returning whether the value changed.
    pub fn set_flag(&mut self, flag: Flag, value: bool) -> bool {
        let slot = match flag {
            Flag::OnboardingCompleted => &mut self.onboarding_completed,
            Flag::KeywordCompleted => &mut self.keyword_completed,
        };
        let changed = *slot != value;
        *slot = value;
        changed
    }
}

/// Boolean completion flags stored on the user row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    /// The onboarding flow was completed.
    OnboardingCompleted,
    /// The keyword task was completed.
    KeywordCompleted,
}

impl Flag {
    /// Column / field name of the flag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OnboardingCompleted => "onboarding_completed",
            Self::KeywordCompleted => "keyword_completed",
        }
    }
}

/// Result of creating or refreshing a user.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    /// The stored user after the upsert.
    pub user: User,
    /// Whether the user was created by this call.
    pub created: bool,
}
