//! Daily tap counters.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Accepted taps for a user on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyTapCounter {
    /// The user.
    pub user_id: UserId,
    /// Calendar day (UTC).
    pub date: NaiveDate,
    /// Accepted taps so far, never above the cap.
    pub tap_count: u32,
}

impl DailyTapCounter {
    /// A fresh counter for the given day.
    #[must_use]
    pub const fn new(user_id: UserId, date: NaiveDate) -> Self {
        Self {
            user_id,
            date,
            tap_count: 0,
        }
    }
}

/// Result of a tap attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapOutcome {
    /// Whether the tap was accepted and credited.
    pub applied: bool,
    /// The counter value after the attempt.
    pub tap_count: u32,
    /// The balance after the attempt.
    pub balance: i64,
}

impl TapOutcome {
    /// Taps left for the day under the given cap.
    #[must_use]
    pub const fn remaining(&self, cap: u32) -> u32 {
        cap.saturating_sub(self.tap_count)
    }
}

/// The calendar day a timestamp falls on. Days roll over at midnight UTC.
#[must_use]
pub fn tap_date(at: DateTime<Utc>) -> NaiveDate {
    at.date_naive()
}
