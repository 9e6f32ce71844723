//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage. The
//! PostgreSQL schema lives in `migrations/` and mirrors the same four logical
//! tables plus prize exchanges.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// User rows (balance, flags, profile), keyed by `user_id`.
    pub const USERS: &str = "users";

    /// Daily tap counters, keyed by `user_id || 0x00 || YYYY-MM-DD`.
    pub const DAILY_TAPS: &str = "daily_taps";

    /// Completion records, keyed by `user_id || 0x00 || reward_kind`.
    /// Key existence is the "already granted" signal.
    pub const COMPLETIONS: &str = "completions";

    /// Referral edges, keyed by `referred_id`. One edge per referred user.
    pub const REFERRALS: &str = "referrals";

    /// Index: referral edges by referrer, keyed by `referrer_id || 0x00 || referred_id`.
    /// Value is empty (index only).
    pub const REFERRALS_BY_REFERRER: &str = "referrals_by_referrer";

    /// Prize exchanges, keyed by `user_id || 0x00 || request_id`.
    pub const PRIZE_EXCHANGES: &str = "prize_exchanges";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::USERS,
        cf::DAILY_TAPS,
        cf::COMPLETIONS,
        cf::REFERRALS,
        cf::REFERRALS_BY_REFERRER,
        cf::PRIZE_EXCHANGES,
    ]
}
