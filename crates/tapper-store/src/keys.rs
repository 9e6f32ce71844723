//! Key encoding utilities for `RocksDB`.
//!
//! Composite keys join their parts with a `0x00` separator. User ids never
//! contain `0x00` (see [`UserId::new`]), so a user prefix followed by the
//! separator selects exactly that user's rows.

use chrono::NaiveDate;
use tapper_core::{RewardKind, UserId};

const SEP: u8 = 0;

fn composite(user_id: &UserId, suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(user_id.as_bytes().len() + 1 + suffix.len());
    key.extend_from_slice(user_id.as_bytes());
    key.push(SEP);
    key.extend_from_slice(suffix);
    key
}

/// Create a user key.
#[must_use]
pub fn user_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create a daily tap counter key.
///
/// Format: `user_id || 0x00 || YYYY-MM-DD`
#[must_use]
pub fn tap_key(user_id: &UserId, date: NaiveDate) -> Vec<u8> {
    composite(user_id, date.format("%Y-%m-%d").to_string().as_bytes())
}

/// Create a completion record key.
///
/// Format: `user_id || 0x00 || reward_kind`
#[must_use]
pub fn completion_key(user_id: &UserId, kind: &RewardKind) -> Vec<u8> {
    composite(user_id, kind.key().as_bytes())
}

/// Create a referral edge key from the referred user.
#[must_use]
pub fn referral_key(referred_id: &UserId) -> Vec<u8> {
    referred_id.as_bytes().to_vec()
}

/// Create a referrer index key.
///
/// Format: `referrer_id || 0x00 || referred_id`
#[must_use]
pub fn referrer_index_key(referrer_id: &UserId, referred_id: &UserId) -> Vec<u8> {
    composite(referrer_id, referred_id.as_bytes())
}

/// Create a prize exchange key.
///
/// Format: `user_id || 0x00 || request_id`
#[must_use]
pub fn exchange_key(user_id: &UserId, request_id: &str) -> Vec<u8> {
    composite(user_id, request_id.as_bytes())
}

/// Prefix selecting every composite key owned by a user.
#[must_use]
pub fn user_prefix(user_id: &UserId) -> Vec<u8> {
    composite(user_id, &[])
}
