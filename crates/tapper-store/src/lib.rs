//! Storage layer for tapper.
//!
//! This crate provides durable storage for users, daily tap counters,
//! completion records, referral edges and prize exchanges. Two backends
//! implement the [`Store`] trait:
//!
//! - [`RocksStore`]: embedded `RocksDB` using pessimistic transactions
//!   (`rocksdb-backend` feature, enabled by default).
//! - [`PgStore`]: PostgreSQL via `sqlx`, with uniqueness enforced by table
//!   constraints.
//!
//! # Concurrency
//!
//! Every exactly-once guarantee is enforced here, never by callers. Grants and
//! referrals rely on unique keys (`(user_id, reward_kind)`, `referred_id`),
//! the tap limiter on a conditional increment, and balance changes on an
//! atomic in-store increment. Compound operations write the record and the
//! balance change together so a failure leaves neither behind.
//!
//! # Example
//!
//! ```no_run
//! use tapper_core::{RewardKind, UserId, UserProfile};
//! use tapper_store::{RocksStore, Store};
//!
//! # async fn example() -> tapper_store::Result<()> {
//! let store = RocksStore::open("/tmp/tapper-db")?;
//!
//! let user_id = UserId::new("12345").unwrap();
//! store.upsert_user(&UserProfile::new(user_id.clone())).await?;
//!
//! let outcome = store.grant_once(&user_id, &RewardKind::Quiz, 200).await?;
//! assert!(outcome.is_granted());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod postgres;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use postgres::PgStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use async_trait::async_trait;
use chrono::NaiveDate;

use tapper_core::{
    CompletionRecord, Flag, GrantOutcome, PrizeExchange, RedeemOutcome, ReferralEdge,
    ReferralOutcome, RewardKind, TapOutcome, TapPolicy, UpsertOutcome, User, UserId, UserProfile,
};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (`RocksDB` for single-node deployments, PostgreSQL for shared deployments).
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // User / Ledger Operations
    // =========================================================================

    /// Get a user by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>>;

    /// Create a user on first sight, or refresh the profile of a known one.
    ///
    /// Balance and flags of an existing user are never touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn upsert_user(&self, profile: &UserProfile) -> Result<UpsertOutcome>;

    /// List users, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_users(&self, limit: usize, offset: usize) -> Result<Vec<User>>;

    /// Atomically add `delta` to a user's balance.
    ///
    /// Returns the new balance.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user doesn't exist.
    async fn add_points(&self, user_id: &UserId, delta: i64) -> Result<i64>;

    /// Set a completion flag. Setting the current value is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user doesn't exist.
    async fn set_flag(&self, user_id: &UserId, flag: Flag, value: bool) -> Result<()>;

    // =========================================================================
    // Rate Limiter
    // =========================================================================

    /// Atomically consume one tap for `(user_id, date)` and credit the tap
    /// points, if the counter is below the policy cap.
    ///
    /// The counter is created on the first tap of a day. Two concurrent calls
    /// can never both take the last slot.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user doesn't exist.
    async fn try_consume_tap(
        &self,
        user_id: &UserId,
        date: NaiveDate,
        policy: TapPolicy,
    ) -> Result<TapOutcome>;

    /// Read the tap counter for a day (0 when no tap was made).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn tap_count(&self, user_id: &UserId, date: NaiveDate) -> Result<u32>;

    // =========================================================================
    // Grant Engine
    // =========================================================================

    /// Insert the completion record for `(user_id, kind)` and credit `points`,
    /// as one atomic write. If the record exists nothing changes.
    ///
    /// A reward kind that carries a user flag sets it in the same write.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user doesn't exist.
    async fn grant_once(
        &self,
        user_id: &UserId,
        kind: &RewardKind,
        points: i64,
    ) -> Result<GrantOutcome>;

    /// Get the completion record for `(user_id, kind)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_completion(
        &self,
        user_id: &UserId,
        kind: &RewardKind,
    ) -> Result<Option<CompletionRecord>>;

    /// List all completion records of a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_completions(&self, user_id: &UserId) -> Result<Vec<CompletionRecord>>;

    // =========================================================================
    // Referral Graph
    // =========================================================================

    /// Record `referrer -> referred` and credit the referrer `bonus` points
    /// under the `referral:<referred>` reward kind, atomically.
    ///
    /// Self-referrals, unknown referrers, already-referred users, users past
    /// onboarding and cycle-closing edges are no-ops reported through the
    /// returned outcome.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the referred user doesn't exist.
    async fn record_referral(
        &self,
        referrer_id: &UserId,
        referred_id: &UserId,
        bonus: i64,
    ) -> Result<ReferralOutcome>;

    /// Get the edge recorded for a referred user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_referral(&self, referred_id: &UserId) -> Result<Option<ReferralEdge>>;

    /// Count the users referred by `referrer_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn count_referrals(&self, referrer_id: &UserId) -> Result<u64>;

    // =========================================================================
    // Prize Exchanges
    // =========================================================================

    /// Record a prize exchange and debit its cost, atomically.
    ///
    /// A reused `(user_id, request_id)` returns the original exchange without
    /// debiting again.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the user doesn't exist.
    /// - `StoreError::InsufficientPoints` if the balance is below the cost.
    async fn redeem_prize(&self, exchange: &PrizeExchange) -> Result<RedeemOutcome>;

    /// List a user's prize exchanges, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_exchanges(&self, user_id: &UserId) -> Result<Vec<PrizeExchange>>;
}
