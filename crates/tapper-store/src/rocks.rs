//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! All mutations run in pessimistic transactions: every key a mutation depends
//! on is read with `get_for_update` (an exclusive row lock held until commit),
//! so check-then-write sequences are atomic across threads. Within a
//! transaction the user row is always locked last, which keeps lock order
//! consistent across operations.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, MultiThreaded, Options,
    Transaction, TransactionDB, TransactionDBOptions,
};

use tapper_core::{
    CompletionRecord, DailyTapCounter, Flag, GrantOutcome, PrizeExchange, RedeemOutcome,
    ReferralEdge, ReferralOutcome, RewardKind, TapOutcome, TapPolicy, UpsertOutcome, User,
    UserId, UserProfile,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::Store;

/// How long a transaction waits for a row lock before failing with a
/// transient error.
const LOCK_TIMEOUT_MS: i64 = 2_000;

/// Upper bound on referral chain walks.
const MAX_REFERRAL_DEPTH: usize = 10_000;

type Db = TransactionDB<MultiThreaded>;
type Txn<'a> = Transaction<'a, Db>;
type Cf<'a> = Arc<BoundColumnFamily<'a>>;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<Db>,
    /// Serializes referral writes so two concurrent edges cannot close a
    /// cycle that neither transaction sees.
    referral_guard: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(LOCK_TIMEOUT_MS);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = Db::open_cf_descriptors(&opts, &txn_opts, path, cf_descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            referral_guard: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Cf<'_>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Read a key and hold an exclusive lock on it until the transaction ends.
    fn get_locked<T: serde::de::DeserializeOwned>(
        txn: &Txn<'_>,
        cf: &Cf<'_>,
        key: &[u8],
    ) -> Result<Option<T>> {
        txn.get_for_update_cf(cf, key, true)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Read a key inside a transaction without locking it.
    fn get_unlocked<T: serde::de::DeserializeOwned>(
        txn: &Txn<'_>,
        cf: &Cf<'_>,
        key: &[u8],
    ) -> Result<Option<T>> {
        txn.get_cf(cf, key)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn get<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Collect `(key, value)` pairs whose key starts with `prefix`.
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf(cf_name)?;
        let mut entries = Vec::new();

        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key, value));
        }

        Ok(entries)
    }

    // =========================================================================
    // Synchronous bodies of the Store operations
    // =========================================================================

    fn upsert_user_sync(&self, profile: &UserProfile) -> Result<UpsertOutcome> {
        let cf_users = self.cf(cf::USERS)?;
        let key = keys::user_key(&profile.user_id);
        let now = Utc::now();

        let txn = self.db.transaction();
        let (user, created) = match Self::get_locked::<User>(&txn, &cf_users, &key)? {
            Some(mut user) => {
                user.touch(profile, now);
                (user, false)
            }
            None => (User::new(profile, now), true),
        };

        txn.put_cf(&cf_users, &key, Self::serialize(&user)?)?;
        txn.commit()?;

        Ok(UpsertOutcome { user, created })
    }

    fn add_points_sync(&self, user_id: &UserId, delta: i64) -> Result<i64> {
        let cf_users = self.cf(cf::USERS)?;
        let key = keys::user_key(user_id);

        let txn = self.db.transaction();
        let mut user: User = Self::get_locked(&txn, &cf_users, &key)?
            .ok_or_else(|| StoreError::user_not_found(user_id))?;

        let balance = credit(user.points, delta)?;
        if balance < 0 {
            return Err(StoreError::InsufficientPoints {
                balance: user.points,
                required: delta.saturating_neg(),
            });
        }
        user.points = balance;

        txn.put_cf(&cf_users, &key, Self::serialize(&user)?)?;
        txn.commit()?;

        Ok(user.points)
    }

    fn set_flag_sync(&self, user_id: &UserId, flag: Flag, value: bool) -> Result<()> {
        let cf_users = self.cf(cf::USERS)?;
        let key = keys::user_key(user_id);

        let txn = self.db.transaction();
        let mut user: User = Self::get_locked(&txn, &cf_users, &key)?
            .ok_or_else(|| StoreError::user_not_found(user_id))?;

        if user.set_flag(flag, value) {
            txn.put_cf(&cf_users, &key, Self::serialize(&user)?)?;
            txn.commit()?;
        }

        Ok(())
    }

    fn try_consume_tap_sync(
        &self,
        user_id: &UserId,
        date: NaiveDate,
        policy: TapPolicy,
    ) -> Result<TapOutcome> {
        let cf_taps = self.cf(cf::DAILY_TAPS)?;
        let cf_users = self.cf(cf::USERS)?;
        let tap_key = keys::tap_key(user_id, date);
        let user_key = keys::user_key(user_id);

        let txn = self.db.transaction();
        let mut counter = Self::get_locked::<DailyTapCounter>(&txn, &cf_taps, &tap_key)?
            .unwrap_or_else(|| DailyTapCounter::new(user_id.clone(), date));
        let mut user: User = Self::get_locked(&txn, &cf_users, &user_key)?
            .ok_or_else(|| StoreError::user_not_found(user_id))?;

        if counter.tap_count >= policy.cap {
            // Dropping the transaction rolls back and releases the locks.
            return Ok(TapOutcome {
                applied: false,
                tap_count: counter.tap_count,
                balance: user.points,
            });
        }

        counter.tap_count += 1;
        user.points = credit(user.points, policy.points)?;

        txn.put_cf(&cf_taps, &tap_key, Self::serialize(&counter)?)?;
        txn.put_cf(&cf_users, &user_key, Self::serialize(&user)?)?;
        txn.commit()?;

        Ok(TapOutcome {
            applied: true,
            tap_count: counter.tap_count,
            balance: user.points,
        })
    }

    fn grant_once_sync(
        &self,
        user_id: &UserId,
        kind: &RewardKind,
        points: i64,
    ) -> Result<GrantOutcome> {
        let cf_completions = self.cf(cf::COMPLETIONS)?;
        let cf_users = self.cf(cf::USERS)?;
        let completion_key = keys::completion_key(user_id, kind);
        let user_key = keys::user_key(user_id);

        let txn = self.db.transaction();
        if txn
            .get_for_update_cf(&cf_completions, &completion_key, true)?
            .is_some()
        {
            return Ok(GrantOutcome::AlreadyGranted);
        }

        let mut user: User = Self::get_locked(&txn, &cf_users, &user_key)?
            .ok_or_else(|| StoreError::user_not_found(user_id))?;

        let record = CompletionRecord {
            user_id: user_id.clone(),
            reward_kind: kind.clone(),
            points_awarded: points,
            completed_at: Utc::now(),
        };
        user.points = credit(user.points, points)?;
        if let Some(flag) = kind.flag() {
            user.set_flag(flag, true);
        }

        txn.put_cf(&cf_completions, &completion_key, Self::serialize(&record)?)?;
        txn.put_cf(&cf_users, &user_key, Self::serialize(&user)?)?;
        txn.commit()?;

        Ok(GrantOutcome::Granted {
            balance: user.points,
        })
    }

    /// Whether `referred_id` is an ancestor of (or equal to) `referrer_id`
    /// in the referral graph.
    fn closes_cycle(
        txn: &Txn<'_>,
        cf_referrals: &Cf<'_>,
        referrer_id: &UserId,
        referred_id: &UserId,
    ) -> Result<bool> {
        let mut current = referrer_id.clone();
        for _ in 0..MAX_REFERRAL_DEPTH {
            if &current == referred_id {
                return Ok(true);
            }
            match Self::get_unlocked::<ReferralEdge>(txn, cf_referrals, &keys::referral_key(&current))? {
                Some(edge) => current = edge.referrer_id,
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    fn record_referral_sync(
        &self,
        referrer_id: &UserId,
        referred_id: &UserId,
        bonus: i64,
    ) -> Result<ReferralOutcome> {
        if referrer_id == referred_id {
            return Ok(ReferralOutcome::SelfReferral);
        }

        let cf_referrals = self.cf(cf::REFERRALS)?;
        let cf_index = self.cf(cf::REFERRALS_BY_REFERRER)?;
        let cf_completions = self.cf(cf::COMPLETIONS)?;
        let cf_users = self.cf(cf::USERS)?;

        let edge_key = keys::referral_key(referred_id);
        let kind = RewardKind::Referral(referred_id.clone());
        let completion_key = keys::completion_key(referrer_id, &kind);
        let referrer_key = keys::user_key(referrer_id);

        let _guard = self
            .referral_guard
            .lock()
            .map_err(|_| StoreError::Database("referral lock poisoned".into()))?;
        let txn = self.db.transaction();

        // The referred user's edge key is the race guard.
        if txn.get_for_update_cf(&cf_referrals, &edge_key, true)?.is_some() {
            return Ok(ReferralOutcome::AlreadyReferred);
        }

        let referred: User =
            Self::get_unlocked(&txn, &cf_users, &keys::user_key(referred_id))?
                .ok_or_else(|| StoreError::user_not_found(referred_id))?;
        if referred.onboarding_completed {
            return Ok(ReferralOutcome::WindowClosed);
        }

        if Self::closes_cycle(&txn, &cf_referrals, referrer_id, referred_id)? {
            return Ok(ReferralOutcome::Cycle);
        }

        if txn
            .get_for_update_cf(&cf_completions, &completion_key, true)?
            .is_some()
        {
            return Ok(ReferralOutcome::AlreadyReferred);
        }

        let Some(mut referrer) = Self::get_locked::<User>(&txn, &cf_users, &referrer_key)? else {
            return Ok(ReferralOutcome::UnknownReferrer);
        };

        let now = Utc::now();
        let edge = ReferralEdge {
            referrer_id: referrer_id.clone(),
            referred_id: referred_id.clone(),
            created_at: now,
        };
        let record = CompletionRecord {
            user_id: referrer_id.clone(),
            reward_kind: kind,
            points_awarded: bonus,
            completed_at: now,
        };
        referrer.points = credit(referrer.points, bonus)?;

        txn.put_cf(&cf_referrals, &edge_key, Self::serialize(&edge)?)?;
        txn.put_cf(
            &cf_index,
            keys::referrer_index_key(referrer_id, referred_id),
            [],
        )?;
        txn.put_cf(&cf_completions, &completion_key, Self::serialize(&record)?)?;
        txn.put_cf(&cf_users, &referrer_key, Self::serialize(&referrer)?)?;
        txn.commit()?;

        Ok(ReferralOutcome::Recorded {
            referrer_balance: referrer.points,
        })
    }

    fn redeem_prize_sync(&self, exchange: &PrizeExchange) -> Result<RedeemOutcome> {
        let cf_exchanges = self.cf(cf::PRIZE_EXCHANGES)?;
        let cf_users = self.cf(cf::USERS)?;
        let exchange_key = keys::exchange_key(&exchange.user_id, &exchange.request_id);
        let user_key = keys::user_key(&exchange.user_id);

        let txn = self.db.transaction();
        let existing: Option<PrizeExchange> =
            Self::get_locked(&txn, &cf_exchanges, &exchange_key)?;
        let mut user: User = Self::get_locked(&txn, &cf_users, &user_key)?
            .ok_or_else(|| StoreError::user_not_found(&exchange.user_id))?;

        if let Some(original) = existing {
            return Ok(RedeemOutcome::Replayed {
                exchange: original,
                balance: user.points,
            });
        }

        if user.points < exchange.points_spent {
            return Err(StoreError::InsufficientPoints {
                balance: user.points,
                required: exchange.points_spent,
            });
        }
        user.points -= exchange.points_spent;

        txn.put_cf(&cf_exchanges, &exchange_key, Self::serialize(exchange)?)?;
        txn.put_cf(&cf_users, &user_key, Self::serialize(&user)?)?;
        txn.commit()?;

        Ok(RedeemOutcome::Redeemed {
            exchange: exchange.clone(),
            balance: user.points,
        })
    }

    fn list_users_sync(&self, limit: usize, offset: usize) -> Result<Vec<User>> {
        let mut users = self
            .scan_prefix(cf::USERS, &[])?
            .into_iter()
            .map(|(_, value)| Self::deserialize::<User>(&value))
            .collect::<Result<Vec<_>>>()?;

        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users.into_iter().skip(offset).take(limit).collect())
    }
}

/// Apply `delta` to a balance, rejecting overflow.
fn credit(points: i64, delta: i64) -> Result<i64> {
    points
        .checked_add(delta)
        .ok_or_else(|| StoreError::InvalidInput("balance overflow".into()))
}

#[async_trait]
impl Store for RocksStore {
    // =========================================================================
    // User / Ledger Operations
    // =========================================================================

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        self.get(cf::USERS, &keys::user_key(user_id))
    }

    async fn upsert_user(&self, profile: &UserProfile) -> Result<UpsertOutcome> {
        self.upsert_user_sync(profile)
    }

    async fn list_users(&self, limit: usize, offset: usize) -> Result<Vec<User>> {
        self.list_users_sync(limit, offset)
    }

    async fn add_points(&self, user_id: &UserId, delta: i64) -> Result<i64> {
        self.add_points_sync(user_id, delta)
    }

    async fn set_flag(&self, user_id: &UserId, flag: Flag, value: bool) -> Result<()> {
        self.set_flag_sync(user_id, flag, value)
    }

    // =========================================================================
    // Rate Limiter
    // =========================================================================

    async fn try_consume_tap(
        &self,
        user_id: &UserId,
        date: NaiveDate,
        policy: TapPolicy,
    ) -> Result<TapOutcome> {
        self.try_consume_tap_sync(user_id, date, policy)
    }

    async fn tap_count(&self, user_id: &UserId, date: NaiveDate) -> Result<u32> {
        Ok(self
            .get::<DailyTapCounter>(cf::DAILY_TAPS, &keys::tap_key(user_id, date))?
            .map_or(0, |counter| counter.tap_count))
    }

    // =========================================================================
    // Grant Engine
    // =========================================================================

    async fn grant_once(
        &self,
        user_id: &UserId,
        kind: &RewardKind,
        points: i64,
    ) -> Result<GrantOutcome> {
        self.grant_once_sync(user_id, kind, points)
    }

    async fn get_completion(
        &self,
        user_id: &UserId,
        kind: &RewardKind,
    ) -> Result<Option<CompletionRecord>> {
        self.get(cf::COMPLETIONS, &keys::completion_key(user_id, kind))
    }

    async fn list_completions(&self, user_id: &UserId) -> Result<Vec<CompletionRecord>> {
        self.scan_prefix(cf::COMPLETIONS, &keys::user_prefix(user_id))?
            .into_iter()
            .map(|(_, value)| Self::deserialize(&value))
            .collect()
    }

    // =========================================================================
    // Referral Graph
    // =========================================================================

    async fn record_referral(
        &self,
        referrer_id: &UserId,
        referred_id: &UserId,
        bonus: i64,
    ) -> Result<ReferralOutcome> {
        self.record_referral_sync(referrer_id, referred_id, bonus)
    }

    async fn get_referral(&self, referred_id: &UserId) -> Result<Option<ReferralEdge>> {
        self.get(cf::REFERRALS, &keys::referral_key(referred_id))
    }

    async fn count_referrals(&self, referrer_id: &UserId) -> Result<u64> {
        let entries = self.scan_prefix(cf::REFERRALS_BY_REFERRER, &keys::user_prefix(referrer_id))?;
        Ok(entries.len() as u64)
    }

    // =========================================================================
    // Prize Exchanges
    // =========================================================================

    async fn redeem_prize(&self, exchange: &PrizeExchange) -> Result<RedeemOutcome> {
        self.redeem_prize_sync(exchange)
    }

    async fn list_exchanges(&self, user_id: &UserId) -> Result<Vec<PrizeExchange>> {
        let mut exchanges = self
            .scan_prefix(cf::PRIZE_EXCHANGES, &keys::user_prefix(user_id))?
            .into_iter()
            .map(|(_, value)| Self::deserialize::<PrizeExchange>(&value))
            .collect::<Result<Vec<_>>>()?;

        exchanges.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(exchanges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use tapper_core::default_catalog;
    use tempfile::TempDir;

    fn create_test_store() -> (Arc<RocksStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (Arc::new(store), dir)
    }

    async fn create_user(store: &RocksStore) -> UserId {
        let user_id = UserId::generate();
        store
            .upsert_user(&UserProfile::new(user_id.clone()))
            .await
            .unwrap();
        user_id
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 27).unwrap()
    }

    const POLICY: TapPolicy = TapPolicy { cap: 10, points: 2 };

    #[tokio::test]
    async fn upsert_creates_then_refreshes() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        let mut profile = UserProfile::new(user_id.clone());

        let first = store.upsert_user(&profile).await.unwrap();
        assert!(first.created);
        store.add_points(&user_id, 30).await.unwrap();

        profile.first_name = Some("Sigmund".into());
        let second = store.upsert_user(&profile).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.user.points, 30);
        assert_eq!(second.user.first_name.as_deref(), Some("Sigmund"));
    }

    #[tokio::test]
    async fn add_points_requires_user() {
        let (store, _dir) = create_test_store();
        let result = store.add_points(&UserId::generate(), 5).await;
        assert!(matches!(result, Err(StoreError::NotFound { entity: "user", .. })));
    }

    #[tokio::test]
    async fn debit_below_zero_is_rejected() {
        let (store, _dir) = create_test_store();
        let user_id = create_user(&store).await;
        store.add_points(&user_id, 120).await.unwrap();

        let result = store.add_points(&user_id, -500).await;
        assert!(matches!(
            result,
            Err(StoreError::InsufficientPoints {
                balance: 120,
                required: 500
            })
        ));

        assert_eq!(store.add_points(&user_id, -120).await.unwrap(), 0);
        let user = store.get_user(&user_id).await.unwrap().unwrap();
        assert_eq!(user.points, 0);
    }

    #[tokio::test]
    async fn credits_near_max_balance_fail_without_change() {
        let (store, _dir) = create_test_store();
        let user_id = create_user(&store).await;
        store.add_points(&user_id, i64::MAX - 1).await.unwrap();

        let tap = store.try_consume_tap(&user_id, today(), POLICY).await;
        assert!(matches!(tap, Err(StoreError::InvalidInput(_))));

        let grant = store.grant_once(&user_id, &RewardKind::Quiz, 200).await;
        assert!(matches!(grant, Err(StoreError::InvalidInput(_))));

        let referred = create_user(&store).await;
        let referral = store.record_referral(&user_id, &referred, 100).await;
        assert!(matches!(referral, Err(StoreError::InvalidInput(_))));

        let user = store.get_user(&user_id).await.unwrap().unwrap();
        assert_eq!(user.points, i64::MAX - 1);
        assert_eq!(store.tap_count(&user_id, today()).await.unwrap(), 0);
        assert!(store
            .get_completion(&user_id, &RewardKind::Quiz)
            .await
            .unwrap()
            .is_none());
        assert!(store.get_referral(&referred).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_flag_is_idempotent() {
        let (store, _dir) = create_test_store();
        let user_id = create_user(&store).await;

        store.set_flag(&user_id, Flag::OnboardingCompleted, true).await.unwrap();
        store.set_flag(&user_id, Flag::OnboardingCompleted, true).await.unwrap();

        let user = store.get_user(&user_id).await.unwrap().unwrap();
        assert!(user.onboarding_completed);
        assert!(!user.keyword_completed);
    }

    #[tokio::test]
    async fn taps_stop_at_cap_and_reset_next_day() {
        let (store, _dir) = create_test_store();
        let user_id = create_user(&store).await;

        let mut accepted = 0;
        for _ in 0..12 {
            if store.try_consume_tap(&user_id, today(), POLICY).await.unwrap().applied {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 10);
        assert_eq!(store.tap_count(&user_id, today()).await.unwrap(), 10);

        let tomorrow = today().succ_opt().unwrap();
        let outcome = store.try_consume_tap(&user_id, tomorrow, POLICY).await.unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.tap_count, 1);
        assert_eq!(outcome.balance, 22);
    }

    #[tokio::test]
    async fn tap_for_unknown_user_creates_nothing() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();

        let result = store.try_consume_tap(&user_id, today(), POLICY).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
        assert_eq!(store.tap_count(&user_id, today()).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_taps_never_exceed_cap() {
        let (store, _dir) = create_test_store();
        let user_id = create_user(&store).await;

        let tasks = (0..40).map(|_| {
            let store = Arc::clone(&store);
            let user_id = user_id.clone();
            tokio::spawn(async move { store.try_consume_tap(&user_id, today(), POLICY).await })
        });
        let applied = join_all(tasks)
            .await
            .into_iter()
            .filter(|r| r.as_ref().unwrap().as_ref().unwrap().applied)
            .count();

        assert_eq!(applied, 10);
        let user = store.get_user(&user_id).await.unwrap().unwrap();
        assert_eq!(user.points, 20);
    }

    #[tokio::test]
    async fn grant_once_is_idempotent_and_sets_flag() {
        let (store, _dir) = create_test_store();
        let user_id = create_user(&store).await;

        let first = store.grant_once(&user_id, &RewardKind::Keyword, 100).await.unwrap();
        assert_eq!(first, GrantOutcome::Granted { balance: 100 });

        let second = store.grant_once(&user_id, &RewardKind::Keyword, 100).await.unwrap();
        assert_eq!(second, GrantOutcome::AlreadyGranted);

        let user = store.get_user(&user_id).await.unwrap().unwrap();
        assert_eq!(user.points, 100);
        assert!(user.keyword_completed);

        let record = store
            .get_completion(&user_id, &RewardKind::Keyword)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.points_awarded, 100);
    }

    #[tokio::test]
    async fn grant_for_unknown_user_leaves_no_record() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();

        let result = store.grant_once(&user_id, &RewardKind::Quiz, 200).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
        assert!(store
            .get_completion(&user_id, &RewardKind::Quiz)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_grants_succeed_once() {
        let (store, _dir) = create_test_store();
        let user_id = create_user(&store).await;

        let tasks = (0..32).map(|_| {
            let store = Arc::clone(&store);
            let user_id = user_id.clone();
            tokio::spawn(async move { store.grant_once(&user_id, &RewardKind::Quiz, 200).await })
        });
        let granted = join_all(tasks)
            .await
            .into_iter()
            .filter(|r| r.as_ref().unwrap().as_ref().unwrap().is_granted())
            .count();

        assert_eq!(granted, 1);
        let user = store.get_user(&user_id).await.unwrap().unwrap();
        assert_eq!(user.points, 200);
        assert_eq!(store.list_completions(&user_id).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_mixed_writers_conserve_balance() {
        let (store, _dir) = create_test_store();
        let user_id = create_user(&store).await;

        let mut tasks = Vec::new();
        for _ in 0..15 {
            let store = Arc::clone(&store);
            let user_id = user_id.clone();
            tasks.push(tokio::spawn(async move {
                let outcome = store.try_consume_tap(&user_id, today(), POLICY).await.unwrap();
                if outcome.applied { 2 } else { 0 }
            }));
        }
        for kind in [RewardKind::Quiz, RewardKind::Keyword, RewardKind::ChannelSubscription] {
            for _ in 0..3 {
                let store = Arc::clone(&store);
                let user_id = user_id.clone();
                let kind = kind.clone();
                tasks.push(tokio::spawn(async move {
                    match store.grant_once(&user_id, &kind, 50).await.unwrap() {
                        GrantOutcome::Granted { .. } => 50,
                        GrantOutcome::AlreadyGranted => 0,
                    }
                }));
            }
        }

        let credited: i64 = join_all(tasks).await.into_iter().map(|r| r.unwrap()).sum();
        let user = store.get_user(&user_id).await.unwrap().unwrap();
        assert_eq!(credited, 20 + 150);
        assert_eq!(user.points, credited);
    }

    #[tokio::test]
    async fn referral_credits_referrer_once() {
        let (store, _dir) = create_test_store();
        let referrer = create_user(&store).await;
        let other = create_user(&store).await;
        let referred = create_user(&store).await;

        let outcome = store.record_referral(&referrer, &referred, 100).await.unwrap();
        assert_eq!(outcome, ReferralOutcome::Recorded { referrer_balance: 100 });

        let outcome = store.record_referral(&other, &referred, 100).await.unwrap();
        assert_eq!(outcome, ReferralOutcome::AlreadyReferred);

        let edge = store.get_referral(&referred).await.unwrap().unwrap();
        assert_eq!(edge.referrer_id, referrer);
        assert_eq!(store.count_referrals(&referrer).await.unwrap(), 1);
        assert_eq!(store.count_referrals(&other).await.unwrap(), 0);
        assert_eq!(store.get_user(&other).await.unwrap().unwrap().points, 0);
        assert_eq!(store.get_user(&referred).await.unwrap().unwrap().points, 0);
    }

    #[tokio::test]
    async fn referral_rejections_have_no_side_effects() {
        let (store, _dir) = create_test_store();
        let user = create_user(&store).await;
        let referred = create_user(&store).await;

        assert_eq!(
            store.record_referral(&user, &user, 100).await.unwrap(),
            ReferralOutcome::SelfReferral
        );
        assert_eq!(
            store
                .record_referral(&UserId::generate(), &referred, 100)
                .await
                .unwrap(),
            ReferralOutcome::UnknownReferrer
        );
        assert!(store.get_referral(&referred).await.unwrap().is_none());
        assert!(store.get_referral(&user).await.unwrap().is_none());
        assert_eq!(store.get_user(&user).await.unwrap().unwrap().points, 0);
    }

    #[tokio::test]
    async fn referral_cycle_is_rejected() {
        let (store, _dir) = create_test_store();
        let a = create_user(&store).await;
        let b = create_user(&store).await;
        let c = create_user(&store).await;

        assert!(store.record_referral(&a, &b, 100).await.unwrap().is_recorded());
        assert!(store.record_referral(&b, &c, 100).await.unwrap().is_recorded());
        assert_eq!(
            store.record_referral(&c, &a, 100).await.unwrap(),
            ReferralOutcome::Cycle
        );
        assert!(store.get_referral(&a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn referral_window_closes_after_onboarding() {
        let (store, _dir) = create_test_store();
        let referrer = create_user(&store).await;
        let referred = create_user(&store).await;
        store
            .set_flag(&referred, Flag::OnboardingCompleted, true)
            .await
            .unwrap();

        assert_eq!(
            store.record_referral(&referrer, &referred, 100).await.unwrap(),
            ReferralOutcome::WindowClosed
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_referrers_attribute_once() {
        let (store, _dir) = create_test_store();
        let referred = create_user(&store).await;
        let mut referrers = Vec::new();
        for _ in 0..8 {
            referrers.push(create_user(&store).await);
        }

        let tasks = referrers.iter().cloned().map(|referrer| {
            let store = Arc::clone(&store);
            let referred = referred.clone();
            tokio::spawn(async move { store.record_referral(&referrer, &referred, 100).await })
        });
        let recorded = join_all(tasks)
            .await
            .into_iter()
            .filter(|r| r.as_ref().unwrap().as_ref().unwrap().is_recorded())
            .count();
        assert_eq!(recorded, 1);

        let mut total = 0;
        for referrer in &referrers {
            total += store.get_user(referrer).await.unwrap().unwrap().points;
        }
        assert_eq!(total, 100);
    }

    #[tokio::test]
    async fn redeem_debits_once_per_request() {
        let (store, _dir) = create_test_store();
        let user_id = create_user(&store).await;
        store.add_points(&user_id, 700).await.unwrap();

        let prize = &default_catalog()[0];
        let exchange = PrizeExchange::new(user_id.clone(), "req-1".into(), prize);

        let first = store.redeem_prize(&exchange).await.unwrap();
        assert!(matches!(first, RedeemOutcome::Redeemed { balance: 100, .. }));

        let replay = PrizeExchange::new(user_id.clone(), "req-1".into(), prize);
        let second = store.redeem_prize(&replay).await.unwrap();
        match second {
            RedeemOutcome::Replayed { exchange: original, balance } => {
                assert_eq!(original.exchange_id, exchange.exchange_id);
                assert_eq!(balance, 100);
            }
            RedeemOutcome::Redeemed { .. } => panic!("replay debited twice"),
        }
        assert_eq!(store.list_exchanges(&user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn redeem_with_insufficient_points_changes_nothing() {
        let (store, _dir) = create_test_store();
        let user_id = create_user(&store).await;
        store.add_points(&user_id, 100).await.unwrap();

        let exchange = PrizeExchange::new(user_id.clone(), "req-9".into(), &default_catalog()[1]);
        let result = store.redeem_prize(&exchange).await;
        assert!(matches!(
            result,
            Err(StoreError::InsufficientPoints { balance: 100, required: 600 })
        ));
        assert!(store.list_exchanges(&user_id).await.unwrap().is_empty());
        assert_eq!(store.get_user(&user_id).await.unwrap().unwrap().points, 100);
    }

    #[tokio::test]
    async fn list_users_newest_first() {
        let (store, _dir) = create_test_store();
        let first = create_user(&store).await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = create_user(&store).await;

        let users = store.list_users(10, 0).await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].user_id, second);
        assert_eq!(users[1].user_id, first);

        let page = store.list_users(1, 1).await.unwrap();
        assert_eq!(page[0].user_id, first);
    }
}
