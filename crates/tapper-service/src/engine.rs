//! The points engine.
//!
//! `PointsEngine` is the operation surface used by the HTTP handlers: taps,
//! task grants, onboarding with referral attribution, snapshots and
//! subscriptions, prize redemption and admin adjustments. Every
//! exactly-once guarantee is delegated to the store; the engine validates
//! input, picks point values and publishes fresh snapshots after mutations.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tapper_core::{
    default_catalog, tap_date, Flag, GrantOutcome, PointsError, Prize, PrizeExchange,
    RedeemOutcome, ReferralOutcome, Result, RewardConfig, RewardKind, Snapshot, Task,
    UpsertOutcome, User, UserId, UserProfile, MAX_REQUEST_ID_LEN,
};
use tapper_store::Store;

use crate::hub::{SnapshotHub, SnapshotSubscription, SubscriptionHandle};
use crate::verify::MembershipVerifier;

/// Result of a tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapResult {
    /// Whether the tap was counted and credited.
    pub accepted: bool,
    /// Balance after the call.
    pub new_balance: i64,
    /// Taps counted today.
    pub taps_today: u32,
    /// Taps left today.
    pub remaining_taps_today: u32,
}

/// Result of a task completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantResult {
    /// Whether this call granted the reward.
    pub granted: bool,
    /// Balance after the call.
    pub new_balance: i64,
}

/// Result of onboarding a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnboardResult {
    /// Whether a referral edge was recorded by this call.
    pub referral_recorded: bool,
    /// Detailed referral outcome, when a referrer was supplied.
    pub referral: Option<ReferralOutcome>,
}

/// Referral statistics of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralInfo {
    /// Users referred by this user.
    pub referral_count: u64,
    /// Who referred this user, if anyone.
    pub referred_by: Option<UserId>,
}

/// Result of a redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeemResult {
    /// Whether this call debited the balance (false on replay).
    pub redeemed: bool,
    /// Balance after the call.
    pub balance: i64,
    /// The exchange recorded for the request id.
    pub exchange: PrizeExchange,
}

/// Per-user view for administration.
#[derive(Debug, Clone)]
pub struct UserOverview {
    /// The user row.
    pub user: User,
    /// Keys of the rewards granted to the user.
    pub completed: Vec<RewardKind>,
    /// Users referred by this user.
    pub referral_count: u64,
    /// Prize exchanges, newest first.
    pub exchanges: Vec<PrizeExchange>,
}

/// The points engine.
pub struct PointsEngine {
    store: Arc<dyn Store>,
    rewards: RewardConfig,
    keyword: String,
    catalog: Vec<Prize>,
    hub: SnapshotHub,
}

impl PointsEngine {
    /// Create an engine over a store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, rewards: RewardConfig, keyword: impl Into<String>) -> Self {
        Self {
            store,
            rewards,
            keyword: keyword.into(),
            catalog: default_catalog(),
            hub: SnapshotHub::new(),
        }
    }

    /// Point values in effect.
    #[must_use]
    pub const fn rewards(&self) -> &RewardConfig {
        &self.rewards
    }

    /// The prize catalog.
    #[must_use]
    pub fn catalog(&self) -> &[Prize] {
        &self.catalog
    }

    // =========================================================================
    // Users and onboarding
    // =========================================================================

    /// Create the user on first sight or refresh their profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn ensure_user(&self, profile: &UserProfile) -> Result<UpsertOutcome> {
        let outcome = self.store.upsert_user(profile).await?;
        if outcome.created {
            info!(
                user_id = %profile.user_id,
                source = ?profile.start_source,
                "New user registered"
            );
        }
        Ok(outcome)
    }

    /// Attribute the user to a referrer, if one is given.
    ///
    /// Rejected referrals (self, unknown referrer, already referred, cycle,
    /// onboarding already finished) are reported in the result and are not
    /// errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the user does not exist or the store fails.
    pub async fn onboard(
        &self,
        user_id: &UserId,
        referrer_id: Option<&UserId>,
    ) -> Result<OnboardResult> {
        let Some(referrer_id) = referrer_id else {
            return Ok(OnboardResult {
                referral_recorded: false,
                referral: None,
            });
        };

        let outcome = self
            .store
            .record_referral(referrer_id, user_id, self.rewards.referral_points)
            .await?;

        if let ReferralOutcome::Recorded { referrer_balance } = outcome {
            info!(
                referrer_id = %referrer_id,
                referred_id = %user_id,
                referrer_balance,
                "Referral recorded"
            );
            self.publish(referrer_id).await;
        } else {
            debug!(
                referrer_id = %referrer_id,
                referred_id = %user_id,
                outcome = outcome.as_str(),
                "Referral not recorded"
            );
        }

        Ok(OnboardResult {
            referral_recorded: outcome.is_recorded(),
            referral: Some(outcome),
        })
    }

    /// Mark onboarding as finished. Closes the referral window.
    ///
    /// # Errors
    ///
    /// Returns an error if the user does not exist or the store fails.
    pub async fn complete_onboarding(&self, user_id: &UserId) -> Result<()> {
        self.store
            .set_flag(user_id, Flag::OnboardingCompleted, true)
            .await?;
        debug!(user_id = %user_id, "Onboarding completed");
        self.publish(user_id).await;
        Ok(())
    }

    // =========================================================================
    // Taps
    // =========================================================================

    /// Register a tap now.
    ///
    /// # Errors
    ///
    /// Returns an error if the user does not exist or the store fails.
    pub async fn tap(&self, user_id: &UserId) -> Result<TapResult> {
        self.tap_at(user_id, Utc::now()).await
    }

    /// Register a tap at a given instant. The UTC calendar day of `at` selects
    /// the counter.
    ///
    /// # Errors
    ///
    /// Returns an error if the user does not exist or the store fails.
    pub async fn tap_at(&self, user_id: &UserId, at: DateTime<Utc>) -> Result<TapResult> {
        let policy = self.rewards.tap_policy();
        let outcome = self
            .store
            .try_consume_tap(user_id, tap_date(at), policy)
            .await?;

        if outcome.applied {
            debug!(
                user_id = %user_id,
                tap_count = outcome.tap_count,
                balance = outcome.balance,
                "Tap accepted"
            );
            self.publish(user_id).await;
        } else {
            debug!(user_id = %user_id, "Tap rejected, daily cap reached");
        }

        Ok(TapResult {
            accepted: outcome.applied,
            new_balance: outcome.balance,
            taps_today: outcome.tap_count,
            remaining_taps_today: outcome.remaining(policy.cap),
        })
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    /// Grant a task reward after external verification.
    ///
    /// `verified` is the caller's verification verdict; an unverified
    /// completion is rejected before any mutation.
    ///
    /// # Errors
    ///
    /// - `PointsError::Validation` if `verified` is false.
    /// - `PointsError::UserNotFound` if the user does not exist.
    pub async fn complete_task(
        &self,
        user_id: &UserId,
        task: Task,
        verified: bool,
    ) -> Result<GrantResult> {
        if !verified {
            return Err(PointsError::Validation(format!(
                "{} completion is not verified",
                task.reward_kind()
            )));
        }

        let kind = task.reward_kind();
        let points = self.rewards.points_for(&kind);

        match self.store.grant_once(user_id, &kind, points).await? {
            GrantOutcome::Granted { balance } => {
                info!(user_id = %user_id, reward_kind = %kind, points, balance, "Reward granted");
                self.publish(user_id).await;
                Ok(GrantResult {
                    granted: true,
                    new_balance: balance,
                })
            }
            GrantOutcome::AlreadyGranted => {
                debug!(user_id = %user_id, reward_kind = %kind, "Reward already granted");
                Ok(GrantResult {
                    granted: false,
                    new_balance: self.balance(user_id).await?,
                })
            }
        }
    }

    /// Check a keyword answer and grant the keyword reward.
    ///
    /// The answer is trimmed and compared case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns `PointsError::Validation` for an empty or wrong keyword.
    pub async fn submit_keyword(&self, user_id: &UserId, answer: &str) -> Result<GrantResult> {
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(PointsError::Validation("keyword must not be empty".into()));
        }
        if !answer.eq_ignore_ascii_case(self.keyword.trim()) {
            debug!(user_id = %user_id, "Wrong keyword submitted");
            return Err(PointsError::Validation("wrong keyword".into()));
        }

        self.complete_task(user_id, Task::Keyword, true).await
    }

    /// Verify the channel subscription and grant its reward.
    ///
    /// A user who already holds the reward is answered without calling the
    /// verifier.
    ///
    /// # Errors
    ///
    /// - `PointsError::Validation` if the user is not subscribed.
    /// - `PointsError::ExternalService` if the verifier fails.
    pub async fn verify_subscription(
        &self,
        user_id: &UserId,
        verifier: &dyn MembershipVerifier,
    ) -> Result<GrantResult> {
        let kind = RewardKind::ChannelSubscription;
        if self.store.get_completion(user_id, &kind).await?.is_some() {
            return Ok(GrantResult {
                granted: false,
                new_balance: self.balance(user_id).await?,
            });
        }

        let subscribed = verifier.is_member(user_id).await?;
        if !subscribed {
            debug!(user_id = %user_id, "Channel subscription not found");
            return Err(PointsError::Validation(
                "user is not subscribed to the channel".into(),
            ));
        }

        self.complete_task(user_id, Task::ChannelSubscription, true)
            .await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Current balance of a user.
    ///
    /// # Errors
    ///
    /// Returns `PointsError::UserNotFound` if the user does not exist.
    pub async fn balance(&self, user_id: &UserId) -> Result<i64> {
        self.store
            .get_user(user_id)
            .await?
            .map(|user| user.points)
            .ok_or_else(|| PointsError::UserNotFound {
                user_id: user_id.to_string(),
            })
    }

    /// Current balance and completion state of a user.
    ///
    /// # Errors
    ///
    /// Returns `PointsError::UserNotFound` if the user does not exist.
    pub async fn snapshot(&self, user_id: &UserId) -> Result<Snapshot> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| PointsError::UserNotFound {
                user_id: user_id.to_string(),
            })?;
        let completions = self.store.list_completions(user_id).await?;
        let taps_today = self.store.tap_count(user_id, tap_date(Utc::now())).await?;
        let referral_count = self.store.count_referrals(user_id).await?;

        Ok(Snapshot::from_parts(
            &user,
            &completions,
            taps_today,
            self.rewards.daily_tap_cap,
            referral_count,
        ))
    }

    /// Referral count and referrer of a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn referral_info(&self, user_id: &UserId) -> Result<ReferralInfo> {
        Ok(ReferralInfo {
            referral_count: self.store.count_referrals(user_id).await?,
            referred_by: self
                .store
                .get_referral(user_id)
                .await?
                .map(|edge| edge.referrer_id),
        })
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe to a user's snapshots. The subscription starts with the
    /// current snapshot.
    ///
    /// # Errors
    ///
    /// Returns `PointsError::UserNotFound` if the user does not exist.
    pub async fn subscribe(&self, user_id: &UserId) -> Result<SnapshotSubscription> {
        let _gate = self.hub.lock_user(user_id).await;
        let current = self.snapshot(user_id).await?;
        Ok(self.hub.subscribe(current).await)
    }

    /// Invoke `on_change` with every new snapshot until the returned handle is
    /// unsubscribed. Values may be coalesced to the latest one.
    ///
    /// # Errors
    ///
    /// Returns `PointsError::UserNotFound` if the user does not exist.
    pub async fn subscribe_with<F>(&self, user_id: &UserId, on_change: F) -> Result<SubscriptionHandle>
    where
        F: FnMut(Snapshot) + Send + 'static,
    {
        let subscription = self.subscribe(user_id).await?;
        Ok(SubscriptionHandle::spawn(subscription, on_change))
    }

    /// Push a fresh snapshot to subscribers of `user_id`, if any.
    ///
    /// Failures are logged; the mutation that triggered the publish has
    /// already committed.
    async fn publish(&self, user_id: &UserId) {
        if !self.hub.is_subscribed(user_id).await {
            return;
        }
        // Read under the gate so a slower reader cannot publish an older value
        let _gate = self.hub.lock_user(user_id).await;
        match self.snapshot(user_id).await {
            Ok(snapshot) => {
                self.hub.publish(snapshot).await;
            }
            Err(e) => warn!(user_id = %user_id, error = %e, "Failed to publish snapshot"),
        }
    }

    /// Re-read and publish snapshots of every subscribed user. Picks up
    /// changes made outside this process.
    pub async fn refresh_subscribers(&self) {
        for user_id in self.hub.subscribed_users().await {
            self.publish(&user_id).await;
        }
    }

    /// Spawn the background poller calling [`Self::refresh_subscribers`]
    /// every `interval`.
    pub fn spawn_snapshot_poller(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                engine.refresh_subscribers().await;
            }
        })
    }

    // =========================================================================
    // Prizes
    // =========================================================================

    /// Redeem a catalog prize. A repeated `request_id` returns the original
    /// exchange without a second debit.
    ///
    /// # Errors
    ///
    /// - `PointsError::Validation` for an unknown prize or a malformed request id.
    /// - `PointsError::InsufficientPoints` if the balance is below the cost.
    pub async fn redeem(
        &self,
        user_id: &UserId,
        prize_id: u32,
        request_id: &str,
    ) -> Result<RedeemResult> {
        let request_id = request_id.trim();
        if request_id.is_empty() || request_id.len() > MAX_REQUEST_ID_LEN {
            return Err(PointsError::Validation(format!(
                "request_id must be 1..={MAX_REQUEST_ID_LEN} bytes"
            )));
        }
        let prize = self
            .catalog
            .iter()
            .find(|p| p.id == prize_id)
            .ok_or_else(|| PointsError::Validation(format!("unknown prize: {prize_id}")))?;

        let exchange = PrizeExchange::new(user_id.clone(), request_id.to_string(), prize);
        match self.store.redeem_prize(&exchange).await? {
            RedeemOutcome::Redeemed { exchange, balance } => {
                info!(
                    user_id = %user_id,
                    prize_id,
                    exchange_id = %exchange.exchange_id,
                    balance,
                    "Prize redeemed"
                );
                self.publish(user_id).await;
                Ok(RedeemResult {
                    redeemed: true,
                    balance,
                    exchange,
                })
            }
            RedeemOutcome::Replayed { exchange, balance } => {
                debug!(user_id = %user_id, request_id, "Redemption replayed");
                Ok(RedeemResult {
                    redeemed: false,
                    balance,
                    exchange,
                })
            }
        }
    }

    /// A user's prize exchanges, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn exchanges(&self, user_id: &UserId) -> Result<Vec<PrizeExchange>> {
        Ok(self.store.list_exchanges(user_id).await?)
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// Apply an admin balance correction as an atomic delta.
    ///
    /// # Errors
    ///
    /// Returns `PointsError::UserNotFound` if the user does not exist and
    /// `PointsError::InsufficientPoints` if a debit exceeds the balance.
    pub async fn adjust_points(&self, user_id: &UserId, delta: i64, admin_id: &str) -> Result<i64> {
        let balance = self.store.add_points(user_id, delta).await?;
        info!(user_id = %user_id, delta, balance, admin_id, "Admin point adjustment");
        self.publish(user_id).await;
        Ok(balance)
    }

    /// Users with their completions, referral counts and exchanges.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn user_overviews(&self, limit: usize, offset: usize) -> Result<Vec<UserOverview>> {
        let users = self.store.list_users(limit, offset).await?;
        let mut overviews = Vec::with_capacity(users.len());

        for user in users {
            let completed = self
                .store
                .list_completions(&user.user_id)
                .await?
                .into_iter()
                .map(|record| record.reward_kind)
                .collect();
            let referral_count = self.store.count_referrals(&user.user_id).await?;
            let exchanges = self.store.list_exchanges(&user.user_id).await?;
            overviews.push(UserOverview {
                user,
                completed,
                referral_count,
                exchanges,
            });
        }

        Ok(overviews)
    }
}

#[cfg(all(test, feature = "rocksdb-backend"))]
mod tests {
    use super::*;
    use crate::verify::StaticMembership;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use tapper_store::RocksStore;
    use tempfile::TempDir;

    fn engine() -> (Arc<PointsEngine>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        let engine = PointsEngine::new(Arc::new(store), RewardConfig::default(), "talentsy");
        (Arc::new(engine), dir)
    }

    async fn user(engine: &PointsEngine) -> UserId {
        let user_id = UserId::generate();
        engine
            .ensure_user(&UserProfile::new(user_id.clone()))
            .await
            .unwrap();
        user_id
    }

    #[tokio::test]
    async fn twelve_taps_accept_ten() {
        let (engine, _dir) = engine();
        let user_id = user(&engine).await;

        let mut last = None;
        let mut accepted = 0;
        for _ in 0..12 {
            let result = engine.tap(&user_id).await.unwrap();
            if result.accepted {
                accepted += 1;
            }
            last = Some(result);
        }

        let last = last.unwrap();
        assert_eq!(accepted, 10);
        assert!(!last.accepted);
        assert_eq!(last.new_balance, 20);
        assert_eq!(last.remaining_taps_today, 0);
    }

    #[tokio::test]
    async fn counter_resets_on_new_utc_day() {
        let (engine, _dir) = engine();
        let user_id = user(&engine).await;
        let late = Utc.with_ymd_and_hms(2025, 3, 27, 23, 59, 0).unwrap();
        let early = Utc.with_ymd_and_hms(2025, 3, 28, 0, 1, 0).unwrap();

        for _ in 0..10 {
            assert!(engine.tap_at(&user_id, late).await.unwrap().accepted);
        }
        assert!(!engine.tap_at(&user_id, late).await.unwrap().accepted);

        let next = engine.tap_at(&user_id, early).await.unwrap();
        assert!(next.accepted);
        assert_eq!(next.remaining_taps_today, 9);
    }

    #[tokio::test]
    async fn quiz_twice_grants_once() {
        let (engine, _dir) = engine();
        let user_id = user(&engine).await;

        let first = engine.complete_task(&user_id, Task::Quiz, true).await.unwrap();
        let second = engine.complete_task(&user_id, Task::Quiz, true).await.unwrap();

        assert_eq!(first, GrantResult { granted: true, new_balance: 200 });
        assert_eq!(second, GrantResult { granted: false, new_balance: 200 });
    }

    #[tokio::test]
    async fn unverified_completion_is_rejected() {
        let (engine, _dir) = engine();
        let user_id = user(&engine).await;

        let result = engine.complete_task(&user_id, Task::Quiz, false).await;
        assert!(matches!(result, Err(PointsError::Validation(_))));
        assert_eq!(engine.snapshot(&user_id).await.unwrap().balance, 0);
    }

    #[tokio::test]
    async fn keyword_validation() {
        let (engine, _dir) = engine();
        let user_id = user(&engine).await;

        assert!(matches!(
            engine.submit_keyword(&user_id, "   ").await,
            Err(PointsError::Validation(_))
        ));
        assert!(matches!(
            engine.submit_keyword(&user_id, "freud").await,
            Err(PointsError::Validation(_))
        ));
        assert_eq!(engine.snapshot(&user_id).await.unwrap().balance, 0);

        let result = engine.submit_keyword(&user_id, "  TalentSy ").await.unwrap();
        assert!(result.granted);
        assert_eq!(result.new_balance, 100);

        let snapshot = engine.snapshot(&user_id).await.unwrap();
        assert!(snapshot.flags.keyword_completed);
    }

    #[tokio::test]
    async fn subscription_requires_membership() {
        let (engine, _dir) = engine();
        let user_id = user(&engine).await;

        let result = engine
            .verify_subscription(&user_id, &StaticMembership(false))
            .await;
        assert!(matches!(result, Err(PointsError::Validation(_))));

        let result = engine
            .verify_subscription(&user_id, &StaticMembership(true))
            .await
            .unwrap();
        assert_eq!(result, GrantResult { granted: true, new_balance: 150 });

        // Already rewarded: the verifier answer no longer matters.
        let again = engine
            .verify_subscription(&user_id, &StaticMembership(false))
            .await
            .unwrap();
        assert!(!again.granted);
        assert!(engine.snapshot(&user_id).await.unwrap().flags.subscription_completed);
    }

    #[tokio::test]
    async fn referral_scenario() {
        let (engine, _dir) = engine();
        let a = user(&engine).await;
        let b = user(&engine).await;
        let c = user(&engine).await;

        assert!(engine.onboard(&b, Some(&a)).await.unwrap().referral_recorded);
        let second = engine.onboard(&b, Some(&c)).await.unwrap();
        assert!(!second.referral_recorded);
        assert_eq!(second.referral, Some(ReferralOutcome::AlreadyReferred));

        assert_eq!(engine.snapshot(&a).await.unwrap().balance, 100);
        assert_eq!(engine.snapshot(&c).await.unwrap().balance, 0);
        assert_eq!(engine.snapshot(&b).await.unwrap().balance, 0);

        let info = engine.referral_info(&b).await.unwrap();
        assert_eq!(info.referred_by, Some(a.clone()));
        assert_eq!(engine.referral_info(&a).await.unwrap().referral_count, 1);
    }

    #[tokio::test]
    async fn self_referral_is_ignored() {
        let (engine, _dir) = engine();
        let a = user(&engine).await;

        let result = engine.onboard(&a, Some(&a)).await.unwrap();
        assert!(!result.referral_recorded);
        assert_eq!(result.referral, Some(ReferralOutcome::SelfReferral));
        assert_eq!(engine.snapshot(&a).await.unwrap().balance, 0);
        assert!(engine.referral_info(&a).await.unwrap().referred_by.is_none());
    }

    #[tokio::test]
    async fn referral_after_onboarding_is_ignored() {
        let (engine, _dir) = engine();
        let a = user(&engine).await;
        let b = user(&engine).await;
        engine.complete_onboarding(&b).await.unwrap();

        let result = engine.onboard(&b, Some(&a)).await.unwrap();
        assert_eq!(result.referral, Some(ReferralOutcome::WindowClosed));
    }

    #[tokio::test]
    async fn redemption_replay_and_shortfall() {
        let (engine, _dir) = engine();
        let user_id = user(&engine).await;
        engine.adjust_points(&user_id, 1_000, "test").await.unwrap();

        let first = engine.redeem(&user_id, 1, "req-1").await.unwrap();
        assert!(first.redeemed);
        assert_eq!(first.balance, 400);

        let replay = engine.redeem(&user_id, 1, "req-1").await.unwrap();
        assert!(!replay.redeemed);
        assert_eq!(replay.balance, 400);
        assert_eq!(replay.exchange.exchange_id, first.exchange.exchange_id);

        let short = engine.redeem(&user_id, 2, "req-2").await;
        assert!(matches!(
            short,
            Err(PointsError::InsufficientPoints { balance: 400, required: 600 })
        ));
        assert_eq!(engine.exchanges(&user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn redemption_input_validation() {
        let (engine, _dir) = engine();
        let user_id = user(&engine).await;

        assert!(matches!(
            engine.redeem(&user_id, 99, "req").await,
            Err(PointsError::Validation(_))
        ));
        assert!(matches!(
            engine.redeem(&user_id, 1, " ").await,
            Err(PointsError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn unknown_user_surfaces_not_found() {
        let (engine, _dir) = engine();
        let ghost = UserId::generate();

        assert!(matches!(
            engine.tap(&ghost).await,
            Err(PointsError::UserNotFound { .. })
        ));
        assert!(matches!(
            engine.snapshot(&ghost).await,
            Err(PointsError::UserNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn subscription_receives_mutations() {
        let (engine, _dir) = engine();
        let user_id = user(&engine).await;
        let mut sub = engine.subscribe(&user_id).await.unwrap();
        assert_eq!(sub.latest().balance, 0);

        engine.complete_task(&user_id, Task::Quiz, true).await.unwrap();
        let next = sub.changed().await.unwrap();
        assert_eq!(next.balance, 200);
        assert!(next.flags.quiz_completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_taps_publish_monotonic_snapshots() {
        let (engine, _dir) = engine();
        let user_id = user(&engine).await;
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let handle = engine
            .subscribe_with(&user_id, move |snapshot| {
                sink.lock().unwrap().push(snapshot.balance);
            })
            .await
            .unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..12 {
            let engine = Arc::clone(&engine);
            let user_id = user_id.clone();
            tasks.spawn(async move {
                if i % 3 == 0 {
                    engine.subscribe(&user_id).await.unwrap().unsubscribe();
                }
                engine.tap(&user_id).await.unwrap();
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        let mut sub = engine.subscribe(&user_id).await.unwrap();
        assert_eq!(sub.latest().balance, 20);

        for _ in 0..50 {
            if seen.lock().unwrap().last() == Some(&20) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.unsubscribe();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.last(), Some(&20));
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]), "{seen:?}");
    }

    #[tokio::test]
    async fn poller_covers_out_of_band_writes() {
        let (engine, _dir) = engine();
        let user_id = user(&engine).await;
        let mut sub = engine.subscribe(&user_id).await.unwrap();
        sub.latest();

        // A second engine over the same store stands in for another process.
        let other = PointsEngine::new(Arc::clone(&engine.store), RewardConfig::default(), "talentsy");
        other.adjust_points(&user_id, 30, "other").await.unwrap();

        engine.refresh_subscribers().await;
        assert_eq!(sub.changed().await.unwrap().balance, 30);
    }

    #[tokio::test]
    async fn callback_stops_after_unsubscribe() {
        let (engine, _dir) = engine();
        let user_id = user(&engine).await;
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let handle = engine
            .subscribe_with(&user_id, move |snapshot| {
                sink.lock().unwrap().push(snapshot.balance);
            })
            .await
            .unwrap();

        engine.tap(&user_id).await.unwrap();
        for _ in 0..50 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(seen.lock().unwrap().last(), Some(&2));

        handle.unsubscribe();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let count = seen.lock().unwrap().len();

        engine.tap(&user_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.lock().unwrap().len(), count);
    }

    #[tokio::test]
    async fn admin_overview_lists_activity() {
        let (engine, _dir) = engine();
        let a = user(&engine).await;
        let b = user(&engine).await;
        engine.onboard(&b, Some(&a)).await.unwrap();
        engine.complete_task(&a, Task::Quiz, true).await.unwrap();

        let overviews = engine.user_overviews(10, 0).await.unwrap();
        let view = overviews.iter().find(|o| o.user.user_id == a).unwrap();
        assert_eq!(view.user.points, 300);
        assert_eq!(view.referral_count, 1);
        assert!(view.completed.contains(&RewardKind::Quiz));
        assert!(view.completed.contains(&RewardKind::Referral(b)));
    }
}
