//! PostgreSQL storage implementation.
//!
//! Exactly-once guarantees rest on table constraints: `ON CONFLICT DO NOTHING`
//! against a primary or unique key decides which of several racing writers
//! wins, and every record insert shares a transaction with its balance
//! update.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::debug;

use tapper_core::{
    CompletionRecord, Flag, GrantOutcome, PrizeExchange, RedeemOutcome, ReferralEdge,
    ReferralOutcome, RewardKind, TapOutcome, TapPolicy, UpsertOutcome, User, UserId, UserProfile,
};

use crate::error::{Result, StoreError};
use crate::Store;

/// Default pool size.
const MAX_CONNECTIONS: u32 = 16;

/// How long to wait for a pooled connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Advisory lock key taken by every referral write.
const REFERRAL_LOCK_KEY: i64 = 0x7461_7070_6572;

/// Upper bound on referral chain walks.
const MAX_REFERRAL_DEPTH: i32 = 10_000;

const USER_COLUMNS: &str = "user_id, points, onboarding_completed, keyword_completed, \
     first_name, username, avatar_url, start_source, created_at, last_seen_at";

const EXCHANGE_COLUMNS: &str =
    "exchange_id, user_id, request_id, prize_id, prize_name, points_spent, created_at";

/// PostgreSQL-backed storage implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be established.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Apply pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))
    }
}

// =============================================================================
// Row types
// =============================================================================

#[derive(FromRow)]
struct UserRow {
    user_id: String,
    points: i64,
    onboarding_completed: bool,
    keyword_completed: bool,
    first_name: Option<String>,
    username: Option<String>,
    avatar_url: Option<String>,
    start_source: Option<String>,
    created_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(Self {
            user_id: parse_user_id(row.user_id)?,
            points: row.points,
            onboarding_completed: row.onboarding_completed,
            keyword_completed: row.keyword_completed,
            first_name: row.first_name,
            username: row.username,
            avatar_url: row.avatar_url,
            start_source: row.start_source,
            created_at: row.created_at,
            last_seen_at: row.last_seen_at,
        })
    }
}

#[derive(FromRow)]
struct CompletionRow {
    user_id: String,
    reward_kind: String,
    points_awarded: i64,
    completed_at: DateTime<Utc>,
}

impl TryFrom<CompletionRow> for CompletionRecord {
    type Error = StoreError;

    fn try_from(row: CompletionRow) -> Result<Self> {
        Ok(Self {
            user_id: parse_user_id(row.user_id)?,
            reward_kind: row
                .reward_kind
                .parse()
                .map_err(|e: tapper_core::reward::RewardKindError| {
                    StoreError::Serialization(e.to_string())
                })?,
            points_awarded: row.points_awarded,
            completed_at: row.completed_at,
        })
    }
}

#[derive(FromRow)]
struct ReferralRow {
    referrer_id: String,
    referred_id: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ReferralRow> for ReferralEdge {
    type Error = StoreError;

    fn try_from(row: ReferralRow) -> Result<Self> {
        Ok(Self {
            referrer_id: parse_user_id(row.referrer_id)?,
            referred_id: parse_user_id(row.referred_id)?,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct ExchangeRow {
    exchange_id: String,
    user_id: String,
    request_id: String,
    prize_id: i32,
    prize_name: String,
    points_spent: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<ExchangeRow> for PrizeExchange {
    type Error = StoreError;

    fn try_from(row: ExchangeRow) -> Result<Self> {
        Ok(Self {
            exchange_id: row
                .exchange_id
                .parse()
                .map_err(|e: tapper_core::IdError| StoreError::Serialization(e.to_string()))?,
            user_id: parse_user_id(row.user_id)?,
            request_id: row.request_id,
            prize_id: u32::try_from(row.prize_id)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            prize_name: row.prize_name,
            points_spent: row.points_spent,
            created_at: row.created_at,
        })
    }
}

fn parse_user_id(raw: String) -> Result<UserId> {
    UserId::new(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Map a foreign key violation on a user reference to `NotFound`.
fn user_fk(user_id: &UserId) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |err| match &err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            StoreError::user_not_found(user_id)
        }
        _ => err.into(),
    }
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn tap_count_from(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

impl PgStore {
    async fn balance(&self, user_id: &UserId) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT points FROM users WHERE user_id = $1")
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::user_not_found(user_id))
    }

    async fn find_exchange(&self, user_id: &UserId, request_id: &str) -> Result<Option<PrizeExchange>> {
        sqlx::query_as::<_, ExchangeRow>(&format!(
            "SELECT {EXCHANGE_COLUMNS} FROM prize_exchanges WHERE user_id = $1 AND request_id = $2"
        ))
        .bind(user_id.as_str())
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?
        .map(PrizeExchange::try_from)
        .transpose()
    }
}

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // User / Ledger Operations
    // =========================================================================

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = $1"))
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn upsert_user(&self, profile: &UserProfile) -> Result<UpsertOutcome> {
        #[derive(FromRow)]
        struct UpsertRow {
            #[sqlx(flatten)]
            user: UserRow,
            created: bool,
        }

        let row = sqlx::query_as::<_, UpsertRow>(&format!(
            "INSERT INTO users (user_id, first_name, username, avatar_url, start_source) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (user_id) DO UPDATE SET \
                 first_name = EXCLUDED.first_name, \
                 username = EXCLUDED.username, \
                 avatar_url = EXCLUDED.avatar_url, \
                 start_source = COALESCE(EXCLUDED.start_source, users.start_source), \
                 last_seen_at = now() \
             RETURNING {USER_COLUMNS}, (xmax = 0) AS created"
        ))
        .bind(profile.user_id.as_str())
        .bind(profile.first_name.as_deref())
        .bind(profile.username.as_deref())
        .bind(profile.avatar_url.as_deref())
        .bind(profile.start_source.as_deref())
        .fetch_one(&self.pool)
        .await?;

        Ok(UpsertOutcome {
            user: User::try_from(row.user)?,
            created: row.created,
        })
    }

    async fn list_users(&self, limit: usize, offset: usize) -> Result<Vec<User>> {
        sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(to_i64(limit))
        .bind(to_i64(offset))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(User::try_from)
        .collect()
    }

    async fn add_points(&self, user_id: &UserId, delta: i64) -> Result<i64> {
        let updated = sqlx::query_scalar::<_, i64>(
            "UPDATE users SET points = points + $2 \
             WHERE user_id = $1 AND points + $2 >= 0 RETURNING points",
        )
        .bind(user_id.as_str())
        .bind(delta)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(balance) = updated {
            return Ok(balance);
        }

        // Either the user is missing or the debit would go below zero
        let balance = sqlx::query_scalar::<_, i64>("SELECT points FROM users WHERE user_id = $1")
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::user_not_found(user_id))?;

        Err(StoreError::InsufficientPoints {
            balance,
            required: delta.saturating_neg(),
        })
    }

    async fn set_flag(&self, user_id: &UserId, flag: Flag, value: bool) -> Result<()> {
        let result = sqlx::query(&format!(
            "UPDATE users SET {} = $2 WHERE user_id = $1",
            flag.as_str()
        ))
        .bind(user_id.as_str())
        .bind(value)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::user_not_found(user_id));
        }
        Ok(())
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
        let cap = i32::try_from(policy.cap)
            .map_err(|_| StoreError::InvalidInput("tap cap out of range".into()))?;

        if cap > 0 {
            let mut tx = self.pool.begin().await?;

            // The conditional upsert is the limiter: the row lock taken by
            // ON CONFLICT serializes racing taps and the WHERE re-checks the cap.
            let counted = sqlx::query_scalar::<_, i32>(
                "INSERT INTO daily_taps (user_id, tap_date, tap_count) VALUES ($1, $2, 1) \
                 ON CONFLICT (user_id, tap_date) DO UPDATE \
                     SET tap_count = daily_taps.tap_count + 1 \
                     WHERE daily_taps.tap_count < $3 \
                 RETURNING tap_count",
            )
            .bind(user_id.as_str())
            .bind(date)
            .bind(cap)
            .fetch_optional(&mut *tx)
            .await
            .map_err(user_fk(user_id))?;

            if let Some(tap_count) = counted {
                let balance = sqlx::query_scalar::<_, i64>(
                    "UPDATE users SET points = points + $2 WHERE user_id = $1 RETURNING points",
                )
                .bind(user_id.as_str())
                .bind(policy.points)
                .fetch_one(&mut *tx)
                .await?;
                tx.commit().await?;

                return Ok(TapOutcome {
                    applied: true,
                    tap_count: tap_count_from(tap_count)?,
                    balance,
                });
            }
        }

        debug!(user_id = %user_id, %date, "Daily tap cap reached");
        Ok(TapOutcome {
            applied: false,
            tap_count: self.tap_count(user_id, date).await?,
            balance: self.balance(user_id).await?,
        })
    }

    async fn tap_count(&self, user_id: &UserId, date: NaiveDate) -> Result<u32> {
        let count = sqlx::query_scalar::<_, i32>(
            "SELECT tap_count FROM daily_taps WHERE user_id = $1 AND tap_date = $2",
        )
        .bind(user_id.as_str())
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        count.map_or(Ok(0), tap_count_from)
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
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_scalar::<_, String>(
            "INSERT INTO completion_records (user_id, reward_kind, points_awarded) \
             VALUES ($1, $2, $3) ON CONFLICT DO NOTHING RETURNING reward_kind",
        )
        .bind(user_id.as_str())
        .bind(kind.key())
        .bind(points)
        .fetch_optional(&mut *tx)
        .await
        .map_err(user_fk(user_id))?;

        if inserted.is_none() {
            return Ok(GrantOutcome::AlreadyGranted);
        }

        let update = match kind.flag() {
            Some(flag) => format!(
                "UPDATE users SET points = points + $2, {} = TRUE WHERE user_id = $1 RETURNING points",
                flag.as_str()
            ),
            None => "UPDATE users SET points = points + $2 WHERE user_id = $1 RETURNING points"
                .to_string(),
        };
        let balance = sqlx::query_scalar::<_, i64>(&update)
            .bind(user_id.as_str())
            .bind(points)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(GrantOutcome::Granted { balance })
    }

    async fn get_completion(
        &self,
        user_id: &UserId,
        kind: &RewardKind,
    ) -> Result<Option<CompletionRecord>> {
        sqlx::query_as::<_, CompletionRow>(
            "SELECT user_id, reward_kind, points_awarded, completed_at \
             FROM completion_records WHERE user_id = $1 AND reward_kind = $2",
        )
        .bind(user_id.as_str())
        .bind(kind.key())
        .fetch_optional(&self.pool)
        .await?
        .map(CompletionRecord::try_from)
        .transpose()
    }

    async fn list_completions(&self, user_id: &UserId) -> Result<Vec<CompletionRecord>> {
        sqlx::query_as::<_, CompletionRow>(
            "SELECT user_id, reward_kind, points_awarded, completed_at \
             FROM completion_records WHERE user_id = $1 ORDER BY completed_at",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(CompletionRecord::try_from)
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
        if referrer_id == referred_id {
            return Ok(ReferralOutcome::SelfReferral);
        }

        let mut tx = self.pool.begin().await?;

        // Graph writes are serialized so a concurrent pair of edges cannot
        // close a cycle.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(REFERRAL_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let onboarded = sqlx::query_scalar::<_, bool>(
            "SELECT onboarding_completed FROM users WHERE user_id = $1",
        )
        .bind(referred_id.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::user_not_found(referred_id))?;

        let existing = sqlx::query_scalar::<_, String>(
            "SELECT referrer_id FROM referral_edges WHERE referred_id = $1",
        )
        .bind(referred_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            return Ok(ReferralOutcome::AlreadyReferred);
        }
        if onboarded {
            return Ok(ReferralOutcome::WindowClosed);
        }

        let referrer_known =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM users WHERE user_id = $1)")
                .bind(referrer_id.as_str())
                .fetch_one(&mut *tx)
                .await?;
        if !referrer_known {
            return Ok(ReferralOutcome::UnknownReferrer);
        }

        let closes_cycle = sqlx::query_scalar::<_, bool>(
            "WITH RECURSIVE chain (user_id, depth) AS ( \
                 SELECT $1::TEXT, 0 \
                 UNION ALL \
                 SELECT e.referrer_id, c.depth + 1 \
                 FROM referral_edges e JOIN chain c ON e.referred_id = c.user_id \
                 WHERE c.depth < $3 \
             ) \
             SELECT EXISTS (SELECT 1 FROM chain WHERE user_id = $2)",
        )
        .bind(referrer_id.as_str())
        .bind(referred_id.as_str())
        .bind(MAX_REFERRAL_DEPTH)
        .fetch_one(&mut *tx)
        .await?;
        if closes_cycle {
            return Ok(ReferralOutcome::Cycle);
        }

        let inserted = sqlx::query_scalar::<_, String>(
            "INSERT INTO referral_edges (referrer_id, referred_id) VALUES ($1, $2) \
             ON CONFLICT (referred_id) DO NOTHING RETURNING referred_id",
        )
        .bind(referrer_id.as_str())
        .bind(referred_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        if inserted.is_none() {
            return Ok(ReferralOutcome::AlreadyReferred);
        }

        let credited = sqlx::query_scalar::<_, String>(
            "INSERT INTO completion_records (user_id, reward_kind, points_awarded) \
             VALUES ($1, $2, $3) ON CONFLICT DO NOTHING RETURNING reward_kind",
        )
        .bind(referrer_id.as_str())
        .bind(RewardKind::Referral(referred_id.clone()).key())
        .bind(bonus)
        .fetch_optional(&mut *tx)
        .await?;
        if credited.is_none() {
            return Ok(ReferralOutcome::AlreadyReferred);
        }

        let referrer_balance = sqlx::query_scalar::<_, i64>(
            "UPDATE users SET points = points + $2 WHERE user_id = $1 RETURNING points",
        )
        .bind(referrer_id.as_str())
        .bind(bonus)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(ReferralOutcome::Recorded { referrer_balance })
    }

    async fn get_referral(&self, referred_id: &UserId) -> Result<Option<ReferralEdge>> {
        sqlx::query_as::<_, ReferralRow>(
            "SELECT referrer_id, referred_id, created_at FROM referral_edges WHERE referred_id = $1",
        )
        .bind(referred_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(ReferralEdge::try_from)
        .transpose()
    }

    async fn count_referrals(&self, referrer_id: &UserId) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM referral_edges WHERE referrer_id = $1",
        )
        .bind(referrer_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        u64::try_from(count).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    // =========================================================================
    // Prize Exchanges
    // =========================================================================

    async fn redeem_prize(&self, exchange: &PrizeExchange) -> Result<RedeemOutcome> {
        let prize_id = i32::try_from(exchange.prize_id)
            .map_err(|_| StoreError::InvalidInput("prize id out of range".into()))?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_scalar::<_, String>(
            "INSERT INTO prize_exchanges \
                 (exchange_id, user_id, request_id, prize_id, prize_name, points_spent, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (user_id, request_id) DO NOTHING RETURNING exchange_id",
        )
        .bind(exchange.exchange_id.to_string())
        .bind(exchange.user_id.as_str())
        .bind(&exchange.request_id)
        .bind(prize_id)
        .bind(&exchange.prize_name)
        .bind(exchange.points_spent)
        .bind(exchange.created_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(user_fk(&exchange.user_id))?;

        if inserted.is_none() {
            tx.rollback().await?;
            let original = self
                .find_exchange(&exchange.user_id, &exchange.request_id)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "prize exchange",
                    id: exchange.request_id.clone(),
                })?;
            return Ok(RedeemOutcome::Replayed {
                exchange: original,
                balance: self.balance(&exchange.user_id).await?,
            });
        }

        let debited = sqlx::query_scalar::<_, i64>(
            "UPDATE users SET points = points - $2 \
             WHERE user_id = $1 AND points >= $2 RETURNING points",
        )
        .bind(exchange.user_id.as_str())
        .bind(exchange.points_spent)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(balance) = debited else {
            tx.rollback().await?;
            return Err(StoreError::InsufficientPoints {
                balance: self.balance(&exchange.user_id).await?,
                required: exchange.points_spent,
            });
        };
        tx.commit().await?;

        Ok(RedeemOutcome::Redeemed {
            exchange: exchange.clone(),
            balance,
        })
    }

    async fn list_exchanges(&self, user_id: &UserId) -> Result<Vec<PrizeExchange>> {
        sqlx::query_as::<_, ExchangeRow>(&format!(
            "SELECT {EXCHANGE_COLUMNS} FROM prize_exchanges WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(PrizeExchange::try_from)
        .collect()
    }
}
