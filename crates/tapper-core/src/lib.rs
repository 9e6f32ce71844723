//! Core types for the tapper points engine.
//!
//! This crate provides the types shared by the store, the service and the
//! client:
//!
//! - **Identifiers**: `UserId`, `ExchangeId`
//! - **Users**: `User`, `UserProfile`, `Flag`
//! - **Rewards**: `RewardKind`, `Task`, `RewardConfig`, `CompletionRecord`
//! - **Taps**: `DailyTapCounter`, `TapOutcome`
//! - **Referrals**: `ReferralEdge`, `StartPayload`
//! - **Prizes**: `Prize`, `PrizeExchange`
//! - **Snapshots**: `Snapshot`
//!
//! # Point values
//!
//! | Action | Points |
//! |---|---|
//! | Tap (max 10 per day) | 2 |
//! | Quiz | 200 |
//! | Keyword task | 100 |
//! | Channel subscription | 150 |
//! | Referral (to the referrer) | 100 |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod prize;
pub mod referral;
pub mod reward;
pub mod snapshot;
pub mod tap;
pub mod user;

pub use error::{PointsError, Result};
pub use ids::{ExchangeId, IdError, UserId};
pub use prize::{default_catalog, Prize, PrizeExchange, RedeemOutcome, MAX_REQUEST_ID_LEN};
pub use referral::{ReferralEdge, ReferralOutcome, StartPayload, StartPayloadError};
pub use reward::{
    CompletionRecord, GrantOutcome, RewardConfig, RewardKind, Task, TapPolicy, DAILY_TAP_CAP,
    KEYWORD_POINTS, QUIZ_POINTS, REFERRAL_POINTS, SUBSCRIPTION_POINTS, TAP_POINTS,
};
pub use snapshot::{Snapshot, SnapshotFlags};
pub use tap::{tap_date, DailyTapCounter, TapOutcome};
pub use user::{Flag, UpsertOutcome, User, UserProfile};
