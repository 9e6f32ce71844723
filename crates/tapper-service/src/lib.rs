//! Tapper HTTP API Service.
//!
//! This crate provides the points engine and its HTTP API:
//!
//! - Daily taps with a per-day cap
//! - One-time task rewards (quiz, keyword, channel subscription)
//! - Referral attribution with a referrer bonus
//! - Live balance snapshots (query, subscription, WebSocket stream)
//! - Prize redemption and admin tools
//!
//! # Authentication
//!
//! End users never call the service directly. A trusted gateway validates the
//! Telegram launch data and forwards the verified user id with a shared key
//! (see [`auth`]). Admin endpoints use a separate admin key.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers are async for a uniform router

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod routes;
pub mod state;
pub mod verify;

pub use config::ServiceConfig;
pub use engine::PointsEngine;
pub use error::ApiError;
pub use hub::{SnapshotHub, SnapshotSubscription, SubscriptionHandle};
pub use routes::create_router;
pub use state::AppState;
pub use verify::{MembershipVerifier, StaticMembership, TelegramMembership, VerifyError};
