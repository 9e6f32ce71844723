//! API handlers.

pub mod admin;
pub mod health;
pub mod prizes;
pub mod referrals;
pub mod session;
pub mod stream;
pub mod taps;
pub mod tasks;
