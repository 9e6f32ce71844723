//! Tapper Client SDK.
//!
//! This crate provides a client library for the gateway (or any trusted
//! caller) to drive the tapper API on behalf of end users.
//!
//! # Example
//!
//! ```no_run
//! use tapper_client::{StartSession, TapperClient};
//! use tapper_core::UserId;
//!
//! # async fn example() -> Result<(), tapper_client::ClientError> {
//! let client = TapperClient::new("http://tapper:8080", "gateway-key");
//! let user_id = UserId::new("12345").unwrap();
//!
//! client.start_session(&user_id, &StartSession::default()).await?;
//!
//! let tap = client.tap(&user_id).await?;
//! println!("balance {}, {} taps left", tap.new_balance, tap.remaining_taps_today);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;
mod watch;

pub use client::{ClientOptions, TapperClient};
pub use error::ClientError;
pub use types::*;
pub use watch::SnapshotWatch;
