//! Error types for tapper.

use crate::ids::IdError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, PointsError>;

/// Errors surfaced by engine operations.
///
/// A reached tap cap or an already-granted reward is not an error; those are
/// reported as normal negative results.
#[derive(Debug, thiserror::Error)]
pub enum PointsError {
    /// The referenced user does not exist.
    #[error("user not found: {user_id}")]
    UserNotFound {
        /// The missing user.
        user_id: String,
    },

    /// Malformed input, rejected before any mutation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Balance too low for a debit.
    #[error("insufficient points: balance={balance}, required={required}")]
    InsufficientPoints {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// Timeout or temporary unavailability of the store. Safe to retry.
    #[error("transient storage failure: {0}")]
    Transient(String),

    /// Non-retryable storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// External verification provider failed.
    #[error("external service error: {service} - {message}")]
    ExternalService {
        /// The provider.
        service: String,
        /// Error message.
        message: String,
    },
}

impl PointsError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::ExternalService { .. })
    }
}
