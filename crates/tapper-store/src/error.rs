//! Error types for tapper storage.

use tapper_core::PointsError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Timeout, lock contention or temporary unavailability. Safe to retry.
    #[error("transient database error: {0}")]
    Transient(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Key that was looked up.
        id: String,
    },

    /// Balance too low for a conditional debit.
    #[error("insufficient points: balance={balance}, required={required}")]
    InsufficientPoints {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// Argument rejected before touching storage.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl StoreError {
    /// Shorthand for a missing user row.
    pub(crate) fn user_not_found(user_id: &tapper_core::UserId) -> Self {
        Self::NotFound {
            entity: "user",
            id: user_id.to_string(),
        }
    }
}

impl From<StoreError> for PointsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity: "user", id } => Self::UserNotFound { user_id: id },
            StoreError::NotFound { entity, id } => Self::Storage(format!("{entity} not found: {id}")),
            StoreError::Transient(msg) => Self::Transient(msg),
            StoreError::InsufficientPoints { balance, required } => {
                Self::InsufficientPoints { balance, required }
            }
            StoreError::InvalidInput(msg) => Self::Validation(msg),
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Storage(msg),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
                Self::Transient(err.to_string())
            }
            // serialization_failure / deadlock_detected
            sqlx::Error::Database(db)
                if matches!(db.code().as_deref(), Some("40001" | "40P01")) =>
            {
                Self::Transient(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(err.to_string())
            }
            _ => Self::Database(err.to_string()),
        }
    }
}

#[cfg(feature = "rocksdb-backend")]
impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        use rocksdb::ErrorKind;

        match err.kind() {
            ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain => {
                Self::Transient(err.to_string())
            }
            _ => Self::Database(err.to_string()),
        }
    }
}
