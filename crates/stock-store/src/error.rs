use thiserror::Error;

/// SQLSTATE codes for transactions aborted by the server that succeed on retry.
const DEADLOCK_DETECTED: &str = "40P01";
const SERIALIZATION_FAILURE: &str = "40001";

/// Errors that can occur when interacting with the stock store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored or submitted record violates the reservation schema.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The backend could not serve the request right now.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns true if retrying the same call with backoff may succeed.
    ///
    /// Conditional updates mutate nothing when they fail, so a retry after a
    /// transient error cannot double-apply.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(sqlx::Error::Database(db)) => {
                matches!(
                    db.code().as_deref(),
                    Some(DEADLOCK_DETECTED | SERIALIZATION_FAILURE)
                )
            }
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            StoreError::Migration(_) | StoreError::InvalidRecord(_) => false,
        }
    }
}

/// Result type for stock store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
