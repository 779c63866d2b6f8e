//! Reservation error types.

use common::{BundleId, StockTarget};
use stock_store::StoreError;
use thiserror::Error;

/// Errors that can occur during reservation operations.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// The product or variant does not exist, or the variant is switched off.
    #[error("Item no longer available: {0}")]
    NotFound(StockTarget),

    /// The bundle does not exist for the tenant.
    #[error("Bundle not found: {0}")]
    BundleNotFound(BundleId),

    /// The conditional decrement matched no row.
    ///
    /// Callers should re-query availability instead of retrying as-is.
    #[error("Insufficient stock for {target}: requested {requested}, only {available} left")]
    InsufficientStock {
        target: StockTarget,
        requested: u32,
        available: i64,
    },

    /// Quantity must be positive and small enough to multiply out.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Requested hold duration is outside the configured bounds.
    #[error("Invalid expiration: {minutes} minutes (must be between 1 and {max})")]
    InvalidExpiration { minutes: u32, max: u32 },

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ReservationError {
    /// Returns true if the same call may succeed after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReservationError::Store(e) if e.is_transient())
    }

    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ReservationError::NotFound(_) => "not_found",
            ReservationError::BundleNotFound(_) => "bundle_not_found",
            ReservationError::InsufficientStock { .. } => "insufficient_stock",
            ReservationError::InvalidQuantity { .. } => "invalid_quantity",
            ReservationError::InvalidExpiration { .. } => "invalid_expiration",
            ReservationError::Store(_) => "store",
        }
    }
}

/// Convenience type alias for reservation results.
pub type Result<T> = std::result::Result<T, ReservationError>;
