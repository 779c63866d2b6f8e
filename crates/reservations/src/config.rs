//! Engine configuration loaded from environment variables.

use chrono::Duration;

use crate::error::{ReservationError, Result};

/// Tunables for reservation lifetimes and sweeping.
///
/// Reads from environment variables:
/// - `RESERVATION_TTL_MINUTES`: default hold duration (default: `15`)
/// - `RESERVATION_MAX_TTL_MINUTES`: longest hold a caller may request (default: `1440`)
/// - `SWEEP_BATCH_SIZE`: expired holds reclaimed per query (default: `500`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationConfig {
    pub default_expiration_minutes: u32,
    pub max_expiration_minutes: u32,
    pub sweep_batch_size: usize,
}

impl ReservationConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            default_expiration_minutes: lookup("RESERVATION_TTL_MINUTES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_expiration_minutes),
            max_expiration_minutes: lookup("RESERVATION_MAX_TTL_MINUTES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_expiration_minutes),
            sweep_batch_size: lookup("SWEEP_BATCH_SIZE")
                .and_then(|v| v.parse().ok())
                .filter(|size| *size > 0)
                .unwrap_or(defaults.sweep_batch_size),
        }
    }

    /// Resolves a requested hold duration, applying the default when absent.
    pub fn expiration(&self, requested_minutes: Option<u32>) -> Result<Duration> {
        let minutes = requested_minutes.unwrap_or(self.default_expiration_minutes);
        if minutes == 0 || minutes > self.max_expiration_minutes {
            return Err(ReservationError::InvalidExpiration {
                minutes,
                max: self.max_expiration_minutes,
            });
        }
        Ok(Duration::minutes(i64::from(minutes)))
    }
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            default_expiration_minutes: 15,
            max_expiration_minutes: 24 * 60,
            sweep_batch_size: 500,
        }
    }
}
