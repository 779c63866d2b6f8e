//! Reservation records and their state machine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{ReservationId, SessionId, StockTarget, TenantId};

/// The state of a reservation in its lifecycle.
///
/// State transitions:
/// ```text
/// Active ──┬──► Completed
///          └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Units are held for a checkout in progress.
    #[default]
    Active,

    /// Payment succeeded; the held units are sold (terminal state).
    Completed,

    /// The hold was released and its units restored (terminal state).
    Cancelled,
}

impl ReservationStatus {
    /// Returns true if a reservation in this state may move to `next`.
    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (
                ReservationStatus::Active,
                ReservationStatus::Completed | ReservationStatus::Cancelled
            )
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Completed | ReservationStatus::Cancelled
        )
    }

    /// Returns the state name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown reservation status: {0}")]
pub struct UnknownStatus(pub String);

impl std::str::FromStr for ReservationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReservationStatus::Active),
            "completed" => Ok(ReservationStatus::Completed),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A provisional hold on units of one stock-keeping unit for one checkout.
///
/// The ledger was already decremented when the reservation was created, so
/// completing it does not touch stock and cancelling it restores `quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub tenant_id: TenantId,
    pub target: StockTarget,
    pub quantity: u32,
    pub session_id: SessionId,
    pub status: ReservationStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Creates an active reservation that expires `ttl` after `now`.
    pub fn new(
        tenant_id: TenantId,
        target: StockTarget,
        quantity: u32,
        session_id: SessionId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            tenant_id,
            target,
            quantity,
            session_id,
            status: ReservationStatus::Active,
            expires_at: now + ttl,
            created_at: now,
            completed_at: None,
            cancelled_at: None,
        }
    }

    /// Returns true while the hold is unresolved.
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    /// Returns true if the hold is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Applies a status change in place, stamping the matching timestamp.
    ///
    /// Returns false and leaves the record untouched if the transition is not
    /// allowed from the current state.
    pub fn transition(&mut self, next: ReservationStatus, at: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        match next {
            ReservationStatus::Completed => self.completed_at = Some(at),
            ReservationStatus::Cancelled => self.cancelled_at = Some(at),
            ReservationStatus::Active => {}
        }
        true
    }
}
