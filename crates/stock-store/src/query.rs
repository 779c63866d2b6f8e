use chrono::{DateTime, Utc};

use crate::{ProductId, Reservation, ReservationStatus, SessionId, TenantId};

/// Builder for constructing reservation queries.
///
/// Results are ordered by `expires_at`, then `created_at`, so a sweep over
/// expired holds reclaims the oldest first.
#[derive(Debug, Clone, Default)]
pub struct ReservationQuery {
    /// Filter by owning tenant. The expiry sweep runs across tenants.
    pub tenant_id: Option<TenantId>,

    /// Filter by checkout session.
    pub session_id: Option<SessionId>,

    /// Filter by status.
    pub status: Option<ReservationStatus>,

    /// Filter by held product, covering all of its variants.
    pub product_id: Option<ProductId>,

    /// Filter to holds that expired strictly before this instant.
    pub expires_before: Option<DateTime<Utc>>,

    /// Maximum number of reservations to return.
    pub limit: Option<usize>,

    /// Number of reservations to skip.
    pub offset: Option<usize>,
}

impl ReservationQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for one checkout session of a tenant.
    pub fn for_session(tenant_id: TenantId, session_id: SessionId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            session_id: Some(session_id),
            ..Default::default()
        }
    }

    /// Creates a query for active holds whose expiry passed before `now`.
    pub fn expired(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(ReservationStatus::Active),
            expires_before: Some(now),
            ..Default::default()
        }
    }

    /// Filters by tenant.
    pub fn tenant_id(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    /// Filters by session.
    pub fn session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Filters by status.
    pub fn status(mut self, status: ReservationStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filters by product.
    pub fn product_id(mut self, product_id: ProductId) -> Self {
        self.product_id = Some(product_id);
        self
    }

    /// Filters to holds expiring before this instant (exclusive).
    pub fn expires_before(mut self, instant: DateTime<Utc>) -> Self {
        self.expires_before = Some(instant);
        self
    }

    /// Limits the number of reservations returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips this many reservations before returning results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if `reservation` passes every filter except paging.
    pub fn matches(&self, reservation: &Reservation) -> bool {
        if let Some(tenant_id) = self.tenant_id
            && reservation.tenant_id != tenant_id
        {
            return false;
        }
        if let Some(ref session_id) = self.session_id
            && &reservation.session_id != session_id
        {
            return false;
        }
        if let Some(status) = self.status
            && reservation.status != status
        {
            return false;
        }
        if let Some(ref product_id) = self.product_id
            && reservation.target.product_id() != product_id
        {
            return false;
        }
        if let Some(before) = self.expires_before
            && reservation.expires_at >= before
        {
            return false;
        }
        true
    }
}
