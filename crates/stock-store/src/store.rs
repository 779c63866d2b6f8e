use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Bundle, BundleId, Reservation, ReservationId, ReservationQuery, ReservationStatus, Result,
    SessionId, StockDecrement, StockLevel, StockTarget, StoreError, TenantId,
};

/// Core trait for stock store implementations.
///
/// Reads go straight to the store and are advisory. Every mutation of the
/// ledger or of a reservation's status goes through a [`StockTransaction`].
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Opens a unit of work.
    ///
    /// Changes made through the transaction become visible together on
    /// [`StockTransaction::commit`]; dropping it without committing discards them.
    async fn begin(&self) -> Result<Box<dyn StockTransaction>>;

    /// Reads the ledger entry of a product or variant.
    ///
    /// Returns None if the unit does not exist for the tenant.
    async fn stock_level(
        &self,
        tenant_id: TenantId,
        target: &StockTarget,
    ) -> Result<Option<StockLevel>>;

    /// Loads a bundle definition with its constituent items.
    async fn bundle(&self, tenant_id: TenantId, bundle_id: &BundleId) -> Result<Option<Bundle>>;

    /// Retrieves a reservation of a tenant by ID.
    async fn get_reservation(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>>;

    /// Retrieves reservations matching a query.
    async fn query_reservations(&self, query: ReservationQuery) -> Result<Vec<Reservation>>;
}

/// A unit of work against the ledger and the reservation store.
///
/// Each ledger method is a single indivisible operation: the predicate and
/// the mutation are evaluated together, never as a read followed by a write.
#[async_trait]
pub trait StockTransaction: Send {
    /// Decrements available units by `quantity` only if at least `quantity`
    /// remain. Untracked units are reported and left alone.
    async fn decrement_stock(
        &mut self,
        tenant_id: TenantId,
        target: &StockTarget,
        quantity: u32,
    ) -> Result<StockDecrement>;

    /// Adds `quantity` back to a tracked ledger entry.
    ///
    /// Returns false if the unit is untracked or no longer exists.
    async fn increment_stock(
        &mut self,
        tenant_id: TenantId,
        target: &StockTarget,
        quantity: u32,
    ) -> Result<bool>;

    /// Persists a new reservation.
    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()>;

    /// Moves one active reservation to `next`.
    ///
    /// Returns the updated record, or None if the reservation does not exist
    /// or is no longer active.
    async fn transition_reservation(
        &mut self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
        next: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Reservation>>;

    /// Moves every active reservation of a session to `next`.
    ///
    /// Returns only the records that actually changed.
    async fn transition_session(
        &mut self,
        tenant_id: TenantId,
        session_id: &SessionId,
        next: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<Vec<Reservation>>;

    /// Makes all changes of this unit of work visible.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards all changes of this unit of work.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Extension trait providing convenience methods for stock stores.
#[async_trait]
pub trait StockStoreExt: StockStore {
    /// Lists every reservation of a checkout session.
    async fn reservations_for_session(
        &self,
        tenant_id: TenantId,
        session_id: &SessionId,
    ) -> Result<Vec<Reservation>> {
        self.query_reservations(ReservationQuery::for_session(
            tenant_id,
            session_id.clone(),
        ))
        .await
    }

    /// Lists up to `limit` active reservations that expired before `now`.
    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>> {
        self.query_reservations(ReservationQuery::expired(now).limit(limit))
            .await
    }

    /// Checks if a reservation exists for the tenant.
    async fn reservation_exists(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
    ) -> Result<bool> {
        Ok(self
            .get_reservation(tenant_id, reservation_id)
            .await?
            .is_some())
    }
}

// Blanket implementation for all StockStore implementations
impl<T: StockStore + ?Sized> StockStoreExt for T {}

/// Validates a reservation before it is inserted.
pub fn validate_reservation_for_insert(reservation: &Reservation) -> Result<()> {
    if reservation.quantity == 0 {
        return Err(StoreError::InvalidRecord(
            "Reservation quantity must be greater than 0".to_string(),
        ));
    }
    if reservation.status != ReservationStatus::Active {
        return Err(StoreError::InvalidRecord(format!(
            "New reservations must be active, got {}",
            reservation.status
        )));
    }
    if reservation.expires_at <= reservation.created_at {
        return Err(StoreError::InvalidRecord(
            "Reservation must expire after it is created".to_string(),
        ));
    }
    Ok(())
}
