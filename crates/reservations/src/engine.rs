//! Reservation engine: reserve, complete and cancel stock holds.

use std::time::Instant;

use chrono::Utc;
use common::{ReservationId, SessionId, StockTarget, TenantId};
use metrics::{counter, histogram};
use stock_store::{
    Availability, Reservation, ReservationStatus, StockDecrement, StockStore, StockStoreExt,
};

use crate::command::{CompletionTarget, ReserveStock};
use crate::config::ReservationConfig;
use crate::error::{ReservationError, Result};

/// Why a reservation was cancelled, recorded as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The shopper or the checkout flow released the hold.
    Requested,
    /// The hold outlived its expiry and was reclaimed.
    Expired,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::Requested => "requested",
            CancelReason::Expired => "expired",
        }
    }
}

/// Service for managing stock reservations.
///
/// Stock is decremented when a hold is taken and restored only when the hold
/// is cancelled. Completing a hold leaves the ledger alone. Every ledger
/// change happens in the same store transaction as the status change that
/// justifies it.
pub struct ReservationEngine<S: StockStore> {
    store: S,
    config: ReservationConfig,
}

impl<S: StockStore> ReservationEngine<S> {
    /// Creates an engine with default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, ReservationConfig::default())
    }

    pub fn with_config(store: S, config: ReservationConfig) -> Self {
        Self { store, config }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ReservationConfig {
        &self.config
    }

    /// Holds `quantity` units of a product or variant for a checkout session.
    ///
    /// The decrement is conditional on enough units remaining, so concurrent
    /// callers can never drive the count below zero. Units with untracked
    /// stock always succeed and leave the ledger unchanged.
    ///
    /// # Errors
    ///
    /// - `InvalidQuantity` if `quantity` is zero
    /// - `InvalidExpiration` if the requested hold duration is out of bounds
    /// - `NotFound` if the unit does not exist or the variant is switched off
    /// - `InsufficientStock` if fewer than `quantity` units remain
    #[tracing::instrument(
        skip(self, cmd),
        fields(
            tenant_id = %cmd.tenant_id,
            target = %cmd.target,
            quantity = cmd.quantity,
            session_id = %cmd.session_id,
        )
    )]
    pub async fn reserve(&self, cmd: ReserveStock) -> Result<Reservation> {
        let started = Instant::now();
        let result = self.try_reserve(cmd).await;

        match &result {
            Ok(_) => counter!("reservations_created_total").increment(1),
            Err(e) => counter!("reservations_rejected_total", "reason" => e.reason()).increment(1),
        }
        histogram!("reservation_reserve_duration_seconds").record(started.elapsed().as_secs_f64());

        result
    }

    async fn try_reserve(&self, cmd: ReserveStock) -> Result<Reservation> {
        if cmd.quantity == 0 {
            return Err(ReservationError::InvalidQuantity {
                quantity: cmd.quantity,
            });
        }
        let ttl = self.config.expiration(cmd.expiration_minutes)?;

        let mut tx = self.store.begin().await?;
        match tx
            .decrement_stock(cmd.tenant_id, &cmd.target, cmd.quantity)
            .await?
        {
            StockDecrement::Applied { remaining } => {
                tracing::debug!(remaining, "stock decremented");
            }
            StockDecrement::Untracked => {
                tracing::debug!("stock is untracked, ledger unchanged");
            }
            StockDecrement::Insufficient { available } => {
                tx.rollback().await?;
                tracing::warn!(available, "not enough stock to reserve");
                return Err(ReservationError::InsufficientStock {
                    target: cmd.target,
                    requested: cmd.quantity,
                    available,
                });
            }
            StockDecrement::Missing => {
                tx.rollback().await?;
                return Err(ReservationError::NotFound(cmd.target));
            }
        }

        let reservation = Reservation::new(
            cmd.tenant_id,
            cmd.target,
            cmd.quantity,
            cmd.session_id,
            Utc::now(),
            ttl,
        );
        // A failed insert drops the transaction, which undoes the decrement.
        tx.insert_reservation(&reservation).await?;
        tx.commit().await?;

        tracing::info!(
            reservation_id = %reservation.id,
            expires_at = %reservation.expires_at,
            "stock reserved"
        );
        Ok(reservation)
    }

    /// Marks a reservation, or every active reservation of a session, as
    /// completed after payment succeeds.
    ///
    /// The units stay sold; nothing is added back to the ledger. Returns
    /// false when nothing was active, including when the hold was already
    /// completed, cancelled or reclaimed by the sweeper.
    #[tracing::instrument(skip(self, target), fields(tenant_id = %tenant_id))]
    pub async fn complete(
        &self,
        tenant_id: TenantId,
        target: impl Into<CompletionTarget>,
    ) -> Result<bool> {
        let target = target.into();
        let now = Utc::now();

        let mut tx = self.store.begin().await?;
        let completed = match &target {
            CompletionTarget::Reservation(id) => tx
                .transition_reservation(tenant_id, *id, ReservationStatus::Completed, now)
                .await?
                .into_iter()
                .collect::<Vec<_>>(),
            CompletionTarget::Session(session_id) => {
                tx.transition_session(tenant_id, session_id, ReservationStatus::Completed, now)
                    .await?
            }
        };
        tx.commit().await?;

        if completed.is_empty() {
            tracing::debug!(?target, "no active reservation to complete");
            return Ok(false);
        }

        for reservation in &completed {
            if reservation.is_expired_at(now) {
                tracing::warn!(
                    reservation_id = %reservation.id,
                    expires_at = %reservation.expires_at,
                    "completed a reservation past its expiry"
                );
            }
        }
        counter!("reservations_completed_total").increment(completed.len() as u64);
        tracing::info!(completed = completed.len(), "reservations completed");

        Ok(true)
    }

    /// Cancels an active reservation and returns its units to the ledger.
    ///
    /// Returns false if the reservation does not exist or is no longer
    /// active. Calling this twice restores stock once.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, tenant_id: TenantId, reservation_id: ReservationId) -> Result<bool> {
        self.cancel_with_reason(tenant_id, reservation_id, CancelReason::Requested)
            .await
    }

    /// Cancels every active reservation of an abandoned checkout session.
    ///
    /// Returns the number of reservations cancelled.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_session(&self, tenant_id: TenantId, session_id: &SessionId) -> Result<usize> {
        let mut tx = self.store.begin().await?;
        let cancelled = tx
            .transition_session(
                tenant_id,
                session_id,
                ReservationStatus::Cancelled,
                Utc::now(),
            )
            .await?;
        // Restore in ledger lock order, not cart order.
        let mut restores: Vec<&Reservation> = cancelled.iter().collect();
        restores.sort_by(|a, b| a.target.cmp(&b.target));
        for reservation in restores {
            tx.increment_stock(tenant_id, &reservation.target, reservation.quantity)
                .await?;
        }
        tx.commit().await?;

        if !cancelled.is_empty() {
            counter!("reservations_cancelled_total", "reason" => CancelReason::Requested.as_str())
                .increment(cancelled.len() as u64);
            tracing::info!(cancelled = cancelled.len(), "session reservations cancelled");
        }
        Ok(cancelled.len())
    }

    /// Reports how many units of a product or variant can currently be sold.
    ///
    /// The answer is advisory; only [`reserve`](Self::reserve) is authoritative.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the unit does not exist or the variant is
    /// switched off.
    #[tracing::instrument(skip(self))]
    pub async fn get_available_stock(
        &self,
        tenant_id: TenantId,
        target: &StockTarget,
    ) -> Result<Availability> {
        match self.store.stock_level(tenant_id, target).await? {
            Some(level) if level.is_reservable() => Ok(level.availability),
            _ => Err(ReservationError::NotFound(target.clone())),
        }
    }

    /// Loads a reservation by ID.
    pub async fn get_reservation(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>> {
        Ok(self.store.get_reservation(tenant_id, reservation_id).await?)
    }

    /// Lists every reservation of a checkout session, in expiry order.
    pub async fn session_reservations(
        &self,
        tenant_id: TenantId,
        session_id: &SessionId,
    ) -> Result<Vec<Reservation>> {
        Ok(self
            .store
            .reservations_for_session(tenant_id, session_id)
            .await?)
    }

    /// Reclaims one expired hold found by the sweeper.
    pub(crate) async fn reclaim_expired(&self, reservation: &Reservation) -> Result<bool> {
        self.cancel_with_reason(reservation.tenant_id, reservation.id, CancelReason::Expired)
            .await
    }

    async fn cancel_with_reason(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
        reason: CancelReason,
    ) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let Some(reservation) = tx
            .transition_reservation(
                tenant_id,
                reservation_id,
                ReservationStatus::Cancelled,
                Utc::now(),
            )
            .await?
        else {
            tx.rollback().await?;
            tracing::debug!(%reservation_id, "reservation not active, nothing to cancel");
            return Ok(false);
        };

        let restored = tx
            .increment_stock(tenant_id, &reservation.target, reservation.quantity)
            .await?;
        tx.commit().await?;

        counter!("reservations_cancelled_total", "reason" => reason.as_str()).increment(1);
        tracing::info!(
            %reservation_id,
            target = %reservation.target,
            quantity = reservation.quantity,
            restored,
            reason = reason.as_str(),
            "reservation cancelled"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use stock_store::InMemoryStockStore;

    use super::*;

    async fn setup(units: Option<i64>) -> (ReservationEngine<InMemoryStockStore>, TenantId) {
        let store = InMemoryStockStore::new();
        let tenant_id = TenantId::new();
        store.put_product(tenant_id, "SKU-001", units).await;
        (ReservationEngine::new(store), tenant_id)
    }

    fn sku() -> StockTarget {
        StockTarget::product("SKU-001")
    }

    #[tokio::test]
    async fn test_reserve_decrements_stock() {
        let (engine, tenant_id) = setup(Some(10)).await;

        let reservation = engine
            .reserve(ReserveStock::new(tenant_id, sku(), 3, "cs_1"))
            .await
            .unwrap();

        assert_eq!(reservation.status, ReservationStatus::Active);
        assert_eq!(reservation.quantity, 3);
        assert_eq!(
            reservation.expires_at - reservation.created_at,
            chrono::Duration::minutes(15)
        );
        assert_eq!(engine.store().units(tenant_id, &sku()).await, Some(7));
        assert_eq!(
            engine.get_available_stock(tenant_id, &sku()).await.unwrap(),
            Availability::Units(7)
        );
    }

    #[tokio::test]
    async fn test_reserve_rejects_shortfall_without_change() {
        let (engine, tenant_id) = setup(Some(2)).await;

        let err = engine
            .reserve(ReserveStock::new(tenant_id, sku(), 3, "cs_1"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReservationError::InsufficientStock {
                requested: 3,
                available: 2,
                ..
            }
        ));
        assert_eq!(engine.store().units(tenant_id, &sku()).await, Some(2));
        assert_eq!(engine.store().reservation_count().await, 0);
    }

    #[tokio::test]
    async fn test_reserve_validates_input() {
        let (engine, tenant_id) = setup(Some(2)).await;

        let zero = engine
            .reserve(ReserveStock::new(tenant_id, sku(), 0, "cs_1"))
            .await;
        assert!(matches!(
            zero,
            Err(ReservationError::InvalidQuantity { quantity: 0 })
        ));

        let too_long = engine
            .reserve(ReserveStock::new(tenant_id, sku(), 1, "cs_1").expires_in_minutes(10_000))
            .await;
        assert!(matches!(
            too_long,
            Err(ReservationError::InvalidExpiration { .. })
        ));

        let missing = engine
            .reserve(ReserveStock::new(
                tenant_id,
                StockTarget::product("NOPE"),
                1,
                "cs_1",
            ))
            .await;
        assert!(matches!(missing, Err(ReservationError::NotFound(_))));
        assert_eq!(engine.store().units(tenant_id, &sku()).await, Some(2));
    }

    #[tokio::test]
    async fn test_unlimited_stock_never_changes() {
        let (engine, tenant_id) = setup(None).await;

        for _ in 0..5 {
            engine
                .reserve(ReserveStock::new(tenant_id, sku(), 1_000, "cs_1"))
                .await
                .unwrap();
        }

        assert_eq!(
            engine.get_available_stock(tenant_id, &sku()).await.unwrap(),
            Availability::Unlimited
        );
    }

    #[tokio::test]
    async fn test_unavailable_variant_is_not_found() {
        let store = InMemoryStockStore::new();
        let tenant_id = TenantId::new();
        let red = StockTarget::variant("SKU-001", "red");
        store.put_product(tenant_id, "SKU-001", None).await;
        store
            .put_variant(tenant_id, "SKU-001", "red", Some(4))
            .await;
        store.set_variant_available(tenant_id, &red, false).await;
        let engine = ReservationEngine::new(store);

        assert!(matches!(
            engine.get_available_stock(tenant_id, &red).await,
            Err(ReservationError::NotFound(_))
        ));
        assert!(matches!(
            engine
                .reserve(ReserveStock::new(tenant_id, red.clone(), 1, "cs_1"))
                .await,
            Err(ReservationError::NotFound(_))
        ));
        assert_eq!(engine.store().units(tenant_id, &red).await, Some(4));
    }

    #[tokio::test]
    async fn test_cancel_restores_stock_once() {
        let (engine, tenant_id) = setup(Some(5)).await;
        let reservation = engine
            .reserve(ReserveStock::new(tenant_id, sku(), 2, "cs_1"))
            .await
            .unwrap();

        assert!(engine.cancel(tenant_id, reservation.id).await.unwrap());
        assert!(!engine.cancel(tenant_id, reservation.id).await.unwrap());
        assert_eq!(engine.store().units(tenant_id, &sku()).await, Some(5));

        let stored = engine
            .get_reservation(tenant_id, reservation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ReservationStatus::Cancelled);
        assert!(stored.cancelled_at.is_some());
    }

    #[tokio::test]
    async fn test_complete_keeps_stock_sold() {
        let (engine, tenant_id) = setup(Some(5)).await;
        let reservation = engine
            .reserve(ReserveStock::new(tenant_id, sku(), 2, "cs_1"))
            .await
            .unwrap();

        assert!(engine.complete(tenant_id, reservation.id).await.unwrap());
        assert!(!engine.complete(tenant_id, reservation.id).await.unwrap());
        assert!(!engine.cancel(tenant_id, reservation.id).await.unwrap());
        assert_eq!(engine.store().units(tenant_id, &sku()).await, Some(3));
    }

    #[tokio::test]
    async fn test_complete_by_session() {
        let (engine, tenant_id) = setup(Some(10)).await;
        for quantity in [1, 2] {
            engine
                .reserve(ReserveStock::new(tenant_id, sku(), quantity, "cs_1"))
                .await
                .unwrap();
        }
        engine
            .reserve(ReserveStock::new(tenant_id, sku(), 3, "cs_other"))
            .await
            .unwrap();

        let session = SessionId::new("cs_1");
        assert!(engine.complete(tenant_id, session.clone()).await.unwrap());

        let reservations = engine.session_reservations(tenant_id, &session).await.unwrap();
        assert_eq!(reservations.len(), 2);
        assert!(
            reservations
                .iter()
                .all(|r| r.status == ReservationStatus::Completed)
        );
        assert_eq!(engine.store().units(tenant_id, &sku()).await, Some(4));
    }

    #[tokio::test]
    async fn test_cancel_session_restores_each_hold() {
        let (engine, tenant_id) = setup(Some(10)).await;
        let session = SessionId::new("cs_1");
        for quantity in [1, 2, 3] {
            engine
                .reserve(ReserveStock::new(tenant_id, sku(), quantity, session.clone()))
                .await
                .unwrap();
        }
        assert_eq!(engine.store().units(tenant_id, &sku()).await, Some(4));

        assert_eq!(engine.cancel_session(tenant_id, &session).await.unwrap(), 3);
        assert_eq!(engine.cancel_session(tenant_id, &session).await.unwrap(), 0);
        assert_eq!(engine.store().units(tenant_id, &sku()).await, Some(10));
    }

    #[tokio::test]
    async fn test_other_tenant_cannot_resolve_reservation() {
        let (engine, tenant_id) = setup(Some(5)).await;
        let reservation = engine
            .reserve(ReserveStock::new(tenant_id, sku(), 1, "cs_1"))
            .await
            .unwrap();

        let stranger = TenantId::new();
        assert!(!engine.cancel(stranger, reservation.id).await.unwrap());
        assert!(!engine.complete(stranger, reservation.id).await.unwrap());
        assert_eq!(engine.store().units(tenant_id, &sku()).await, Some(4));
    }
}
