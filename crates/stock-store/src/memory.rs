use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    Availability, Bundle, BundleId, ProductId, Reservation, ReservationId, ReservationQuery,
    ReservationStatus, Result, SessionId, StockDecrement, StockLevel, StockTarget, StoreError,
    TenantId, VariantId,
    store::{StockStore, StockTransaction, validate_reservation_for_insert},
};

type LedgerKey = (TenantId, StockTarget);

#[derive(Debug, Clone, Copy)]
struct LedgerEntry {
    available_units: Option<i64>,
    is_available: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    ledger: HashMap<LedgerKey, LedgerEntry>,
    bundles: HashMap<(TenantId, BundleId), Bundle>,
    reservations: HashMap<ReservationId, Reservation>,
    fail_reservation_inserts: bool,
}

/// In-memory stock store for testing.
///
/// A transaction owns the state lock until it commits or rolls back, so
/// units of work are serialized the way row locks serialize conflicting
/// updates in PostgreSQL.
#[derive(Clone, Default)]
pub struct InMemoryStockStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStockStore {
    /// Creates a new empty in-memory stock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a product. `available_units = None` means unlimited stock.
    pub async fn put_product(
        &self,
        tenant_id: TenantId,
        product_id: impl Into<ProductId>,
        available_units: Option<i64>,
    ) {
        self.put_entry(
            tenant_id,
            StockTarget::Product {
                product_id: product_id.into(),
            },
            available_units,
        )
        .await;
    }

    /// Registers a sellable variant of a product.
    pub async fn put_variant(
        &self,
        tenant_id: TenantId,
        product_id: impl Into<ProductId>,
        variant_id: impl Into<VariantId>,
        available_units: Option<i64>,
    ) {
        self.put_entry(
            tenant_id,
            StockTarget::variant(product_id, variant_id),
            available_units,
        )
        .await;
    }

    /// Marks a variant as sellable or not.
    pub async fn set_variant_available(
        &self,
        tenant_id: TenantId,
        target: &StockTarget,
        is_available: bool,
    ) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.ledger.get_mut(&(tenant_id, target.clone())) {
            entry.is_available = is_available;
        }
    }

    /// Stores a bundle definition.
    pub async fn put_bundle(&self, bundle: Bundle) {
        let mut state = self.state.lock().await;
        state
            .bundles
            .insert((bundle.tenant_id, bundle.id.clone()), bundle);
    }

    /// Returns the tracked unit count, or None if untracked or unknown.
    pub async fn units(&self, tenant_id: TenantId, target: &StockTarget) -> Option<i64> {
        let state = self.state.lock().await;
        state
            .ledger
            .get(&(tenant_id, target.clone()))
            .and_then(|entry| entry.available_units)
    }

    /// Returns the total number of reservations stored.
    pub async fn reservation_count(&self) -> usize {
        self.state.lock().await.reservations.len()
    }

    /// Makes every reservation insert fail with a transient error.
    pub async fn fail_reservation_inserts(&self, fail: bool) {
        self.state.lock().await.fail_reservation_inserts = fail;
    }

    async fn put_entry(
        &self,
        tenant_id: TenantId,
        target: StockTarget,
        available_units: Option<i64>,
    ) {
        let mut state = self.state.lock().await;
        state.ledger.insert(
            (tenant_id, target),
            LedgerEntry {
                available_units,
                is_available: true,
            },
        );
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn begin(&self) -> Result<Box<dyn StockTransaction>> {
        let state = self.state.clone().lock_owned().await;
        Ok(Box::new(InMemoryTransaction {
            state,
            undo: Vec::new(),
            finished: false,
        }))
    }

    async fn stock_level(
        &self,
        tenant_id: TenantId,
        target: &StockTarget,
    ) -> Result<Option<StockLevel>> {
        let state = self.state.lock().await;
        Ok(state
            .ledger
            .get(&(tenant_id, target.clone()))
            .map(|entry| StockLevel {
                availability: Availability::from_column(entry.available_units),
                is_available: entry.is_available,
            }))
    }

    async fn bundle(&self, tenant_id: TenantId, bundle_id: &BundleId) -> Result<Option<Bundle>> {
        let state = self.state.lock().await;
        Ok(state.bundles.get(&(tenant_id, bundle_id.clone())).cloned())
    }

    async fn get_reservation(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>> {
        let state = self.state.lock().await;
        Ok(state
            .reservations
            .get(&reservation_id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn query_reservations(&self, query: ReservationQuery) -> Result<Vec<Reservation>> {
        let state = self.state.lock().await;
        let mut reservations: Vec<_> = state
            .reservations
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();

        reservations.sort_by(|a, b| {
            a.expires_at
                .cmp(&b.expires_at)
                .then(a.created_at.cmp(&b.created_at))
        });

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(reservations.into_iter().skip(offset).take(limit).collect())
    }
}

/// Inverse of one mutation, replayed newest-first on rollback.
enum Undo {
    Ledger {
        key: LedgerKey,
        previous: Option<i64>,
    },
    Reservation {
        id: ReservationId,
        previous: Option<Reservation>,
    },
}

/// Unit of work over [`InMemoryStockStore`].
pub struct InMemoryTransaction {
    state: OwnedMutexGuard<MemoryState>,
    undo: Vec<Undo>,
    finished: bool,
}

impl InMemoryTransaction {
    fn undo_all(&mut self) {
        while let Some(op) = self.undo.pop() {
            match op {
                Undo::Ledger { key, previous } => {
                    if let Some(entry) = self.state.ledger.get_mut(&key) {
                        entry.available_units = previous;
                    }
                }
                Undo::Reservation { id, previous } => match previous {
                    Some(reservation) => {
                        self.state.reservations.insert(id, reservation);
                    }
                    None => {
                        self.state.reservations.remove(&id);
                    }
                },
            }
        }
    }

    fn transition_one(
        &mut self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
        next: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Option<Reservation> {
        let reservation = self
            .state
            .reservations
            .get_mut(&reservation_id)
            .filter(|r| r.tenant_id == tenant_id)?;

        let previous = reservation.clone();
        if !reservation.transition(next, at) {
            return None;
        }
        let updated = reservation.clone();

        self.undo.push(Undo::Reservation {
            id: reservation_id,
            previous: Some(previous),
        });
        Some(updated)
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.undo_all();
        }
    }
}

#[async_trait]
impl StockTransaction for InMemoryTransaction {
    async fn decrement_stock(
        &mut self,
        tenant_id: TenantId,
        target: &StockTarget,
        quantity: u32,
    ) -> Result<StockDecrement> {
        let key = (tenant_id, target.clone());
        let Some(entry) = self.state.ledger.get_mut(&key) else {
            return Ok(StockDecrement::Missing);
        };
        if !entry.is_available {
            return Ok(StockDecrement::Missing);
        }

        match entry.available_units {
            None => Ok(StockDecrement::Untracked),
            Some(units) if units >= i64::from(quantity) => {
                let remaining = units - i64::from(quantity);
                entry.available_units = Some(remaining);
                self.undo.push(Undo::Ledger {
                    key,
                    previous: Some(units),
                });
                Ok(StockDecrement::Applied { remaining })
            }
            Some(units) => Ok(StockDecrement::Insufficient { available: units }),
        }
    }

    async fn increment_stock(
        &mut self,
        tenant_id: TenantId,
        target: &StockTarget,
        quantity: u32,
    ) -> Result<bool> {
        let key = (tenant_id, target.clone());
        let Some(entry) = self.state.ledger.get_mut(&key) else {
            return Ok(false);
        };
        let Some(units) = entry.available_units else {
            return Ok(false);
        };

        entry.available_units = Some(units + i64::from(quantity));
        self.undo.push(Undo::Ledger {
            key,
            previous: Some(units),
        });
        Ok(true)
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        if self.state.fail_reservation_inserts {
            return Err(StoreError::Unavailable(
                "reservation inserts disabled".to_string(),
            ));
        }
        validate_reservation_for_insert(reservation)?;

        if self.state.reservations.contains_key(&reservation.id) {
            return Err(StoreError::InvalidRecord(format!(
                "Duplicate reservation id {}",
                reservation.id
            )));
        }

        self.state
            .reservations
            .insert(reservation.id, reservation.clone());
        self.undo.push(Undo::Reservation {
            id: reservation.id,
            previous: None,
        });
        Ok(())
    }

    async fn transition_reservation(
        &mut self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
        next: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Reservation>> {
        Ok(self.transition_one(tenant_id, reservation_id, next, at))
    }

    async fn transition_session(
        &mut self,
        tenant_id: TenantId,
        session_id: &SessionId,
        next: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<Vec<Reservation>> {
        let mut candidates: Vec<_> = self
            .state
            .reservations
            .values()
            .filter(|r| r.tenant_id == tenant_id && &r.session_id == session_id && r.is_active())
            .map(|r| (r.created_at, r.id))
            .collect();
        candidates.sort();

        Ok(candidates
            .into_iter()
            .filter_map(|(_, id)| self.transition_one(tenant_id, id, next, at))
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.undo.clear();
        this.finished = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.undo_all();
        this.finished = true;
        Ok(())
    }
}
