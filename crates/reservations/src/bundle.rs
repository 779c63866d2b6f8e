//! All-or-nothing stock decrement across the products of a bundle.

use std::collections::BTreeMap;

use common::{BundleId, ProductId, StockTarget, TenantId};
use futures_util::future::try_join_all;
use metrics::counter;
use stock_store::{Availability, Bundle, StockDecrement, StockStore};

use crate::error::{ReservationError, Result};

/// One bundle constituent that cannot cover the requested quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleShortfall {
    pub product_id: ProductId,
    pub required: u32,
    /// Units currently on hand; zero for a missing product.
    pub available: i64,
}

/// Advisory answer to "can this many bundles be sold right now".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleAvailability {
    pub available: bool,
    pub unavailable_items: Vec<BundleShortfall>,
}

/// Coordinates bundle purchases against the stock ledger.
///
/// A bundle purchase either decrements every tracked constituent or none of
/// them. Constituents are decremented in product-id order inside a single
/// store transaction, so two bundle purchases sharing products lock rows in
/// the same order.
pub struct BundleCoordinator<S: StockStore> {
    store: S,
}

impl<S: StockStore> BundleCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Decrements stock for `quantity` bundles.
    ///
    /// Returns false, with no product changed, when any tracked constituent
    /// has fewer units than required. Constituents with untracked stock never
    /// block the purchase.
    ///
    /// # Errors
    ///
    /// - `BundleNotFound` if the bundle does not exist for the tenant
    /// - `NotFound` if a constituent product no longer exists
    #[tracing::instrument(skip(self))]
    pub async fn decrement_bundle_stock(
        &self,
        tenant_id: TenantId,
        bundle_id: &BundleId,
        quantity: u32,
    ) -> Result<bool> {
        let bundle = self.load_bundle(tenant_id, bundle_id, quantity).await?;
        let requirements = requirements(&bundle, quantity)?;

        let mut tx = self.store.begin().await?;
        for (product_id, required) in &requirements {
            let target = StockTarget::product(product_id.clone());
            match tx.decrement_stock(tenant_id, &target, *required).await? {
                StockDecrement::Applied { remaining } => {
                    tracing::debug!(%product_id, required, remaining, "bundle item decremented");
                }
                StockDecrement::Untracked => {}
                StockDecrement::Insufficient { available } => {
                    tx.rollback().await?;
                    counter!("bundle_purchases_total", "outcome" => "insufficient").increment(1);
                    tracing::warn!(%product_id, required, available, "bundle item short, purchase rolled back");
                    return Ok(false);
                }
                StockDecrement::Missing => {
                    tx.rollback().await?;
                    counter!("bundle_purchases_total", "outcome" => "missing").increment(1);
                    return Err(ReservationError::NotFound(target));
                }
            }
        }
        tx.commit().await?;

        counter!("bundle_purchases_total", "outcome" => "committed").increment(1);
        tracing::info!(items = requirements.len(), "bundle stock decremented");
        Ok(true)
    }

    /// Reports whether `quantity` bundles could be sold, listing every
    /// constituent that falls short.
    ///
    /// Reads are not locked; a later purchase may still fail.
    #[tracing::instrument(skip(self))]
    pub async fn get_bundle_availability(
        &self,
        tenant_id: TenantId,
        bundle_id: &BundleId,
        quantity: u32,
    ) -> Result<BundleAvailability> {
        let bundle = self.load_bundle(tenant_id, bundle_id, quantity).await?;
        let requirements = requirements(&bundle, quantity)?;

        let levels = try_join_all(requirements.iter().map(|(product_id, required)| async move {
            let target = StockTarget::product(product_id.clone());
            let level = self.store.stock_level(tenant_id, &target).await?;
            Ok::<_, ReservationError>((product_id, *required, level))
        }))
        .await?;

        let unavailable_items: Vec<_> = levels
            .into_iter()
            .filter_map(|(product_id, required, level)| {
                let available = match level {
                    Some(level) if level.is_reservable() => match level.availability {
                        Availability::Unlimited => return None,
                        Availability::Units(units) if units >= i64::from(required) => return None,
                        Availability::Units(units) => units,
                    },
                    _ => 0,
                };
                Some(BundleShortfall {
                    product_id: product_id.clone(),
                    required,
                    available,
                })
            })
            .collect();

        Ok(BundleAvailability {
            available: unavailable_items.is_empty(),
            unavailable_items,
        })
    }

    async fn load_bundle(
        &self,
        tenant_id: TenantId,
        bundle_id: &BundleId,
        quantity: u32,
    ) -> Result<Bundle> {
        if quantity == 0 {
            return Err(ReservationError::InvalidQuantity { quantity });
        }
        self.store
            .bundle(tenant_id, bundle_id)
            .await?
            .ok_or_else(|| ReservationError::BundleNotFound(bundle_id.clone()))
    }
}

/// Units required per product, summed when a product appears twice.
fn requirements(bundle: &Bundle, quantity: u32) -> Result<BTreeMap<ProductId, u32>> {
    let mut required: BTreeMap<ProductId, u32> = BTreeMap::new();
    for item in &bundle.items {
        let units = item
            .required_for(quantity)
            .ok_or(ReservationError::InvalidQuantity { quantity })?;
        let entry = required.entry(item.product_id.clone()).or_default();
        *entry = entry
            .checked_add(units)
            .ok_or(ReservationError::InvalidQuantity { quantity })?;
    }
    Ok(required)
}
