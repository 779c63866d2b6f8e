use serde::{Deserialize, Serialize};

use crate::{ProductId, VariantId};

/// The stock-keeping unit a ledger entry or reservation refers to.
///
/// A product may or may not have variants; each path that touches stock
/// has to handle both shapes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StockTarget {
    /// The whole product carries the stock count.
    Product { product_id: ProductId },

    /// One variant of a product carries its own stock count.
    Variant {
        product_id: ProductId,
        variant_id: VariantId,
    },
}

impl StockTarget {
    /// Targets a product without variants.
    pub fn product(product_id: impl Into<ProductId>) -> Self {
        StockTarget::Product {
            product_id: product_id.into(),
        }
    }

    /// Targets a single variant of a product.
    pub fn variant(product_id: impl Into<ProductId>, variant_id: impl Into<VariantId>) -> Self {
        StockTarget::Variant {
            product_id: product_id.into(),
            variant_id: variant_id.into(),
        }
    }

    /// Returns the owning product.
    pub fn product_id(&self) -> &ProductId {
        match self {
            StockTarget::Product { product_id } | StockTarget::Variant { product_id, .. } => {
                product_id
            }
        }
    }

    /// Returns the variant, if this target is one.
    pub fn variant_id(&self) -> Option<&VariantId> {
        match self {
            StockTarget::Product { .. } => None,
            StockTarget::Variant { variant_id, .. } => Some(variant_id),
        }
    }
}

impl std::fmt::Display for StockTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StockTarget::Product { product_id } => write!(f, "{product_id}"),
            StockTarget::Variant {
                product_id,
                variant_id,
            } => write!(f, "{product_id}/{variant_id}"),
        }
    }
}

/// Ledger lock order: by product, with a product's own row before its variants.
///
/// Every writer that touches several ledger rows in one transaction visits
/// them in this order, so concurrent writers cannot wait on each other in a cycle.
impl Ord for StockTarget {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.product_id()
            .cmp(other.product_id())
            .then_with(|| self.variant_id().cmp(&other.variant_id()))
    }
}

impl PartialOrd for StockTarget {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
