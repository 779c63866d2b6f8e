//! Stock ledger value types.

use serde::{Deserialize, Serialize};

use crate::{BundleId, ProductId, TenantId};

/// How many units of a stock-keeping unit can still be reserved.
///
/// The ledger value already excludes units held by active reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "units", rename_all = "snake_case")]
pub enum Availability {
    /// Stock is not tracked for this unit; reservations never block.
    Unlimited,

    /// A tracked count of units.
    Units(i64),
}

impl Availability {
    /// Maps a nullable ledger column onto the availability.
    pub fn from_column(available_units: Option<i64>) -> Self {
        match available_units {
            Some(units) => Availability::Units(units),
            None => Availability::Unlimited,
        }
    }

    /// Returns the tracked count, or None when unlimited.
    pub fn units(&self) -> Option<i64> {
        match self {
            Availability::Unlimited => None,
            Availability::Units(units) => Some(*units),
        }
    }

    /// Returns true if `quantity` units could be taken right now.
    pub fn covers(&self, quantity: u32) -> bool {
        match self {
            Availability::Unlimited => true,
            Availability::Units(units) => *units >= i64::from(quantity),
        }
    }
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Availability::Unlimited => write!(f, "unlimited"),
            Availability::Units(units) => write!(f, "{units}"),
        }
    }
}

/// A ledger entry as read from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLevel {
    pub availability: Availability,
    /// False only for variants the merchant switched off.
    pub is_available: bool,
}

impl StockLevel {
    /// Creates a level for a unit that can be sold.
    pub fn new(availability: Availability) -> Self {
        Self {
            availability,
            is_available: true,
        }
    }

    /// Returns true if the unit may be reserved at all.
    pub fn is_reservable(&self) -> bool {
        self.is_available
    }
}

/// Outcome of the conditional decrement primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDecrement {
    /// The counter was decremented; `remaining` is the value after the update.
    Applied { remaining: i64 },

    /// The unit has no tracked stock; nothing was mutated.
    Untracked,

    /// The predicate `available >= quantity` did not hold; nothing was mutated.
    Insufficient { available: i64 },

    /// The unit does not exist or is a variant marked unavailable.
    Missing,
}

impl StockDecrement {
    /// Returns true if the caller may proceed with the units it asked for.
    pub fn is_satisfied(&self) -> bool {
        matches!(
            self,
            StockDecrement::Applied { .. } | StockDecrement::Untracked
        )
    }
}

/// One constituent of a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleItem {
    pub product_id: ProductId,
    pub units_per_bundle: u32,
}

impl BundleItem {
    /// Creates a bundle item.
    pub fn new(product_id: impl Into<ProductId>, units_per_bundle: u32) -> Self {
        Self {
            product_id: product_id.into(),
            units_per_bundle,
        }
    }

    /// Units needed to sell `bundles` bundles, or None on overflow.
    pub fn required_for(&self, bundles: u32) -> Option<u32> {
        self.units_per_bundle.checked_mul(bundles)
    }
}

/// A fixed list of products sold together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub tenant_id: TenantId,
    pub id: BundleId,
    pub items: Vec<BundleItem>,
}

impl Bundle {
    /// Creates a bundle definition.
    pub fn new(tenant_id: TenantId, id: impl Into<BundleId>, items: Vec<BundleItem>) -> Self {
        Self {
            tenant_id,
            id: id.into(),
            items,
        }
    }
}
