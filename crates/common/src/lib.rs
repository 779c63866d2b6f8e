//! Identifiers shared by the stock reservation crates.

mod target;
mod types;

pub use target::StockTarget;
pub use types::{BundleId, ProductId, ReservationId, SessionId, TenantId, VariantId};
