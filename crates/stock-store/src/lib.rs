//! Storage layer for stock reservations.
//!
//! Two concerns share one transactional boundary here:
//! - the stock ledger: available-unit counters on products and variants,
//!   mutated only through conditional decrements and atomic increments
//! - the reservation store: durable hold records indexed by session and expiry
//!
//! Both are reached through [`StockStore`], which hands out
//! [`StockTransaction`] units of work. Backends exist for PostgreSQL and for
//! in-process use in tests.

pub mod error;
pub mod ledger;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod reservation;
pub mod store;

pub use common::{BundleId, ProductId, ReservationId, SessionId, StockTarget, TenantId, VariantId};
pub use error::{Result, StoreError};
pub use ledger::{Availability, Bundle, BundleItem, StockDecrement, StockLevel};
pub use memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;
pub use query::ReservationQuery;
pub use reservation::{Reservation, ReservationStatus, UnknownStatus};
pub use store::{StockStore, StockStoreExt, StockTransaction, validate_reservation_for_insert};
