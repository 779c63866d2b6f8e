//! Stock reservation lifecycle for checkout.
//!
//! This crate provides:
//! - [`ReservationEngine`]: reserve, complete and cancel holds on single
//!   products or variants, decrementing stock at reservation time
//! - [`BundleCoordinator`]: all-or-nothing stock decrement across every
//!   product of a bundle
//! - [`ExpirySweeper`]: periodic reclaim of holds whose checkout was abandoned
//!
//! Correctness under concurrent checkouts relies only on the store's
//! conditional updates and transactions; nothing here takes an in-process lock.

pub mod bundle;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod sweeper;

pub use bundle::{BundleAvailability, BundleCoordinator, BundleShortfall};
pub use command::{CompletionTarget, ReserveStock};
pub use config::ReservationConfig;
pub use engine::{CancelReason, ReservationEngine};
pub use error::{ReservationError, Result};
pub use stock_store::{Availability, Reservation, ReservationStatus};
pub use sweeper::{ExpirySweeper, SweepReport};
