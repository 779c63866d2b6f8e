//! Background reclaim of expired reservations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use stock_store::{StockStore, StockStoreExt};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::engine::ReservationEngine;
use crate::error::Result;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired holds examined.
    pub scanned: usize,
    /// Holds cancelled with stock restored by this sweep.
    pub reclaimed: usize,
    /// Holds whose cancellation failed; they are retried on the next sweep.
    pub failed: usize,
}

/// Periodically cancels reservations whose expiry has passed.
///
/// Each expired hold is cancelled through the same conditional status flip
/// as a direct cancel, so sweeps may overlap each other, restart midway or
/// race with completions without restoring any hold twice.
pub struct ExpirySweeper<S: StockStore> {
    engine: Arc<ReservationEngine<S>>,
    batch_size: usize,
}

impl<S: StockStore> ExpirySweeper<S> {
    /// Creates a sweeper using the engine's configured batch size.
    pub fn new(engine: Arc<ReservationEngine<S>>) -> Self {
        let batch_size = engine.config().sweep_batch_size.max(1);
        Self { engine, batch_size }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Reclaims every reservation that has expired as of now.
    ///
    /// Returns the number of reservations cancelled.
    pub async fn cleanup_expired_reservations(&self) -> Result<usize> {
        Ok(self.sweep_at(Utc::now()).await?.reclaimed)
    }

    /// Reclaims every active reservation with `expires_at` before `now`.
    ///
    /// A failure on one reservation is logged and counted; the sweep moves on.
    /// Only a failure to list expired reservations aborts the sweep.
    #[tracing::instrument(skip(self), fields(batch_size = self.batch_size))]
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let started = Instant::now();
        let mut report = SweepReport::default();

        loop {
            let batch = self
                .engine
                .store()
                .expired_reservations(now, self.batch_size)
                .await?;
            let batch_len = batch.len();
            let mut resolved = 0;

            for reservation in batch {
                report.scanned += 1;
                match self.engine.reclaim_expired(&reservation).await {
                    Ok(true) => {
                        report.reclaimed += 1;
                        resolved += 1;
                    }
                    Ok(false) => {
                        // Completed or cancelled since the batch was read.
                        resolved += 1;
                    }
                    Err(e) => {
                        report.failed += 1;
                        counter!("sweeper_failures_total").increment(1);
                        tracing::warn!(
                            reservation_id = %reservation.id,
                            tenant_id = %reservation.tenant_id,
                            error = %e,
                            "failed to reclaim expired reservation"
                        );
                    }
                }
            }

            // Failed holds stay at the head of the expiry order; stop once a
            // batch makes no progress. A batch may come back short when the
            // store drops undecodable rows, so a short batch is not the end.
            if batch_len == 0 || resolved == 0 {
                break;
            }
        }

        counter!("sweeper_reclaimed_total").increment(report.reclaimed as u64);
        histogram!("sweeper_run_duration_seconds").record(started.elapsed().as_secs_f64());
        if report.scanned > 0 {
            tracing::info!(
                scanned = report.scanned,
                reclaimed = report.reclaimed,
                failed = report.failed,
                "expiry sweep finished"
            );
        }

        Ok(report)
    }

    /// Sweeps every `interval` until `shutdown` flips to true.
    ///
    /// A sweep in progress finishes before the loop exits.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = interval.as_secs(), "expiry sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.cleanup_expired_reservations().await {
                        tracing::error!(error = %e, "expiry sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("expiry sweeper stopped");
    }
}
