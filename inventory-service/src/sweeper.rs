use std::sync::Arc;
use std::time::Duration;

use shared::Reservation;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::engine::{InventoryEngine, ReleaseMode};
use crate::error::Result;
use crate::store::LedgerStore;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Includes reservations a caller released after the expiry query ran.
    pub released: usize,
    /// Deducted after the expiry query ran.
    pub skipped: usize,
    /// Left RESERVED for the next tick.
    pub failed: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.released == 0 && self.skipped == 0 && self.failed == 0
    }

    fn record(&mut self, reservation_id: Uuid, outcome: Result<Reservation>) {
        match outcome {
            Ok(_) => self.released += 1,
            Err(e) if e.is_already_terminal() => {
                debug!(reservation_id = %reservation_id, code = e.code(), "expired reservation already settled");
                self.skipped += 1;
            }
            Err(e) => {
                error!(reservation_id = %reservation_id, error = %e, "failed to release expired reservation");
                self.failed += 1;
            }
        }
    }
}

pub struct ExpirySweeper<S: LedgerStore> {
    engine: Arc<InventoryEngine<S>>,
    interval: Duration,
}

impl<S: LedgerStore> ExpirySweeper<S> {
    pub fn new(engine: Arc<InventoryEngine<S>>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.interval, "expiry sweeper started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("expiry sweeper stopped");
                    return;
                }
                _ = interval.tick() => {
                    match self.sweep_once().await {
                        Ok(report) if !report.is_empty() => info!(
                            released = report.released,
                            skipped = report.skipped,
                            failed = report.failed,
                            "expired reservations processed"
                        ),
                        Ok(_) => {}
                        Err(e) => error!("Error sweeping expired reservations: {}", e),
                    }
                }
            }
        }
    }

    /// One pass over the oldest expired reservations. Only a failure to list
    /// them is returned; per-reservation failures are logged and counted.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let expired = self.engine.expired_reservation_ids().await?;
        let mut report = SweepReport::default();

        for reservation_id in expired {
            let outcome = self
                .engine
                .release_with_mode(reservation_id, ReleaseMode::Expiry)
                .await;
            report.record(reservation_id, outcome);
        }

        Ok(report)
    }
}
