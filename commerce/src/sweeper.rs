//! Periodic release of expired reservations.
//!
//! The ledger only knows when a reservation is expired; this task is the
//! scheduler that acts on it. Several replicas may sweep at once: each
//! release is a compare-and-swap, so only one of them returns the stock.

use crate::reservation_ledger::ReservationLedger;
use holdfast_core::environment::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// Background task calling [`ReservationLedger::sweep_expired`] on an interval.
pub struct ExpirySweeper {
    ledger: ReservationLedger,
    clock: Arc<dyn Clock>,
    interval: Duration,
    batch_size: usize,
}

impl ExpirySweeper {
    /// Create a sweeper releasing at most `batch_size` reservations per tick.
    #[must_use]
    pub fn new(
        ledger: ReservationLedger,
        clock: Arc<dyn Clock>,
        interval: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            ledger,
            clock,
            interval,
            batch_size,
        }
    }

    /// Spawn the sweep loop. It stops when `shutdown` fires or its sender is dropped.
    #[must_use]
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                interval_secs = self.interval.as_secs(),
                batch_size = self.batch_size,
                "Expiry sweeper started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::info!("Expiry sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => self.sweep_once().await,
                }
            }
        })
    }

    async fn sweep_once(&self) {
        match self
            .ledger
            .sweep_expired(self.clock.now(), self.batch_size)
            .await
        {
            Ok(report) if report.examined > 0 => tracing::info!(
                examined = report.examined,
                released = report.released,
                skipped = report.skipped,
                failed = report.failed,
                "Expired reservations swept"
            ),
            Ok(_) => {}
            Err(error) => tracing::warn!(error = %error, "Expiry sweep failed"),
        }
    }
}

/// Start an [`ExpirySweeper`] with the given settings.
#[must_use]
pub fn spawn_expiry_sweeper(
    ledger: ReservationLedger,
    clock: Arc<dyn Clock>,
    interval: Duration,
    batch_size: usize,
    shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    ExpirySweeper::new(ledger, clock, interval, batch_size).spawn(shutdown)
}
