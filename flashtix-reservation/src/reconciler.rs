use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::coordinator::{ReconcileReport, ReservationCoordinator};

/// Periodic sweep returning expired, unconfirmed reservations to the pool.
/// A failed sweep is logged and retried on the next tick.
pub struct Reconciler {
    coordinator: Arc<ReservationCoordinator>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(coordinator: Arc<ReservationCoordinator>, interval: Duration) -> Self {
        Self { coordinator, interval }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Sweeps every `interval` until `shutdown` flips to `true` or its sender
    /// is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Reconciler started, sweeping every {:?}", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Reconciler stopped");
    }

    pub async fn sweep(&self) -> Option<ReconcileReport> {
        match self.coordinator.reconcile_once(Utc::now()).await {
            Ok(report) => {
                if report.scanned > 0 {
                    info!(
                        "Reconcile sweep: scanned={} released={} skipped={} failed={}",
                        report.scanned, report.released, report.skipped, report.failed
                    );
                } else {
                    debug!("Reconcile sweep found nothing to clear");
                }
                Some(report)
            }
            Err(e) => {
                error!("Reconcile sweep failed, retrying next cycle: {}", e);
                None
            }
        }
    }
}
