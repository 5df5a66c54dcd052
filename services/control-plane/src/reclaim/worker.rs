//! Reclaim background worker.
//!
//! Runs the overdue-hold scan on a periodic interval.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::config::ReclaimConfig;
use crate::coordinator::ReservationCoordinator;

/// Worker that releases overdue reservation holds.
pub struct ReclaimWorker {
    coordinator: Arc<ReservationCoordinator>,
    config: ReclaimConfig,
}

impl ReclaimWorker {
    /// Create a new reclaim worker.
    pub fn new(coordinator: Arc<ReservationCoordinator>, config: ReclaimConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// Run the reclaim worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            max_hold_secs = self.config.max_hold.as_secs(),
            "Starting reclaim worker"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        // Don't immediately tick on startup - wait for first interval
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_reclaim().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Reclaim worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single reclaim pass.
    async fn run_reclaim(&self) {
        match self.coordinator.reclaim_expired(self.config.max_hold).await {
            Ok(reclaimed) => {
                if reclaimed > 0 {
                    info!(reclaimed, "Reclaim pass complete");
                }
            }
            Err(e) => {
                error!(error = %e, "Reclaim pass failed");
            }
        }
    }
}
