//! Periodic removal of expired stock reservations.
//!
//! Availability reads already ignore expired holds, so the sweep only keeps
//! the reservation table from growing. Missing a sweep never affects stock.

use std::time::Duration;

use chrono::Utc;
use commerce_store::{ReservationStore, StoreError};
use tokio::sync::watch;

use crate::schedule::run_periodically;

/// Purges expired holds from a [`ReservationStore`] on a fixed interval.
pub struct ReservationSweeper<R: ReservationStore> {
    store: R,
    interval: Duration,
}

impl<R: ReservationStore> ReservationSweeper<R> {
    pub fn new(store: R, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Runs one sweep and returns how many holds were deleted.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<u64, StoreError> {
        let purged = self.store.purge_expired(Utc::now()).await?;
        if purged > 0 {
            metrics::counter!("reservations_purged_total").increment(purged);
            tracing::info!(purged, "expired reservations purged");
        }
        Ok(purged)
    }

    /// Sweeps until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// A failed sweep is logged and retried on the next tick.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        run_periodically("reservation sweeper", self.interval, shutdown, move || async move {
            if let Err(e) = self.sweep_once().await {
                tracing::warn!(error = %e, "reservation sweep failed");
            }
        })
        .await;
    }
}
