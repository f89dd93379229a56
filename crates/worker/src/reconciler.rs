//! Periodic settlement of card orders whose payment was never recorded.
//!
//! Order creation records card payments after the order has committed. When
//! that call fails the order stays `pending`; this job retries it.

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use commerce_store::CommerceStore;
use domain::{DomainError, OrderService, PaymentService};
use tokio::sync::watch;

use crate::schedule::run_periodically;

/// Runs [`OrderService::reconcile_payments`] on a fixed interval.
///
/// Only orders older than `grace` are touched, so a checkout whose payment
/// call is still in flight is left alone.
pub struct PaymentReconciler<S: CommerceStore, P: PaymentService> {
    orders: OrderService<S, P>,
    interval: Duration,
    grace: Duration,
}

impl<S: CommerceStore, P: PaymentService> PaymentReconciler<S, P> {
    pub fn new(orders: OrderService<S, P>, interval: Duration, grace: Duration) -> Self {
        Self {
            orders,
            interval,
            grace,
        }
    }

    /// Runs one pass and returns how many orders were settled.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_once(&self) -> Result<usize, DomainError> {
        let grace = TimeDelta::from_std(self.grace).unwrap_or(TimeDelta::zero());
        self.orders.reconcile_payments(Utc::now() - grace).await
    }

    /// Reconciles until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        run_periodically("payment reconciler", self.interval, shutdown, move || async move {
            if let Err(e) = self.reconcile_once().await {
                tracing::warn!(error = %e, "payment reconciliation failed");
            }
        })
        .await;
    }
}
