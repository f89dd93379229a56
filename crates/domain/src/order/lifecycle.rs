//! Status updates, cancellation and payment reconciliation.

use chrono::{DateTime, Utc};
use commerce_store::{CommerceStore, Order, StoreError};
use common::{OrderId, OrderStatus, UserId};

use super::OrderService;
use super::service::report_unsettled;
use super::status::ensure_transition;
use crate::error::DomainError;
use crate::payment::{PaymentService, PaymentStatus};

/// Reloads after a lost compare-and-set at most this many times.
const STATUS_WRITE_ATTEMPTS: usize = 3;

impl<S: CommerceStore, P: PaymentService> OrderService<S, P> {
    /// Moves an order to `target` along the transition table.
    ///
    /// Asking for the current status is a no-op. Delivering a cash-on-delivery
    /// order records its payment if none exists yet.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: OrderId,
        target: OrderStatus,
    ) -> Result<Order, DomainError> {
        let mut attempts = 0;
        let order = loop {
            attempts += 1;
            let current = self.load_order(order_id).await?;
            if current.status == target {
                return Ok(current);
            }
            ensure_transition(current.status, target)?;

            match self
                .commit_transition(order_id, current.status, target)
                .await
            {
                Ok(order) => break order,
                Err(StoreError::StatusConflict { actual, .. })
                    if attempts < STATUS_WRITE_ATTEMPTS =>
                {
                    tracing::debug!(%actual, "status changed concurrently, reloading");
                }
                Err(e) => return Err(e.into()),
            }
        };

        if target == OrderStatus::Delivered && order.payment_method.is_deferred() {
            self.issue_deferred_payment(&order).await;
        }

        Ok(order)
    }

    /// Cancels the owner's order and returns its stock to the ledger.
    ///
    /// Only `pending` and `processing` orders can be cancelled. A second
    /// cancellation fails with `NotCancellable` and restores nothing.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<Order, DomainError> {
        let order = self.load_order(order_id).await?;
        if order.user_id != user_id {
            return Err(DomainError::Unauthorized);
        }

        let mut expected = order.status;
        loop {
            if !expected.is_cancellable() {
                return Err(DomainError::NotCancellable { status: expected });
            }

            match self
                .commit_transition(order_id, expected, OrderStatus::Cancelled)
                .await
            {
                Ok(cancelled) => return Ok(cancelled),
                Err(StoreError::StatusConflict { actual, .. }) => expected = actual,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Issues the missing payment of card orders still `pending` that were
    /// created before `created_before`, advancing each to `processing`.
    ///
    /// Returns how many orders were settled.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_payments(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<usize, DomainError> {
        let stale = self.store.pending_orders_before(created_before).await?;
        let mut settled = 0;

        for order in stale
            .iter()
            .filter(|order| !order.payment_method.is_deferred())
        {
            match self.settle_immediate_payment(order).await {
                Ok(_) => settled += 1,
                Err(e) => report_unsettled(order.id, &e),
            }
        }

        if settled > 0 {
            tracing::info!(settled, "pending payments reconciled");
        }
        Ok(settled)
    }

    /// Best effort. The status is already committed, so a failure is logged
    /// and counted rather than returned.
    async fn issue_deferred_payment(&self, order: &Order) {
        let result = match self.payments.get_payment_by_order_id(order.id).await {
            Ok(Some(_)) => return,
            Ok(None) => {
                self.payments
                    .create_payment_for_order(
                        order.id,
                        order.total_amount,
                        order.payment_method,
                        PaymentStatus::Completed,
                    )
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(payment) => {
                tracing::info!(order_id = %order.id, payment_id = %payment.id, "payment recorded on delivery");
            }
            Err(e) => {
                metrics::counter!("payment_issuance_failures_total").increment(1);
                tracing::error!(order_id = %order.id, error = %e, "payment issuance on delivery failed");
            }
        }
    }
}
