//! Order creation and the shared status-write path.

use std::time::Instant;

use chrono::Utc;
use commerce_store::{CommerceStore, DraftLine, Order, OrderDraft, StoreError};
use common::{Address, OrderId, OrderStatus, PaymentMethod, UserId};

use super::number::generate_order_number;
use crate::cart::check_lines;
use crate::config::CheckoutConfig;
use crate::error::DomainError;
use crate::payment::{PaymentError, PaymentService, PaymentStatus};

/// Service for placing orders and driving their lifecycle.
///
/// Owns the order transaction coordinator and the status state machine.
/// All multi-step writes are delegated to the store as single atomic units;
/// payment calls happen only after those units have committed.
pub struct OrderService<S: CommerceStore, P: PaymentService> {
    pub(super) store: S,
    pub(super) payments: P,
    config: CheckoutConfig,
}

impl<S: CommerceStore, P: PaymentService> OrderService<S, P> {
    pub fn new(store: S, payments: P, config: CheckoutConfig) -> Self {
        Self {
            store,
            payments,
            config,
        }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns a reference to the payment collaborator.
    pub fn payments(&self) -> &P {
        &self.payments
    }

    /// Converts the user's cart into an order.
    ///
    /// Stock deduction, the order write and clearing the cart commit together
    /// or not at all. For card payments a completed payment is then recorded
    /// and the order advanced to `processing`; if that fails the order stays
    /// `pending` until [`reconcile_payments`](Self::reconcile_payments) picks
    /// it up.
    #[tracing::instrument(skip(self, shipping_address, billing_address))]
    pub async fn create_order(
        &self,
        user_id: UserId,
        shipping_address: Address,
        billing_address: Address,
        payment_method: PaymentMethod,
    ) -> Result<Order, DomainError> {
        let started = Instant::now();

        let order = match self
            .place(user_id, shipping_address, billing_address, payment_method)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                metrics::counter!("orders_rejected_total", "reason" => e.code()).increment(1);
                tracing::warn!(error = %e, "order rejected");
                return Err(e);
            }
        };

        metrics::counter!("orders_created_total").increment(1);
        metrics::histogram!("order_creation_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total_amount,
            "order created"
        );

        if payment_method.is_deferred() {
            return Ok(order);
        }

        match self.settle_immediate_payment(&order).await {
            Ok(settled) => Ok(settled),
            Err(e) => {
                report_unsettled(order.id, &e);
                Ok(self.load_order(order.id).await.unwrap_or(order))
            }
        }
    }

    /// Loads an order on behalf of its owner.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: OrderId, user_id: UserId) -> Result<Order, DomainError> {
        let order = self.load_order(order_id).await?;
        if order.user_id != user_id {
            return Err(DomainError::Unauthorized);
        }
        Ok(order)
    }

    /// Loads an order without an ownership check.
    #[tracing::instrument(skip(self))]
    pub async fn find_order(&self, order_id: OrderId) -> Result<Option<Order>, DomainError> {
        Ok(self.store.get_order(order_id).await?)
    }

    async fn place(
        &self,
        user_id: UserId,
        shipping_address: Address,
        billing_address: Address,
        payment_method: PaymentMethod,
    ) -> Result<Order, DomainError> {
        let cart = self
            .store
            .find_cart(user_id)
            .await?
            .filter(|cart| !cart.is_empty())
            .ok_or(DomainError::EmptyCart)?;

        let problems = check_lines(&self.store, &cart).await?;
        if !problems.is_empty() {
            return Err(DomainError::CartInvalid { problems });
        }

        let lines: Vec<DraftLine> = cart
            .lines
            .iter()
            .map(|line| DraftLine {
                product_id: line.product_id,
                quantity: line.quantity,
            })
            .collect();
        let order_id = OrderId::new();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let draft = OrderDraft {
                id: order_id,
                user_id,
                order_number: generate_order_number(Utc::now()),
                payment_method,
                shipping_address: shipping_address.clone(),
                billing_address: billing_address.clone(),
                lines: lines.clone(),
            };

            match self.store.place_order(draft, cart.id).await {
                Ok(order) => return Ok(order),
                Err(StoreError::DuplicateOrderNumber(number))
                    if attempt < self.config.order_number_attempts =>
                {
                    tracing::warn!(%number, attempt, "order number collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Records a completed payment and moves the order to `processing`.
    ///
    /// A payment that already exists counts as issued, so this is safe to
    /// repeat.
    pub(super) async fn settle_immediate_payment(
        &self,
        order: &Order,
    ) -> Result<Order, DomainError> {
        match self
            .payments
            .create_payment_for_order(
                order.id,
                order.total_amount,
                order.payment_method,
                PaymentStatus::Completed,
            )
            .await
        {
            Ok(payment) => {
                tracing::info!(order_id = %order.id, payment_id = %payment.id, "payment recorded");
            }
            Err(PaymentError::AlreadyExists(_)) => {}
            Err(e) => return Err(e.into()),
        }

        Ok(self
            .commit_transition(order.id, OrderStatus::Pending, OrderStatus::Processing)
            .await?)
    }

    /// Writes one status edge. Edges into `cancelled` or `refunded` return
    /// every line's quantity to the ledger in the same atomic unit.
    pub(super) async fn commit_transition(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Order, StoreError> {
        let order = if restores_stock(to) {
            self.store
                .restock_and_update_status(order_id, from, to)
                .await?
        } else {
            self.store.update_status(order_id, from, to).await?
        };

        metrics::counter!(
            "order_status_transitions_total",
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
        tracing::info!(%order_id, %from, %to, "order status changed");

        Ok(order)
    }

    pub(super) async fn load_order(&self, order_id: OrderId) -> Result<Order, DomainError> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or(DomainError::OrderNotFound(order_id))
    }
}

/// Logs and counts a payment settlement that did not advance the order.
///
/// A lost status write means the payment was recorded but the order had
/// already left `pending`, typically through a cancellation.
pub(super) fn report_unsettled(order_id: OrderId, error: &DomainError) {
    match error {
        DomainError::Internal(StoreError::StatusConflict { actual, .. }) => {
            metrics::counter!("paid_orders_not_pending_total").increment(1);
            tracing::warn!(%order_id, status = %actual, "payment recorded but order already left pending");
        }
        e => {
            metrics::counter!("payment_issuance_failures_total").increment(1);
            tracing::error!(%order_id, error = %e, "payment issuance failed, order left pending");
        }
    }
}

fn restores_stock(to: OrderStatus) -> bool {
    matches!(to, OrderStatus::Cancelled | OrderStatus::Refunded)
}
