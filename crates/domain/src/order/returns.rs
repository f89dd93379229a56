//! Return flow entry points.

use commerce_store::{CommerceStore, Order, StoreError};
use common::{Money, OrderId, OrderStatus, UserId};

use super::OrderService;
use super::status::is_returnable;
use crate::error::DomainError;
use crate::payment::{PaymentService, PaymentStatus};

impl<S: CommerceStore, P: PaymentService> OrderService<S, P> {
    /// Opens a return on a delivered or completed order.
    #[tracing::instrument(skip(self))]
    pub async fn request_return(
        &self,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<Order, DomainError> {
        let order = self.load_order(order_id).await?;
        if order.user_id != user_id {
            return Err(DomainError::Unauthorized);
        }
        if !is_returnable(order.status) {
            return Err(DomainError::NotReturnable {
                status: order.status,
            });
        }

        self.commit_transition(order_id, order.status, OrderStatus::ReturnRequested)
            .await
            .map_err(|e| match e {
                StoreError::StatusConflict { actual, .. } => {
                    DomainError::NotReturnable { status: actual }
                }
                other => other.into(),
            })
    }

    /// Accepts a return: restocks and marks the order `refunded` in one
    /// atomic unit, then refunds the payment.
    ///
    /// `refund_amount` defaults to the order total and is checked against the
    /// payment before the order is touched. Orders without a payment record
    /// skip the refund. A refund that fails after the order was claimed is
    /// logged and counted; the order stays `refunded`.
    #[tracing::instrument(skip(self))]
    pub async fn approve_return(
        &self,
        order_id: OrderId,
        refund_amount: Option<Money>,
    ) -> Result<Order, DomainError> {
        let order = self.load_order(order_id).await?;
        if order.status != OrderStatus::ReturnRequested {
            return Err(DomainError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Refunded,
            });
        }

        let refund = match self.payments.get_payment_by_order_id(order_id).await? {
            Some(payment) if payment.status != PaymentStatus::Refunded => {
                let amount = refund_amount.unwrap_or(order.total_amount);
                payment.check_refund(amount)?;
                Some((payment.id, amount))
            }
            _ => None,
        };

        let refunded = self
            .commit_transition(order_id, OrderStatus::ReturnRequested, OrderStatus::Refunded)
            .await
            .map_err(|e| match e {
                StoreError::StatusConflict { actual, .. } => DomainError::InvalidTransition {
                    from: actual,
                    to: OrderStatus::Refunded,
                },
                other => other.into(),
            })?;

        if let Some((payment_id, amount)) = refund {
            match self.payments.process_refund(payment_id, amount).await {
                Ok(_) => {
                    tracing::info!(%order_id, %payment_id, %amount, "payment refunded");
                }
                Err(e) => {
                    metrics::counter!("refund_failures_total").increment(1);
                    tracing::error!(%order_id, %payment_id, error = %e, "refund failed after return was approved");
                }
            }
        }

        Ok(refunded)
    }

    /// Declines a return and puts the order back to `delivered`.
    #[tracing::instrument(skip(self))]
    pub async fn reject_return(&self, order_id: OrderId) -> Result<Order, DomainError> {
        let order = self.load_order(order_id).await?;
        if order.status != OrderStatus::ReturnRequested {
            return Err(DomainError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Delivered,
            });
        }

        self.commit_transition(order_id, OrderStatus::ReturnRequested, OrderStatus::Delivered)
            .await
            .map_err(|e| match e {
                StoreError::StatusConflict { actual, .. } => DomainError::InvalidTransition {
                    from: actual,
                    to: OrderStatus::Delivered,
                },
                other => other.into(),
            })
    }
}
