//! Payment collaborator trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId, PaymentMethod};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// State of a payment record as reported by the payment collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: String,
    pub refunded_amount: Money,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Checks that `amount` could be refunded from this payment as it stands.
    pub fn check_refund(&self, amount: Money) -> Result<(), PaymentError> {
        match self.status {
            PaymentStatus::Completed => {}
            PaymentStatus::Refunded => return Err(PaymentError::AlreadyRefunded(self.id)),
            status => return Err(PaymentError::NotRefundable { status }),
        }
        if amount > self.amount {
            return Err(PaymentError::AmountExceeded {
                requested: amount,
                paid: self.amount,
            });
        }
        Ok(())
    }
}

/// Errors reported by the payment collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("Payment not found: {0}")]
    NotFound(PaymentId),

    #[error("Payment already exists for order {0}")]
    AlreadyExists(OrderId),

    #[error("Payment {0} has already been refunded")]
    AlreadyRefunded(PaymentId),

    #[error("Refund amount {requested} exceeds payment amount {paid}")]
    AmountExceeded { requested: Money, paid: Money },

    #[error("Only completed payments can be refunded, payment is {status}")]
    NotRefundable { status: PaymentStatus },

    #[error("Payment declined: {0}")]
    Declined(String),
}

/// Operations the order core consumes from the payment collaborator.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Records a payment for an order. Fails if one already exists.
    async fn create_payment_for_order(
        &self,
        order_id: OrderId,
        amount: Money,
        method: PaymentMethod,
        status: PaymentStatus,
    ) -> Result<Payment, PaymentError>;

    async fn get_payment_by_order_id(
        &self,
        order_id: OrderId,
    ) -> Result<Option<Payment>, PaymentError>;

    /// Refunds a completed payment, fully or partially.
    async fn process_refund(
        &self,
        payment_id: PaymentId,
        amount: Money,
    ) -> Result<Payment, PaymentError>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: HashMap<PaymentId, Payment>,
    by_order: HashMap<OrderId, PaymentId>,
    fail_on_create: bool,
}

/// In-memory payment service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentService {
    /// Creates a new in-memory payment service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to decline every create call until reset.
    pub async fn set_fail_on_create(&self, fail: bool) {
        self.state.write().await.fail_on_create = fail;
    }

    /// Returns the number of recorded payments.
    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.len()
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn create_payment_for_order(
        &self,
        order_id: OrderId,
        amount: Money,
        method: PaymentMethod,
        status: PaymentStatus,
    ) -> Result<Payment, PaymentError> {
        let mut state = self.state.write().await;

        if state.fail_on_create {
            return Err(PaymentError::Declined("gateway unavailable".to_string()));
        }
        if state.by_order.contains_key(&order_id) {
            return Err(PaymentError::AlreadyExists(order_id));
        }

        let id = PaymentId::new();
        let suffix: String = id.to_string().chars().take(8).collect();
        let payment = Payment {
            id,
            order_id,
            amount,
            method,
            status,
            transaction_id: format!("TXN-{suffix}"),
            refunded_amount: Money::ZERO,
            created_at: Utc::now(),
        };
        state.by_order.insert(order_id, id);
        state.payments.insert(id, payment.clone());

        Ok(payment)
    }

    async fn get_payment_by_order_id(
        &self,
        order_id: OrderId,
    ) -> Result<Option<Payment>, PaymentError> {
        let state = self.state.read().await;
        Ok(state
            .by_order
            .get(&order_id)
            .and_then(|id| state.payments.get(id))
            .cloned())
    }

    async fn process_refund(
        &self,
        payment_id: PaymentId,
        amount: Money,
    ) -> Result<Payment, PaymentError> {
        let mut state = self.state.write().await;
        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or(PaymentError::NotFound(payment_id))?;

        payment.check_refund(amount)?;

        payment.status = PaymentStatus::Refunded;
        payment.refunded_amount = amount;
        Ok(payment.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_lookup() {
        let service = InMemoryPaymentService::new();
        let order_id = OrderId::new();

        let payment = service
            .create_payment_for_order(
                order_id,
                Money::from_cents(5000),
                PaymentMethod::CreditCard,
                PaymentStatus::Completed,
            )
            .await
            .unwrap();
        assert!(payment.transaction_id.starts_with("TXN-"));
        assert_eq!(payment.transaction_id.len(), 12);

        let found = service.get_payment_by_order_id(order_id).await.unwrap();
        assert_eq!(found, Some(payment));
        assert!(service.get_payment_by_order_id(OrderId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_one_payment_per_order() {
        let service = InMemoryPaymentService::new();
        let order_id = OrderId::new();
        let amount = Money::from_cents(1000);

        service
            .create_payment_for_order(order_id, amount, PaymentMethod::DebitCard, PaymentStatus::Completed)
            .await
            .unwrap();
        let err = service
            .create_payment_for_order(order_id, amount, PaymentMethod::DebitCard, PaymentStatus::Completed)
            .await
            .unwrap_err();

        assert_eq!(err, PaymentError::AlreadyExists(order_id));
        assert_eq!(service.payment_count().await, 1);
    }

    #[tokio::test]
    async fn test_fail_on_create() {
        let service = InMemoryPaymentService::new();
        service.set_fail_on_create(true).await;

        let result = service
            .create_payment_for_order(
                OrderId::new(),
                Money::from_cents(1000),
                PaymentMethod::CreditCard,
                PaymentStatus::Completed,
            )
            .await;
        assert!(matches!(result, Err(PaymentError::Declined(_))));
        assert_eq!(service.payment_count().await, 0);
    }

    #[tokio::test]
    async fn test_refund_rules() {
        let service = InMemoryPaymentService::new();
        let payment = service
            .create_payment_for_order(
                OrderId::new(),
                Money::from_cents(2000),
                PaymentMethod::CreditCard,
                PaymentStatus::Completed,
            )
            .await
            .unwrap();

        let err = service
            .process_refund(payment.id, Money::from_cents(2001))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::AmountExceeded { .. }));

        let refunded = service
            .process_refund(payment.id, Money::from_cents(1500))
            .await
            .unwrap();
        assert_eq!(refunded.status, PaymentStatus::Refunded);
        assert_eq!(refunded.refunded_amount, Money::from_cents(1500));

        let err = service
            .process_refund(payment.id, Money::from_cents(1))
            .await
            .unwrap_err();
        assert_eq!(err, PaymentError::AlreadyRefunded(payment.id));
    }

    #[tokio::test]
    async fn test_pending_payments_are_not_refundable() {
        let service = InMemoryPaymentService::new();
        let payment = service
            .create_payment_for_order(
                OrderId::new(),
                Money::from_cents(2000),
                PaymentMethod::CashOnDelivery,
                PaymentStatus::Pending,
            )
            .await
            .unwrap();

        let err = service
            .process_refund(payment.id, Money::from_cents(100))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PaymentError::NotRefundable {
                status: PaymentStatus::Pending
            }
        );
    }
}
