//! Domain error types.

use commerce_store::StoreError;
use common::{CartLineId, OrderId, OrderStatus, ProductId};
use thiserror::Error;

use crate::payment::PaymentError;

/// One cart line that no longer fits in available stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockProblem {
    pub product_id: ProductId,
    pub requested: u32,
    pub available: u32,
}

impl std::fmt::Display for StockProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "product {}: requested {}, available {}",
            self.product_id, self.requested, self.available
        )
    }
}

/// Errors that can occur during cart and order operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Not enough unreserved stock. The caller may retry with less or later.
    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Cart line not found: {0}")]
    LineNotFound(CartLineId),

    #[error("Quantity must be greater than zero")]
    InvalidQuantity,

    #[error("Cart is empty")]
    EmptyCart,

    /// One or more lines failed the stock re-check.
    #[error("Cart is invalid: {}", join_problems(.problems))]
    CartInvalid { problems: Vec<StockProblem> },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Order cannot be cancelled in status {status}")]
    NotCancellable { status: OrderStatus },

    #[error("Order cannot be returned in status {status}")]
    NotReturnable { status: OrderStatus },

    #[error("Not authorized to access this order")]
    Unauthorized,

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    /// Storage or transport failure. The message stays in the source chain.
    #[error("Internal error")]
    Internal(#[source] StoreError),
}

fn join_problems(problems: &[StockProblem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl DomainError {
    /// Returns true if repeating the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DomainError::InsufficientStock { .. } | DomainError::Internal(_)
        )
    }

    /// Stable snake_case name of the variant, used as a metric label.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::InsufficientStock { .. } => "insufficient_stock",
            DomainError::ProductNotFound(_) => "product_not_found",
            DomainError::LineNotFound(_) => "line_not_found",
            DomainError::InvalidQuantity => "invalid_quantity",
            DomainError::EmptyCart => "empty_cart",
            DomainError::CartInvalid { .. } => "cart_invalid",
            DomainError::InvalidTransition { .. } => "invalid_transition",
            DomainError::OrderNotFound(_) => "order_not_found",
            DomainError::NotCancellable { .. } => "not_cancellable",
            DomainError::NotReturnable { .. } => "not_returnable",
            DomainError::Unauthorized => "unauthorized",
            DomainError::Payment(_) => "payment",
            DomainError::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for DomainError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientStock {
                product_id,
                requested,
                available,
            } => DomainError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            StoreError::ProductNotFound(id) => DomainError::ProductNotFound(id),
            StoreError::LineNotFound(id) => DomainError::LineNotFound(id),
            StoreError::OrderNotFound(id) => DomainError::OrderNotFound(id),
            other => DomainError::Internal(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_hide_storage_details() {
        let err = DomainError::from(StoreError::Backend("connection reset by peer".into()));
        assert_eq!(err.to_string(), "Internal error");
        assert!(err.is_retryable());

        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("connection reset by peer"));
    }

    #[test]
    fn stock_errors_keep_their_detail() {
        let product_id = ProductId::new();
        let err = DomainError::from(StoreError::InsufficientStock {
            product_id,
            requested: 4,
            available: 1,
        });
        assert!(matches!(
            err,
            DomainError::InsufficientStock { requested: 4, available: 1, .. }
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn caller_errors_are_not_retryable() {
        assert!(!DomainError::EmptyCart.is_retryable());
        assert_eq!(DomainError::EmptyCart.code(), "empty_cart");
        assert!(
            !DomainError::InvalidTransition {
                from: OrderStatus::Shipped,
                to: OrderStatus::Pending,
            }
            .is_retryable()
        );
    }

    #[test]
    fn cart_invalid_lists_every_problem() {
        let err = DomainError::CartInvalid {
            problems: vec![
                StockProblem {
                    product_id: ProductId::new(),
                    requested: 5,
                    available: 3,
                },
                StockProblem {
                    product_id: ProductId::new(),
                    requested: 2,
                    available: 0,
                },
            ],
        };
        let message = err.to_string();
        assert!(message.contains("requested 5, available 3"));
        assert!(message.contains("requested 2, available 0"));
    }
}
