use common::{CartId, CartLineId, OrderId, OrderStatus, ProductId};
use thiserror::Error;

/// Errors that can occur when reading or writing commerce state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Committing the write would drive available stock below zero.
    ///
    /// `available` is what this request could have had, already net of the
    /// caller's own hold.
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

    #[error("Cart not found: {0}")]
    CartNotFound(CartId),

    #[error("Cart line not found: {0}")]
    LineNotFound(CartLineId),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order number collided with an existing order.
    #[error("Duplicate order number: {0}")]
    DuplicateOrderNumber(String),

    /// A status compare-and-set found a different status than expected.
    #[error("Order {order_id} status changed concurrently: expected {expected}, found {actual}")]
    StatusConflict {
        order_id: OrderId,
        expected: OrderStatus,
        actual: OrderStatus,
    },

    /// A non-database backend failure.
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
