//! Checkout core: stock-gated carts, atomic order creation and the order
//! status lifecycle.
//!
//! This crate provides:
//! - `CartService`, which keeps cart lines and stock reservations in step
//! - `OrderService`, which converts carts into orders and drives their status
//! - The `PaymentService` collaborator contract with an in-memory implementation

pub mod cart;
pub mod config;
pub mod error;
pub mod order;
pub mod payment;

pub use cart::{CartService, CartValidation};
pub use config::CheckoutConfig;
pub use error::{DomainError, StockProblem};
pub use order::{OrderService, generate_order_number};
pub use payment::{InMemoryPaymentService, Payment, PaymentError, PaymentService, PaymentStatus};
