//! Shared identifiers and value types for the commerce core.

pub mod money;
pub mod order;
pub mod types;

pub use money::Money;
pub use order::{Address, OrderStatus, ParseEnumError, PaymentMethod};
pub use types::{CartId, CartLineId, OrderId, OrderLineId, PaymentId, ProductId, UserId};
