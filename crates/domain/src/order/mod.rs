//! Order transaction coordinator and status state machine.

mod lifecycle;
mod number;
mod returns;
mod service;
pub mod status;

pub use number::generate_order_number;
pub use service::OrderService;
