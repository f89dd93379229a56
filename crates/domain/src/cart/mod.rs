//! Cart aggregate glue: line mutations gated by stock reservations.

mod service;
mod validation;

pub use service::CartService;
pub use validation::CartValidation;

pub(crate) use validation::check_lines;
