//! Background jobs for the checkout store.
//!
//! This crate provides:
//! - `Config`, the environment-driven worker settings
//! - `ReservationSweeper`, which deletes expired stock holds on an interval
//! - `PaymentReconciler`, which settles card orders left `pending` by a failed
//!   payment call. It needs a `PaymentService` client, so hosts that link one
//!   run it next to the sweeper.

pub mod config;
pub mod reconciler;
pub mod schedule;
pub mod sweeper;

pub use config::{Config, ConfigError};
pub use reconciler::PaymentReconciler;
pub use schedule::run_periodically;
pub use sweeper::ReservationSweeper;
