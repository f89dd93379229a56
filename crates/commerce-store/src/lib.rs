//! Storage layer for inventory, carts and orders.
//!
//! Provides the persistence traits the checkout services run against, an
//! in-memory implementation for tests, and a PostgreSQL implementation.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use model::{Cart, CartLine, DraftLine, Order, OrderDraft, OrderLine, Product, Reservation};
pub use postgres::PostgresStore;
pub use store::{CartStore, CommerceStore, InventoryLedger, OrderStore, ReservationStore};

/// Clamps a signed stock figure into the `u32` quantity range.
pub(crate) fn saturating_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}
