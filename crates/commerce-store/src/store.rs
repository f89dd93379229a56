use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, CartLineId, OrderId, OrderStatus, ProductId, UserId};

use crate::{Cart, CartLine, Order, OrderDraft, Product, Reservation, Result};

/// Source of truth for product stock.
///
/// All implementations must be thread-safe (Send + Sync). Every
/// stock-lowering write is a single atomic check-and-write; a write that would
/// take the ledger, or available stock, below zero fails instead of clamping.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Inserts or replaces a product. This is the catalog's write path.
    async fn register_product(&self, product: Product) -> Result<()>;

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>>;

    /// Adds `delta` to the ledger quantity and returns the new quantity.
    ///
    /// Negative deltas fail with `InsufficientStock` if the ledger would drop
    /// below the live sum of reservations for the product.
    async fn adjust_stock(&self, product_id: ProductId, delta: i64) -> Result<u32>;

    /// Ledger quantity minus every unexpired reservation.
    async fn available_stock(&self, product_id: ProductId) -> Result<i64>;

    /// Like [`available_stock`](Self::available_stock) but ignores one cart's
    /// own holds, so that cart's lines can be re-checked against what is left.
    async fn available_stock_excluding_cart(
        &self,
        product_id: ProductId,
        cart_id: CartId,
    ) -> Result<i64>;
}

/// Per-(product, cart) stock holds.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Adds `quantity` to the cart's hold on the product, refreshing its expiry.
    ///
    /// The availability check and the write are serialized against every
    /// other reservation attempt on the same product. Fails with
    /// `InsufficientStock` if the merged hold would exceed what other carts
    /// leave available.
    async fn reserve(
        &self,
        product_id: ProductId,
        cart_id: CartId,
        quantity: u32,
        expires_at: DateTime<Utc>,
    ) -> Result<Reservation>;

    /// Lowers an existing hold to `quantity` (zero deletes it).
    ///
    /// Never raises a hold; returns the hold as it stands afterwards.
    async fn shrink_reservation(
        &self,
        product_id: ProductId,
        cart_id: CartId,
        quantity: u32,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Reservation>>;

    async fn get_reservation(
        &self,
        product_id: ProductId,
        cart_id: CartId,
    ) -> Result<Option<Reservation>>;

    async fn reservations_for_cart(&self, cart_id: CartId) -> Result<Vec<Reservation>>;

    /// Deletes the hold. Absence is not an error.
    async fn release(&self, product_id: ProductId, cart_id: CartId) -> Result<()>;

    /// Physically deletes holds that expired at or before `now`.
    ///
    /// Expired holds are already ignored by every availability read.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Cart persistence.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Returns the user's cart, creating an empty one on first use.
    async fn ensure_cart(&self, user_id: UserId) -> Result<Cart>;

    async fn find_cart(&self, user_id: UserId) -> Result<Option<Cart>>;

    async fn get_cart(&self, cart_id: CartId) -> Result<Option<Cart>>;

    /// Adds a line, merging into the existing line for the same product.
    async fn add_line(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartLine>;

    async fn set_line_quantity(
        &self,
        cart_id: CartId,
        line_id: CartLineId,
        quantity: u32,
    ) -> Result<CartLine>;

    async fn remove_line(&self, cart_id: CartId, line_id: CartLineId) -> Result<()>;

    /// Deletes every line and every reservation of the cart in one unit.
    async fn clear_cart(&self, cart_id: CartId) -> Result<()>;
}

/// Order persistence.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Converts a cart into an order in one atomic unit.
    ///
    /// For each line: re-checks availability net of other carts' holds,
    /// deducts the ledger and snapshots the current price. Then writes the
    /// order with status `pending` and deletes the cart's lines and
    /// reservations. Any failure leaves stock, cart and holds untouched.
    async fn place_order(&self, draft: OrderDraft, cart_id: CartId) -> Result<Order>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Writes `target` only if the order is still in `expected`.
    async fn update_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        target: OrderStatus,
    ) -> Result<Order>;

    /// Returns every line's quantity to the ledger and writes `target`, in one
    /// unit, only if the order is still in `expected`.
    async fn restock_and_update_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        target: OrderStatus,
    ) -> Result<Order>;

    /// Orders still `pending` that were created before `cutoff`, oldest first.
    async fn pending_orders_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>>;
}

/// The full storage surface the core services run against.
pub trait CommerceStore: InventoryLedger + ReservationStore + CartStore + OrderStore {}

impl<T> CommerceStore for T where T: InventoryLedger + ReservationStore + CartStore + OrderStore {}
