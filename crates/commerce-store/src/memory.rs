use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, CartLineId, OrderId, OrderLineId, OrderStatus, ProductId, UserId};
use tokio::sync::RwLock;

use crate::{
    Cart, CartLine, Order, OrderDraft, OrderLine, Product, Reservation, Result, StoreError,
    model::order_total,
    saturating_u32,
    store::{CartStore, InventoryLedger, OrderStore, ReservationStore},
};

#[derive(Debug, Default)]
struct MemoryState {
    products: HashMap<ProductId, Product>,
    reservations: HashMap<(ProductId, CartId), Reservation>,
    carts: HashMap<CartId, Cart>,
    cart_owners: HashMap<UserId, CartId>,
    orders: HashMap<OrderId, Order>,
    order_numbers: HashSet<String>,
    fail_line_writes: bool,
}

impl MemoryState {
    fn live_holds(&self, product_id: ProductId, excluding: Option<CartId>, now: DateTime<Utc>) -> i64 {
        self.reservations
            .values()
            .filter(|hold| {
                hold.product_id == product_id
                    && hold.is_live(now)
                    && Some(hold.cart_id) != excluding
            })
            .map(|hold| i64::from(hold.quantity))
            .sum()
    }

    fn available(
        &self,
        product_id: ProductId,
        excluding: Option<CartId>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let product = self
            .products
            .get(&product_id)
            .ok_or(StoreError::ProductNotFound(product_id))?;
        Ok(i64::from(product.stock_quantity) - self.live_holds(product_id, excluding, now))
    }

    fn cart_mut(&mut self, cart_id: CartId) -> Result<&mut Cart> {
        self.carts
            .get_mut(&cart_id)
            .ok_or(StoreError::CartNotFound(cart_id))
    }

    fn check_line_writes(&self) -> Result<()> {
        if self.fail_line_writes {
            return Err(StoreError::Backend("cart line writes disabled".to_string()));
        }
        Ok(())
    }
}

/// In-memory store for tests and benchmarks.
///
/// Every operation runs under one write lock, which makes each call an
/// atomic unit with the same all-or-nothing behavior as the PostgreSQL
/// implementation.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent cart line write fail with a backend error.
    pub async fn set_fail_line_writes(&self, fail: bool) {
        self.state.write().await.fail_line_writes = fail;
    }

    /// Number of reservation rows, expired or not.
    pub async fn reservation_count(&self) -> usize {
        self.state.read().await.reservations.len()
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl InventoryLedger for InMemoryStore {
    async fn register_product(&self, product: Product) -> Result<()> {
        self.state.write().await.products.insert(product.id, product);
        Ok(())
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&product_id).cloned())
    }

    async fn adjust_stock(&self, product_id: ProductId, delta: i64) -> Result<u32> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let available = state.available(product_id, None, now)?;

        if delta < 0 && available + delta < 0 {
            return Err(StoreError::InsufficientStock {
                product_id,
                requested: saturating_u32(-delta),
                available: saturating_u32(available),
            });
        }

        let product = state
            .products
            .get_mut(&product_id)
            .ok_or(StoreError::ProductNotFound(product_id))?;
        let new_quantity = u32::try_from(i64::from(product.stock_quantity) + delta)
            .map_err(|_| StoreError::Backend(format!("stock out of range for {product_id}")))?;
        product.stock_quantity = new_quantity;
        Ok(new_quantity)
    }

    async fn available_stock(&self, product_id: ProductId) -> Result<i64> {
        self.state.read().await.available(product_id, None, Utc::now())
    }

    async fn available_stock_excluding_cart(
        &self,
        product_id: ProductId,
        cart_id: CartId,
    ) -> Result<i64> {
        self.state
            .read()
            .await
            .available(product_id, Some(cart_id), Utc::now())
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn reserve(
        &self,
        product_id: ProductId,
        cart_id: CartId,
        quantity: u32,
        expires_at: DateTime<Utc>,
    ) -> Result<Reservation> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let existing = state
            .reservations
            .get(&(product_id, cart_id))
            .filter(|hold| hold.is_live(now))
            .map_or(0, |hold| hold.quantity);
        let available = state.available(product_id, Some(cart_id), now)?;
        let candidate = i64::from(existing) + i64::from(quantity);

        if available < candidate {
            return Err(StoreError::InsufficientStock {
                product_id,
                requested: quantity,
                available: saturating_u32(available - i64::from(existing)),
            });
        }

        let hold = Reservation {
            product_id,
            cart_id,
            quantity: saturating_u32(candidate),
            expires_at,
        };
        state
            .reservations
            .insert((product_id, cart_id), hold.clone());
        Ok(hold)
    }

    async fn shrink_reservation(
        &self,
        product_id: ProductId,
        cart_id: CartId,
        quantity: u32,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Reservation>> {
        let mut state = self.state.write().await;
        let key = (product_id, cart_id);

        if quantity == 0 {
            state.reservations.remove(&key);
            return Ok(None);
        }

        Ok(state.reservations.get_mut(&key).map(|hold| {
            hold.quantity = hold.quantity.min(quantity);
            hold.expires_at = expires_at;
            hold.clone()
        }))
    }

    async fn get_reservation(
        &self,
        product_id: ProductId,
        cart_id: CartId,
    ) -> Result<Option<Reservation>> {
        Ok(self
            .state
            .read()
            .await
            .reservations
            .get(&(product_id, cart_id))
            .cloned())
    }

    async fn reservations_for_cart(&self, cart_id: CartId) -> Result<Vec<Reservation>> {
        let state = self.state.read().await;
        Ok(state
            .reservations
            .values()
            .filter(|hold| hold.cart_id == cart_id)
            .cloned()
            .collect())
    }

    async fn release(&self, product_id: ProductId, cart_id: CartId) -> Result<()> {
        self.state
            .write()
            .await
            .reservations
            .remove(&(product_id, cart_id));
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.reservations.len();
        state.reservations.retain(|_, hold| hold.is_live(now));
        Ok((before - state.reservations.len()) as u64)
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    async fn ensure_cart(&self, user_id: UserId) -> Result<Cart> {
        let mut state = self.state.write().await;

        if let Some(cart) = state
            .cart_owners
            .get(&user_id)
            .and_then(|cart_id| state.carts.get(cart_id))
        {
            return Ok(cart.clone());
        }

        let now = Utc::now();
        let cart = Cart {
            id: CartId::new(),
            user_id,
            lines: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        state.cart_owners.insert(user_id, cart.id);
        state.carts.insert(cart.id, cart.clone());
        Ok(cart)
    }

    async fn find_cart(&self, user_id: UserId) -> Result<Option<Cart>> {
        let state = self.state.read().await;
        Ok(state
            .cart_owners
            .get(&user_id)
            .and_then(|cart_id| state.carts.get(cart_id))
            .cloned())
    }

    async fn get_cart(&self, cart_id: CartId) -> Result<Option<Cart>> {
        Ok(self.state.read().await.carts.get(&cart_id).cloned())
    }

    async fn add_line(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartLine> {
        let mut state = self.state.write().await;
        state.check_line_writes()?;
        if !state.products.contains_key(&product_id) {
            return Err(StoreError::ProductNotFound(product_id));
        }

        let now = Utc::now();
        let cart = state.cart_mut(cart_id)?;
        cart.updated_at = now;

        if let Some(line) = cart
            .lines
            .iter_mut()
            .find(|line| line.product_id == product_id)
        {
            line.quantity += quantity;
            return Ok(line.clone());
        }

        let line = CartLine {
            id: CartLineId::new(),
            product_id,
            quantity,
            created_at: now,
        };
        cart.lines.push(line.clone());
        Ok(line)
    }

    async fn set_line_quantity(
        &self,
        cart_id: CartId,
        line_id: CartLineId,
        quantity: u32,
    ) -> Result<CartLine> {
        let mut state = self.state.write().await;
        state.check_line_writes()?;

        let cart = state.cart_mut(cart_id)?;
        let line = cart
            .lines
            .iter_mut()
            .find(|line| line.id == line_id)
            .ok_or(StoreError::LineNotFound(line_id))?;
        line.quantity = quantity;
        let line = line.clone();
        cart.updated_at = Utc::now();
        Ok(line)
    }

    async fn remove_line(&self, cart_id: CartId, line_id: CartLineId) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_line_writes()?;

        let cart = state.cart_mut(cart_id)?;
        let before = cart.lines.len();
        cart.lines.retain(|line| line.id != line_id);
        if cart.lines.len() == before {
            return Err(StoreError::LineNotFound(line_id));
        }
        cart.updated_at = Utc::now();
        Ok(())
    }

    async fn clear_cart(&self, cart_id: CartId) -> Result<()> {
        let mut state = self.state.write().await;
        let cart = state.cart_mut(cart_id)?;
        cart.lines.clear();
        cart.updated_at = Utc::now();
        state.reservations.retain(|(_, holder), _| *holder != cart_id);
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn place_order(&self, draft: OrderDraft, cart_id: CartId) -> Result<Order> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        if state.order_numbers.contains(&draft.order_number) {
            return Err(StoreError::DuplicateOrderNumber(draft.order_number));
        }
        if !state.carts.contains_key(&cart_id) {
            return Err(StoreError::CartNotFound(cart_id));
        }

        // Validate every line before touching anything.
        let mut requested: HashMap<ProductId, i64> = HashMap::new();
        let mut lines = Vec::with_capacity(draft.lines.len());
        for draft_line in &draft.lines {
            let product_id = draft_line.product_id;
            let total = requested.entry(product_id).or_default();
            *total += i64::from(draft_line.quantity);

            let available = state.available(product_id, Some(cart_id), now)?;
            if available < *total {
                return Err(StoreError::InsufficientStock {
                    product_id,
                    requested: draft_line.quantity,
                    available: saturating_u32(available - (*total - i64::from(draft_line.quantity))),
                });
            }

            let price = state
                .products
                .get(&product_id)
                .map(|product| product.price)
                .ok_or(StoreError::ProductNotFound(product_id))?;
            lines.push(OrderLine {
                id: OrderLineId::new(),
                product_id,
                quantity: draft_line.quantity,
                unit_price: price,
            });
        }

        for line in &lines {
            if let Some(product) = state.products.get_mut(&line.product_id) {
                product.stock_quantity -= line.quantity;
            }
        }

        let order = Order {
            id: draft.id,
            user_id: draft.user_id,
            order_number: draft.order_number,
            total_amount: order_total(&lines),
            status: OrderStatus::Pending,
            payment_method: draft.payment_method,
            shipping_address: draft.shipping_address,
            billing_address: draft.billing_address,
            lines,
            created_at: now,
            updated_at: now,
        };
        state.order_numbers.insert(order.order_number.clone());
        state.orders.insert(order.id, order.clone());

        let cart = state.cart_mut(cart_id)?;
        cart.lines.clear();
        cart.updated_at = now;
        state.reservations.retain(|(_, holder), _| *holder != cart_id);

        Ok(order)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        target: OrderStatus,
    ) -> Result<Order> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;

        if order.status != expected {
            return Err(StoreError::StatusConflict {
                order_id,
                expected,
                actual: order.status,
            });
        }

        order.status = target;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn restock_and_update_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        target: OrderStatus,
    ) -> Result<Order> {
        let mut state = self.state.write().await;

        let lines = {
            let order = state
                .orders
                .get(&order_id)
                .ok_or(StoreError::OrderNotFound(order_id))?;
            if order.status != expected {
                return Err(StoreError::StatusConflict {
                    order_id,
                    expected,
                    actual: order.status,
                });
            }
            order.lines.clone()
        };

        if let Some(missing) = lines
            .iter()
            .find(|line| !state.products.contains_key(&line.product_id))
        {
            return Err(StoreError::ProductNotFound(missing.product_id));
        }

        for line in &lines {
            if let Some(product) = state.products.get_mut(&line.product_id) {
                product.stock_quantity = product.stock_quantity.saturating_add(line.quantity);
            }
        }

        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        order.status = target;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn pending_orders_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|order| order.status == OrderStatus::Pending && order.created_at < cutoff)
            .cloned()
            .collect();
        orders.sort_by_key(|order| order.created_at);
        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use common::{Address, Money, PaymentMethod};

    use super::*;
    use crate::DraftLine;

    fn in_ten_minutes() -> DateTime<Utc> {
        Utc::now() + TimeDelta::minutes(10)
    }

    async fn store_with_product(stock: u32) -> (InMemoryStore, ProductId) {
        let store = InMemoryStore::new();
        let product = Product::new("Widget", Money::from_cents(1000), stock);
        let product_id = product.id;
        store.register_product(product).await.unwrap();
        (store, product_id)
    }

    fn draft(user_id: UserId, lines: Vec<(ProductId, u32)>) -> OrderDraft {
        OrderDraft {
            id: OrderId::new(),
            user_id,
            order_number: format!("ORD-TEST-{}", OrderId::new()),
            payment_method: PaymentMethod::CashOnDelivery,
            shipping_address: Address::default(),
            billing_address: Address::default(),
            lines: lines
                .into_iter()
                .map(|(product_id, quantity)| DraftLine {
                    product_id,
                    quantity,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn reserve_merges_into_one_hold() {
        let (store, product_id) = store_with_product(10).await;
        let cart_id = CartId::new();

        store.reserve(product_id, cart_id, 2, in_ten_minutes()).await.unwrap();
        let hold = store.reserve(product_id, cart_id, 3, in_ten_minutes()).await.unwrap();

        assert_eq!(hold.quantity, 5);
        assert_eq!(store.reservation_count().await, 1);
        assert_eq!(store.available_stock(product_id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn reserve_rejects_oversubscription_across_carts() {
        let (store, product_id) = store_with_product(5).await;
        store.reserve(product_id, CartId::new(), 4, in_ten_minutes()).await.unwrap();

        let err = store
            .reserve(product_id, CartId::new(), 2, in_ten_minutes())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::InsufficientStock { requested: 2, available: 1, .. }
        ));
        assert_eq!(store.available_stock(product_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn merged_hold_is_checked_against_its_full_quantity() {
        let (store, product_id) = store_with_product(5).await;
        let cart_id = CartId::new();
        store.reserve(product_id, cart_id, 3, in_ten_minutes()).await.unwrap();

        let err = store
            .reserve(product_id, cart_id, 3, in_ten_minutes())
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::InsufficientStock { available: 2, .. }));
        let hold = store.get_reservation(product_id, cart_id).await.unwrap().unwrap();
        assert_eq!(hold.quantity, 3);
    }

    #[tokio::test]
    async fn expired_holds_do_not_count() {
        let (store, product_id) = store_with_product(5).await;
        let cart_id = CartId::new();
        store
            .reserve(product_id, cart_id, 5, Utc::now() - TimeDelta::seconds(1))
            .await
            .unwrap();

        assert_eq!(store.available_stock(product_id).await.unwrap(), 5);
        store.reserve(product_id, CartId::new(), 5, in_ten_minutes()).await.unwrap();

        assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 1);
        assert_eq!(store.reservation_count().await, 1);
    }

    #[tokio::test]
    async fn excluding_cart_ignores_own_hold() {
        let (store, product_id) = store_with_product(10).await;
        let cart_id = CartId::new();
        store.reserve(product_id, cart_id, 4, in_ten_minutes()).await.unwrap();
        store.reserve(product_id, CartId::new(), 3, in_ten_minutes()).await.unwrap();

        assert_eq!(store.available_stock(product_id).await.unwrap(), 3);
        assert_eq!(
            store
                .available_stock_excluding_cart(product_id, cart_id)
                .await
                .unwrap(),
            7
        );
    }

    #[tokio::test]
    async fn shrink_never_raises_and_zero_deletes() {
        let (store, product_id) = store_with_product(10).await;
        let cart_id = CartId::new();
        store.reserve(product_id, cart_id, 4, in_ten_minutes()).await.unwrap();

        let hold = store
            .shrink_reservation(product_id, cart_id, 6, in_ten_minutes())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hold.quantity, 4);

        let hold = store
            .shrink_reservation(product_id, cart_id, 1, in_ten_minutes())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hold.quantity, 1);

        let gone = store
            .shrink_reservation(product_id, cart_id, 0, in_ten_minutes())
            .await
            .unwrap();
        assert!(gone.is_none());
        assert_eq!(store.reservation_count().await, 0);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let (store, product_id) = store_with_product(10).await;
        let cart_id = CartId::new();
        store.release(product_id, cart_id).await.unwrap();
        store.reserve(product_id, cart_id, 1, in_ten_minutes()).await.unwrap();
        store.release(product_id, cart_id).await.unwrap();
        store.release(product_id, cart_id).await.unwrap();
        assert_eq!(store.available_stock(product_id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn adjust_stock_fails_instead_of_clamping() {
        let (store, product_id) = store_with_product(3).await;

        assert_eq!(store.adjust_stock(product_id, 2).await.unwrap(), 5);
        let err = store.adjust_stock(product_id, -6).await.unwrap_err();
        assert!(matches!(err, StoreError::InsufficientStock { requested: 6, available: 5, .. }));

        store.reserve(product_id, CartId::new(), 4, in_ten_minutes()).await.unwrap();
        assert!(store.adjust_stock(product_id, -2).await.is_err());
        assert_eq!(store.adjust_stock(product_id, -1).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn ensure_cart_is_idempotent() {
        let store = InMemoryStore::new();
        let user_id = UserId::new();
        let first = store.ensure_cart(user_id).await.unwrap();
        let second = store.ensure_cart(user_id).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(store.find_cart(UserId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn add_line_merges_by_product() {
        let (store, product_id) = store_with_product(10).await;
        let cart = store.ensure_cart(UserId::new()).await.unwrap();

        let first = store.add_line(cart.id, product_id, 2).await.unwrap();
        let merged = store.add_line(cart.id, product_id, 3).await.unwrap();

        assert_eq!(first.id, merged.id);
        assert_eq!(merged.quantity, 5);
        assert_eq!(store.get_cart(cart.id).await.unwrap().unwrap().lines.len(), 1);
    }

    #[tokio::test]
    async fn place_order_rolls_back_on_any_short_line() {
        let store = InMemoryStore::new();
        let plenty = Product::new("Plenty", Money::from_cents(100), 10);
        let scarce = Product::new("Scarce", Money::from_cents(100), 3);
        let (plenty_id, scarce_id) = (plenty.id, scarce.id);
        store.register_product(plenty).await.unwrap();
        store.register_product(scarce).await.unwrap();

        let user_id = UserId::new();
        let cart = store.ensure_cart(user_id).await.unwrap();
        store.add_line(cart.id, plenty_id, 5).await.unwrap();
        store.reserve(plenty_id, cart.id, 5, in_ten_minutes()).await.unwrap();

        let err = store
            .place_order(draft(user_id, vec![(plenty_id, 5), (scarce_id, 5)]), cart.id)
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::InsufficientStock { product_id, .. } if product_id == scarce_id));
        let plenty = store.get_product(plenty_id).await.unwrap().unwrap();
        assert_eq!(plenty.stock_quantity, 10);
        assert_eq!(store.reservation_count().await, 1);
        assert_eq!(store.get_cart(cart.id).await.unwrap().unwrap().lines.len(), 1);
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn place_order_rejects_duplicate_numbers() {
        let (store, product_id) = store_with_product(10).await;
        let user_id = UserId::new();
        let cart = store.ensure_cart(user_id).await.unwrap();

        let first = draft(user_id, vec![(product_id, 1)]);
        let mut second = draft(user_id, vec![(product_id, 1)]);
        second.order_number = first.order_number.clone();

        store.place_order(first, cart.id).await.unwrap();
        let err = store.place_order(second, cart.id).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateOrderNumber(_)));
        assert_eq!(store.get_product(product_id).await.unwrap().unwrap().stock_quantity, 9);
    }

    #[tokio::test]
    async fn restock_is_guarded_by_expected_status() {
        let (store, product_id) = store_with_product(10).await;
        let user_id = UserId::new();
        let cart = store.ensure_cart(user_id).await.unwrap();
        let order = store
            .place_order(draft(user_id, vec![(product_id, 4)]), cart.id)
            .await
            .unwrap();

        store
            .restock_and_update_status(order.id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await
            .unwrap();
        let err = store
            .restock_and_update_status(order.id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::StatusConflict { actual: OrderStatus::Cancelled, .. }
        ));
        assert_eq!(store.get_product(product_id).await.unwrap().unwrap().stock_quantity, 10);
    }
}
