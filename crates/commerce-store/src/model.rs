//! Records persisted by the store.

use chrono::{DateTime, Utc};
use common::{
    Address, CartId, CartLineId, Money, OrderId, OrderLineId, OrderStatus, PaymentMethod,
    ProductId, UserId,
};
use serde::{Deserialize, Serialize};

/// A product as seen by the inventory ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    /// Ledger quantity, before subtracting reservations.
    pub stock_quantity: u32,
}

impl Product {
    pub fn new(name: impl Into<String>, price: Money, stock_quantity: u32) -> Self {
        Self {
            id: ProductId::new(),
            name: name.into(),
            price,
            stock_quantity,
        }
    }
}

/// A temporary hold of stock for one cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub product_id: ProductId,
    pub cart_id: CartId,
    pub quantity: u32,
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// Returns true while the hold still counts against available stock.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: CartLineId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
}

/// A user's cart with its lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub user_id: UserId,
    pub lines: Vec<CartLine>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, line_id: CartLineId) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.id == line_id)
    }

    pub fn line_for_product(&self, product_id: ProductId) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.product_id == product_id)
    }

    /// Total units across all lines.
    pub fn item_count(&self) -> u64 {
        self.lines.iter().map(|line| u64::from(line.quantity)).sum()
    }
}

/// Price snapshot of one product within an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: OrderLineId,
    pub product_id: ProductId,
    pub quantity: u32,
    /// Price at the moment the order was created.
    pub unit_price: Money,
}

impl OrderLine {
    pub fn line_total(&self) -> Money {
        self.unit_price.times(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub order_number: String,
    pub total_amount: Money,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub lines: Vec<OrderLine>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sum of `price × quantity` over the lines.
pub fn order_total(lines: &[OrderLine]) -> Money {
    lines.iter().map(OrderLine::line_total).sum()
}

/// Quantity of one product to deduct when an order is placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Everything the coordinator decides before the atomic unit opens.
///
/// The store fills in price snapshots and the total while deducting stock.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub id: OrderId,
    pub user_id: UserId,
    pub order_number: String,
    pub payment_method: PaymentMethod,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub lines: Vec<DraftLine>,
}
