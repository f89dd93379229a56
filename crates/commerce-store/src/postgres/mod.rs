//! PostgreSQL-backed store.
//!
//! Stock-lowering writes for a product are serialized with a transaction
//! scoped advisory lock keyed on the product id, so the availability check
//! and the write that depends on it always see the same ledger.

mod carts;
mod inventory;
mod orders;

use chrono::{DateTime, Utc};
use common::{
    Address, CartId, CartLineId, Money, OrderId, OrderLineId, OrderStatus, PaymentMethod,
    ProductId, UserId,
};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow, types::Json};
use uuid::Uuid;

use crate::{CartLine, Order, OrderLine, Product, Reservation, Result, StoreError};

/// PostgreSQL-backed implementation of every store trait.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Takes the per-product advisory lock for the rest of the transaction.
async fn lock_product(conn: &mut PgConnection, product_id: ProductId) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("product_{product_id}"))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Ledger quantity minus live holds, optionally ignoring one cart's holds.
async fn available_in(
    conn: &mut PgConnection,
    product_id: ProductId,
    excluding: Option<CartId>,
) -> Result<i64> {
    let available: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT (p.stock_quantity - COALESCE((
            SELECT SUM(r.quantity)
            FROM stock_reservations r
            WHERE r.product_id = p.id
              AND r.expires_at > NOW()
              AND r.cart_id IS DISTINCT FROM $2
        ), 0))::BIGINT AS available
        FROM products p
        WHERE p.id = $1
        "#,
    )
    .bind(product_id.as_uuid())
    .bind(excluding.map(|cart_id| cart_id.as_uuid()))
    .fetch_optional(&mut *conn)
    .await?;

    available.ok_or(StoreError::ProductNotFound(product_id))
}

fn quantity(row: &PgRow, column: &str) -> sqlx::Result<u32> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn row_to_product(row: PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        stock_quantity: quantity(&row, "stock_quantity")?,
    })
}

fn row_to_reservation(row: PgRow) -> Result<Reservation> {
    Ok(Reservation {
        product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
        cart_id: CartId::from_uuid(row.try_get::<Uuid, _>("cart_id")?),
        quantity: quantity(&row, "quantity")?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn row_to_cart_line(row: PgRow) -> Result<CartLine> {
    Ok(CartLine {
        id: CartLineId::from_uuid(row.try_get::<Uuid, _>("id")?),
        product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
        quantity: quantity(&row, "quantity")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_order_line(row: PgRow) -> Result<OrderLine> {
    Ok(OrderLine {
        id: OrderLineId::from_uuid(row.try_get::<Uuid, _>("id")?),
        product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
        quantity: quantity(&row, "quantity")?,
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
    })
}

fn row_to_order(row: PgRow, lines: Vec<OrderLine>) -> Result<Order> {
    let status: String = row.try_get("status")?;
    let payment_method: String = row.try_get("payment_method")?;
    let shipping_address: Json<Address> = row.try_get("shipping_address")?;
    let billing_address: Json<Address> = row.try_get("billing_address")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        order_number: row.try_get("order_number")?,
        total_amount: Money::from_cents(row.try_get("total_cents")?),
        status: status
            .parse::<OrderStatus>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        payment_method: payment_method
            .parse::<PaymentMethod>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        shipping_address: shipping_address.0,
        billing_address: billing_address.0,
        lines,
        created_at,
        updated_at: row.try_get("updated_at")?,
    })
}
