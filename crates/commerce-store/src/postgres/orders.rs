use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, Money, OrderId, OrderLineId, OrderStatus};
use sqlx::{PgConnection, types::Json};

use super::{PostgresStore, available_in, lock_product, row_to_order, row_to_order_line};
use crate::{
    Order, OrderDraft, OrderLine, Result, StoreError, model::order_total, saturating_u32,
    store::OrderStore,
};

const ORDER_COLUMNS: &str = "id, user_id, order_number, total_cents, status, payment_method, \
     shipping_address, billing_address, created_at, updated_at";

async fn load_order(conn: &mut PgConnection, order_id: OrderId) -> Result<Option<Order>> {
    let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let lines = sqlx::query(
        r#"
        SELECT id, product_id, quantity, unit_price_cents
        FROM order_lines
        WHERE order_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(order_id.as_uuid())
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(row_to_order_line)
    .collect::<Result<Vec<_>>>()?;

    row_to_order(row, lines).map(Some)
}

/// Writes `target` if the order is still in `expected`, or explains why not.
async fn compare_and_set_status(
    conn: &mut PgConnection,
    order_id: OrderId,
    expected: OrderStatus,
    target: OrderStatus,
) -> Result<()> {
    let updated = sqlx::query(
        "UPDATE orders SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2",
    )
    .bind(order_id.as_uuid())
    .bind(expected.as_str())
    .bind(target.as_str())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if updated == 1 {
        return Ok(());
    }

    let actual: Option<String> = sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?;

    match actual {
        None => Err(StoreError::OrderNotFound(order_id)),
        Some(actual) => Err(StoreError::StatusConflict {
            order_id,
            expected,
            actual: actual
                .parse()
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        }),
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn place_order(&self, draft: OrderDraft, cart_id: CartId) -> Result<Order> {
        let OrderDraft {
            id: order_id,
            user_id,
            order_number,
            payment_method,
            shipping_address,
            billing_address,
            lines: draft_lines,
        } = draft;

        let mut tx = self.pool.begin().await?;

        let cart_exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM carts WHERE id = $1 FOR UPDATE")
                .bind(cart_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        if cart_exists.is_none() {
            return Err(StoreError::CartNotFound(cart_id));
        }

        // Advisory locks and product row locks are both taken in product id
        // order, matching the restock path, so concurrent writers cannot deadlock.
        let products: BTreeSet<_> = draft_lines.iter().map(|line| line.product_id).collect();
        for product_id in &products {
            lock_product(&mut tx, *product_id).await?;
        }
        let mut draft_lines = draft_lines;
        draft_lines.sort_by_key(|line| line.product_id);

        let mut lines = Vec::with_capacity(draft_lines.len());
        for draft_line in &draft_lines {
            let product_id = draft_line.product_id;
            let available = available_in(&mut tx, product_id, Some(cart_id)).await?;
            let insufficient = || StoreError::InsufficientStock {
                product_id,
                requested: draft_line.quantity,
                available: saturating_u32(available),
            };
            if available < i64::from(draft_line.quantity) {
                return Err(insufficient());
            }

            let price_cents: i64 = sqlx::query_scalar(
                r#"
                UPDATE products
                SET stock_quantity = stock_quantity - $2, updated_at = NOW()
                WHERE id = $1 AND stock_quantity >= $2
                RETURNING price_cents
                "#,
            )
            .bind(product_id.as_uuid())
            .bind(i64::from(draft_line.quantity))
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(insufficient)?;

            lines.push(OrderLine {
                id: OrderLineId::new(),
                product_id,
                quantity: draft_line.quantity,
                unit_price: Money::from_cents(price_cents),
            });
        }

        let now = Utc::now();
        let total_amount = order_total(&lines);

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, order_number, total_cents, status, payment_method,
                                shipping_address, billing_address, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(&order_number)
        .bind(total_amount.cents())
        .bind(OrderStatus::Pending.as_str())
        .bind(payment_method.as_str())
        .bind(Json(&shipping_address))
        .bind(Json(&billing_address))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("orders_order_number_key")
            {
                return StoreError::DuplicateOrderNumber(order_number.clone());
            }
            StoreError::Database(e)
        })?;

        for line in &lines {
            sqlx::query(
                r#"
                INSERT INTO order_lines (id, order_id, product_id, quantity, unit_price_cents)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(line.id.as_uuid())
            .bind(order_id.as_uuid())
            .bind(line.product_id.as_uuid())
            .bind(i64::from(line.quantity))
            .bind(line.unit_price.cents())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM cart_lines WHERE cart_id = $1")
            .bind(cart_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM stock_reservations WHERE cart_id = $1")
            .bind(cart_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE carts SET updated_at = NOW() WHERE id = $1")
            .bind(cart_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!(%order_id, %order_number, "order row committed");

        Ok(Order {
            id: order_id,
            user_id,
            order_number,
            total_amount,
            status: OrderStatus::Pending,
            payment_method,
            shipping_address,
            billing_address,
            lines,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        load_order(&mut conn, order_id).await
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        target: OrderStatus,
    ) -> Result<Order> {
        let mut tx = self.pool.begin().await?;
        compare_and_set_status(&mut tx, order_id, expected, target).await?;
        let order = load_order(&mut tx, order_id)
            .await?
            .ok_or(StoreError::OrderNotFound(order_id))?;
        tx.commit().await?;

        Ok(order)
    }

    async fn restock_and_update_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        target: OrderStatus,
    ) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        // The status write locks the order row, so a second caller waits here
        // and then fails the compare-and-set instead of restocking twice.
        compare_and_set_status(&mut tx, order_id, expected, target).await?;

        sqlx::query(
            r#"
            SELECT id FROM products
            WHERE id IN (SELECT product_id FROM order_lines WHERE order_id = $1)
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(order_id.as_uuid())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE products p
            SET stock_quantity = p.stock_quantity + l.total, updated_at = NOW()
            FROM (
                SELECT product_id, SUM(quantity)::BIGINT AS total
                FROM order_lines
                WHERE order_id = $1
                GROUP BY product_id
            ) l
            WHERE p.id = l.product_id
            "#,
        )
        .bind(order_id.as_uuid())
        .execute(&mut *tx)
        .await?;

        let order = load_order(&mut tx, order_id)
            .await?
            .ok_or(StoreError::OrderNotFound(order_id))?;
        tx.commit().await?;

        Ok(order)
    }

    async fn pending_orders_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>> {
        let ids: Vec<uuid::Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM orders
            WHERE status = $1 AND created_at < $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(OrderStatus::Pending.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut conn = self.pool.acquire().await?;
        let mut orders = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(order) = load_order(&mut conn, OrderId::from_uuid(id)).await? {
                orders.push(order);
            }
        }
        Ok(orders)
    }
}
