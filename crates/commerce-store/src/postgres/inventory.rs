use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, ProductId};

use super::{PostgresStore, available_in, lock_product, row_to_product, row_to_reservation};
use crate::{
    Product, Reservation, Result, StoreError, saturating_u32,
    store::{InventoryLedger, ReservationStore},
};

#[async_trait]
impl InventoryLedger for PostgresStore {
    async fn register_product(&self, product: Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price_cents, stock_quantity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                price_cents = EXCLUDED.price_cents,
                stock_quantity = EXCLUDED.stock_quantity,
                updated_at = NOW()
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.price.cents())
        .bind(i64::from(product.stock_quantity))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(
            "SELECT id, name, price_cents, stock_quantity FROM products WHERE id = $1",
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_product).transpose()
    }

    async fn adjust_stock(&self, product_id: ProductId, delta: i64) -> Result<u32> {
        let mut tx = self.pool.begin().await?;
        lock_product(&mut tx, product_id).await?;

        if delta < 0 {
            let available = available_in(&mut tx, product_id, None).await?;
            if available + delta < 0 {
                return Err(StoreError::InsufficientStock {
                    product_id,
                    requested: saturating_u32(-delta),
                    available: saturating_u32(available),
                });
            }
        }

        let new_quantity: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity + $2, updated_at = NOW()
            WHERE id = $1 AND stock_quantity + $2 >= 0
            RETURNING stock_quantity
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(delta)
        .fetch_optional(&mut *tx)
        .await?;

        let new_quantity = new_quantity.ok_or(StoreError::ProductNotFound(product_id))?;
        tx.commit().await?;

        Ok(saturating_u32(new_quantity))
    }

    async fn available_stock(&self, product_id: ProductId) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        available_in(&mut conn, product_id, None).await
    }

    async fn available_stock_excluding_cart(
        &self,
        product_id: ProductId,
        cart_id: CartId,
    ) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        available_in(&mut conn, product_id, Some(cart_id)).await
    }
}

#[async_trait]
impl ReservationStore for PostgresStore {
    async fn reserve(
        &self,
        product_id: ProductId,
        cart_id: CartId,
        quantity: u32,
        expires_at: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut tx = self.pool.begin().await?;
        lock_product(&mut tx, product_id).await?;

        // An expired hold is replaced, not extended.
        let existing: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT
            FROM stock_reservations
            WHERE product_id = $1 AND cart_id = $2 AND expires_at > NOW()
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(cart_id.as_uuid())
        .fetch_one(&mut *tx)
        .await?;

        let available = available_in(&mut tx, product_id, Some(cart_id)).await?;
        let candidate = existing + i64::from(quantity);

        if available < candidate {
            return Err(StoreError::InsufficientStock {
                product_id,
                requested: quantity,
                available: saturating_u32(available - existing),
            });
        }

        let row = sqlx::query(
            r#"
            INSERT INTO stock_reservations (product_id, cart_id, quantity, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (product_id, cart_id) DO UPDATE
            SET quantity = EXCLUDED.quantity, expires_at = EXCLUDED.expires_at
            RETURNING product_id, cart_id, quantity, expires_at
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(cart_id.as_uuid())
        .bind(candidate)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await?;

        let hold = row_to_reservation(row)?;
        tx.commit().await?;

        Ok(hold)
    }

    async fn shrink_reservation(
        &self,
        product_id: ProductId,
        cart_id: CartId,
        quantity: u32,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Reservation>> {
        if quantity == 0 {
            self.release(product_id, cart_id).await?;
            return Ok(None);
        }

        let row = sqlx::query(
            r#"
            UPDATE stock_reservations
            SET quantity = LEAST(quantity, $3), expires_at = $4
            WHERE product_id = $1 AND cart_id = $2
            RETURNING product_id, cart_id, quantity, expires_at
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(cart_id.as_uuid())
        .bind(i64::from(quantity))
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_reservation).transpose()
    }

    async fn get_reservation(
        &self,
        product_id: ProductId,
        cart_id: CartId,
    ) -> Result<Option<Reservation>> {
        let row = sqlx::query(
            r#"
            SELECT product_id, cart_id, quantity, expires_at
            FROM stock_reservations
            WHERE product_id = $1 AND cart_id = $2
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(cart_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_reservation).transpose()
    }

    async fn reservations_for_cart(&self, cart_id: CartId) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, cart_id, quantity, expires_at
            FROM stock_reservations
            WHERE cart_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(cart_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_reservation).collect()
    }

    async fn release(&self, product_id: ProductId, cart_id: CartId) -> Result<()> {
        sqlx::query("DELETE FROM stock_reservations WHERE product_id = $1 AND cart_id = $2")
            .bind(product_id.as_uuid())
            .bind(cart_id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM stock_reservations WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
