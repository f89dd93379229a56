use async_trait::async_trait;
use common::{CartId, CartLineId, ProductId, UserId};
use sqlx::{PgConnection, Row, postgres::PgRow};
use uuid::Uuid;

use super::{PostgresStore, row_to_cart_line};
use crate::{Cart, CartLine, Result, StoreError, store::CartStore};

impl PostgresStore {
    async fn lines_for_cart(&self, cart_id: CartId) -> Result<Vec<CartLine>> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, quantity, created_at
            FROM cart_lines
            WHERE cart_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(cart_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_cart_line).collect()
    }

    async fn row_to_cart(&self, row: PgRow) -> Result<Cart> {
        let id = CartId::from_uuid(row.try_get::<Uuid, _>("id")?);
        Ok(Cart {
            id,
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            lines: self.lines_for_cart(id).await?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

async fn touch_cart(conn: &mut PgConnection, cart_id: CartId) -> Result<()> {
    sqlx::query("UPDATE carts SET updated_at = NOW() WHERE id = $1")
        .bind(cart_id.as_uuid())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn map_line_error(err: sqlx::Error, cart_id: CartId, product_id: ProductId) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        match db_err.constraint() {
            Some("cart_lines_cart_id_fkey") => return StoreError::CartNotFound(cart_id),
            Some("cart_lines_product_id_fkey") => return StoreError::ProductNotFound(product_id),
            _ => {}
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl CartStore for PostgresStore {
    async fn ensure_cart(&self, user_id: UserId) -> Result<Cart> {
        sqlx::query(
            r#"
            INSERT INTO carts (id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(CartId::new().as_uuid())
        .bind(user_id.as_uuid())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT id, user_id, created_at, updated_at FROM carts WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;

        self.row_to_cart(row).await
    }

    async fn find_cart(&self, user_id: UserId) -> Result<Option<Cart>> {
        let row = sqlx::query("SELECT id, user_id, created_at, updated_at FROM carts WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.row_to_cart(row).await?)),
            None => Ok(None),
        }
    }

    async fn get_cart(&self, cart_id: CartId) -> Result<Option<Cart>> {
        let row = sqlx::query("SELECT id, user_id, created_at, updated_at FROM carts WHERE id = $1")
            .bind(cart_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.row_to_cart(row).await?)),
            None => Ok(None),
        }
    }

    async fn add_line(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartLine> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO cart_lines (id, cart_id, product_id, quantity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (cart_id, product_id) DO UPDATE
            SET quantity = cart_lines.quantity + EXCLUDED.quantity, updated_at = NOW()
            RETURNING id, product_id, quantity, created_at
            "#,
        )
        .bind(CartLineId::new().as_uuid())
        .bind(cart_id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(i64::from(quantity))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_line_error(e, cart_id, product_id))?;

        touch_cart(&mut tx, cart_id).await?;
        tx.commit().await?;

        row_to_cart_line(row)
    }

    async fn set_line_quantity(
        &self,
        cart_id: CartId,
        line_id: CartLineId,
        quantity: u32,
    ) -> Result<CartLine> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE cart_lines
            SET quantity = $3, updated_at = NOW()
            WHERE cart_id = $1 AND id = $2
            RETURNING id, product_id, quantity, created_at
            "#,
        )
        .bind(cart_id.as_uuid())
        .bind(line_id.as_uuid())
        .bind(i64::from(quantity))
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::LineNotFound(line_id))?;

        touch_cart(&mut tx, cart_id).await?;
        tx.commit().await?;

        row_to_cart_line(row)
    }

    async fn remove_line(&self, cart_id: CartId, line_id: CartLineId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM cart_lines WHERE cart_id = $1 AND id = $2")
            .bind(cart_id.as_uuid())
            .bind(line_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::LineNotFound(line_id));
        }

        touch_cart(&mut tx, cart_id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn clear_cart(&self, cart_id: CartId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM carts WHERE id = $1 FOR UPDATE")
            .bind(cart_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::CartNotFound(cart_id));
        }

        sqlx::query("DELETE FROM cart_lines WHERE cart_id = $1")
            .bind(cart_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM stock_reservations WHERE cart_id = $1")
            .bind(cart_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        touch_cart(&mut tx, cart_id).await?;
        tx.commit().await?;
        Ok(())
    }
}
