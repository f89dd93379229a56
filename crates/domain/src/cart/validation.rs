//! Re-checking cart lines against available stock.

use commerce_store::{Cart, InventoryLedger, StoreError};

use crate::error::StockProblem;

/// Outcome of [`CartService::validate_cart`](super::CartService::validate_cart).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartValidation {
    pub problems: Vec<StockProblem>,
}

impl CartValidation {
    pub fn is_valid(&self) -> bool {
        self.problems.is_empty()
    }

    /// Human-readable description of each failing line.
    pub fn messages(&self) -> Vec<String> {
        self.problems.iter().map(ToString::to_string).collect()
    }
}

/// Checks every line against stock left once other carts' holds are
/// subtracted. The cart's own holds are not counted against itself.
pub(crate) async fn check_lines<L>(ledger: &L, cart: &Cart) -> Result<Vec<StockProblem>, StoreError>
where
    L: InventoryLedger + ?Sized,
{
    let mut problems = Vec::new();

    for line in &cart.lines {
        let available = ledger
            .available_stock_excluding_cart(line.product_id, cart.id)
            .await?;

        if available < i64::from(line.quantity) {
            problems.push(StockProblem {
                product_id: line.product_id,
                requested: line.quantity,
                available: u32::try_from(available.max(0)).unwrap_or(u32::MAX),
            });
        }
    }

    Ok(problems)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, Utc};
    use commerce_store::{CartStore, InMemoryStore, Product, ReservationStore};
    use common::{CartId, Money, UserId};

    use super::*;

    #[tokio::test]
    async fn own_holds_do_not_invalidate_the_cart() {
        let store = InMemoryStore::new();
        let product = Product::new("Lamp", Money::from_cents(2500), 3);
        let product_id = product.id;
        store.register_product(product).await.unwrap();

        let cart = store.ensure_cart(UserId::new()).await.unwrap();
        store.add_line(cart.id, product_id, 3).await.unwrap();
        store
            .reserve(product_id, cart.id, 3, Utc::now() + TimeDelta::minutes(10))
            .await
            .unwrap();

        let cart = store.get_cart(cart.id).await.unwrap().unwrap();
        assert!(check_lines(&store, &cart).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn other_carts_holds_are_reported() {
        let store = InMemoryStore::new();
        let product = Product::new("Lamp", Money::from_cents(2500), 3);
        let product_id = product.id;
        store.register_product(product).await.unwrap();

        let cart = store.ensure_cart(UserId::new()).await.unwrap();
        store.add_line(cart.id, product_id, 2).await.unwrap();
        store
            .reserve(product_id, CartId::new(), 2, Utc::now() + TimeDelta::minutes(10))
            .await
            .unwrap();

        let cart = store.get_cart(cart.id).await.unwrap().unwrap();
        let validation = CartValidation {
            problems: check_lines(&store, &cart).await.unwrap(),
        };

        assert!(!validation.is_valid());
        assert_eq!(
            validation.problems,
            vec![StockProblem {
                product_id,
                requested: 2,
                available: 1,
            }]
        );
        assert_eq!(validation.messages().len(), 1);
    }
}
