//! Cart operations gated by stock reservations.

use chrono::{DateTime, Utc};
use commerce_store::{Cart, CommerceStore, StoreError};
use common::{CartId, CartLineId, ProductId, UserId};

use super::validation::{CartValidation, check_lines};
use crate::config::CheckoutConfig;
use crate::error::DomainError;

/// Service for managing carts.
///
/// Every line mutation adjusts the cart's stock hold first and only touches
/// the line once the hold has been granted. If the line write then fails,
/// the hold is put back to what it was.
pub struct CartService<S: CommerceStore> {
    store: S,
    config: CheckoutConfig,
}

impl<S: CommerceStore> CartService<S> {
    pub fn new(store: S, config: CheckoutConfig) -> Self {
        Self { store, config }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the user's cart, creating an empty one on first use.
    #[tracing::instrument(skip(self))]
    pub async fn ensure_cart(&self, user_id: UserId) -> Result<Cart, DomainError> {
        Ok(self.store.ensure_cart(user_id).await?)
    }

    /// Loads the user's cart without creating one.
    #[tracing::instrument(skip(self))]
    pub async fn get_cart(&self, user_id: UserId) -> Result<Option<Cart>, DomainError> {
        Ok(self.store.find_cart(user_id).await?)
    }

    /// Adds `quantity` of a product, merging into an existing line.
    #[tracing::instrument(skip(self))]
    pub async fn add_to_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart, DomainError> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity);
        }

        let cart = self.store.ensure_cart(user_id).await?;
        let in_cart = cart
            .line_for_product(product_id)
            .map_or(0, |line| line.quantity);
        let held = self.live_hold(product_id, cart.id).await?;

        // A hold that lapsed while the line sat in the cart is re-established
        // in full, so the hold always covers the whole line.
        let target = in_cart.saturating_add(quantity);
        self.grow_hold(product_id, cart.id, target.saturating_sub(held))
            .await?;

        if let Err(e) = self.store.add_line(cart.id, product_id, quantity).await {
            self.restore_hold(product_id, cart.id, held).await;
            return Err(e.into());
        }

        tracing::info!(%product_id, quantity, "added to cart");
        self.load_cart(cart.id).await
    }

    /// Sets a line's quantity. Zero removes the line.
    #[tracing::instrument(skip(self))]
    pub async fn update_cart_line(
        &self,
        user_id: UserId,
        line_id: CartLineId,
        quantity: u32,
    ) -> Result<Cart, DomainError> {
        if quantity == 0 {
            return self.remove_cart_line(user_id, line_id).await;
        }

        let cart = self.cart_with_line(user_id, line_id).await?;
        let product_id = cart
            .line(line_id)
            .map(|line| line.product_id)
            .ok_or(DomainError::LineNotFound(line_id))?;
        let held = self.live_hold(product_id, cart.id).await?;

        if quantity > held {
            self.grow_hold(product_id, cart.id, quantity - held).await?;
        } else {
            self.store
                .shrink_reservation(product_id, cart.id, quantity, self.expiry())
                .await?;
        }

        if let Err(e) = self
            .store
            .set_line_quantity(cart.id, line_id, quantity)
            .await
        {
            self.restore_hold(product_id, cart.id, held).await;
            return Err(e.into());
        }

        tracing::info!(%product_id, quantity, "cart line updated");
        self.load_cart(cart.id).await
    }

    /// Removes a line and releases its hold.
    #[tracing::instrument(skip(self))]
    pub async fn remove_cart_line(
        &self,
        user_id: UserId,
        line_id: CartLineId,
    ) -> Result<Cart, DomainError> {
        let cart = self.cart_with_line(user_id, line_id).await?;
        let product_id = cart
            .line(line_id)
            .map(|line| line.product_id)
            .ok_or(DomainError::LineNotFound(line_id))?;
        let held = self.live_hold(product_id, cart.id).await?;

        self.store.release(product_id, cart.id).await?;

        if let Err(e) = self.store.remove_line(cart.id, line_id).await {
            self.restore_hold(product_id, cart.id, held).await;
            return Err(e.into());
        }

        tracing::info!(%product_id, "removed from cart");
        self.load_cart(cart.id).await
    }

    /// Empties the cart and drops all of its holds.
    #[tracing::instrument(skip(self))]
    pub async fn clear_cart(&self, user_id: UserId) -> Result<(), DomainError> {
        if let Some(cart) = self.store.find_cart(user_id).await? {
            self.store.clear_cart(cart.id).await?;
            tracing::info!(cart_id = %cart.id, "cart cleared");
        }
        Ok(())
    }

    /// Re-checks every line against what other carts leave available.
    ///
    /// An unknown cart has no lines and is therefore valid.
    #[tracing::instrument(skip(self))]
    pub async fn validate_cart(&self, cart_id: CartId) -> Result<CartValidation, DomainError> {
        let Some(cart) = self.store.get_cart(cart_id).await? else {
            return Ok(CartValidation::default());
        };

        Ok(CartValidation {
            problems: check_lines(&self.store, &cart).await?,
        })
    }

    fn expiry(&self) -> DateTime<Utc> {
        Utc::now() + self.config.reservation_ttl_delta()
    }

    async fn live_hold(&self, product_id: ProductId, cart_id: CartId) -> Result<u32, StoreError> {
        let now = Utc::now();
        Ok(self
            .store
            .get_reservation(product_id, cart_id)
            .await?
            .filter(|hold| hold.is_live(now))
            .map_or(0, |hold| hold.quantity))
    }

    async fn grow_hold(
        &self,
        product_id: ProductId,
        cart_id: CartId,
        additional: u32,
    ) -> Result<(), DomainError> {
        if additional == 0 {
            return Ok(());
        }

        match self
            .store
            .reserve(product_id, cart_id, additional, self.expiry())
            .await
        {
            Ok(hold) => {
                metrics::counter!("reservations_granted_total").increment(1);
                tracing::debug!(%product_id, held = hold.quantity, "reservation granted");
                Ok(())
            }
            Err(e) => {
                metrics::counter!("reservations_rejected_total").increment(1);
                tracing::warn!(%product_id, additional, error = %e, "reservation rejected");
                Err(e.into())
            }
        }
    }

    /// Puts a hold back to `held` after a failed line write. Best effort.
    async fn restore_hold(&self, product_id: ProductId, cart_id: CartId, held: u32) {
        let current = match self.live_hold(product_id, cart_id).await {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!(%product_id, error = %e, "could not read hold for compensation");
                return;
            }
        };

        let result = if held == 0 {
            self.store.release(product_id, cart_id).await
        } else if current > held {
            self.store
                .shrink_reservation(product_id, cart_id, held, self.expiry())
                .await
                .map(|_| ())
        } else if current < held {
            self.store
                .reserve(product_id, cart_id, held - current, self.expiry())
                .await
                .map(|_| ())
        } else {
            Ok(())
        };

        if let Err(e) = result {
            tracing::warn!(%product_id, held, error = %e, "hold compensation failed");
        }
    }

    async fn cart_with_line(&self, user_id: UserId, line_id: CartLineId) -> Result<Cart, DomainError> {
        self.store
            .find_cart(user_id)
            .await?
            .filter(|cart| cart.line(line_id).is_some())
            .ok_or(DomainError::LineNotFound(line_id))
    }

    async fn load_cart(&self, cart_id: CartId) -> Result<Cart, DomainError> {
        self.store
            .get_cart(cart_id)
            .await?
            .ok_or(DomainError::Internal(StoreError::CartNotFound(cart_id)))
    }
}
