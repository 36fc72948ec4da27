//! The privileged admin peer.
//!
//! An [`AdminActor`] changes stock and prices while customer actors are mid
//! checkout. It remembers the first value it saw for every product it touched
//! and puts it back in [`AdminActor::restore`], which scenarios call on every
//! exit path.

use checkout_harness_core::client::AdminClient;
use checkout_harness_core::error::HarnessError;
use checkout_harness_core::types::{Money, ProductRef};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Admin peer with automatic restore
pub struct AdminActor {
    client: Arc<dyn AdminClient>,
    original_stock: BTreeMap<ProductRef, u32>,
    original_price: BTreeMap<ProductRef, Money>,
}

impl AdminActor {
    /// Wraps an admin session
    #[must_use]
    pub fn new(client: Arc<dyn AdminClient>) -> Self {
        Self {
            client,
            original_stock: BTreeMap::new(),
            original_price: BTreeMap::new(),
        }
    }

    /// Sets the stock, remembering the original value
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Client`] if the storefront refuses.
    pub async fn set_stock(&mut self, product: &ProductRef, quantity: u32) -> Result<(), HarnessError> {
        if !self.original_stock.contains_key(product) {
            let original = self.client.stock_of(product).await?;
            self.original_stock.insert(product.clone(), original);
        }
        self.client.set_stock(product, quantity).await?;
        tracing::info!(%product, quantity, "admin changed stock");
        Ok(())
    }

    /// Sets the unit price, remembering the original value
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Client`] if the storefront refuses.
    pub async fn set_price(&mut self, product: &ProductRef, price: Money) -> Result<(), HarnessError> {
        if !self.original_price.contains_key(product) {
            let original = self.client.price_of(product).await?;
            self.original_price.insert(product.clone(), original);
        }
        self.client.set_price(product, price).await?;
        tracing::info!(%product, %price, "admin changed price");
        Ok(())
    }

    /// Current stock
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Client`] if the read fails.
    pub async fn stock_of(&self, product: &ProductRef) -> Result<u32, HarnessError> {
        Ok(self.client.stock_of(product).await?)
    }

    /// Current unit price
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Client`] if the read fails.
    pub async fn price_of(&self, product: &ProductRef) -> Result<Money, HarnessError> {
        Ok(self.client.price_of(product).await?)
    }

    /// Whether changes are waiting to be restored
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.original_stock.is_empty() || !self.original_price.is_empty()
    }

    /// Puts back every original value. Attempts all, returns the first error.
    ///
    /// # Errors
    ///
    /// Returns the first failed write.
    pub async fn restore(&mut self) -> Result<(), HarnessError> {
        let mut first = None;

        for (product, quantity) in std::mem::take(&mut self.original_stock) {
            if let Err(error) = self.client.set_stock(&product, quantity).await {
                tracing::warn!(%product, %error, "failed to restore stock");
                first.get_or_insert(HarnessError::from(error));
            }
        }
        for (product, price) in std::mem::take(&mut self.original_price) {
            if let Err(error) = self.client.set_price(&product, price).await {
                tracing::warn!(%product, %error, "failed to restore price");
                first.get_or_insert(HarnessError::from(error));
            }
        }

        first.map_or(Ok(()), Err)
    }
}

impl Drop for AdminActor {
    fn drop(&mut self) {
        if self.has_changes() {
            tracing::warn!("admin actor dropped without restoring its changes");
        }
    }
}
