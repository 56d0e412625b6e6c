use serde::{Deserialize, Serialize};
use tracing::debug;

use unitcart_catalog::{CustomerClass, Product, ProductCatalog, StockLevels};
use unitcart_core::{CustomerId, Money, ProductId};

use crate::error::CartError;
use crate::pricing::{CartTotals, DeliveryOption, PricedLine};

/// A product selection. Holds no serials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub price_class: CustomerClass,
}

/// Single-owner cart. Lines keep the order in which products were first added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    customer_id: CustomerId,
    class: CustomerClass,
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn new(customer_id: CustomerId, class: CustomerClass) -> Self {
        Self {
            customer_id,
            class,
            lines: Vec::new(),
        }
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn class(&self) -> CustomerClass {
        self.class
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn line(&self, product_id: ProductId) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.product_id == product_id)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn unit_count(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Add `quantity` units of a product, merging into an existing line.
    ///
    /// The resulting line quantity is checked against the wholesale minimum and
    /// the live available-unit count. Nothing is reserved.
    pub fn add_item<C, S>(
        &mut self,
        catalog: &C,
        stock: &S,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<&CartLine, CartError>
    where
        C: ProductCatalog + ?Sized,
        S: StockLevels + ?Sized,
    {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity);
        }
        let product = catalog.product(product_id)?;
        let current = self.line(product_id).map_or(0, |l| l.quantity);
        let wanted = current.saturating_add(quantity);
        self.validate_quantity(&product, stock, wanted)?;

        debug!(
            customer_id = %self.customer_id,
            product_id = %product_id,
            quantity = wanted,
            "cart line set"
        );
        Ok(self.set_line(product_id, wanted))
    }

    /// Add one unit to an existing line.
    pub fn increment_item<C, S>(
        &mut self,
        catalog: &C,
        stock: &S,
        product_id: ProductId,
    ) -> Result<&CartLine, CartError>
    where
        C: ProductCatalog + ?Sized,
        S: StockLevels + ?Sized,
    {
        let current = self
            .line(product_id)
            .map(|l| l.quantity)
            .ok_or(CartError::LineNotFound(product_id))?;
        let product = catalog.product(product_id)?;
        let wanted = current.saturating_add(1);
        self.validate_quantity(&product, stock, wanted)?;
        Ok(self.set_line(product_id, wanted))
    }

    /// Take one unit off a line. Returns `None` when the line was removed.
    ///
    /// A wholesale line cannot be decremented below the product minimum; use
    /// [`Cart::remove_item`] to drop it.
    pub fn decrement_item<C>(
        &mut self,
        catalog: &C,
        product_id: ProductId,
    ) -> Result<Option<&CartLine>, CartError>
    where
        C: ProductCatalog + ?Sized,
    {
        let current = self
            .line(product_id)
            .map(|l| l.quantity)
            .ok_or(CartError::LineNotFound(product_id))?;

        if current <= 1 {
            self.remove_item(product_id)?;
            return Ok(None);
        }

        let wanted = current - 1;
        let minimum = catalog.product(product_id)?.minimum_quantity(self.class);
        if wanted < minimum {
            return Err(CartError::BelowMinimumOrder {
                product_id,
                requested: wanted,
                minimum,
            });
        }
        Ok(Some(self.set_line(product_id, wanted)))
    }

    pub fn remove_item(&mut self, product_id: ProductId) -> Result<CartLine, CartError> {
        let position = self
            .lines
            .iter()
            .position(|l| l.product_id == product_id)
            .ok_or(CartError::LineNotFound(product_id))?;
        debug!(customer_id = %self.customer_id, product_id = %product_id, "cart line removed");
        Ok(self.lines.remove(position))
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Σ(line quantity × price for this customer class).
    pub fn subtotal<C>(&self, catalog: &C) -> Result<Money, CartError>
    where
        C: ProductCatalog + ?Sized,
    {
        self.lines.iter().try_fold(Money::ZERO, |subtotal, line| -> Result<Money, CartError> {
            let product = catalog.product(line.product_id)?;
            product
                .quote(line.price_class)
                .unit_price
                .times(line.quantity)
                .and_then(|amount| subtotal.checked_add(amount))
                .ok_or(CartError::AmountOverflow(Some(line.product_id)))
        })
    }

    pub fn priced_lines<C>(
        &self,
        catalog: &C,
        delivery: DeliveryOption,
    ) -> Result<Vec<PricedLine>, CartError>
    where
        C: ProductCatalog + ?Sized,
    {
        self.lines
            .iter()
            .map(|line| -> Result<PricedLine, CartError> {
                let product = catalog.product(line.product_id)?;
                PricedLine::price(&product, line.price_class, line.quantity, delivery)
            })
            .collect()
    }

    pub fn totals<C>(&self, catalog: &C, delivery: DeliveryOption) -> Result<CartTotals, CartError>
    where
        C: ProductCatalog + ?Sized,
    {
        CartTotals::from_lines(&self.priced_lines(catalog, delivery)?)
    }

    fn validate_quantity<S>(&self, product: &Product, stock: &S, wanted: u32) -> Result<(), CartError>
    where
        S: StockLevels + ?Sized,
    {
        let minimum = product.minimum_quantity(self.class);
        if wanted < minimum {
            return Err(CartError::BelowMinimumOrder {
                product_id: product.id,
                requested: wanted,
                minimum,
            });
        }
        let available = stock.available_units(product.id)?;
        if wanted > available {
            return Err(CartError::ExceedsAvailableStock {
                product_id: product.id,
                requested: wanted,
                available,
            });
        }
        Ok(())
    }

    fn set_line(&mut self, product_id: ProductId, quantity: u32) -> &CartLine {
        let class = self.class;
        let position = match self.lines.iter().position(|l| l.product_id == product_id) {
            Some(i) => {
                self.lines[i].quantity = quantity;
                i
            }
            None => {
                self.lines.push(CartLine {
                    product_id,
                    quantity,
                    price_class: class,
                });
                self.lines.len() - 1
            }
        };
        &self.lines[position]
    }
}
