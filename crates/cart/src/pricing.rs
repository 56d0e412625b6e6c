use serde::{Deserialize, Serialize};

use unitcart_catalog::{CustomerClass, Product};
use unitcart_core::{Money, ProductId};

use crate::error::CartError;

/// How a placed order leaves the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOption {
    Ship,
    /// Wholesale only: units stay warehoused, nothing is shipped.
    HoldAtWarehouse,
}

impl DeliveryOption {
    pub fn ships(self) -> bool {
        matches!(self, DeliveryOption::Ship)
    }

    pub fn available_to(self, class: CustomerClass) -> bool {
        match self {
            DeliveryOption::Ship => true,
            DeliveryOption::HoldAtWarehouse => class.is_wholesale(),
        }
    }
}

/// One cart line priced against the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    /// Display-only list price for retail discount framing.
    pub list_price: Option<Money>,
    pub line_total: Money,
    pub shipping: Money,
    pub tax: Money,
}

impl PricedLine {
    pub fn price(
        product: &Product,
        class: CustomerClass,
        quantity: u32,
        delivery: DeliveryOption,
    ) -> Result<Self, CartError> {
        let overflow = || CartError::AmountOverflow(Some(product.id));
        let quote = product.quote(class);
        let line_total = quote.unit_price.times(quantity).ok_or_else(overflow)?;
        let shipping = if delivery.ships() {
            product.shipping_charge.times(quantity).ok_or_else(overflow)?
        } else {
            Money::ZERO
        };
        Ok(Self {
            product_id: product.id,
            name: product.name.clone(),
            quantity,
            unit_price: quote.unit_price,
            list_price: quote.list_price,
            line_total,
            shipping,
            tax: line_total.percent(product.tax_percent),
        })
    }
}

/// Derived order amounts. Never stored on the cart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartTotals {
    pub subtotal: Money,
    pub shipping: Money,
    pub tax: Money,
    pub total: Money,
}

impl CartTotals {
    pub fn from_lines(lines: &[PricedLine]) -> Result<Self, CartError> {
        let subtotal = checked_total(lines.iter().map(|l| l.line_total))?;
        let shipping = checked_total(lines.iter().map(|l| l.shipping))?;
        let tax = checked_total(lines.iter().map(|l| l.tax))?;
        let total = checked_total([subtotal, shipping, tax])?;
        Ok(Self {
            subtotal,
            shipping,
            tax,
            total,
        })
    }
}

fn checked_total(amounts: impl IntoIterator<Item = Money>) -> Result<Money, CartError> {
    Money::checked_sum(amounts).ok_or(CartError::AmountOverflow(None))
}
