use serde::{Deserialize, Serialize};

use unitcart_core::{Money, ProductId};

use crate::error::CatalogError;

/// Which price list a customer buys from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerClass {
    Retail,
    Wholesale,
}

impl CustomerClass {
    pub fn is_wholesale(self) -> bool {
        matches!(self, CustomerClass::Wholesale)
    }
}

/// Price a given customer class sees for one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub class: CustomerClass,
    /// Price actually charged per unit.
    pub unit_price: Money,
    /// Crossed-out list price shown to retail customers; never charged.
    pub list_price: Option<Money>,
}

/// Catalog entry. Immutable for the duration of a checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Retail selling price per unit.
    pub selling_price: Money,
    /// Retail list price (MRP), display only.
    pub list_price: Option<Money>,
    pub wholesale_price: Money,
    /// Minimum order quantity, applied to wholesale customers only.
    pub min_order_qty: u32,
    /// Shipping charge per unit shipped.
    pub shipping_charge: Money,
    /// GST rate as a whole percentage.
    pub tax_percent: u32,
}

impl Product {
    /// A product sold at the same price to both classes, no minimum, no shipping
    /// or tax. Use the `with_*` builders to fill in the rest.
    pub fn new(id: ProductId, name: impl Into<String>, selling_price: Money) -> Self {
        Self {
            id,
            name: name.into(),
            selling_price,
            list_price: None,
            wholesale_price: selling_price,
            min_order_qty: 1,
            shipping_charge: Money::ZERO,
            tax_percent: 0,
        }
    }

    pub fn with_list_price(mut self, list_price: Money) -> Self {
        self.list_price = Some(list_price);
        self
    }

    pub fn with_wholesale(mut self, wholesale_price: Money, min_order_qty: u32) -> Self {
        self.wholesale_price = wholesale_price;
        self.min_order_qty = min_order_qty;
        self
    }

    pub fn with_shipping_charge(mut self, shipping_charge: Money) -> Self {
        self.shipping_charge = shipping_charge;
        self
    }

    pub fn with_tax_percent(mut self, tax_percent: u32) -> Self {
        self.tax_percent = tax_percent;
        self
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.name.trim().is_empty() {
            return Err(CatalogError::InvalidProduct("name cannot be empty".into()));
        }
        if self.min_order_qty == 0 {
            return Err(CatalogError::InvalidProduct(
                "min_order_qty must be at least 1".into(),
            ));
        }
        if self.tax_percent > 100 {
            return Err(CatalogError::InvalidProduct(
                "tax_percent cannot exceed 100".into(),
            ));
        }
        Ok(())
    }

    /// Price selection: a pure function of (customer class, product).
    pub fn quote(&self, class: CustomerClass) -> PriceQuote {
        match class {
            CustomerClass::Wholesale => PriceQuote {
                class,
                unit_price: self.wholesale_price,
                list_price: None,
            },
            CustomerClass::Retail => PriceQuote {
                class,
                unit_price: self.selling_price,
                list_price: self.list_price.filter(|list| *list > self.selling_price),
            },
        }
    }

    /// Smallest quantity a non-empty line may hold for this class.
    pub fn minimum_quantity(&self, class: CustomerClass) -> u32 {
        match class {
            CustomerClass::Wholesale => self.min_order_qty.max(1),
            CustomerClass::Retail => 1,
        }
    }
}
