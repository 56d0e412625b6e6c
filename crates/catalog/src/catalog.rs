use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use unitcart_core::ProductId;

use crate::error::CatalogError;
use crate::product::Product;

/// Read-only product lookup.
pub trait ProductCatalog: Send + Sync {
    fn product(&self, id: ProductId) -> Result<Product, CatalogError>;
}

/// Live count of units that are neither sold nor reserved.
///
/// The count is advisory: it backs add-to-cart validation only. Units are
/// claimed by the reservation allocator at checkout.
pub trait StockLevels: Send + Sync {
    fn available_units(&self, id: ProductId) -> Result<u32, CatalogError>;
}

impl<T> ProductCatalog for Arc<T>
where
    T: ProductCatalog + ?Sized,
{
    fn product(&self, id: ProductId) -> Result<Product, CatalogError> {
        (**self).product(id)
    }
}

impl<T> ProductCatalog for &T
where
    T: ProductCatalog + ?Sized,
{
    fn product(&self, id: ProductId) -> Result<Product, CatalogError> {
        (**self).product(id)
    }
}

impl<T> StockLevels for Arc<T>
where
    T: StockLevels + ?Sized,
{
    fn available_units(&self, id: ProductId) -> Result<u32, CatalogError> {
        (**self).available_units(id)
    }
}

impl<T> StockLevels for &T
where
    T: StockLevels + ?Sized,
{
    fn available_units(&self, id: ProductId) -> Result<u32, CatalogError> {
        (**self).available_units(id)
    }
}

/// In-memory catalog for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<ProductId, Product>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a product after validating it.
    pub fn upsert(&self, product: Product) -> Result<(), CatalogError> {
        product.validate()?;
        let mut products = self
            .products
            .write()
            .map_err(|_| CatalogError::Unavailable("lock poisoned".to_string()))?;
        debug!(product_id = %product.id, name = %product.name, "catalog product upserted");
        products.insert(product.id, product);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.products.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProductCatalog for InMemoryCatalog {
    fn product(&self, id: ProductId) -> Result<Product, CatalogError> {
        let products = self
            .products
            .read()
            .map_err(|_| CatalogError::Unavailable("lock poisoned".to_string()))?;
        products
            .get(&id)
            .cloned()
            .ok_or(CatalogError::UnknownProduct(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unitcart_core::Money;

    #[test]
    fn upsert_then_lookup() {
        let catalog = InMemoryCatalog::new();
        let product = Product::new(ProductId::new(), "Cable", Money::from_major(99));
        catalog.upsert(product.clone()).unwrap();

        assert_eq!(catalog.product(product.id).unwrap(), product);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn unknown_product_is_reported_with_its_id() {
        let catalog = InMemoryCatalog::new();
        let id = ProductId::new();
        assert_eq!(catalog.product(id), Err(CatalogError::UnknownProduct(id)));
    }

    #[test]
    fn invalid_products_are_not_stored() {
        let catalog = InMemoryCatalog::new();
        let product = Product::new(ProductId::new(), "  ", Money::from_major(1));
        assert!(catalog.upsert(product).is_err());
        assert!(catalog.is_empty());
    }

    #[test]
    fn arc_catalog_delegates() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let product = Product::new(ProductId::new(), "Case", Money::from_major(10));
        catalog.upsert(product.clone()).unwrap();

        fn lookup(c: impl ProductCatalog, id: ProductId) -> Product {
            c.product(id).unwrap()
        }
        assert_eq!(lookup(catalog.clone(), product.id), product);
    }
}
