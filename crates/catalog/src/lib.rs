//! Read-only product catalog as seen by the checkout core.
//!
//! Catalog management lives outside this workspace; the core only reads prices,
//! order minimums, shipping/tax fields and live stock counts through the
//! [`ProductCatalog`] and [`StockLevels`] traits.

pub mod catalog;
pub mod error;
pub mod product;

pub use catalog::{InMemoryCatalog, ProductCatalog, StockLevels};
pub use error::CatalogError;
pub use product::{CustomerClass, PriceQuote, Product};
