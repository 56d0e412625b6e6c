use thiserror::Error;

use unitcart_core::ProductId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown product {0}")]
    UnknownProduct(ProductId),

    #[error("invalid product: {0}")]
    InvalidProduct(String),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}
