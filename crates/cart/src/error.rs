use thiserror::Error;

use unitcart_catalog::CatalogError;
use unitcart_core::ProductId;

/// Cart validation failures. The cart is left unchanged when any of these is
/// returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CartError {
    #[error("{product_id}: quantity {requested} is below the minimum order of {minimum}")]
    BelowMinimumOrder {
        product_id: ProductId,
        requested: u32,
        minimum: u32,
    },

    #[error("{product_id}: quantity {requested} exceeds available stock of {available}")]
    ExceedsAvailableStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("quantity must be at least 1")]
    InvalidQuantity,

    #[error("product {0} is not in the cart")]
    LineNotFound(ProductId),

    /// A line or cart amount does not fit in the money type.
    #[error("amount overflows the money type (product: {0:?})")]
    AmountOverflow(Option<ProductId>),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
