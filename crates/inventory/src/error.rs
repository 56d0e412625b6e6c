use thiserror::Error;

use unitcart_core::{OrderId, ProductId};

use crate::pool::Serial;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error("insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("quantity must be at least 1 (product {product_id})")]
    InvalidQuantity { product_id: ProductId },

    #[error("no unit pool for product {0}")]
    UnknownProduct(ProductId),

    #[error("invalid serial: {0}")]
    InvalidSerial(String),

    #[error("serial {serial} already exists in pool {product_id}")]
    DuplicateSerial { product_id: ProductId, serial: Serial },

    #[error("serial {serial} does not belong to pool {product_id}")]
    UnknownSerial { product_id: ProductId, serial: Serial },

    #[error("serial {serial} in pool {product_id} is not reserved")]
    SerialNotReserved { product_id: ProductId, serial: Serial },

    #[error("order {0} already holds a reservation")]
    HoldExists(OrderId),

    #[error("order {0} holds no reservation")]
    UnknownHold(OrderId),

    #[error("inventory lock poisoned")]
    LockPoisoned,
}
