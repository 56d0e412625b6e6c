use thiserror::Error;

use unitcart_cart::{CartError, DeliveryOption};
use unitcart_catalog::{CatalogError, CustomerClass};
use unitcart_core::{OrderId, ProductId};
use unitcart_infra::OrderError;
use unitcart_inventory::InventoryError;

use crate::gateway::GatewayError;
use crate::session::CheckoutState;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error(transparent)]
    Cart(#[from] CartError),

    #[error("cart is empty")]
    EmptyCart,

    #[error("insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("shipping address is missing: {}", missing.join(", "))]
    MissingShippingAddress { missing: Vec<&'static str> },

    #[error("a delivery option must be chosen")]
    DeliveryOptionRequired,

    #[error("delivery option {delivery:?} is not offered to {class:?} customers")]
    DeliveryOptionUnavailable {
        delivery: DeliveryOption,
        class: CustomerClass,
    },

    #[error("warehouse-held orders take no shipping address")]
    AddressNotAccepted,

    #[error("payment method {method} is not allowed with delivery option {delivery:?}")]
    InvalidPaymentMethodForDeliveryOption {
        method: &'static str,
        delivery: DeliveryOption,
    },

    #[error("a payment method must be selected")]
    PaymentMethodRequired,

    #[error("payment verification failed for order {order_id}")]
    PaymentVerificationFailed { order_id: OrderId },

    #[error("payment cancelled for order {order_id}")]
    PaymentCancelled { order_id: OrderId },

    #[error("reservation for order {order_id} expired before payment")]
    ReservationExpired { order_id: OrderId },

    #[error("this cart is already being submitted")]
    SubmitInProgress,

    #[error("callback for gateway order {0} does not match this checkout")]
    GatewayOrderMismatch(String),

    #[error("cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: CheckoutState,
    },

    #[error("failed to fingerprint cart: {0}")]
    Fingerprint(String),

    #[error(transparent)]
    Inventory(InventoryError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Order(#[from] OrderError),
}

impl From<InventoryError> for CheckoutError {
    fn from(value: InventoryError) -> Self {
        match value {
            InventoryError::InsufficientStock {
                product_id,
                requested,
                available,
            } => CheckoutError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            other => CheckoutError::Inventory(other),
        }
    }
}

impl CheckoutError {
    /// Whether the customer can retry against the same, intact cart.
    pub fn is_retryable(&self) -> bool {
        match self {
            CheckoutError::Cart(
                CartError::BelowMinimumOrder { .. } | CartError::ExceedsAvailableStock { .. },
            )
            | CheckoutError::InsufficientStock { .. }
            | CheckoutError::MissingShippingAddress { .. }
            | CheckoutError::DeliveryOptionRequired
            | CheckoutError::DeliveryOptionUnavailable { .. }
            | CheckoutError::InvalidPaymentMethodForDeliveryOption { .. }
            | CheckoutError::PaymentMethodRequired
            | CheckoutError::PaymentVerificationFailed { .. }
            | CheckoutError::PaymentCancelled { .. }
            | CheckoutError::ReservationExpired { .. }
            | CheckoutError::SubmitInProgress => true,
            CheckoutError::Order(err) => err.is_concurrency(),
            _ => false,
        }
    }
}
