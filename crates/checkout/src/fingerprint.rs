//! Cart snapshot fingerprints for submit idempotency.

use serde::Serialize;
use sha2::{Digest, Sha256};

use unitcart_cart::{Cart, CartLine, DeliveryOption};
use unitcart_catalog::CustomerClass;
use unitcart_core::CustomerId;
use unitcart_sales::{PaymentMethod, ShippingAddress};

use crate::error::CheckoutError;

#[derive(Serialize)]
struct CartSnapshot<'a> {
    customer_id: CustomerId,
    class: CustomerClass,
    lines: &'a [CartLine],
    delivery: DeliveryOption,
    address: Option<&'a ShippingAddress>,
    payment_method: &'a PaymentMethod,
}

/// SHA-256 (hex) of everything that decides what an order would contain.
///
/// Two submits with the same fingerprint would place identical orders.
pub fn cart_fingerprint(
    cart: &Cart,
    delivery: DeliveryOption,
    address: Option<&ShippingAddress>,
    payment_method: &PaymentMethod,
) -> Result<String, CheckoutError> {
    let snapshot = CartSnapshot {
        customer_id: cart.customer_id(),
        class: cart.class(),
        lines: cart.lines(),
        delivery,
        address,
        payment_method,
    };
    let canonical =
        serde_json::to_vec(&snapshot).map_err(|e| CheckoutError::Fingerprint(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}
