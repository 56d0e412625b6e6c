//! Payment gateway boundary.
//!
//! The gateway issues an order reference for the amount to collect, the
//! customer pays in the gateway's own UI, and the gateway calls back with a
//! payment reference and a signature. The signature is only ever checked here,
//! server side.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, warn};

use unitcart_core::Money;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway orders need a positive amount")]
    InvalidAmount,

    #[error("invalid gateway key")]
    InvalidKey,

    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// Order created on the gateway side for one checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayOrder {
    pub reference: String,
    pub amount: Money,
    pub currency: String,
    pub receipt: String,
}

/// Payload the gateway posts back after the customer pays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCallback {
    pub gateway_order_ref: String,
    pub gateway_payment_ref: String,
    pub signature: String,
}

pub trait PaymentGateway: Send + Sync {
    fn create_order(
        &self,
        amount: Money,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, GatewayError>;

    /// `Ok(false)` means the proof did not verify; `Err` means it could not be
    /// checked at all.
    fn verify(&self, callback: &GatewayCallback) -> Result<bool, GatewayError>;
}

impl<T> PaymentGateway for Arc<T>
where
    T: PaymentGateway + ?Sized,
{
    fn create_order(
        &self,
        amount: Money,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, GatewayError> {
        (**self).create_order(amount, currency, receipt)
    }

    fn verify(&self, callback: &GatewayCallback) -> Result<bool, GatewayError> {
        (**self).verify(callback)
    }
}

/// Gateway client that signs and verifies with a shared HMAC-SHA256 secret.
///
/// Signatures cover `"{gateway_order_ref}|{gateway_payment_ref}"` and travel
/// hex encoded.
#[derive(Debug)]
pub struct HmacGateway {
    secret: Vec<u8>,
    next_order: AtomicU64,
}

impl HmacGateway {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            next_order: AtomicU64::new(1),
        }
    }

    /// Signature the gateway would attach to a genuine callback.
    pub fn sign(&self, gateway_order_ref: &str, gateway_payment_ref: &str) -> Result<String, GatewayError> {
        let mac = self.mac(gateway_order_ref, gateway_payment_ref)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// A correctly signed callback, for simulating the gateway.
    pub fn signed_callback(
        &self,
        gateway_order_ref: &str,
        gateway_payment_ref: &str,
    ) -> Result<GatewayCallback, GatewayError> {
        Ok(GatewayCallback {
            gateway_order_ref: gateway_order_ref.to_string(),
            gateway_payment_ref: gateway_payment_ref.to_string(),
            signature: self.sign(gateway_order_ref, gateway_payment_ref)?,
        })
    }

    fn mac(&self, gateway_order_ref: &str, gateway_payment_ref: &str) -> Result<HmacSha256, GatewayError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| GatewayError::InvalidKey)?;
        mac.update(gateway_order_ref.as_bytes());
        mac.update(b"|");
        mac.update(gateway_payment_ref.as_bytes());
        Ok(mac)
    }
}

impl PaymentGateway for HmacGateway {
    fn create_order(
        &self,
        amount: Money,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, GatewayError> {
        if amount.is_zero() {
            return Err(GatewayError::InvalidAmount);
        }
        let n = self.next_order.fetch_add(1, Ordering::Relaxed);
        let order = GatewayOrder {
            reference: format!("order_{n}"),
            amount,
            currency: currency.to_string(),
            receipt: receipt.to_string(),
        };
        debug!(reference = %order.reference, amount = %amount, currency, "gateway order created");
        Ok(order)
    }

    fn verify(&self, callback: &GatewayCallback) -> Result<bool, GatewayError> {
        let Ok(signature) = hex::decode(&callback.signature) else {
            warn!(gateway_order_ref = %callback.gateway_order_ref, "signature is not valid hex");
            return Ok(false);
        };
        let mac = self.mac(&callback.gateway_order_ref, &callback.gateway_payment_ref)?;
        // verify_slice compares in constant time.
        Ok(mac.verify_slice(&signature).is_ok())
    }
}
