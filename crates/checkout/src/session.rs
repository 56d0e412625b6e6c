//! Per-customer session state: the cart and the checkout state machine.
//!
//! ```text
//! CollectingAddress ⇄ CollectingPayment → Submitting → AwaitingGatewayResult
//!                                            │                 │
//!                                            └─ COD ─► Confirmed ◄┤
//!                                                      Failed ◄───┤
//!                                                      Cancelled ◄┘
//! Failed | Cancelled ── retry ──► CollectingPayment
//! ```
//!
//! Sessions are owned by the caller and passed by `&mut` into the orchestrator.
//! Nothing here is shared between customers.

use serde::{Deserialize, Serialize};
use tracing::debug;

use unitcart_cart::{Cart, DeliveryOption};
use unitcart_catalog::CustomerClass;
use unitcart_core::{CustomerId, OrderId};
use unitcart_sales::{PaymentMethod, ShippingAddress};

use crate::error::CheckoutError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutState {
    CollectingAddress,
    CollectingPayment,
    Submitting,
    AwaitingGatewayResult,
    Confirmed,
    Failed,
    Cancelled,
}

impl CheckoutState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CheckoutState::Confirmed | CheckoutState::Failed | CheckoutState::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    class: CustomerClass,
    state: CheckoutState,
    delivery: Option<DeliveryOption>,
    address: Option<ShippingAddress>,
    payment_method: Option<PaymentMethod>,
    order_id: Option<OrderId>,
    gateway_order_ref: Option<String>,
}

impl CheckoutSession {
    /// Retail customers always ship; wholesale customers must pick first.
    pub fn new(class: CustomerClass) -> Self {
        Self {
            class,
            state: CheckoutState::CollectingAddress,
            delivery: (!class.is_wholesale()).then_some(DeliveryOption::Ship),
            address: None,
            payment_method: None,
            order_id: None,
            gateway_order_ref: None,
        }
    }

    pub fn state(&self) -> CheckoutState {
        self.state
    }

    pub fn delivery(&self) -> Option<DeliveryOption> {
        self.delivery
    }

    pub fn address(&self) -> Option<&ShippingAddress> {
        self.address.as_ref()
    }

    pub fn payment_method(&self) -> Option<&PaymentMethod> {
        self.payment_method.as_ref()
    }

    /// Order produced by the current attempt, once submitted.
    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn gateway_order_ref(&self) -> Option<&str> {
        self.gateway_order_ref.as_deref()
    }

    /// Picking hold-at-warehouse clears the address and drops a COD choice.
    pub fn choose_delivery(&mut self, delivery: DeliveryOption) -> Result<(), CheckoutError> {
        self.expect_state(CheckoutState::CollectingAddress, "choose a delivery option")?;
        if !delivery.available_to(self.class) {
            return Err(CheckoutError::DeliveryOptionUnavailable {
                delivery,
                class: self.class,
            });
        }
        if !delivery.ships() {
            self.address = None;
            if self.payment_method.as_ref().is_some_and(PaymentMethod::is_cod) {
                self.payment_method = None;
            }
        }
        self.delivery = Some(delivery);
        Ok(())
    }

    pub fn set_address(&mut self, address: ShippingAddress) -> Result<(), CheckoutError> {
        self.expect_state(CheckoutState::CollectingAddress, "edit the address")?;
        if self.delivery == Some(DeliveryOption::HoldAtWarehouse) {
            return Err(CheckoutError::AddressNotAccepted);
        }
        self.address = Some(address);
        Ok(())
    }

    pub fn continue_to_payment(&mut self) -> Result<(), CheckoutError> {
        self.expect_state(CheckoutState::CollectingAddress, "continue to payment")?;
        self.validate_delivery()?;
        self.transition(CheckoutState::CollectingPayment);
        Ok(())
    }

    pub fn back_to_address(&mut self) -> Result<(), CheckoutError> {
        self.expect_state(CheckoutState::CollectingPayment, "go back to the address")?;
        self.transition(CheckoutState::CollectingAddress);
        Ok(())
    }

    pub fn select_payment(&mut self, method: PaymentMethod) -> Result<(), CheckoutError> {
        self.expect_state(CheckoutState::CollectingPayment, "select a payment method")?;
        if let Some(delivery) = self.delivery {
            ensure_method_allowed(&method, delivery)?;
        }
        self.payment_method = Some(method);
        Ok(())
    }

    /// Start a new attempt after a failed or cancelled payment. Address,
    /// delivery option and payment method are kept.
    pub fn retry(&mut self) -> Result<(), CheckoutError> {
        if !matches!(self.state, CheckoutState::Failed | CheckoutState::Cancelled) {
            return Err(CheckoutError::InvalidState {
                action: "retry",
                state: self.state,
            });
        }
        self.order_id = None;
        self.gateway_order_ref = None;
        self.transition(CheckoutState::CollectingPayment);
        Ok(())
    }

    /// Everything a submit needs, re-validated.
    pub(crate) fn submission(&self) -> Result<(DeliveryOption, Option<ShippingAddress>, PaymentMethod), CheckoutError> {
        let delivery = self.validate_delivery()?;
        let method = self
            .payment_method
            .clone()
            .ok_or(CheckoutError::PaymentMethodRequired)?;
        ensure_method_allowed(&method, delivery)?;
        let address = if delivery.ships() { self.address.clone() } else { None };
        Ok((delivery, address, method))
    }

    pub(crate) fn mark_submitting(&mut self) {
        self.transition(CheckoutState::Submitting);
    }

    /// A submit that produced no order returns the customer to payment selection.
    pub(crate) fn abort_submit(&mut self) {
        self.order_id = None;
        self.gateway_order_ref = None;
        self.transition(CheckoutState::CollectingPayment);
    }

    pub(crate) fn mark_awaiting(&mut self, order_id: OrderId, gateway_order_ref: String) {
        self.order_id = Some(order_id);
        self.gateway_order_ref = Some(gateway_order_ref);
        self.transition(CheckoutState::AwaitingGatewayResult);
    }

    pub(crate) fn mark_confirmed(&mut self, order_id: OrderId) {
        self.order_id = Some(order_id);
        self.transition(CheckoutState::Confirmed);
    }

    pub(crate) fn mark_failed(&mut self) {
        self.transition(CheckoutState::Failed);
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.transition(CheckoutState::Cancelled);
    }

    pub(crate) fn expect_state(&self, expected: CheckoutState, action: &'static str) -> Result<(), CheckoutError> {
        if self.state != expected {
            return Err(CheckoutError::InvalidState {
                action,
                state: self.state,
            });
        }
        Ok(())
    }

    fn validate_delivery(&self) -> Result<DeliveryOption, CheckoutError> {
        let delivery = self.delivery.ok_or(CheckoutError::DeliveryOptionRequired)?;
        if delivery.ships() {
            let missing = match &self.address {
                Some(address) => address.missing_fields(),
                None => ShippingAddress::default().missing_fields(),
            };
            if !missing.is_empty() {
                return Err(CheckoutError::MissingShippingAddress { missing });
            }
        }
        Ok(delivery)
    }

    fn transition(&mut self, next: CheckoutState) {
        debug!(from = ?self.state, to = ?next, "checkout state changed");
        self.state = next;
    }
}

fn ensure_method_allowed(method: &PaymentMethod, delivery: DeliveryOption) -> Result<(), CheckoutError> {
    // Nothing is delivered to a warehouse-held order, so there is no one to
    // collect cash from.
    if method.is_cod() && !delivery.ships() {
        return Err(CheckoutError::InvalidPaymentMethodForDeliveryOption {
            method: method.label(),
            delivery,
        });
    }
    Ok(())
}

/// One customer's working state.
#[derive(Debug, Clone)]
pub struct CustomerSession {
    customer_id: CustomerId,
    cart: Cart,
    checkout: CheckoutSession,
}

impl CustomerSession {
    pub fn new(customer_id: CustomerId, class: CustomerClass) -> Self {
        Self {
            customer_id,
            cart: Cart::new(customer_id, class),
            checkout: CheckoutSession::new(class),
        }
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn class(&self) -> CustomerClass {
        self.cart.class()
    }

    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    pub fn cart_mut(&mut self) -> &mut Cart {
        &mut self.cart
    }

    pub fn checkout(&self) -> &CheckoutSession {
        &self.checkout
    }

    pub fn checkout_mut(&mut self) -> &mut CheckoutSession {
        &mut self.checkout
    }

    /// Start over after a confirmed order.
    pub fn restart_checkout(&mut self) {
        self.checkout = CheckoutSession::new(self.cart.class());
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut Cart, &mut CheckoutSession) {
        (&mut self.cart, &mut self.checkout)
    }
}
