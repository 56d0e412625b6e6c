//! Checkout orchestration: cart → reserved units → durable order → gateway.
//!
//! Units are reserved per product and marked unavailable before the customer
//! is handed to the gateway, so no pool lock is held while waiting for the
//! payment result. Every order that owns units also owns a hold; the hold is
//! committed on payment, released on failure or cancellation, and released by
//! the expiry sweep when nothing terminal happens in time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use unitcart_cart::{Cart, CartTotals, DeliveryOption, PricedLine};
use unitcart_catalog::ProductCatalog;
use unitcart_core::{Money, OrderId, ProductId};
use unitcart_events::{EventBus, EventEnvelope};
use unitcart_infra::{Claim, EventStore, OrderRepository, StorefrontConfig};
use unitcart_inventory::{Hold, HoldLine, InventoryError, ReservationAllocator, Serial};
use unitcart_sales::{
    AcceptCashOnDelivery, AttachGatewayOrder, FailPayment, Order, OrderCommand, OrderItem,
    OrderStatus, PaymentMethod, PlaceOrder, ShippingAddress,
};

use crate::error::CheckoutError;
use crate::fingerprint::cart_fingerprint;
use crate::gateway::PaymentGateway;
use crate::session::{CheckoutSession, CheckoutState, CustomerSession};

/// What the caller shows the customer after a successful submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Cash on delivery: the order is accepted and the cart is cleared.
    Confirmed(Order),
    /// Open the gateway's payment UI with this handoff.
    AwaitingPayment(PaymentHandoff),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentHandoff {
    pub order_id: OrderId,
    pub gateway_order_ref: String,
    pub amount: Money,
    pub currency: String,
}

/// Inputs of one submit that owns its cart fingerprint.
struct Attempt {
    order_id: OrderId,
    fingerprint: String,
    delivery: DeliveryOption,
    address: Option<ShippingAddress>,
    method: PaymentMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settlement {
    Commit,
    Release,
}

pub struct CheckoutOrchestrator<C, S, B, G> {
    pub(crate) catalog: C,
    pub(crate) allocator: Arc<ReservationAllocator>,
    pub(crate) orders: OrderRepository<S, B>,
    pub(crate) gateway: G,
    pub(crate) config: StorefrontConfig,
}

impl<C, S, B, G> CheckoutOrchestrator<C, S, B, G>
where
    C: ProductCatalog,
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    G: PaymentGateway,
{
    pub fn new(
        catalog: C,
        allocator: Arc<ReservationAllocator>,
        orders: OrderRepository<S, B>,
        gateway: G,
        config: StorefrontConfig,
    ) -> Self {
        Self {
            catalog,
            allocator,
            orders,
            gateway,
            config,
        }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn allocator(&self) -> &Arc<ReservationAllocator> {
        &self.allocator
    }

    pub fn orders(&self) -> &OrderRepository<S, B> {
        &self.orders
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn config(&self) -> &StorefrontConfig {
        &self.config
    }

    /// Turn the session's cart into an order.
    ///
    /// Resubmitting an unchanged cart while its order is still unpaid resumes
    /// that order. A resubmit that races the first one before it has handed off
    /// gets `SubmitInProgress` and reserves nothing. When any product cannot be
    /// reserved, everything reserved by this attempt is released before
    /// `InsufficientStock` is returned.
    pub fn submit(&self, session: &mut CustomerSession) -> Result<SubmitOutcome, CheckoutError> {
        let (cart, checkout) = session.parts_mut();
        let state = checkout.state();
        if !matches!(
            state,
            CheckoutState::CollectingPayment | CheckoutState::AwaitingGatewayResult
        ) {
            return Err(CheckoutError::InvalidState {
                action: "submit",
                state,
            });
        }
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let (delivery, address, method) = checkout.submission()?;
        let fingerprint = cart_fingerprint(cart, delivery, address.as_ref(), &method)?;

        match self.orders.claim(&fingerprint)? {
            Claim::InFlight(order) => {
                info!(order_id = %order.id_typed(), "resuming in-flight order for unchanged cart");
                checkout.mark_submitting();
                return self.finish_submit(cart, checkout, order);
            }
            Claim::Busy => {
                debug!("same cart is already being submitted");
                return Err(CheckoutError::SubmitInProgress);
            }
            Claim::Granted => {}
        }

        let order_id = OrderId::new();
        let outcome = if state == CheckoutState::AwaitingGatewayResult {
            // The cart changed under a pending payment; the customer has to
            // cancel that payment first.
            Err(CheckoutError::InvalidState {
                action: "submit a changed cart",
                state,
            })
        } else {
            self.place_claimed(
                cart,
                checkout,
                Attempt {
                    order_id,
                    fingerprint: fingerprint.clone(),
                    delivery,
                    address,
                    method,
                },
            )
        };

        if let Err(err) = self.orders.release_claim(&fingerprint, order_id) {
            error!(order_id = %order_id, error = %err, "could not release cart fingerprint claim");
        }
        outcome
    }

    /// Reserve, place and hand off while holding the cart's fingerprint claim.
    fn place_claimed(
        &self,
        cart: &mut Cart,
        checkout: &mut CheckoutSession,
        attempt: Attempt,
    ) -> Result<SubmitOutcome, CheckoutError> {
        let Attempt {
            order_id,
            fingerprint,
            delivery,
            address,
            method,
        } = attempt;

        let lines = cart.priced_lines(&self.catalog, delivery)?;
        let totals = CartTotals::from_lines(&lines)?;

        checkout.mark_submitting();
        let reserved = match self.reserve_all(&lines) {
            Ok(reserved) => reserved,
            Err(err) => {
                checkout.abort_submit();
                return Err(err);
            }
        };

        let now = Utc::now();
        let items = lines
            .iter()
            .zip(&reserved)
            .map(|(line, (_, serials))| OrderItem {
                product_id: line.product_id,
                name: line.name.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price,
                serials: serials.clone(),
            })
            .collect();

        let placed = self.orders.place(PlaceOrder {
            order_id,
            customer_id: cart.customer_id(),
            items,
            totals,
            payment_method: method,
            delivery,
            shipping_address: address,
            cart_fingerprint: fingerprint,
            occurred_at: now,
        });
        let order = match placed {
            Ok(order) => order,
            Err(err) => {
                self.release_reserved(&reserved);
                checkout.abort_submit();
                return Err(err.into());
            }
        };

        let hold = Hold {
            order_id,
            lines: reserved
                .into_iter()
                .map(|(product_id, serials)| HoldLine {
                    product_id,
                    serials,
                })
                .collect(),
            placed_at: now,
            expires_at: now
                .checked_add_signed(self.config.reservation_ttl())
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        let expires_at = hold.expires_at;
        if let Err(err) = self.allocator.place_hold(hold.clone()) {
            error!(order_id = %order_id, error = %err, "could not track reservation; failing order");
            let lines: Vec<_> = hold.lines.into_iter().map(|l| (l.product_id, l.serials)).collect();
            self.release_reserved(&lines);
            if let Err(fail_err) = self.orders.execute(OrderCommand::FailPayment(FailPayment {
                order_id,
                reason: "reservation could not be tracked".to_string(),
                cancelled: false,
                occurred_at: Utc::now(),
            })) {
                error!(order_id = %order_id, error = %fail_err, "could not fail untracked order");
            }
            checkout.abort_submit();
            return Err(err.into());
        }
        debug!(order_id = %order_id, expires_at = %expires_at, "reservation held");

        self.finish_submit(cart, checkout, order)
    }

    /// Resolve the payment leg of a placed order.
    fn finish_submit(
        &self,
        cart: &mut Cart,
        checkout: &mut CheckoutSession,
        order: Order,
    ) -> Result<SubmitOutcome, CheckoutError> {
        let outcome = self.hand_off(cart, checkout, order);
        if outcome.is_err() && checkout.state() == CheckoutState::Submitting {
            // The order stays in flight; resubmitting the same cart resumes it.
            checkout.abort_submit();
        }
        outcome
    }

    fn hand_off(
        &self,
        cart: &mut Cart,
        checkout: &mut CheckoutSession,
        order: Order,
    ) -> Result<SubmitOutcome, CheckoutError> {
        let order_id = order.id_typed();
        let Some(payment) = order.payment() else {
            return Err(CheckoutError::InvalidState {
                action: "hand off an order without payment",
                state: checkout.state(),
            });
        };

        if payment.method.is_cod() {
            // Trusted at placement; payment completes on delivery.
            let order = self
                .orders
                .execute(OrderCommand::AcceptCashOnDelivery(AcceptCashOnDelivery {
                    order_id,
                    occurred_at: Utc::now(),
                }))?;
            // The order is accepted from here on. A hold that fails to commit
            // now is committed by the expiry sweep.
            if let Err(err) = self.settle(order_id, Settlement::Commit) {
                warn!(order_id = %order_id, error = %err, "hold commit deferred to expiry sweep");
            }
            cart.clear();
            checkout.mark_confirmed(order_id);
            info!(order_id = %order_id, total = %order.totals().total, "cash-on-delivery order confirmed");
            return Ok(SubmitOutcome::Confirmed(order));
        }

        let total = order.totals().total;
        let gateway_order_ref = match payment.gateway_order_ref.clone() {
            Some(existing) => existing,
            None => {
                let gateway_order = match self.gateway.create_order(
                    total,
                    &self.config.currency,
                    &order_id.to_string(),
                ) {
                    Ok(gateway_order) => gateway_order,
                    Err(err) => {
                        warn!(order_id = %order_id, error = %err, "gateway order creation failed");
                        self.fail_order(order_id, format!("gateway unavailable: {err}"), false)?;
                        checkout.mark_failed();
                        return Err(err.into());
                    }
                };
                self.orders
                    .execute(OrderCommand::AttachGatewayOrder(AttachGatewayOrder {
                        order_id,
                        gateway_order_ref: gateway_order.reference.clone(),
                        occurred_at: Utc::now(),
                    }))?;
                gateway_order.reference
            }
        };

        checkout.mark_awaiting(order_id, gateway_order_ref.clone());
        info!(
            order_id = %order_id,
            gateway_order_ref = %gateway_order_ref,
            amount = %total,
            "handed off to payment gateway"
        );
        Ok(SubmitOutcome::AwaitingPayment(PaymentHandoff {
            order_id,
            gateway_order_ref,
            amount: total,
            currency: self.config.currency.clone(),
        }))
    }

    /// One reservation per product. All or nothing across the whole cart.
    fn reserve_all(&self, lines: &[PricedLine]) -> Result<Vec<(ProductId, Vec<Serial>)>, CheckoutError> {
        let mut reserved = Vec::with_capacity(lines.len());
        for line in lines {
            match self.allocator.reserve(line.product_id, line.quantity) {
                Ok(serials) => reserved.push((line.product_id, serials)),
                Err(err) => {
                    self.release_reserved(&reserved);
                    return Err(err.into());
                }
            }
        }
        Ok(reserved)
    }

    /// Best-effort rollback of reservations that never made it into a hold.
    fn release_reserved(&self, reserved: &[(ProductId, Vec<Serial>)]) {
        for (product_id, serials) in reserved.iter().rev() {
            if let Err(err) = self.allocator.release(*product_id, serials) {
                error!(product_id = %product_id, serials = ?serials, error = %err, "rollback release failed");
            }
        }
    }

    /// Record a failed or cancelled payment and return the order's units.
    ///
    /// An order the expiry sweep already cancelled counts as failed.
    pub(crate) fn fail_order(
        &self,
        order_id: OrderId,
        reason: String,
        cancelled: bool,
    ) -> Result<Order, CheckoutError> {
        let order = match self.orders.execute(OrderCommand::FailPayment(FailPayment {
            order_id,
            reason,
            cancelled,
            occurred_at: Utc::now(),
        })) {
            Ok(order) => order,
            Err(err) => match self.orders.load(order_id)? {
                Some(current) if current.status() == OrderStatus::Cancelled => current,
                _ => return Err(err.into()),
            },
        };
        self.settle(order_id, Settlement::Release)?;
        Ok(order)
    }

    /// Commit or release an order's hold. A hold that is already gone was
    /// settled by someone else.
    pub(crate) fn settle(&self, order_id: OrderId, settlement: Settlement) -> Result<(), CheckoutError> {
        let result = match settlement {
            Settlement::Commit => self.allocator.commit_hold(order_id),
            Settlement::Release => self.allocator.release_hold(order_id),
        };
        match result {
            Ok(hold) => {
                debug!(order_id = %order_id, ?settlement, units = hold.unit_count(), "hold settled");
                Ok(())
            }
            Err(InventoryError::UnknownHold(_)) => {
                debug!(order_id = %order_id, ?settlement, "hold already settled");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl<C, S, B, G> std::fmt::Debug for CheckoutOrchestrator<C, S, B, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
