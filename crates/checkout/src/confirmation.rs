//! Reconciling gateway results and overdue reservations with orders and stock.
//!
//! The order stream decides races: a payment confirmation and the expiry sweep
//! may act on the same order concurrently, but only one of `CompletePayment`
//! and `ExpireOrder` can be appended. Whoever wins settles the hold.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use unitcart_catalog::ProductCatalog;
use unitcart_core::OrderId;
use unitcart_events::{EventBus, EventEnvelope};
use unitcart_infra::EventStore;
use unitcart_inventory::Hold;
use unitcart_sales::{CompletePayment, ExpireOrder, Order, OrderCommand, OrderStatus};

use crate::error::CheckoutError;
use crate::gateway::{GatewayCallback, PaymentGateway};
use crate::orchestrator::{CheckoutOrchestrator, Settlement};
use crate::session::{CheckoutState, CustomerSession};
use crate::sweeper::SweepReport;

const VERIFICATION_FAILED: &str = "payment verification failed";
const CANCELLED_BY_CUSTOMER: &str = "payment cancelled by customer";

/// What the sweep did with one overdue hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expiry {
    /// Unpaid order expired; units returned.
    Expired,
    /// Order already failed or missing; leftover units returned.
    Released,
    /// Order was paid but its hold never settled; units kept.
    Committed,
}

impl<C, S, B, G> CheckoutOrchestrator<C, S, B, G>
where
    C: ProductCatalog,
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    G: PaymentGateway,
{
    /// Handle the gateway's success callback.
    ///
    /// The proof is verified here; on success the order is paid, its units are
    /// sold and the cart is cleared. A proof that does not verify fails the
    /// order and returns its units, leaving the cart intact.
    pub fn confirm_payment(
        &self,
        session: &mut CustomerSession,
        callback: &GatewayCallback,
    ) -> Result<Order, CheckoutError> {
        let (cart, checkout) = session.parts_mut();
        checkout.expect_state(CheckoutState::AwaitingGatewayResult, "confirm payment")?;
        let order_id = self.awaited_order(checkout.order_id(), checkout.state())?;
        if checkout.gateway_order_ref() != Some(callback.gateway_order_ref.as_str()) {
            return Err(CheckoutError::GatewayOrderMismatch(
                callback.gateway_order_ref.clone(),
            ));
        }

        if !self.orders.get(order_id)?.is_in_flight() {
            checkout.mark_failed();
            return Err(CheckoutError::ReservationExpired { order_id });
        }

        if !self.gateway.verify(callback)? {
            warn!(
                order_id = %order_id,
                gateway_order_ref = %callback.gateway_order_ref,
                "payment proof failed verification"
            );
            self.fail_order(order_id, VERIFICATION_FAILED.to_string(), false)?;
            checkout.mark_failed();
            return Err(CheckoutError::PaymentVerificationFailed { order_id });
        }

        let completed = self
            .orders
            .execute(OrderCommand::CompletePayment(CompletePayment {
                order_id,
                transaction_id: callback.gateway_payment_ref.clone(),
                occurred_at: Utc::now(),
            }));
        let order = match completed {
            Ok(order) => order,
            Err(err) => {
                // Lost the race against the expiry sweep.
                if let Some(current) = self.orders.load(order_id)? {
                    if current.status() == OrderStatus::Cancelled {
                        checkout.mark_failed();
                        return Err(CheckoutError::ReservationExpired { order_id });
                    }
                }
                return Err(err.into());
            }
        };

        self.settle(order_id, Settlement::Commit)?;
        cart.clear();
        checkout.mark_confirmed(order_id);
        info!(
            order_id = %order_id,
            transaction_id = %callback.gateway_payment_ref,
            total = %order.totals().total,
            "payment verified; order confirmed"
        );
        Ok(order)
    }

    /// The customer dismissed the gateway UI. Same inventory effect as a
    /// failed verification.
    pub fn cancel_payment(&self, session: &mut CustomerSession) -> Result<Order, CheckoutError> {
        let checkout = session.checkout_mut();
        checkout.expect_state(CheckoutState::AwaitingGatewayResult, "cancel payment")?;
        let order_id = self.awaited_order(checkout.order_id(), checkout.state())?;

        self.fail_order(order_id, CANCELLED_BY_CUSTOMER.to_string(), true)?;
        checkout.mark_cancelled();
        info!(order_id = %order_id, "payment cancelled by customer");
        Err(CheckoutError::PaymentCancelled { order_id })
    }

    /// Expire every hold overdue at `now`.
    ///
    /// Per-hold failures are logged and counted; the hold stays in place for
    /// the next sweep.
    pub fn expire_reservations(&self, now: DateTime<Utc>) -> Result<SweepReport, CheckoutError> {
        let overdue = self.allocator.expired_holds(now)?;
        let mut report = SweepReport::default();

        for hold in &overdue {
            match self.expire_hold(hold, now) {
                Ok(Expiry::Expired) => report.expired += 1,
                Ok(Expiry::Released) => report.released += 1,
                Ok(Expiry::Committed) => report.committed += 1,
                Err(err) => {
                    warn!(order_id = %hold.order_id, error = %err, "reservation expiry failed; will retry");
                    report.failures += 1;
                }
            }
        }

        if !overdue.is_empty() {
            info!(
                expired = report.expired,
                released = report.released,
                committed = report.committed,
                failures = report.failures,
                "reservation sweep finished"
            );
        }
        Ok(report)
    }

    fn expire_hold(&self, hold: &Hold, now: DateTime<Utc>) -> Result<Expiry, CheckoutError> {
        let order_id = hold.order_id;
        match self.orders.load(order_id)? {
            Some(order) if order.is_in_flight() => {
                self.orders.execute(OrderCommand::ExpireOrder(ExpireOrder {
                    order_id,
                    occurred_at: now,
                }))?;
                self.settle(order_id, Settlement::Release)?;
                info!(order_id = %order_id, units = hold.unit_count(), "unpaid order expired; units released");
                Ok(Expiry::Expired)
            }
            Some(order) if order.status() != OrderStatus::Cancelled => {
                self.settle(order_id, Settlement::Commit)?;
                Ok(Expiry::Committed)
            }
            _ => {
                self.settle(order_id, Settlement::Release)?;
                Ok(Expiry::Released)
            }
        }
    }

    fn awaited_order(&self, order_id: Option<OrderId>, state: CheckoutState) -> Result<OrderId, CheckoutError> {
        order_id.ok_or(CheckoutError::InvalidState {
            action: "reconcile a payment without an order",
            state,
        })
    }
}
