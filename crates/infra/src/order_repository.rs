//! Order persistence on top of the command dispatcher.
//!
//! Besides running order commands, the repository keeps an index from cart
//! fingerprint to the order that is still waiting on payment for that cart.
//! Checkout claims the fingerprint before reserving units, so a retried submit,
//! concurrent or not, resumes the existing order instead of placing a second one.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value as JsonValue;
use tracing::{debug, info};

use unitcart_core::{DomainError, OrderId};
use unitcart_events::{EventBus, EventEnvelope};
use unitcart_sales::{Order, OrderCommand, OrderRecord, PlaceOrder};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;

pub const ORDER_AGGREGATE_TYPE: &str = "sales.order";

pub type OrderError = DispatchError<DomainError>;

/// Index entry for one cart fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// A submit is reserving units; no order exists yet.
    Claimed,
    Placed(OrderId),
}

/// Result of [`OrderRepository::claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The caller owns the fingerprint and must either `place` an order for it
    /// or `abandon` the claim.
    Granted,
    /// An unpaid order already exists for this cart snapshot.
    InFlight(Order),
    /// Another submit for the same snapshot has not placed its order yet.
    Busy,
}

#[derive(Debug)]
pub struct OrderRepository<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    in_flight: Mutex<HashMap<String, Slot>>,
}

impl<S, B> OrderRepository<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: CommandDispatcher<S, B>) -> Self {
        Self {
            dispatcher,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    /// Take ownership of a cart fingerprint before reserving units for it.
    ///
    /// Lookup and claim happen under one lock, so of several submits racing on
    /// the same snapshot exactly one is granted.
    pub fn claim(&self, fingerprint: &str) -> Result<Claim, OrderError> {
        let mut index = self.in_flight.lock().map_err(|_| DispatchError::LockPoisoned)?;
        match index.get(fingerprint).copied() {
            Some(Slot::Claimed) => return Ok(Claim::Busy),
            Some(Slot::Placed(order_id)) => {
                if let Some(order) = self.load(order_id)?.filter(Order::is_in_flight) {
                    return Ok(Claim::InFlight(order));
                }
            }
            None => {}
        }
        index.insert(fingerprint.to_string(), Slot::Claimed);
        debug!("cart fingerprint claimed");
        Ok(Claim::Granted)
    }

    /// End a granted claim. The fingerprint then points at `order_id` when that
    /// order exists and is still unpaid, and is free otherwise.
    pub fn release_claim(&self, fingerprint: &str, order_id: OrderId) -> Result<(), OrderError> {
        let mut index = self.in_flight.lock().map_err(|_| DispatchError::LockPoisoned)?;
        if index.get(fingerprint) != Some(&Slot::Claimed) {
            return Ok(());
        }
        if self.load(order_id)?.is_some_and(|order| order.is_in_flight()) {
            index.insert(fingerprint.to_string(), Slot::Placed(order_id));
            debug!(order_id = %order_id, "cart fingerprint now tracks in-flight order");
        } else {
            index.remove(fingerprint);
            debug!("cart fingerprint claim dropped");
        }
        Ok(())
    }

    /// Place a new order. Unless a claim on its fingerprint is still open, the
    /// order is indexed right away.
    pub fn place(&self, command: PlaceOrder) -> Result<Order, OrderError> {
        let fingerprint = command.cart_fingerprint.clone();
        let order = self.execute(OrderCommand::PlaceOrder(command))?;

        if order.is_in_flight() {
            let mut index = self.in_flight.lock().map_err(|_| DispatchError::LockPoisoned)?;
            if index.get(&fingerprint) != Some(&Slot::Claimed) {
                index.insert(fingerprint, Slot::Placed(order.id_typed()));
            }
        }
        info!(
            order_id = %order.id_typed(),
            total = %order.totals().total,
            items = order.items().len(),
            "order placed"
        );
        Ok(order)
    }

    /// Run any order command. Orders that leave the in-flight state drop out
    /// of the fingerprint index.
    pub fn execute(&self, command: OrderCommand) -> Result<Order, OrderError> {
        let order_id = command.order_id();
        let dispatched = self.dispatcher.dispatch(
            order_id,
            ORDER_AGGREGATE_TYPE,
            command,
            Order::empty,
        )?;
        let order = dispatched.aggregate;

        if !order.is_in_flight() {
            self.forget(order.cart_fingerprint(), order_id)?;
        }
        Ok(order)
    }

    /// `None` when no order with this id was ever placed.
    pub fn load(&self, order_id: OrderId) -> Result<Option<Order>, OrderError> {
        let order = self.dispatcher.load(order_id, Order::empty)?;
        Ok(order.is_created().then_some(order))
    }

    pub fn get(&self, order_id: OrderId) -> Result<Order, OrderError> {
        self.load(order_id)?
            .ok_or(DispatchError::Rejected(DomainError::NotFound))
    }

    /// The order still awaiting payment for this cart snapshot, if any.
    pub fn in_flight_for(&self, fingerprint: &str) -> Result<Option<Order>, OrderError> {
        let candidate = {
            let index = self.in_flight.lock().map_err(|_| DispatchError::LockPoisoned)?;
            index.get(fingerprint).copied()
        };
        let Some(Slot::Placed(order_id)) = candidate else {
            return Ok(None);
        };

        match self.load(order_id)? {
            Some(order) if order.is_in_flight() => Ok(Some(order)),
            _ => {
                self.forget(fingerprint, order_id)?;
                Ok(None)
            }
        }
    }

    /// The persisted document for an order.
    pub fn record(&self, order_id: OrderId) -> Result<OrderRecord, OrderError> {
        let order = self.get(order_id)?;
        OrderRecord::try_from(&order).map_err(DispatchError::Rejected)
    }

    fn forget(&self, fingerprint: &str, order_id: OrderId) -> Result<(), OrderError> {
        let mut index = self.in_flight.lock().map_err(|_| DispatchError::LockPoisoned)?;
        if index.get(fingerprint) == Some(&Slot::Placed(order_id)) {
            index.remove(fingerprint);
            debug!(order_id = %order_id, "order left in-flight index");
        }
        Ok(())
    }
}
