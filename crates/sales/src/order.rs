use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use unitcart_cart::{CartTotals, DeliveryOption};
use unitcart_core::{Aggregate, AggregateRoot, CustomerId, DomainError, Money, OrderId, ProductId};
use unitcart_events::Event;
use unitcart_inventory::Serial;

use crate::address::ShippingAddress;
use crate::payment::{PaymentMethod, PaymentRecord, PaymentStatus};

/// Reason recorded when the expiry sweep cancels an unpaid order.
pub const EXPIRY_REASON: &str = "reservation expired";

/// Order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

/// Ordered item with the serials assigned to it at submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub serials: Vec<Serial>,
}

impl OrderItem {
    /// `None` when the line total does not fit in the money type.
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.times(self.quantity)
    }
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    customer_id: Option<CustomerId>,
    items: Vec<OrderItem>,
    totals: CartTotals,
    payment: Option<PaymentRecord>,
    delivery: DeliveryOption,
    shipping_address: Option<ShippingAddress>,
    cart_fingerprint: String,
    status: OrderStatus,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-placed aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            customer_id: None,
            items: Vec::new(),
            totals: CartTotals::default(),
            payment: None,
            delivery: DeliveryOption::Ship,
            shipping_address: None,
            cart_fingerprint: String::new(),
            status: OrderStatus::Pending,
            created_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn totals(&self) -> CartTotals {
        self.totals
    }

    pub fn payment(&self) -> Option<&PaymentRecord> {
        self.payment.as_ref()
    }

    pub fn payment_status(&self) -> Option<PaymentStatus> {
        self.payment.as_ref().map(|p| p.status)
    }

    pub fn delivery(&self) -> DeliveryOption {
        self.delivery
    }

    pub fn shipping_address(&self) -> Option<&ShippingAddress> {
        self.shipping_address.as_ref()
    }

    pub fn cart_fingerprint(&self) -> &str {
        &self.cart_fingerprint
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Placed, unpaid and not cancelled: the order still owns its reservation.
    pub fn is_in_flight(&self) -> bool {
        self.created
            && self.status == OrderStatus::Pending
            && self.payment_status() == Some(PaymentStatus::Pending)
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub items: Vec<OrderItem>,
    pub totals: CartTotals,
    pub payment_method: PaymentMethod,
    pub delivery: DeliveryOption,
    pub shipping_address: Option<ShippingAddress>,
    /// Fingerprint of the cart snapshot this order was built from.
    pub cart_fingerprint: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AcceptCashOnDelivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptCashOnDelivery {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AttachGatewayOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachGatewayOrder {
    pub order_id: OrderId,
    pub gateway_order_ref: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompletePayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletePayment {
    pub order_id: OrderId,
    pub transaction_id: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FailPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailPayment {
    pub order_id: OrderId,
    pub reason: String,
    /// The customer dismissed the payment UI rather than the gateway rejecting.
    pub cancelled: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ExpireOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ShipOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeliverOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    AcceptCashOnDelivery(AcceptCashOnDelivery),
    AttachGatewayOrder(AttachGatewayOrder),
    CompletePayment(CompletePayment),
    FailPayment(FailPayment),
    ExpireOrder(ExpireOrder),
    ShipOrder(ShipOrder),
    DeliverOrder(DeliverOrder),
}

impl OrderCommand {
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderCommand::PlaceOrder(c) => c.order_id,
            OrderCommand::AcceptCashOnDelivery(c) => c.order_id,
            OrderCommand::AttachGatewayOrder(c) => c.order_id,
            OrderCommand::CompletePayment(c) => c.order_id,
            OrderCommand::FailPayment(c) => c.order_id,
            OrderCommand::ExpireOrder(c) => c.order_id,
            OrderCommand::ShipOrder(c) => c.order_id,
            OrderCommand::DeliverOrder(c) => c.order_id,
        }
    }
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub items: Vec<OrderItem>,
    pub totals: CartTotals,
    pub payment_method: PaymentMethod,
    pub delivery: DeliveryOption,
    pub shipping_address: Option<ShippingAddress>,
    pub cart_fingerprint: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CashOnDeliveryAccepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashOnDeliveryAccepted {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: GatewayOrderAttached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrderAttached {
    pub order_id: OrderId,
    pub gateway_order_ref: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCompleted {
    pub order_id: OrderId,
    pub transaction_id: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentFailed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailed {
    pub order_id: OrderId,
    pub reason: String,
    pub cancelled: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderExpired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderExpired {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderShipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShipped {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderDelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDelivered {
    pub order_id: OrderId,
    /// Set when delivery also settles a cash-on-delivery payment.
    pub cod_transaction_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    CashOnDeliveryAccepted(CashOnDeliveryAccepted),
    GatewayOrderAttached(GatewayOrderAttached),
    PaymentCompleted(PaymentCompleted),
    PaymentFailed(PaymentFailed),
    OrderExpired(OrderExpired),
    OrderShipped(OrderShipped),
    OrderDelivered(OrderDelivered),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "sales.order.placed",
            OrderEvent::CashOnDeliveryAccepted(_) => "sales.order.cod_accepted",
            OrderEvent::GatewayOrderAttached(_) => "sales.order.gateway_attached",
            OrderEvent::PaymentCompleted(_) => "sales.order.payment_completed",
            OrderEvent::PaymentFailed(_) => "sales.order.payment_failed",
            OrderEvent::OrderExpired(_) => "sales.order.expired",
            OrderEvent::OrderShipped(_) => "sales.order.shipped",
            OrderEvent::OrderDelivered(_) => "sales.order.delivered",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::CashOnDeliveryAccepted(e) => e.occurred_at,
            OrderEvent::GatewayOrderAttached(e) => e.occurred_at,
            OrderEvent::PaymentCompleted(e) => e.occurred_at,
            OrderEvent::PaymentFailed(e) => e.occurred_at,
            OrderEvent::OrderExpired(e) => e.occurred_at,
            OrderEvent::OrderShipped(e) => e.occurred_at,
            OrderEvent::OrderDelivered(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.customer_id = Some(e.customer_id);
                self.items = e.items.clone();
                self.totals = e.totals;
                self.payment = Some(PaymentRecord::pending(e.payment_method.clone()));
                self.delivery = e.delivery;
                self.shipping_address = e.shipping_address.clone();
                self.cart_fingerprint = e.cart_fingerprint.clone();
                self.status = OrderStatus::Pending;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            OrderEvent::CashOnDeliveryAccepted(_) => {
                self.status = OrderStatus::Processing;
            }
            OrderEvent::GatewayOrderAttached(e) => {
                if let Some(payment) = self.payment.as_mut() {
                    payment.gateway_order_ref = Some(e.gateway_order_ref.clone());
                }
            }
            OrderEvent::PaymentCompleted(e) => {
                if let Some(payment) = self.payment.as_mut() {
                    payment.status = PaymentStatus::Completed;
                    payment.transaction_id = Some(e.transaction_id.clone());
                }
                self.status = OrderStatus::Processing;
            }
            OrderEvent::PaymentFailed(e) => {
                if let Some(payment) = self.payment.as_mut() {
                    payment.status = PaymentStatus::Failed;
                    payment.failure_reason = Some(e.reason.clone());
                }
                self.status = OrderStatus::Cancelled;
            }
            OrderEvent::OrderExpired(_) => {
                if let Some(payment) = self.payment.as_mut() {
                    payment.status = PaymentStatus::Failed;
                    payment.failure_reason = Some(EXPIRY_REASON.to_string());
                }
                self.status = OrderStatus::Cancelled;
            }
            OrderEvent::OrderShipped(_) => {
                self.status = OrderStatus::Shipped;
            }
            OrderEvent::OrderDelivered(e) => {
                if let (Some(payment), Some(txn)) = (self.payment.as_mut(), &e.cod_transaction_id) {
                    payment.status = PaymentStatus::Completed;
                    payment.transaction_id = Some(txn.clone());
                }
                self.status = OrderStatus::Delivered;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::AcceptCashOnDelivery(cmd) => self.handle_accept_cod(cmd),
            OrderCommand::AttachGatewayOrder(cmd) => self.handle_attach_gateway(cmd),
            OrderCommand::CompletePayment(cmd) => self.handle_complete_payment(cmd),
            OrderCommand::FailPayment(cmd) => self.handle_fail_payment(cmd),
            OrderCommand::ExpireOrder(cmd) => self.handle_expire(cmd),
            OrderCommand::ShipOrder(cmd) => self.handle_ship(cmd),
            OrderCommand::DeliverOrder(cmd) => self.handle_deliver(cmd),
        }
    }
}

impl Order {
    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_created(&self, order_id: OrderId) -> Result<&PaymentRecord, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_order_id(order_id)?;
        self.payment
            .as_ref()
            .ok_or_else(|| DomainError::invariant("placed order has no payment record"))
    }

    /// Payment fields freeze once the payment reaches a terminal status.
    fn ensure_payment_open(&self, order_id: OrderId) -> Result<&PaymentRecord, DomainError> {
        let payment = self.ensure_created(order_id)?;
        if payment.status.is_terminal() {
            return Err(DomainError::invariant(format!(
                "payment is already {:?}",
                payment.status
            )));
        }
        Ok(payment)
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("order must contain at least one item"));
        }
        for item in &cmd.items {
            if item.quantity == 0 {
                return Err(DomainError::validation("item quantity must be positive"));
            }
            if item.serials.len() != item.quantity as usize {
                return Err(DomainError::invariant(format!(
                    "product {} has {} serials for quantity {}",
                    item.product_id,
                    item.serials.len(),
                    item.quantity
                )));
            }
        }

        let subtotal = cmd
            .items
            .iter()
            .map(OrderItem::line_total)
            .collect::<Option<Vec<_>>>()
            .and_then(Money::checked_sum)
            .ok_or_else(|| DomainError::validation("order amounts overflow"))?;
        if subtotal != cmd.totals.subtotal {
            return Err(DomainError::invariant("subtotal does not match items"));
        }
        let total = Money::checked_sum([cmd.totals.subtotal, cmd.totals.shipping, cmd.totals.tax])
            .ok_or_else(|| DomainError::validation("order amounts overflow"))?;
        if cmd.totals.total != total {
            return Err(DomainError::invariant(
                "total must equal subtotal + shipping + tax",
            ));
        }

        match cmd.delivery {
            DeliveryOption::Ship => match &cmd.shipping_address {
                Some(address) if address.is_complete() => {}
                _ => {
                    return Err(DomainError::validation(
                        "shipped orders need a complete shipping address",
                    ));
                }
            },
            DeliveryOption::HoldAtWarehouse => {
                if cmd.payment_method.is_cod() {
                    return Err(DomainError::validation(
                        "cash on delivery is unavailable for warehouse-held orders",
                    ));
                }
                if cmd.shipping_address.is_some() || !cmd.totals.shipping.is_zero() {
                    return Err(DomainError::validation(
                        "warehouse-held orders carry no shipping",
                    ));
                }
            }
        }

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            customer_id: cmd.customer_id,
            items: cmd.items.clone(),
            totals: cmd.totals,
            payment_method: cmd.payment_method.clone(),
            delivery: cmd.delivery,
            shipping_address: cmd.shipping_address.clone(),
            cart_fingerprint: cmd.cart_fingerprint.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_accept_cod(&self, cmd: &AcceptCashOnDelivery) -> Result<Vec<OrderEvent>, DomainError> {
        let payment = self.ensure_payment_open(cmd.order_id)?;
        if !payment.method.is_cod() {
            return Err(DomainError::invariant(
                "only cash-on-delivery orders can be accepted without payment",
            ));
        }
        if self.status != OrderStatus::Pending {
            return Err(DomainError::invariant("only pending orders can be accepted"));
        }

        Ok(vec![OrderEvent::CashOnDeliveryAccepted(CashOnDeliveryAccepted {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_attach_gateway(&self, cmd: &AttachGatewayOrder) -> Result<Vec<OrderEvent>, DomainError> {
        let payment = self.ensure_payment_open(cmd.order_id)?;
        if !payment.method.uses_gateway() {
            return Err(DomainError::invariant(
                "cash-on-delivery orders have no gateway order",
            ));
        }
        if cmd.gateway_order_ref.trim().is_empty() {
            return Err(DomainError::validation("gateway order ref cannot be empty"));
        }
        match &payment.gateway_order_ref {
            // Retried handoff with the same ref: nothing to record.
            Some(existing) if *existing == cmd.gateway_order_ref => Ok(Vec::new()),
            Some(_) => Err(DomainError::conflict(
                "a different gateway order is already attached",
            )),
            None => Ok(vec![OrderEvent::GatewayOrderAttached(GatewayOrderAttached {
                order_id: cmd.order_id,
                gateway_order_ref: cmd.gateway_order_ref.clone(),
                occurred_at: cmd.occurred_at,
            })]),
        }
    }

    fn handle_complete_payment(&self, cmd: &CompletePayment) -> Result<Vec<OrderEvent>, DomainError> {
        let payment = self.ensure_payment_open(cmd.order_id)?;
        if !payment.method.uses_gateway() {
            return Err(DomainError::invariant(
                "cash-on-delivery payments complete on delivery",
            ));
        }
        if self.status != OrderStatus::Pending {
            return Err(DomainError::invariant("only pending orders can be paid"));
        }
        if cmd.transaction_id.trim().is_empty() {
            return Err(DomainError::validation("transaction id cannot be empty"));
        }

        Ok(vec![OrderEvent::PaymentCompleted(PaymentCompleted {
            order_id: cmd.order_id,
            transaction_id: cmd.transaction_id.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_fail_payment(&self, cmd: &FailPayment) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_payment_open(cmd.order_id)?;
        if self.status != OrderStatus::Pending {
            return Err(DomainError::invariant(
                "only pending orders can fail payment",
            ));
        }

        Ok(vec![OrderEvent::PaymentFailed(PaymentFailed {
            order_id: cmd.order_id,
            reason: cmd.reason.clone(),
            cancelled: cmd.cancelled,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_expire(&self, cmd: &ExpireOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_payment_open(cmd.order_id)?;
        if self.status != OrderStatus::Pending {
            return Err(DomainError::invariant("only pending orders can expire"));
        }

        Ok(vec![OrderEvent::OrderExpired(OrderExpired {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_ship(&self, cmd: &ShipOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created(cmd.order_id)?;
        if self.delivery != DeliveryOption::Ship {
            return Err(DomainError::invariant("warehouse-held orders are not shipped"));
        }
        if self.status != OrderStatus::Processing {
            return Err(DomainError::invariant("only processing orders can be shipped"));
        }

        Ok(vec![OrderEvent::OrderShipped(OrderShipped {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deliver(&self, cmd: &DeliverOrder) -> Result<Vec<OrderEvent>, DomainError> {
        let payment = self.ensure_created(cmd.order_id)?;
        let ready = match self.delivery {
            DeliveryOption::Ship => self.status == OrderStatus::Shipped,
            // Collected from the warehouse: no shipping leg.
            DeliveryOption::HoldAtWarehouse => self.status == OrderStatus::Processing,
        };
        if !ready {
            return Err(DomainError::invariant(format!(
                "cannot deliver an order in status {:?}",
                self.status
            )));
        }

        let cod_transaction_id = (payment.method.is_cod()
            && payment.status == PaymentStatus::Pending)
            .then(|| format!("cod:{}", self.id));

        Ok(vec![OrderEvent::OrderDelivered(OrderDelivered {
            order_id: cmd.order_id,
            cod_transaction_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
