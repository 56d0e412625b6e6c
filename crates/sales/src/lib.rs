//! Orders domain module (event-sourced).
//!
//! Business rules for orders created at checkout, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod address;
pub mod order;
pub mod payment;
pub mod record;

pub use address::ShippingAddress;
pub use order::{
    AcceptCashOnDelivery, AttachGatewayOrder, CashOnDeliveryAccepted, CompletePayment,
    DeliverOrder, EXPIRY_REASON, ExpireOrder, FailPayment, GatewayOrderAttached, Order,
    OrderCommand, OrderDelivered, OrderEvent, OrderExpired, OrderItem, OrderPlaced, OrderShipped,
    OrderStatus, PaymentCompleted, PaymentFailed, PlaceOrder, ShipOrder,
};
pub use payment::{PaymentMethod, PaymentRecord, PaymentStatus};
pub use record::{OrderItemRecord, OrderRecord, PaymentDocument};
