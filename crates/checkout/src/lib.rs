//! Checkout: customer sessions, the checkout state machine, payment
//! reconciliation and the reservation-expiry sweep.
//!
//! Callers own a [`CustomerSession`] per customer and drive it through a shared
//! [`CheckoutOrchestrator`]:
//!
//! 1. fill the cart and walk the session to `CollectingPayment`
//! 2. [`CheckoutOrchestrator::submit`] reserves units and places the order
//! 3. for gateway payments, [`CheckoutOrchestrator::confirm_payment`] or
//!    [`CheckoutOrchestrator::cancel_payment`] settles the attempt
//!
//! A [`ReservationSweeper`] releases units of orders nobody paid for in time.

pub mod confirmation;
pub mod error;
pub mod fingerprint;
pub mod gateway;
pub mod orchestrator;
pub mod session;
pub mod sweeper;

pub use error::CheckoutError;
pub use fingerprint::cart_fingerprint;
pub use gateway::{GatewayCallback, GatewayError, GatewayOrder, HmacGateway, PaymentGateway};
pub use orchestrator::{CheckoutOrchestrator, PaymentHandoff, SubmitOutcome};
pub use session::{CheckoutSession, CheckoutState, CustomerSession};
pub use sweeper::{
    ExpirySweep, ReservationSweeper, SweepReport, SweeperConfig, SweeperHandle, SweeperStats,
};
