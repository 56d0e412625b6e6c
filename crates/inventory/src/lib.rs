//! Serialized stock: per-product unit pools and the reservation allocator.
//!
//! Every physical unit carries a unique serial. Units are claimed first-in
//! first-out and a claim is all-or-nothing. The allocator serializes claims per
//! product with one mutex per pool, so concurrent buyers of different products
//! never contend.

pub mod allocator;
pub mod error;
pub mod hold;
pub mod pool;

pub use allocator::ReservationAllocator;
pub use error::InventoryError;
pub use hold::{Hold, HoldLine};
pub use pool::{Serial, Unit, UnitPool, UnitState};
