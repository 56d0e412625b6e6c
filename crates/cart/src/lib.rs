//! Cart Aggregate: one customer's working set of product selections.
//!
//! A cart never holds serials. Stock is only checked (never claimed) while the
//! customer edits it; units are reserved at checkout submission.

pub mod cart;
pub mod error;
pub mod pricing;

pub use cart::{Cart, CartLine};
pub use error::CartError;
pub use pricing::{CartTotals, DeliveryOption, PricedLine};
