//! Value object marker: equality by value, not identity.
//!
//! `Money` and shipping addresses are value objects; products, orders and
//! wallets are identified by their ids.

/// Marker trait for immutable, value-compared domain objects.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct Money(u64);
///
/// impl ValueObject for Money {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
