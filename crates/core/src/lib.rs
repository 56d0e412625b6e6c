//! `unitcart-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, money, the domain error model and the aggregate contract shared
//! by the order and wallet aggregates.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, CustomerId, OrderId, PartnerId, ProductId, TransactionId};
pub use money::Money;
pub use value_object::ValueObject;
