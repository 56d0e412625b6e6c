//! Errors raised when an order or wallet aggregate rejects a command.

use thiserror::Error;

/// Outcome of `Order::handle` and `Wallet::handle`.
pub type DomainResult<T> = Result<T, DomainError>;

/// Why an order or wallet refused a command. Stock, cart and checkout failures
/// have their own enums in their crates; they wrap this one when an aggregate
/// sits underneath.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The command itself is unusable: an empty line list, a card order without
    /// a shipping address, amounts that overflow.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The command does not fit the current state, such as confirming a
    /// cancelled order or crediting a wallet under another partner's id.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An order, product or wallet id did not parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// No order has been placed on this stream.
    #[error("not found")]
    NotFound,

    /// A second `Place` for an order id, a different gateway order attached
    /// to a pending payment, or a stale stream revision.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
