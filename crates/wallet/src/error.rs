use thiserror::Error;

use unitcart_core::{DomainError, Money, TransactionId};

use crate::ledger::{TransactionKind, TransactionStatus};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("insufficient balance: requested {requested}, withdrawable {available}")]
    InsufficientBalance { requested: Money, available: Money },

    #[error("amount must be positive")]
    InvalidAmount,

    #[error("unknown wallet transaction {0}")]
    UnknownTransaction(TransactionId),

    #[error("wallet transaction {0} already recorded")]
    DuplicateTransaction(TransactionId),

    #[error("{kind:?} transaction {transaction_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        transaction_id: TransactionId,
        kind: TransactionKind,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error(transparent)]
    Domain(#[from] DomainError),
}
