//! Partner wallet ledger (event-sourced).
//!
//! A wallet is an append-only list of transactions. Balances are folds over that
//! list; no balance field is ever stored or edited.

pub mod error;
pub mod ledger;

pub use error::WalletError;
pub use ledger::{
    CreditRecorded, DebitRecorded, RecordCredit, RecordDebit, RequestWithdrawal,
    ResolveTransaction, TransactionKind, TransactionResolved, TransactionStatus, Wallet,
    WalletBalance, WalletCommand, WalletEvent, WalletTransaction, WithdrawalRequested,
};
