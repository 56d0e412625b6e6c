//! Wallet commands routed through the dispatcher.
//!
//! Two withdrawals racing on one wallet both load the same revision; the loser
//! gets a concurrency failure, reloads (seeing the winner's pending
//! withdrawal) and re-checks the balance. That retry is what serializes
//! withdrawal approval without a lock around the balance computation.

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use unitcart_core::{Money, OrderId, PartnerId, TransactionId};
use unitcart_events::{EventBus, EventEnvelope};
use unitcart_wallet::{
    RecordCredit, RecordDebit, RequestWithdrawal, ResolveTransaction, TransactionStatus, Wallet,
    WalletBalance, WalletCommand, WalletError,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;

pub const WALLET_AGGREGATE_TYPE: &str = "wallet";

/// Attempts per command before a concurrency failure is surfaced.
const MAX_ATTEMPTS: usize = 5;

pub type WalletServiceError = DispatchError<WalletError>;

#[derive(Debug)]
pub struct WalletService<S, B> {
    dispatcher: CommandDispatcher<S, B>,
}

impl<S, B> WalletService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: CommandDispatcher<S, B>) -> Self {
        Self { dispatcher }
    }

    /// Record a credit. Escrowed credits stay `pending` until resolved.
    pub fn credit(
        &self,
        partner_id: PartnerId,
        amount: Money,
        linked_order: Option<OrderId>,
        escrow: bool,
    ) -> Result<TransactionId, WalletServiceError> {
        let transaction_id = TransactionId::new();
        self.run(WalletCommand::RecordCredit(RecordCredit {
            partner_id,
            transaction_id,
            amount,
            linked_order,
            escrow,
            occurred_at: Utc::now(),
        }))?;
        Ok(transaction_id)
    }

    pub fn debit(
        &self,
        partner_id: PartnerId,
        amount: Money,
        linked_order: Option<OrderId>,
    ) -> Result<TransactionId, WalletServiceError> {
        let transaction_id = TransactionId::new();
        self.run(WalletCommand::RecordDebit(RecordDebit {
            partner_id,
            transaction_id,
            amount,
            linked_order,
            occurred_at: Utc::now(),
        }))?;
        Ok(transaction_id)
    }

    pub fn request_withdrawal(
        &self,
        partner_id: PartnerId,
        amount: Money,
    ) -> Result<TransactionId, WalletServiceError> {
        let transaction_id = TransactionId::new();
        self.run(WalletCommand::RequestWithdrawal(RequestWithdrawal {
            partner_id,
            transaction_id,
            amount,
            occurred_at: Utc::now(),
        }))?;
        info!(partner_id = %partner_id, transaction_id = %transaction_id, amount = %amount, "withdrawal requested");
        Ok(transaction_id)
    }

    /// Settle an escrowed credit or review a withdrawal.
    pub fn resolve(
        &self,
        partner_id: PartnerId,
        transaction_id: TransactionId,
        status: TransactionStatus,
    ) -> Result<Wallet, WalletServiceError> {
        let wallet = self.run(WalletCommand::ResolveTransaction(ResolveTransaction {
            partner_id,
            transaction_id,
            status,
            occurred_at: Utc::now(),
        }))?;
        info!(partner_id = %partner_id, transaction_id = %transaction_id, status = ?status, "wallet transaction resolved");
        Ok(wallet)
    }

    pub fn wallet(&self, partner_id: PartnerId) -> Result<Wallet, WalletServiceError> {
        self.dispatcher.load(partner_id, Wallet::empty)
    }

    pub fn balance(&self, partner_id: PartnerId) -> Result<WalletBalance, WalletServiceError> {
        Ok(self.wallet(partner_id)?.summary())
    }

    fn run(&self, command: WalletCommand) -> Result<Wallet, WalletServiceError> {
        let partner_id = command.partner_id();
        let mut attempt = 1;
        loop {
            match self.dispatcher.dispatch(
                partner_id,
                WALLET_AGGREGATE_TYPE,
                command.clone(),
                Wallet::empty,
            ) {
                Ok(dispatched) => return Ok(dispatched.aggregate),
                Err(err) if err.is_concurrency() && attempt < MAX_ATTEMPTS => {
                    warn!(partner_id = %partner_id, attempt, "wallet append raced; retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
