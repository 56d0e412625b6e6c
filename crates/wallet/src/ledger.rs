use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use unitcart_core::{Aggregate, AggregateRoot, DomainError, Money, OrderId, PartnerId, TransactionId};
use unitcart_events::Event;

use crate::error::WalletError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Credit,
    Debit,
    Withdrawal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Approved,
    Rejected,
}

impl TransactionStatus {
    /// Statuses that count toward the balance.
    pub fn is_settled(self) -> bool {
        matches!(self, TransactionStatus::Success | TransactionStatus::Approved)
    }
}

/// One immutable ledger entry. Only `status` ever changes, via a resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub amount: Money,
    pub status: TransactionStatus,
    pub linked_order: Option<OrderId>,
    pub created_at: DateTime<Utc>,
}

/// Derived figures for one wallet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    /// Settled credits minus settled debits and approved withdrawals.
    pub balance: Money,
    /// Credits still awaiting settlement.
    pub escrow_pending: Money,
    /// Withdrawals awaiting approval.
    pub pending_withdrawals: Money,
    /// What a new withdrawal or debit may draw on.
    pub withdrawable: Money,
}

/// Aggregate root: Wallet, one per partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    id: PartnerId,
    transactions: Vec<WalletTransaction>,
    version: u64,
}

impl Wallet {
    /// Empty aggregate for rehydration.
    pub fn empty(id: PartnerId) -> Self {
        Self {
            id,
            transactions: Vec::new(),
            version: 0,
        }
    }

    pub fn transactions(&self) -> &[WalletTransaction] {
        &self.transactions
    }

    pub fn transaction(&self, id: TransactionId) -> Option<&WalletTransaction> {
        self.transactions.iter().find(|t| t.id == id)
    }

    pub fn balance(&self) -> Money {
        let (mut credits, mut outflows) = (Money::ZERO, Money::ZERO);
        for tx in self.transactions.iter().filter(|t| t.status.is_settled()) {
            match tx.kind {
                TransactionKind::Credit => credits += tx.amount,
                TransactionKind::Debit | TransactionKind::Withdrawal => outflows += tx.amount,
            }
        }
        credits.saturating_sub(outflows)
    }

    pub fn escrow_pending(&self) -> Money {
        self.sum_pending(TransactionKind::Credit)
    }

    pub fn pending_withdrawals(&self) -> Money {
        self.sum_pending(TransactionKind::Withdrawal)
    }

    pub fn withdrawable(&self) -> Money {
        self.balance().saturating_sub(self.pending_withdrawals())
    }

    pub fn summary(&self) -> WalletBalance {
        WalletBalance {
            balance: self.balance(),
            escrow_pending: self.escrow_pending(),
            pending_withdrawals: self.pending_withdrawals(),
            withdrawable: self.withdrawable(),
        }
    }

    fn sum_pending(&self, kind: TransactionKind) -> Money {
        self.transactions
            .iter()
            .filter(|t| t.kind == kind && t.status == TransactionStatus::Pending)
            .map(|t| t.amount)
            .sum()
    }
}

impl AggregateRoot for Wallet {
    type Id = PartnerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordCredit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCredit {
    pub partner_id: PartnerId,
    pub transaction_id: TransactionId,
    pub amount: Money,
    pub linked_order: Option<OrderId>,
    /// Hold the credit in escrow (`pending`) instead of settling it at once.
    pub escrow: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordDebit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDebit {
    pub partner_id: PartnerId,
    pub transaction_id: TransactionId,
    pub amount: Money,
    pub linked_order: Option<OrderId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RequestWithdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestWithdrawal {
    pub partner_id: PartnerId,
    pub transaction_id: TransactionId,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ResolveTransaction (escrow settlement or admin review).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveTransaction {
    pub partner_id: PartnerId,
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletCommand {
    RecordCredit(RecordCredit),
    RecordDebit(RecordDebit),
    RequestWithdrawal(RequestWithdrawal),
    ResolveTransaction(ResolveTransaction),
}

impl WalletCommand {
    pub fn partner_id(&self) -> PartnerId {
        match self {
            WalletCommand::RecordCredit(c) => c.partner_id,
            WalletCommand::RecordDebit(c) => c.partner_id,
            WalletCommand::RequestWithdrawal(c) => c.partner_id,
            WalletCommand::ResolveTransaction(c) => c.partner_id,
        }
    }
}

/// Event: CreditRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditRecorded {
    pub partner_id: PartnerId,
    pub transaction_id: TransactionId,
    pub amount: Money,
    pub linked_order: Option<OrderId>,
    pub status: TransactionStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DebitRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebitRecorded {
    pub partner_id: PartnerId,
    pub transaction_id: TransactionId,
    pub amount: Money,
    pub linked_order: Option<OrderId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: WithdrawalRequested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequested {
    pub partner_id: PartnerId,
    pub transaction_id: TransactionId,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransactionResolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResolved {
    pub partner_id: PartnerId,
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletEvent {
    CreditRecorded(CreditRecorded),
    DebitRecorded(DebitRecorded),
    WithdrawalRequested(WithdrawalRequested),
    TransactionResolved(TransactionResolved),
}

impl Event for WalletEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WalletEvent::CreditRecorded(_) => "wallet.credit_recorded",
            WalletEvent::DebitRecorded(_) => "wallet.debit_recorded",
            WalletEvent::WithdrawalRequested(_) => "wallet.withdrawal_requested",
            WalletEvent::TransactionResolved(_) => "wallet.transaction_resolved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            WalletEvent::CreditRecorded(e) => e.occurred_at,
            WalletEvent::DebitRecorded(e) => e.occurred_at,
            WalletEvent::WithdrawalRequested(e) => e.occurred_at,
            WalletEvent::TransactionResolved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Wallet {
    type Command = WalletCommand;
    type Event = WalletEvent;
    type Error = WalletError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            WalletEvent::CreditRecorded(e) => {
                self.id = e.partner_id;
                self.transactions.push(WalletTransaction {
                    id: e.transaction_id,
                    kind: TransactionKind::Credit,
                    amount: e.amount,
                    status: e.status,
                    linked_order: e.linked_order,
                    created_at: e.occurred_at,
                });
            }
            WalletEvent::DebitRecorded(e) => {
                self.id = e.partner_id;
                self.transactions.push(WalletTransaction {
                    id: e.transaction_id,
                    kind: TransactionKind::Debit,
                    amount: e.amount,
                    status: TransactionStatus::Success,
                    linked_order: e.linked_order,
                    created_at: e.occurred_at,
                });
            }
            WalletEvent::WithdrawalRequested(e) => {
                self.id = e.partner_id;
                self.transactions.push(WalletTransaction {
                    id: e.transaction_id,
                    kind: TransactionKind::Withdrawal,
                    amount: e.amount,
                    status: TransactionStatus::Pending,
                    linked_order: None,
                    created_at: e.occurred_at,
                });
            }
            WalletEvent::TransactionResolved(e) => {
                if let Some(tx) = self.transactions.iter_mut().find(|t| t.id == e.transaction_id) {
                    tx.status = e.status;
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if command.partner_id() != self.id {
            return Err(DomainError::invariant("partner_id mismatch").into());
        }
        match command {
            WalletCommand::RecordCredit(cmd) => self.handle_credit(cmd),
            WalletCommand::RecordDebit(cmd) => self.handle_debit(cmd),
            WalletCommand::RequestWithdrawal(cmd) => self.handle_withdrawal(cmd),
            WalletCommand::ResolveTransaction(cmd) => self.handle_resolve(cmd),
        }
    }
}

impl Wallet {
    fn ensure_new_transaction(&self, id: TransactionId, amount: Money) -> Result<(), WalletError> {
        if amount.is_zero() {
            return Err(WalletError::InvalidAmount);
        }
        if self.transaction(id).is_some() {
            return Err(WalletError::DuplicateTransaction(id));
        }
        Ok(())
    }

    fn ensure_withdrawable(&self, amount: Money) -> Result<(), WalletError> {
        let available = self.withdrawable();
        if amount > available {
            return Err(WalletError::InsufficientBalance {
                requested: amount,
                available,
            });
        }
        Ok(())
    }

    fn handle_credit(&self, cmd: &RecordCredit) -> Result<Vec<WalletEvent>, WalletError> {
        self.ensure_new_transaction(cmd.transaction_id, cmd.amount)?;
        // Every credit, settled or not, must stay summable.
        let credited = self
            .transactions
            .iter()
            .filter(|t| t.kind == TransactionKind::Credit)
            .map(|t| t.amount)
            .chain([cmd.amount]);
        if Money::checked_sum(credited).is_none() {
            return Err(DomainError::validation("credit overflows the wallet").into());
        }
        let status = if cmd.escrow {
            TransactionStatus::Pending
        } else {
            TransactionStatus::Success
        };

        Ok(vec![WalletEvent::CreditRecorded(CreditRecorded {
            partner_id: cmd.partner_id,
            transaction_id: cmd.transaction_id,
            amount: cmd.amount,
            linked_order: cmd.linked_order,
            status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_debit(&self, cmd: &RecordDebit) -> Result<Vec<WalletEvent>, WalletError> {
        self.ensure_new_transaction(cmd.transaction_id, cmd.amount)?;
        self.ensure_withdrawable(cmd.amount)?;

        Ok(vec![WalletEvent::DebitRecorded(DebitRecorded {
            partner_id: cmd.partner_id,
            transaction_id: cmd.transaction_id,
            amount: cmd.amount,
            linked_order: cmd.linked_order,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_withdrawal(&self, cmd: &RequestWithdrawal) -> Result<Vec<WalletEvent>, WalletError> {
        self.ensure_new_transaction(cmd.transaction_id, cmd.amount)?;
        self.ensure_withdrawable(cmd.amount)?;

        Ok(vec![WalletEvent::WithdrawalRequested(WithdrawalRequested {
            partner_id: cmd.partner_id,
            transaction_id: cmd.transaction_id,
            amount: cmd.amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_resolve(&self, cmd: &ResolveTransaction) -> Result<Vec<WalletEvent>, WalletError> {
        let tx = self
            .transaction(cmd.transaction_id)
            .ok_or(WalletError::UnknownTransaction(cmd.transaction_id))?;

        let allowed = tx.status == TransactionStatus::Pending
            && match tx.kind {
                TransactionKind::Credit => matches!(
                    cmd.status,
                    TransactionStatus::Success | TransactionStatus::Failed
                ),
                TransactionKind::Withdrawal => matches!(
                    cmd.status,
                    TransactionStatus::Approved | TransactionStatus::Rejected
                ),
                TransactionKind::Debit => false,
            };
        if !allowed {
            return Err(WalletError::InvalidTransition {
                transaction_id: tx.id,
                kind: tx.kind,
                from: tx.status,
                to: cmd.status,
            });
        }

        Ok(vec![WalletEvent::TransactionResolved(TransactionResolved {
            partner_id: cmd.partner_id,
            transaction_id: cmd.transaction_id,
            status: cmd.status,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn execute(wallet: &mut Wallet, command: WalletCommand) -> Result<TransactionId, WalletError> {
        let events = wallet.handle(&command)?;
        for event in &events {
            wallet.apply(event);
        }
        Ok(match command {
            WalletCommand::RecordCredit(c) => c.transaction_id,
            WalletCommand::RecordDebit(c) => c.transaction_id,
            WalletCommand::RequestWithdrawal(c) => c.transaction_id,
            WalletCommand::ResolveTransaction(c) => c.transaction_id,
        })
    }

    fn credit(partner_id: PartnerId, amount: u64, escrow: bool) -> WalletCommand {
        WalletCommand::RecordCredit(RecordCredit {
            partner_id,
            transaction_id: TransactionId::new(),
            amount: Money::from_major(amount),
            linked_order: Some(OrderId::new()),
            escrow,
            occurred_at: test_time(),
        })
    }

    fn withdraw(partner_id: PartnerId, amount: u64) -> WalletCommand {
        WalletCommand::RequestWithdrawal(RequestWithdrawal {
            partner_id,
            transaction_id: TransactionId::new(),
            amount: Money::from_major(amount),
            occurred_at: test_time(),
        })
    }

    fn resolve(partner_id: PartnerId, transaction_id: TransactionId, status: TransactionStatus) -> WalletCommand {
        WalletCommand::ResolveTransaction(ResolveTransaction {
            partner_id,
            transaction_id,
            status,
            occurred_at: test_time(),
        })
    }

    fn wallet() -> (Wallet, PartnerId) {
        let partner_id = PartnerId::new();
        (Wallet::empty(partner_id), partner_id)
    }

    #[test]
    fn escrowed_credit_counts_only_after_settlement() {
        let (mut wallet, partner) = wallet();
        let tx = execute(&mut wallet, credit(partner, 500, true)).unwrap();

        assert_eq!(wallet.balance(), Money::ZERO);
        assert_eq!(wallet.escrow_pending(), Money::from_major(500));

        execute(&mut wallet, resolve(partner, tx, TransactionStatus::Success)).unwrap();
        assert_eq!(wallet.balance(), Money::from_major(500));
        assert_eq!(wallet.escrow_pending(), Money::ZERO);
    }

    #[test]
    fn credits_that_overflow_the_wallet_are_rejected() {
        let (mut wallet, partner) = wallet();
        execute(&mut wallet, credit(partner, u64::MAX, true)).unwrap();

        let err = execute(&mut wallet, credit(partner, 1, false)).unwrap_err();
        assert!(matches!(err, WalletError::Domain(DomainError::Validation(_))));
        assert_eq!(wallet.transactions().len(), 1);
    }

    #[test]
    fn withdrawal_beyond_withdrawable_is_rejected() {
        let (mut wallet, partner) = wallet();
        execute(&mut wallet, credit(partner, 300, false)).unwrap();
        execute(&mut wallet, credit(partner, 1000, true)).unwrap();

        let err = execute(&mut wallet, withdraw(partner, 301)).unwrap_err();
        assert_eq!(
            err,
            WalletError::InsufficientBalance {
                requested: Money::from_major(301),
                available: Money::from_major(300),
            }
        );
        assert_eq!(wallet.transactions().len(), 2);
    }

    #[test]
    fn pending_withdrawals_reserve_balance() {
        let (mut wallet, partner) = wallet();
        execute(&mut wallet, credit(partner, 300, false)).unwrap();
        let first = execute(&mut wallet, withdraw(partner, 200)).unwrap();

        // Balance is untouched until approval, but the 200 is spoken for.
        assert_eq!(wallet.balance(), Money::from_major(300));
        assert_eq!(wallet.withdrawable(), Money::from_major(100));
        assert!(matches!(
            execute(&mut wallet, withdraw(partner, 150)),
            Err(WalletError::InsufficientBalance { .. })
        ));

        execute(&mut wallet, resolve(partner, first, TransactionStatus::Approved)).unwrap();
        assert_eq!(wallet.summary(), WalletBalance {
            balance: Money::from_major(100),
            escrow_pending: Money::ZERO,
            pending_withdrawals: Money::ZERO,
            withdrawable: Money::from_major(100),
        });
    }

    #[test]
    fn rejected_withdrawal_frees_the_amount() {
        let (mut wallet, partner) = wallet();
        execute(&mut wallet, credit(partner, 300, false)).unwrap();
        let tx = execute(&mut wallet, withdraw(partner, 300)).unwrap();
        execute(&mut wallet, resolve(partner, tx, TransactionStatus::Rejected)).unwrap();

        assert_eq!(wallet.withdrawable(), Money::from_major(300));
        assert_eq!(wallet.transaction(tx).unwrap().amount, Money::from_major(300));
    }

    #[test]
    fn transitions_are_kind_specific_and_one_shot() {
        let (mut wallet, partner) = wallet();
        let credit_tx = execute(&mut wallet, credit(partner, 100, true)).unwrap();

        assert!(matches!(
            execute(&mut wallet, resolve(partner, credit_tx, TransactionStatus::Approved)),
            Err(WalletError::InvalidTransition { .. })
        ));
        execute(&mut wallet, resolve(partner, credit_tx, TransactionStatus::Failed)).unwrap();
        assert!(matches!(
            execute(&mut wallet, resolve(partner, credit_tx, TransactionStatus::Success)),
            Err(WalletError::InvalidTransition {
                from: TransactionStatus::Failed,
                ..
            })
        ));
    }

    #[test]
    fn debit_draws_on_withdrawable_balance() {
        let (mut wallet, partner) = wallet();
        execute(&mut wallet, credit(partner, 100, false)).unwrap();
        let debit = |amount| {
            WalletCommand::RecordDebit(RecordDebit {
                partner_id: partner,
                transaction_id: TransactionId::new(),
                amount: Money::from_major(amount),
                linked_order: None,
                occurred_at: test_time(),
            })
        };

        execute(&mut wallet, debit(40)).unwrap();
        assert_eq!(wallet.balance(), Money::from_major(60));
        assert!(matches!(
            execute(&mut wallet, debit(61)),
            Err(WalletError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn duplicate_ids_and_zero_amounts_are_rejected() {
        let (mut wallet, partner) = wallet();
        let command = credit(partner, 10, false);
        let tx = execute(&mut wallet, command.clone()).unwrap();
        assert_eq!(
            execute(&mut wallet, command),
            Err(WalletError::DuplicateTransaction(tx))
        );
        assert_eq!(
            execute(&mut wallet, credit(partner, 0, false)),
            Err(WalletError::InvalidAmount)
        );
    }

    #[test]
    fn commands_for_another_partner_are_rejected() {
        let (wallet, _) = wallet();
        let err = wallet.handle(&credit(PartnerId::new(), 10, false)).unwrap_err();
        assert!(matches!(err, WalletError::Domain(DomainError::InvariantViolation(_))));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Credit(u64, bool),
        Withdraw(u64),
        Resolve(usize, TransactionStatus),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u64..1_000, any::<bool>()).prop_map(|(a, e)| Op::Credit(a, e)),
            (1u64..1_000).prop_map(Op::Withdraw),
            (
                0usize..16,
                prop_oneof![
                    Just(TransactionStatus::Success),
                    Just(TransactionStatus::Failed),
                    Just(TransactionStatus::Approved),
                    Just(TransactionStatus::Rejected),
                ]
            )
                .prop_map(|(i, s)| Op::Resolve(i, s)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// The balance is always the fold over settled transactions, and
        /// accepted withdrawals never exceed what was withdrawable.
        #[test]
        fn balance_is_a_fold_of_settled_transactions(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let (mut wallet, partner) = wallet();
            let mut ids = Vec::new();

            for op in ops {
                let command = match op {
                    Op::Credit(amount, escrow) => credit(partner, amount, escrow),
                    Op::Withdraw(amount) => {
                        let before = wallet.withdrawable();
                        let command = withdraw(partner, amount);
                        let accepted = wallet.handle(&command).is_ok();
                        prop_assert_eq!(accepted, Money::from_major(amount) <= before);
                        command
                    }
                    Op::Resolve(index, status) => match ids.get(index) {
                        Some(&id) => resolve(partner, id, status),
                        None => continue,
                    },
                };
                if let Ok(id) = execute(&mut wallet, command) {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }

                let settled_in: u64 = wallet
                    .transactions()
                    .iter()
                    .filter(|t| t.kind == TransactionKind::Credit && t.status.is_settled())
                    .map(|t| t.amount.minor())
                    .sum();
                let settled_out: u64 = wallet
                    .transactions()
                    .iter()
                    .filter(|t| t.kind != TransactionKind::Credit && t.status.is_settled())
                    .map(|t| t.amount.minor())
                    .sum();
                prop_assert!(settled_out <= settled_in);
                prop_assert_eq!(wallet.balance().minor(), settled_in - settled_out);
                prop_assert!(wallet.pending_withdrawals() <= wallet.balance());
            }
        }
    }
}
