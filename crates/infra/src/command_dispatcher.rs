//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the aggregate's stream
//!   ↓
//! 2. Rehydrate (apply history in sequence order)
//!   ↓
//! 3. Handle the command (pure decision, produces events)
//!   ↓
//! 4. Append with ExpectedVersion::Exact(loaded revision)
//!   ↓
//! 5. Publish committed events on the bus
//! ```
//!
//! Two writers racing on one stream both load revision N; the second append
//! fails with `DispatchError::Concurrency` and the caller reloads and retries.
//! Publication happens only after a successful append, so the bus never sees an
//! event the store does not have.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use unitcart_core::{Aggregate, AggregateId, ExpectedVersion};
use unitcart_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError<E> {
    /// The aggregate rejected the command.
    #[error("command rejected: {0}")]
    Rejected(E),

    /// The stream moved between load and append.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// Loaded history is out of order or belongs to another stream.
    #[error("corrupt stream: {0}")]
    CorruptStream(String),

    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    /// Publication failed after a successful append; the events are durable.
    #[error("event publication failed: {0}")]
    Publish(String),

    #[error("lock poisoned")]
    LockPoisoned,
}

impl<E> DispatchError<E> {
    pub fn is_concurrency(&self) -> bool {
        matches!(self, DispatchError::Concurrency(_))
    }

    pub fn rejection(&self) -> Option<&E> {
        match self {
            DispatchError::Rejected(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<EventStoreError> for DispatchError<E> {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::LockPoisoned => DispatchError::LockPoisoned,
            other => DispatchError::Store(other),
        }
    }
}

/// Aggregate state after a successful dispatch, with the events it committed.
#[derive(Debug, Clone)]
pub struct Dispatched<A> {
    pub aggregate: A,
    pub committed: Vec<StoredEvent>,
}

/// Reusable command execution engine.
///
/// `S` is the event store, `B` the bus committed events are published on. The
/// aggregates it drives must be deterministic and free of IO.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate an aggregate without handling a command.
    pub fn load<A>(
        &self,
        id: A::Id,
        make_aggregate: impl FnOnce(A::Id) -> A,
    ) -> Result<A, DispatchError<A::Error>>
    where
        A: Aggregate,
        A::Id: Copy + Into<AggregateId>,
        A::Event: DeserializeOwned,
    {
        let aggregate_id = id.into();
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(id);
        apply_history(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Run one command through load → rehydrate → handle → append → publish.
    ///
    /// A command that decides no events commits nothing and returns the current
    /// state.
    pub fn dispatch<A>(
        &self,
        id: A::Id,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(A::Id) -> A,
    ) -> Result<Dispatched<A>, DispatchError<A::Error>>
    where
        A: Aggregate,
        A::Id: Copy + Into<AggregateId>,
        A::Event: unitcart_events::Event + Serialize + DeserializeOwned,
    {
        let aggregate_id: AggregateId = id.into();

        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        let mut aggregate = make_aggregate(id);
        apply_history(&mut aggregate, &history)?;

        let decided = aggregate.handle(&command).map_err(DispatchError::Rejected)?;
        if decided.is_empty() {
            return Ok(Dispatched {
                aggregate,
                committed: Vec::new(),
            });
        }

        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = match self.store.append(uncommitted, expected) {
            Ok(committed) => committed,
            Err(err) => {
                warn!(aggregate_id = %aggregate_id, aggregate_type, error = %err, "append failed");
                return Err(err.into());
            }
        };

        for event in &decided {
            aggregate.apply(event);
        }

        for stored in &committed {
            debug!(
                aggregate_id = %aggregate_id,
                event_type = %stored.event_type,
                sequence_number = stored.sequence_number,
                "event committed"
            );
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(Dispatched {
            aggregate,
            committed,
        })
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream<E>(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError<E>> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::CorruptStream(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::CorruptStream(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError<A::Error>>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use std::sync::Arc;
    use unitcart_core::{AggregateRoot, DomainError, Money, PartnerId, TransactionId};
    use unitcart_events::InMemoryEventBus;
    use unitcart_wallet::{RecordCredit, Wallet, WalletCommand, WalletError};

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn dispatcher() -> (CommandDispatcher<Arc<InMemoryEventStore>, Bus>, Bus) {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        (
            CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), bus.clone()),
            bus,
        )
    }

    fn credit(partner_id: PartnerId, amount: u64) -> WalletCommand {
        WalletCommand::RecordCredit(RecordCredit {
            partner_id,
            transaction_id: TransactionId::new(),
            amount: Money::from_major(amount),
            linked_order: None,
            escrow: false,
            occurred_at: chrono::Utc::now(),
        })
    }

    #[test]
    fn dispatch_persists_publishes_and_returns_state() {
        let (dispatcher, bus) = dispatcher();
        let subscription = bus.subscribe();
        let partner = PartnerId::new();

        let first = dispatcher
            .dispatch(partner, "wallet", credit(partner, 10), Wallet::empty)
            .unwrap();
        let second = dispatcher
            .dispatch(partner, "wallet", credit(partner, 5), Wallet::empty)
            .unwrap();

        assert_eq!(first.committed[0].sequence_number, 1);
        assert_eq!(second.committed[0].sequence_number, 2);
        assert_eq!(second.aggregate.version(), 2);
        assert_eq!(second.aggregate.balance(), Money::from_major(15));

        let published = subscription.drain();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].event_type(), "wallet.credit_recorded");
    }

    #[test]
    fn rejected_commands_commit_nothing() {
        let (dispatcher, bus) = dispatcher();
        let subscription = bus.subscribe();
        let partner = PartnerId::new();

        let err = dispatcher
            .dispatch(partner, "wallet", credit(PartnerId::new(), 10), Wallet::empty)
            .unwrap_err();
        assert!(matches!(
            err.rejection(),
            Some(WalletError::Domain(DomainError::InvariantViolation(_)))
        ));
        assert!(dispatcher.store().load_stream(partner.into()).unwrap().is_empty());
        assert!(subscription.drain().is_empty());
    }

    #[test]
    fn load_rehydrates_from_history() {
        let (dispatcher, _bus) = dispatcher();
        let partner = PartnerId::new();
        dispatcher
            .dispatch(partner, "wallet", credit(partner, 7), Wallet::empty)
            .unwrap();

        let wallet = dispatcher.load(partner, Wallet::empty).unwrap();
        assert_eq!(wallet.balance(), Money::from_major(7));
        assert_eq!(*wallet.id(), partner);
    }
}
