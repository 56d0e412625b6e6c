//! Infrastructure layer: event store, command dispatch, repositories, config.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod order_repository;
pub mod wallets;

pub use command_dispatcher::{CommandDispatcher, DispatchError, Dispatched};
pub use config::StorefrontConfig;
pub use event_store::{
    EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent,
};
pub use order_repository::{Claim, ORDER_AGGREGATE_TYPE, OrderError, OrderRepository};
pub use wallets::{WALLET_AGGREGATE_TYPE, WalletService, WalletServiceError};
