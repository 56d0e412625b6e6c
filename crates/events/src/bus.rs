//! Event publishing/subscription abstraction.
//!
//! The bus distributes events that are already persisted; the event store stays
//! the source of truth. Delivery is at-least-once and consumers must tolerate
//! duplicates.
//!
//! Inside this workspace nothing subscribes yet: the dispatcher publishes every
//! committed order and wallet event so read models and notifiers can attach
//! with `subscribe` without touching the write path.

use std::sync::Arc;
use std::sync::mpsc::Receiver;

/// A subscription to a bus. Each subscription receives a copy of every message
/// published after it was created.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Drain everything currently queued without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Transport-agnostic pub/sub with broadcast semantics.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
