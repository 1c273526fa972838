//! In-process publish/subscribe broker for insertion events.

use dashmap::DashMap;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::models::Message;

/// Default per-subscriber buffer size.
pub const DEFAULT_FEED_CAPACITY: usize = 64;

/// Handle identifying one registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Reasons a subscription stops yielding events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvError {
    /// Events were dropped because the subscriber buffer was full.
    #[error("subscriber lagged behind by {0} events")]
    Lagged(u64),
    /// The subscription was removed from the broker.
    #[error("feed closed")]
    Closed,
}

#[derive(Debug)]
struct Slot {
    tx: mpsc::Sender<Message>,
    missed: Arc<AtomicU64>,
}

#[derive(Debug)]
struct BrokerInner {
    subscribers: DashMap<SubscriptionId, Slot>,
    next_id: AtomicU64,
    capacity: usize,
}

impl BrokerInner {
    fn remove(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            log::debug!("feed subscriber {} unregistered", id);
        }
        removed
    }
}

/// Fan-out broker. Every subscriber gets each published message once.
///
/// Subscribers register through [`Broker::subscribe`] and leave through
/// [`Broker::unsubscribe`] or by dropping their [`Subscription`].
#[derive(Debug, Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

impl Broker {
    /// Create a broker with the given per-subscriber buffer size.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(0),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let missed = Arc::new(AtomicU64::new(0));

        self.inner.subscribers.insert(
            id,
            Slot {
                tx,
                missed: Arc::clone(&missed),
            },
        );
        log::debug!("feed subscriber {} registered", id);

        Subscription {
            id,
            rx,
            missed,
            broker: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.remove(id)
    }

    /// Deliver a message to every subscriber. Returns the number reached.
    pub fn publish(&self, message: &Message) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.inner.subscribers.iter() {
            match entry.value().tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    entry.value().missed.fetch_add(1, Ordering::AcqRel);
                    log::warn!("feed subscriber {} is full, dropping {}", entry.key(), message.id);
                }
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        for id in closed {
            self.inner.remove(id);
        }

        delivered
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Check if a subscriber is still registered.
    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.contains_key(&id)
    }

    /// Close every subscription, as if the feed connection dropped.
    pub fn disconnect_all(&self) -> usize {
        let count = self.inner.subscribers.len();
        self.inner.subscribers.clear();
        if count > 0 {
            log::warn!("feed disconnected {} subscribers", count);
        }
        count
    }
}

/// Receiving side of a broker registration.
///
/// Dropping it unregisters from the broker.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<Message>,
    missed: Arc<AtomicU64>,
    broker: Weak<BrokerInner>,
}

impl Subscription {
    /// The registration handle.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next message.
    ///
    /// Reports [`RecvError::Lagged`] once for any events dropped since the
    /// last call, and [`RecvError::Closed`] after buffered events are drained
    /// from a removed subscription.
    pub async fn recv(&mut self) -> Result<Message, RecvError> {
        let missed = self.missed.swap(0, Ordering::AcqRel);
        if missed > 0 {
            return Err(RecvError::Lagged(missed));
        }
        self.rx.recv().await.ok_or(RecvError::Closed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(broker) = self.broker.upgrade() {
            broker.remove(self.id);
        }
    }
}
