//! Subscriber registry shared by the service shell and the broadcast sink.
//!
//! The shell adds a [`Subscriber`] when a connection is accepted and removes
//! it on disconnect. The broadcast sink takes a [`RegistrySnapshot`] for
//! every reading and removes subscribers whose delivery failed.
//!
//! # Consistency
//!
//! The live set is an `Arc<HashMap>` behind a [`RwLock`]. A snapshot clones
//! the `Arc` under the read lock, so it is a complete view from between two
//! mutations and never a torn one. A mutation clones the map only when a
//! snapshot is still holding the previous version.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::sync::mpsc::error::SendTimeoutError;
use uuid::Uuid;

/// Serialized message handed to subscribers. Shared, not copied, across
/// every subscriber of one broadcast.
pub type WireMessage = Arc<str>;

/// Identity of one subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Mint a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors from a registry mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The registry is at its configured capacity.
    #[error("subscriber registry full ({capacity} subscribers)")]
    Full {
        /// The configured capacity.
        capacity: usize,
    },
}

/// Errors from delivering one message to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The receiving side of the connection is gone.
    #[error("subscriber {id} closed")]
    Closed {
        /// The subscriber that failed.
        id: SubscriberId,
    },

    /// The subscriber did not accept the message in time.
    #[error("subscriber {id} timed out after {timeout_ms}ms")]
    TimedOut {
        /// The subscriber that failed.
        id: SubscriberId,
        /// The bound that was exceeded.
        timeout_ms: u64,
    },
}

impl DeliveryError {
    /// The subscriber the delivery was addressed to.
    pub const fn id(&self) -> SubscriberId {
        match self {
            Self::Closed { id } | Self::TimedOut { id, .. } => *id,
        }
    }
}

/// A live-push endpoint: the sending half of a per-connection channel.
///
/// The connection task owns the matching receiver and forwards messages in
/// order. Equality is by [`SubscriberId`].
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<WireMessage>,
}

impl Subscriber {
    /// Create a subscriber and the receiver its connection task drains.
    ///
    /// `buffer` is clamped to at least one message.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<WireMessage>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let subscriber = Self {
            id: SubscriberId::new(),
            tx,
        };
        (subscriber, rx)
    }

    /// The subscriber's identity.
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether the receiving side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queue one message, waiting at most `timeout` for buffer space.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Closed`] if the receiver is gone, or
    /// [`DeliveryError::TimedOut`] if the buffer stayed full.
    pub async fn deliver(
        &self,
        message: WireMessage,
        timeout: Duration,
    ) -> Result<(), DeliveryError> {
        match self.tx.send_timeout(message, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Closed(_)) => Err(DeliveryError::Closed { id: self.id }),
            Err(SendTimeoutError::Timeout(_)) => Err(DeliveryError::TimedOut {
                id: self.id,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Subscriber {}

/// Immutable point-in-time view of the registered subscribers.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot(Arc<HashMap<SubscriberId, Subscriber>>);

impl RegistrySnapshot {
    /// Number of subscribers in the view.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the view contains the given subscriber.
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.0.contains_key(&id)
    }

    /// Iterate the subscribers in the view (unordered).
    pub fn iter(&self) -> impl Iterator<Item = &Subscriber> {
        self.0.values()
    }
}

/// Cloneable handle to the shared subscriber set.
#[derive(Debug, Clone, Default)]
pub struct SubscriberRegistry {
    live: Arc<RwLock<Arc<HashMap<SubscriberId, Subscriber>>>>,
    capacity: usize,
}

impl SubscriberRegistry {
    /// Create an unbounded registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding at most `capacity` subscribers
    /// (0 = unlimited).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            live: Arc::default(),
            capacity,
        }
    }

    /// Configured capacity (0 = unlimited).
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a subscriber. Adding one that is already present is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Full`] if the subscriber is new and the
    /// registry is at capacity.
    pub async fn add(&self, subscriber: Subscriber) -> Result<(), RegistryError> {
        let mut live = self.live.write().await;
        if live.contains_key(&subscriber.id) {
            return Ok(());
        }
        if self.capacity > 0 && live.len() >= self.capacity {
            return Err(RegistryError::Full {
                capacity: self.capacity,
            });
        }
        Arc::make_mut(&mut *live).insert(subscriber.id, subscriber);
        Ok(())
    }

    /// Deregister a subscriber. Returns whether it was present.
    pub async fn remove(&self, id: SubscriberId) -> bool {
        let mut live = self.live.write().await;
        if !live.contains_key(&id) {
            return false;
        }
        Arc::make_mut(&mut *live).remove(&id).is_some()
    }

    /// Take an immutable view of the current set.
    pub async fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot(Arc::clone(&*self.live.read().await))
    }

    /// Whether the given subscriber is registered.
    pub async fn contains(&self, id: SubscriberId) -> bool {
        self.live.read().await.contains_key(&id)
    }

    /// Number of registered subscribers.
    pub async fn len(&self) -> usize {
        self.live.read().await.len()
    }

    /// Whether no subscribers are registered.
    pub async fn is_empty(&self) -> bool {
        self.live.read().await.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn add_and_remove() {
        let registry = SubscriberRegistry::new();
        let (sub, _rx) = Subscriber::channel(4);
        let id = sub.id();

        registry.add(sub).await.unwrap();
        assert!(registry.contains(id).await);
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove(id).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn add_and_remove_are_idempotent() {
        let registry = SubscriberRegistry::new();
        let (sub, _rx) = Subscriber::channel(4);
        let id = sub.id();

        registry.add(sub.clone()).await.unwrap();
        registry.add(sub).await.unwrap();
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove(id).await);
        assert!(!registry.remove(id).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn snapshot_is_unaffected_by_later_mutations() {
        let registry = SubscriberRegistry::new();
        let (a, _rx_a) = Subscriber::channel(4);
        let (b, _rx_b) = Subscriber::channel(4);
        let (a_id, b_id) = (a.id(), b.id());
        registry.add(a).await.unwrap();

        let before = registry.snapshot().await;
        registry.add(b).await.unwrap();
        registry.remove(a_id).await;
        let after = registry.snapshot().await;

        assert!(before.contains(a_id));
        assert!(!before.contains(b_id));
        assert_eq!(before.len(), 1);

        assert!(!after.contains(a_id));
        assert!(after.contains(b_id));
    }

    #[tokio::test]
    async fn capacity_guard_rejects_new_subscribers_only() {
        let registry = SubscriberRegistry::with_capacity(1);
        assert_eq!(registry.capacity(), 1);
        assert_eq!(SubscriberRegistry::new().capacity(), 0);
        let (a, _rx_a) = Subscriber::channel(4);
        let (b, _rx_b) = Subscriber::channel(4);

        registry.add(a.clone()).await.unwrap();
        assert_eq!(
            registry.add(b).await,
            Err(RegistryError::Full { capacity: 1 })
        );
        // Re-adding a present subscriber is still a no-op success.
        registry.add(a).await.unwrap();
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn deliver_reports_closed_receiver() {
        let (sub, rx) = Subscriber::channel(4);
        drop(rx);
        assert!(sub.is_closed());
        let err = sub
            .deliver(Arc::from("{}"), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err, DeliveryError::Closed { id: sub.id() });
    }

    #[tokio::test]
    async fn deliver_times_out_on_full_buffer() {
        let (sub, _rx) = Subscriber::channel(1);
        sub.deliver(Arc::from("first"), Duration::from_millis(10))
            .await
            .unwrap();
        let err = sub
            .deliver(Arc::from("second"), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::TimedOut { timeout_ms: 10, .. }));
        assert_eq!(err.id(), sub.id());
    }

    #[tokio::test]
    async fn concurrent_snapshots_see_every_acknowledged_add() {
        let registry = SubscriberRegistry::new();
        let mut acks = Vec::new();
        let mut releases = Vec::new();
        let mut tasks = Vec::new();
        let mut ids = Vec::new();

        for _ in 0..16 {
            let (sub, rx) = Subscriber::channel(1);
            ids.push(sub.id());
            let (ack_tx, ack_rx) = oneshot::channel::<()>();
            let (go_tx, go_rx) = oneshot::channel::<()>();
            acks.push(ack_rx);
            releases.push(go_tx);
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let _rx = rx;
                let id = sub.id();
                registry.add(sub).await.unwrap();
                ack_tx.send(()).unwrap();
                go_rx.await.unwrap();
                registry.remove(id).await;
            }));
        }

        for ack in acks {
            ack.await.unwrap();
        }
        let during = registry.snapshot().await;
        assert_eq!(during.len(), 16);
        assert!(ids.iter().all(|id| during.contains(*id)));

        for go in releases {
            go.send(()).unwrap();
        }
        for task in tasks {
            task.await.unwrap();
        }
        let after = registry.snapshot().await;
        assert!(after.is_empty());
        // The earlier view is untouched.
        assert_eq!(during.len(), 16);
    }
}
