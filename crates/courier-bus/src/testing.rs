//! In-memory implementations of the driven ports for tests.
//!
//! The stores satisfy the persistence contracts without touching disk; the
//! transport wires bus instances together through a shared in-process
//! network, so multi-bus behavior can be exercised without HTTP.

use crate::ports::{
    InboundObserver, MessageJournal, ObserverCell, QueueStore, Subscriber, SubscriptionOp,
    SubscriptionStore, Transport,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_types::{
    BusError, Credentials, Message, MessageId, Principal, QueueName, QueuedMessage, TopicName,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use url::Url;

use crate::ports::JournalCategory;

/// Volatile queue store.
#[derive(Default)]
pub struct InMemoryQueueStore {
    queues: Mutex<HashMap<QueueName, Vec<QueuedMessage>>>,
}

impl InMemoryQueueStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record directly, bypassing the engine (test setup).
    pub fn preload(&self, queue: &QueueName, record: QueuedMessage) {
        self.queues
            .lock()
            .entry(queue.clone())
            .or_default()
            .push(record);
    }

    /// Look up a record by queue and message id (test assertions).
    #[must_use]
    pub fn get(&self, queue: &QueueName, id: MessageId) -> Option<QueuedMessage> {
        self.queues.lock().get(queue).and_then(|records| {
            records
                .iter()
                .find(|r| r.message.headers().message_id() == Some(id))
                .cloned()
        })
    }

    /// All records of a queue (test assertions).
    #[must_use]
    pub fn records(&self, queue: &QueueName) -> Vec<QueuedMessage> {
        self.queues.lock().get(queue).cloned().unwrap_or_default()
    }

    fn update<F>(&self, queue: &QueueName, id: MessageId, apply: F) -> Result<(), BusError>
    where
        F: FnOnce(&mut QueuedMessage),
    {
        let mut queues = self.queues.lock();
        let records = queues
            .get_mut(queue)
            .ok_or_else(|| BusError::Storage(format!("unknown queue: {queue}")))?;
        let record = records
            .iter_mut()
            .find(|r| r.message.headers().message_id() == Some(id))
            .ok_or_else(|| BusError::Storage(format!("unknown record: {id}")))?;
        apply(record);
        Ok(())
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn insert(&self, queue: &QueueName, record: QueuedMessage) -> Result<(), BusError> {
        self.queues
            .lock()
            .entry(queue.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn load_pending(&self, queue: &QueueName) -> Result<Vec<QueuedMessage>, BusError> {
        let mut pending: Vec<QueuedMessage> = self
            .queues
            .lock()
            .get(queue)
            .map(|records| records.iter().filter(|r| !r.is_terminal()).cloned().collect())
            .unwrap_or_default();
        pending.sort_by_key(|r| (r.sequence, r.enqueued_at));
        Ok(pending)
    }

    async fn update_attempts(
        &self,
        queue: &QueueName,
        id: MessageId,
        attempts: u32,
    ) -> Result<(), BusError> {
        self.update(queue, id, |r| r.attempts = attempts)
    }

    async fn mark_acknowledged(
        &self,
        queue: &QueueName,
        id: MessageId,
        attempts: u32,
        when: DateTime<Utc>,
    ) -> Result<(), BusError> {
        self.update(queue, id, |r| {
            r.attempts = attempts;
            r.acknowledged_at = Some(when);
        })
    }

    async fn mark_abandoned(
        &self,
        queue: &QueueName,
        id: MessageId,
        attempts: u32,
        when: DateTime<Utc>,
    ) -> Result<(), BusError> {
        self.update(queue, id, |r| {
            r.attempts = attempts;
            r.abandoned_at = Some(when);
        })
    }
}

/// Volatile subscription store.
#[derive(Default)]
pub struct InMemorySubscriptionStore {
    topics: Mutex<HashMap<TopicName, Vec<Subscriber>>>,
}

impl InMemorySubscriptionStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn upsert(&self, topic: &TopicName, subscriber: Subscriber) -> Result<(), BusError> {
        let mut topics = self.topics.lock();
        let entry = topics.entry(topic.clone()).or_default();
        entry.retain(|s| s.uri != subscriber.uri);
        entry.push(subscriber);
        Ok(())
    }

    async fn remove(&self, topic: &TopicName, uri: &Url) -> Result<(), BusError> {
        if let Some(entry) = self.topics.lock().get_mut(topic) {
            entry.retain(|s| &s.uri != uri);
        }
        Ok(())
    }

    async fn load(&self, topic: &TopicName) -> Result<Vec<Subscriber>, BusError> {
        Ok(self.topics.lock().get(topic).cloned().unwrap_or_default())
    }

    async fn topics(&self) -> Result<Vec<TopicName>, BusError> {
        Ok(self.topics.lock().keys().cloned().collect())
    }
}

/// Journal that records appended messages in memory.
#[derive(Default)]
pub struct InMemoryJournal {
    entries: Mutex<Vec<(JournalCategory, Message)>>,
}

impl InMemoryJournal {
    /// An empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All appended entries (test assertions).
    #[must_use]
    pub fn entries(&self) -> Vec<(JournalCategory, Message)> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl MessageJournal for InMemoryJournal {
    async fn append(&self, category: JournalCategory, message: &Message) -> Result<(), BusError> {
        self.entries.lock().push((category, message.clone()));
        Ok(())
    }
}

/// An in-process network connecting [`InMemoryTransport`] peers by the
/// origin (scheme, host, port) of their base URIs.
#[derive(Default)]
pub struct InMemoryNetwork {
    peers: DashMap<String, Arc<InMemoryTransport>>,
}

impl InMemoryNetwork {
    /// An empty network.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a transport bound to `base` and attach it to this network.
    #[must_use]
    pub fn transport(self: &Arc<Self>, base: Url) -> Arc<InMemoryTransport> {
        let transport = Arc::new(InMemoryTransport {
            network: Arc::downgrade(self),
            observer: ObserverCell::new(),
            fail_sends: Mutex::new(None),
        });
        self.peers.insert(origin_of(&base), Arc::clone(&transport));
        transport
    }

    /// Detach the peer at `base`, simulating an unreachable destination.
    pub fn disconnect(&self, base: &Url) {
        self.peers.remove(&origin_of(base));
    }

    fn peer(&self, uri: &Url) -> Result<Arc<InMemoryTransport>, BusError> {
        self.peers
            .get(&origin_of(uri))
            .map(|p| Arc::clone(&p))
            .ok_or_else(|| BusError::ConnectionRefused(uri.to_string()))
    }
}

fn origin_of(uri: &Url) -> String {
    format!(
        "{}://{}:{}",
        uri.scheme(),
        uri.host_str().unwrap_or_default(),
        uri.port_or_known_default().unwrap_or_default()
    )
}

/// Transport that delivers through an [`InMemoryNetwork`].
pub struct InMemoryTransport {
    network: Weak<InMemoryNetwork>,
    observer: ObserverCell,
    fail_sends: Mutex<Option<BusError>>,
}

impl InMemoryTransport {
    /// Make every subsequent send fail with `error` (or succeed again with
    /// `None`).
    pub fn fail_sends_with(&self, error: Option<BusError>) {
        *self.fail_sends.lock() = error;
    }

    fn network(&self) -> Result<Arc<InMemoryNetwork>, BusError> {
        self.network
            .upgrade()
            .ok_or_else(|| BusError::Transport("network gone".to_string()))
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send_message(
        &self,
        message: &Message,
        _credentials: Option<&Credentials>,
    ) -> Result<(), BusError> {
        if let Some(error) = self.fail_sends.lock().clone() {
            return Err(error);
        }
        let destination = message
            .headers()
            .destination()
            .ok_or_else(|| BusError::InvalidRequest("message has no destination".to_string()))?;
        let peer = self.network()?.peer(&destination)?;
        peer.accept_message(message.clone(), None).await
    }

    async fn send_subscription_request(
        &self,
        op: SubscriptionOp,
        publisher: &Url,
        _credentials: Option<&Credentials>,
        topic: &TopicName,
        subscriber: &Url,
        ttl: Option<Duration>,
    ) -> Result<(), BusError> {
        if let Some(error) = self.fail_sends.lock().clone() {
            return Err(error);
        }
        let peer = self.network()?.peer(publisher)?;
        peer.accept_subscription_request(op, topic.clone(), subscriber.clone(), ttl, None)
            .await
    }

    fn set_observer(&self, observer: Weak<dyn InboundObserver>) {
        self.observer.set(observer);
    }

    async fn accept_message(
        &self,
        message: Message,
        principal: Option<Principal>,
    ) -> Result<(), BusError> {
        self.observer.get()?.on_message(message, principal).await
    }

    async fn accept_subscription_request(
        &self,
        op: SubscriptionOp,
        topic: TopicName,
        subscriber: Url,
        ttl: Option<Duration>,
        principal: Option<Principal>,
    ) -> Result<(), BusError> {
        self.observer
            .get()?
            .on_subscription_request(op, topic, subscriber, ttl, principal)
            .await
    }
}
