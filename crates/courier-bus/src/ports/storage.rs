//! Persistence ports for queues and subscription tracking.
//!
//! Each operation is one atomic unit against the backend; the engine never
//! issues two concurrent mutations for the same queue entry, so backends
//! only need per-operation atomicity, not cross-entry transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_types::{BusError, MessageId, QueueName, QueuedMessage, TopicName};
use serde::{Deserialize, Serialize};
use url::Url;

/// Durable storage for queued messages.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a fresh pending record.
    async fn insert(&self, queue: &QueueName, record: QueuedMessage) -> Result<(), BusError>;

    /// All non-terminal records for a queue, in enqueue order.
    ///
    /// Crash recovery replays exactly this set.
    async fn load_pending(&self, queue: &QueueName) -> Result<Vec<QueuedMessage>, BusError>;

    /// Record a failed dispatch attempt.
    async fn update_attempts(
        &self,
        queue: &QueueName,
        id: MessageId,
        attempts: u32,
    ) -> Result<(), BusError>;

    /// Transition a record to the acknowledged terminal state.
    async fn mark_acknowledged(
        &self,
        queue: &QueueName,
        id: MessageId,
        attempts: u32,
        when: DateTime<Utc>,
    ) -> Result<(), BusError>;

    /// Transition a record to the abandoned terminal state.
    async fn mark_abandoned(
        &self,
        queue: &QueueName,
        id: MessageId,
        attempts: u32,
        when: DateTime<Utc>,
    ) -> Result<(), BusError>;
}

/// One remote subscriber of a local topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    /// Base URI the subscriber wants events delivered to.
    pub uri: Url,
    /// When the subscription lapses; `None` means non-expiring.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Subscriber {
    /// True when the subscription has lapsed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|e| e <= now)
    }
}

/// Durable storage for (topic → subscribers) tracking.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert or replace the record for `(topic, subscriber.uri)`.
    async fn upsert(&self, topic: &TopicName, subscriber: Subscriber) -> Result<(), BusError>;

    /// Remove the record for `(topic, uri)`; missing records are not an error.
    async fn remove(&self, topic: &TopicName, uri: &Url) -> Result<(), BusError>;

    /// All records for a topic, expired ones included.
    async fn load(&self, topic: &TopicName) -> Result<Vec<Subscriber>, BusError>;

    /// All topics with at least one record.
    async fn topics(&self) -> Result<Vec<TopicName>, BusError>;
}
