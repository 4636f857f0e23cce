//! # Subscription Tracker
//!
//! Persists which remote URIs subscribe to each local topic, with TTLs, and
//! answers "who subscribes to T?" with a snapshot taken atomically at the
//! time of the call. A background sweep removes lapsed entries; reads also
//! filter them, so an overdue sweep never leaks expired subscribers into a
//! publish fan-out.

use crate::ports::{Subscriber, SubscriptionStore};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use courier_types::{BusError, TopicName};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};
use url::Url;

/// Tracks (topic → subscribers) over a persistence port, with an in-memory
/// table for snapshot reads.
pub struct SubscriptionTracker {
    store: Arc<dyn SubscriptionStore>,
    table: RwLock<HashMap<TopicName, HashMap<Url, Option<DateTime<Utc>>>>>,
}

impl SubscriptionTracker {
    /// Load all persisted subscriptions and build the tracker.
    pub async fn init(store: Arc<dyn SubscriptionStore>) -> Result<Self, BusError> {
        let mut table = HashMap::new();
        for topic in store.topics().await? {
            let subscribers = store.load(&topic).await?;
            let entry: HashMap<Url, Option<DateTime<Utc>>> = subscribers
                .into_iter()
                .map(|s| (s.uri, s.expires_at))
                .collect();
            table.insert(topic, entry);
        }
        Ok(Self {
            store,
            table: RwLock::new(table),
        })
    }

    /// Insert or renew a subscription.
    ///
    /// Upsert by (topic, uri): a newer TTL replaces the previous expiry.
    /// A zero or absent TTL records a non-expiring subscription.
    pub async fn add_subscription(
        &self,
        topic: &TopicName,
        subscriber: Url,
        ttl: Option<Duration>,
    ) -> Result<(), BusError> {
        let expires_at = ttl.filter(|t| !t.is_zero()).map(|t| {
            Utc::now()
                + ChronoDuration::from_std(t).unwrap_or_else(|_| ChronoDuration::max_value())
        });

        self.store
            .upsert(
                topic,
                Subscriber {
                    uri: subscriber.clone(),
                    expires_at,
                },
            )
            .await?;

        self.table
            .write()
            .entry(topic.clone())
            .or_default()
            .insert(subscriber.clone(), expires_at);
        debug!(topic = %topic, subscriber = %subscriber, ?expires_at, "subscription added");
        Ok(())
    }

    /// Remove a subscription; removing an absent one is not an error.
    pub async fn remove_subscription(
        &self,
        topic: &TopicName,
        subscriber: &Url,
    ) -> Result<(), BusError> {
        self.store.remove(topic, subscriber).await?;
        if let Some(entry) = self.table.write().get_mut(topic) {
            entry.remove(subscriber);
        }
        debug!(topic = %topic, subscriber = %subscriber, "subscription removed");
        Ok(())
    }

    /// Snapshot of the live subscribers of a topic.
    ///
    /// Entries past their expiry are excluded even if the sweep has not run
    /// yet. Additions and removals after the call affect only later
    /// publishes.
    #[must_use]
    pub fn subscribers(&self, topic: &TopicName) -> Vec<Url> {
        let now = Utc::now();
        self.table
            .read()
            .get(topic)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|(_, expires)| expires.map_or(true, |e| e > now))
                    .map(|(uri, _)| uri.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove lapsed entries from the table and the store; returns how many.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let lapsed: Vec<(TopicName, Url)> = {
            let table = self.table.read();
            table
                .iter()
                .flat_map(|(topic, entry)| {
                    entry
                        .iter()
                        .filter(|(_, expires)| expires.is_some_and(|e| e <= now))
                        .map(|(uri, _)| (topic.clone(), uri.clone()))
                })
                .collect()
        };

        let mut removed = 0;
        for (topic, uri) in lapsed {
            if let Err(e) = self.store.remove(&topic, &uri).await {
                warn!(topic = %topic, subscriber = %uri, error = %e,
                      "failed to remove expired subscription");
                continue;
            }
            if let Some(entry) = self.table.write().get_mut(&topic) {
                entry.remove(&uri);
            }
            removed += 1;
        }
        if removed > 0 {
            debug!(removed, "swept expired subscriptions");
        }
        removed
    }
}

/// Periodically sweep expired subscriptions until shutdown.
pub async fn sweep_task(
    tracker: Arc<SubscriptionTracker>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                tracker.sweep().await;
            }
        }
    }
}
