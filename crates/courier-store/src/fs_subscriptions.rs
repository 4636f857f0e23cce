//! Filesystem subscription store: one JSON document per topic.

use crate::util::{is_document, open_root, read_document, safe_component, storage_err, write_document};
use async_trait::async_trait;
use courier_bus::ports::{Subscriber, SubscriptionStore};
use courier_types::{BusError, TopicName};
use std::fs::File;
use std::path::PathBuf;
use tokio::sync::Mutex;
use url::Url;

/// Subscription persistence rooted at one directory.
///
/// Layout: `{root}/{topic}.json` holding the topic's subscriber list, plus
/// `{root}/.lock`.
pub struct FsSubscriptionStore {
    root: PathBuf,
    // Upserts and removals for one topic read-modify-replace the whole
    // document; serialize them so concurrent renewals cannot lose entries.
    write_lock: Mutex<()>,
    _lock: File,
}

impl FsSubscriptionStore {
    /// Open (creating if needed) a subscription store at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BusError> {
        let root = root.into();
        let lock = open_root(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
            _lock: lock,
        })
    }

    fn topic_path(&self, topic: &TopicName) -> Result<PathBuf, BusError> {
        safe_component(topic.as_str())?;
        Ok(self.root.join(format!("{topic}.json")))
    }

    async fn read_topic(&self, topic: &TopicName) -> Result<Vec<Subscriber>, BusError> {
        let path = self.topic_path(topic)?;
        match tokio::fs::try_exists(&path).await {
            Ok(true) => read_document(&path).await,
            Ok(false) => Ok(Vec::new()),
            Err(e) => Err(storage_err("probe topic document", e)),
        }
    }
}

#[async_trait]
impl SubscriptionStore for FsSubscriptionStore {
    async fn upsert(&self, topic: &TopicName, subscriber: Subscriber) -> Result<(), BusError> {
        let _guard = self.write_lock.lock().await;
        let mut subscribers = self.read_topic(topic).await?;
        subscribers.retain(|s| s.uri != subscriber.uri);
        subscribers.push(subscriber);
        write_document(&self.topic_path(topic)?, &subscribers).await
    }

    async fn remove(&self, topic: &TopicName, uri: &Url) -> Result<(), BusError> {
        let _guard = self.write_lock.lock().await;
        let mut subscribers = self.read_topic(topic).await?;
        let before = subscribers.len();
        subscribers.retain(|s| &s.uri != uri);
        if subscribers.len() == before {
            return Ok(());
        }
        write_document(&self.topic_path(topic)?, &subscribers).await
    }

    async fn load(&self, topic: &TopicName) -> Result<Vec<Subscriber>, BusError> {
        self.read_topic(topic).await
    }

    async fn topics(&self) -> Result<Vec<TopicName>, BusError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| storage_err("read store root", e))?;
        let mut topics = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_err("read store root", e))?
        {
            let path = entry.path();
            if !is_document(&path) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Ok(topic) = TopicName::new(stem) {
                    topics.push(topic);
                }
            }
        }
        Ok(topics)
    }
}
