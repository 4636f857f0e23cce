//! Filesystem queue store: one directory per queue, one JSON document per
//! message.

use crate::util::{
    is_document, open_root, read_document, safe_component, storage_err, write_document,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_bus::ports::QueueStore;
use courier_types::{BusError, MessageId, QueueName, QueuedMessage};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Queue persistence rooted at one directory.
///
/// Layout: `{root}/{queue}/{message_id}.json`, plus `{root}/.lock`.
pub struct FsQueueStore {
    root: PathBuf,
    _lock: File,
}

impl FsQueueStore {
    /// Open (creating if needed) a queue store at `root`.
    ///
    /// Fails with `Storage` when another process holds the root.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BusError> {
        let root = root.into();
        let lock = open_root(&root)?;
        Ok(Self { root, _lock: lock })
    }

    fn queue_dir(&self, queue: &QueueName) -> Result<PathBuf, BusError> {
        safe_component(queue.as_str())?;
        Ok(self.root.join(queue.as_str()))
    }

    fn record_path(dir: &Path, id: MessageId) -> PathBuf {
        dir.join(format!("{id}.json"))
    }

    async fn rewrite<F>(&self, queue: &QueueName, id: MessageId, apply: F) -> Result<(), BusError>
    where
        F: FnOnce(&mut QueuedMessage),
    {
        let path = Self::record_path(&self.queue_dir(queue)?, id);
        let mut record: QueuedMessage = read_document(&path).await?;
        apply(&mut record);
        write_document(&path, &record).await
    }
}

#[async_trait]
impl QueueStore for FsQueueStore {
    async fn insert(&self, queue: &QueueName, record: QueuedMessage) -> Result<(), BusError> {
        let dir = self.queue_dir(queue)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_err("create queue directory", e))?;
        let id = record
            .message
            .headers()
            .message_id()
            .ok_or_else(|| BusError::Storage("queued message has no id".to_string()))?;
        write_document(&Self::record_path(&dir, id), &record).await
    }

    async fn load_pending(&self, queue: &QueueName) -> Result<Vec<QueuedMessage>, BusError> {
        let dir = self.queue_dir(queue)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            // A queue that never persisted anything has no directory yet.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err("read queue directory", e)),
        };

        let mut pending = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_err("read queue directory", e))?
        {
            let path = entry.path();
            if !is_document(&path) {
                continue;
            }
            match read_document::<QueuedMessage>(&path).await {
                Ok(record) if !record.is_terminal() => pending.push(record),
                Ok(_) => {}
                Err(e) => {
                    // A torn or foreign file must not block recovery of the
                    // rest of the queue.
                    warn!(path = %path.display(), error = %e, "skipping unreadable queue record");
                }
            }
        }
        pending.sort_by_key(|r| (r.sequence, r.enqueued_at));
        Ok(pending)
    }

    async fn update_attempts(
        &self,
        queue: &QueueName,
        id: MessageId,
        attempts: u32,
    ) -> Result<(), BusError> {
        self.rewrite(queue, id, |r| r.attempts = attempts).await
    }

    async fn mark_acknowledged(
        &self,
        queue: &QueueName,
        id: MessageId,
        attempts: u32,
        when: DateTime<Utc>,
    ) -> Result<(), BusError> {
        self.rewrite(queue, id, |r| {
            r.attempts = attempts;
            r.acknowledged_at = Some(when);
        })
        .await
    }

    async fn mark_abandoned(
        &self,
        queue: &QueueName,
        id: MessageId,
        attempts: u32,
        when: DateTime<Utc>,
    ) -> Result<(), BusError> {
        self.rewrite(queue, id, |r| {
            r.attempts = attempts;
            r.abandoned_at = Some(when);
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::{Message, MessageHeaders};

    fn queue(name: &str) -> QueueName {
        QueueName::new(name).unwrap()
    }

    fn record(sequence: u64) -> QueuedMessage {
        let mut headers = MessageHeaders::new();
        headers.set_message_id(MessageId::new());
        QueuedMessage::new(Message::new(headers, b"{\"v\":1}".to_vec()), None, sequence)
    }

    #[tokio::test]
    async fn insert_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsQueueStore::open(dir.path()).unwrap();

        let a = record(0);
        let b = record(1);
        store.insert(&queue("q"), b.clone()).await.unwrap();
        store.insert(&queue("q"), a.clone()).await.unwrap();

        let pending = store.load_pending(&queue("q")).await.unwrap();
        assert_eq!(pending, vec![a, b]);
    }

    #[tokio::test]
    async fn terminal_records_are_not_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsQueueStore::open(dir.path()).unwrap();

        let acked = record(0);
        let abandoned = record(1);
        let pending = record(2);
        for r in [&acked, &abandoned, &pending] {
            store.insert(&queue("q"), (*r).clone()).await.unwrap();
        }

        let acked_id = acked.message.headers().message_id().unwrap();
        let abandoned_id = abandoned.message.headers().message_id().unwrap();
        store
            .mark_acknowledged(&queue("q"), acked_id, 1, Utc::now())
            .await
            .unwrap();
        store
            .mark_abandoned(&queue("q"), abandoned_id, 10, Utc::now())
            .await
            .unwrap();

        let loaded = store.load_pending(&queue("q")).await.unwrap();
        assert_eq!(loaded, vec![pending]);
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let ids: Vec<MessageId>;
        {
            let store = FsQueueStore::open(dir.path()).unwrap();
            let records = [record(0), record(1), record(2)];
            ids = records
                .iter()
                .map(|r| r.message.headers().message_id().unwrap())
                .collect();
            for r in &records {
                store.insert(&queue("q"), r.clone()).await.unwrap();
            }
            store
                .update_attempts(&queue("q"), ids[1], 4)
                .await
                .unwrap();
        }

        let store = FsQueueStore::open(dir.path()).unwrap();
        let loaded = store.load_pending(&queue("q")).await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(
            loaded
                .iter()
                .map(|r| r.message.headers().message_id().unwrap())
                .collect::<Vec<_>>(),
            ids
        );
        assert_eq!(loaded[1].attempts, 4);
    }

    #[tokio::test]
    async fn empty_queue_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsQueueStore::open(dir.path()).unwrap();
        assert!(store.load_pending(&queue("never-used")).await.unwrap().is_empty());
    }

    #[test]
    fn second_open_of_same_root_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let _store = FsQueueStore::open(dir.path()).unwrap();
        assert!(matches!(
            FsQueueStore::open(dir.path()),
            Err(BusError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn unsafe_queue_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsQueueStore::open(dir.path()).unwrap();
        let err = store
            .load_pending(&queue("../escape"))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Storage(_)));
    }
}
