//! Append-only JSONL message journal.

use crate::util::storage_err;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_bus::ports::{JournalCategory, MessageJournal};
use courier_types::{BusError, Message, MessageHeaders};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// One journal line.
#[derive(Debug, Serialize, Deserialize)]
pub struct JournalEntry {
    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,
    /// Which leg of the bus the message passed through.
    pub category: JournalCategory,
    /// The message headers.
    pub headers: MessageHeaders,
    /// The message content bytes.
    pub content: Vec<u8>,
}

/// Best-effort journal writing one JSON line per message.
pub struct FsMessageJournal {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl FsMessageJournal {
    /// Open (creating if needed) the journal file at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, BusError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_err("create journal directory", e))?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| storage_err("open journal", e))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Where the journal lives.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MessageJournal for FsMessageJournal {
    async fn append(&self, category: JournalCategory, message: &Message) -> Result<(), BusError> {
        let entry = JournalEntry {
            timestamp: Utc::now(),
            category,
            headers: message.headers().clone(),
            content: message.content().to_vec(),
        };
        let mut line =
            serde_json::to_vec(&entry).map_err(|e| storage_err("serialize journal entry", e))?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|e| storage_err("append journal entry", e))?;
        file.flush()
            .await
            .map_err(|e| storage_err("flush journal", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::MessageId;

    #[tokio::test]
    async fn entries_append_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FsMessageJournal::open(dir.path().join("journal.jsonl"))
            .await
            .unwrap();

        let mut headers = MessageHeaders::new();
        headers.set_message_id(MessageId::new());
        let message = Message::new(headers, b"payload".to_vec());

        journal
            .append(JournalCategory::Sent, &message)
            .await
            .unwrap();
        journal
            .append(JournalCategory::Received, &message)
            .await
            .unwrap();

        let raw = tokio::fs::read_to_string(journal.path()).await.unwrap();
        let lines: Vec<JournalEntry> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].category, JournalCategory::Sent);
        assert_eq!(lines[1].category, JournalCategory::Received);
        assert_eq!(lines[0].content, b"payload");
    }
}
