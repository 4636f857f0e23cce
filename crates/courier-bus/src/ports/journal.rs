//! Best-effort message journaling port.

use async_trait::async_trait;
use courier_types::{BusError, Message};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which leg of the bus a journaled message passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalCategory {
    /// Addressed and handed to the transport (or outbound queue).
    Sent,
    /// Accepted from a peer.
    Received,
    /// Published to a topic.
    Published,
}

impl fmt::Display for JournalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent => f.write_str("sent"),
            Self::Received => f.write_str("received"),
            Self::Published => f.write_str("published"),
        }
    }
}

/// Append-only record of message traffic.
///
/// Journaling is advisory: the bus logs a warning and carries on when an
/// append fails.
#[async_trait]
pub trait MessageJournal: Send + Sync {
    /// Append one message under the given category.
    async fn append(&self, category: JournalCategory, message: &Message) -> Result<(), BusError>;
}
