//! The persistent queued-message record.

use crate::message::Message;
use crate::principal::Principal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One persisted entry of a durable queue.
///
/// Exactly one of three states holds at any time: still pending,
/// acknowledged, or abandoned. Abandonment only happens once the attempt
/// count has reached the queue's maximum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// The message awaiting dispatch.
    pub message: Message,
    /// Identity of the sender that enqueued it, when authenticated.
    pub principal: Option<Principal>,
    /// Number of dispatch attempts made so far.
    pub attempts: u32,
    /// When the record was inserted.
    pub enqueued_at: DateTime<Utc>,
    /// Monotone per-queue sequence number; orders recovery replay.
    pub sequence: u64,
    /// Set once the message was acknowledged (terminal).
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Set once the message was abandoned after exhausting attempts (terminal).
    pub abandoned_at: Option<DateTime<Utc>>,
}

impl QueuedMessage {
    /// A fresh pending record.
    #[must_use]
    pub fn new(message: Message, principal: Option<Principal>, sequence: u64) -> Self {
        Self {
            message,
            principal,
            attempts: 0,
            enqueued_at: Utc::now(),
            sequence,
            acknowledged_at: None,
            abandoned_at: None,
        }
    }

    /// True when the record reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.acknowledged_at.is_some() || self.abandoned_at.is_some()
    }

    /// True when the record was acknowledged.
    #[must_use]
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_at.is_some()
    }

    /// True when the record was abandoned.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.abandoned_at.is_some()
    }
}
