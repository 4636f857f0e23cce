//! # Queue Engine
//!
//! Durable FIFO queues with listener dispatch, bounded concurrency, retry,
//! expiration, and acknowledgement.
//!
//! ## Lifecycle
//!
//! Creating a queue replays all non-terminal persisted records into an
//! in-memory buffer and starts a pull loop. The pull loop launches one
//! process task per message; a semaphore sized by the queue's concurrency
//! limit bounds how many of those run at once, so the buffer drains into
//! in-flight tasks that are each backpressured by the semaphore.
//!
//! ## Per-attempt state machine
//!
//! ```text
//!   Pending → dispatch → InHandler
//!     InHandler → acknowledged (context or auto) → Acknowledged [terminal]
//!     InHandler → unacked, attempts < max       → wait retry delay → Pending
//!     InHandler → unacked, attempts ≥ max       → Abandoned [terminal]
//!     InHandler → listener error                 → treated as unacked (warned)
//! ```
//!
//! Retries happen in place: the process task keeps its position (and its
//! semaphore permit) while sleeping the retry delay, so a failing message
//! never reorders ahead of or behind its queued siblings. At a concurrency
//! limit of 1 this means head-of-line blocking during retries; raising the
//! limit trades ordering for progress.

mod context;
mod engine;

use async_trait::async_trait;
use courier_types::{BusError, Message};

pub use context::QueuedMessageContext;
pub use engine::{QueueEngine, QueueOptions};

/// Receives messages delivered from a queue.
#[async_trait]
pub trait QueueListener: Send + Sync {
    /// Process one delivered message.
    ///
    /// Call [`QueuedMessageContext::acknowledge`] to mark it handled; an
    /// `Err` return (or completing without acknowledgement on a queue
    /// without auto-acknowledge) triggers the retry cycle.
    async fn message_received(
        &self,
        message: &Message,
        context: &QueuedMessageContext,
    ) -> Result<(), BusError>;
}
