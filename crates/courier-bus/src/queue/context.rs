//! Acknowledgement context passed to queue listeners.

use courier_types::{MessageHeaders, Principal};
use std::sync::atomic::{AtomicBool, Ordering};

/// Per-delivery context through which a listener observes message metadata
/// and records acknowledgement.
pub struct QueuedMessageContext {
    headers: MessageHeaders,
    principal: Option<Principal>,
    acknowledged: AtomicBool,
}

impl QueuedMessageContext {
    pub(crate) fn new(headers: MessageHeaders, principal: Option<Principal>) -> Self {
        Self {
            headers,
            principal,
            acknowledged: AtomicBool::new(false),
        }
    }

    /// Headers of the delivered message.
    #[must_use]
    pub fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    /// Identity of the sender that enqueued the message, when known.
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Mark the delivery as handled; the record transitions to its
    /// acknowledged terminal state after the listener returns.
    pub fn acknowledge(&self) {
        self.acknowledged.store(true, Ordering::SeqCst);
    }

    /// Whether the listener acknowledged this delivery.
    #[must_use]
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::SeqCst)
    }
}
