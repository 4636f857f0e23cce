//! Send and handling rules.
//!
//! Rules pair a message specification (match on the logical message name)
//! with a routing decision: which endpoint an outbound message goes to, or
//! which queue and handler an inbound message lands on.

use crate::handlers::MessageHandler;
use courier_types::{BusError, EndpointName, MessageName, QueueName};
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Predicate over logical message names.
#[derive(Debug, Clone)]
pub enum MessageSpecification {
    /// Exact name match.
    Named(MessageName),
    /// Regex over the full message name.
    Pattern(Regex),
    /// Matches every message.
    Any,
}

impl MessageSpecification {
    /// Compile a regex specification.
    pub fn pattern(pattern: &str) -> Result<Self, BusError> {
        Regex::new(pattern)
            .map(Self::Pattern)
            .map_err(|e| BusError::Configuration(format!("invalid name pattern: {e}")))
    }

    /// Whether `name` satisfies this specification.
    #[must_use]
    pub fn matches(&self, name: &MessageName) -> bool {
        match self {
            Self::Named(expected) => expected == name,
            Self::Pattern(regex) => regex.is_match(name.as_str()),
            Self::Any => true,
        }
    }
}

/// Routes outbound messages to a named endpoint.
#[derive(Debug, Clone)]
pub struct SendRule {
    spec: MessageSpecification,
    endpoint: EndpointName,
}

impl SendRule {
    /// Route messages matching `spec` to `endpoint`.
    #[must_use]
    pub fn new(spec: MessageSpecification, endpoint: EndpointName) -> Self {
        Self { spec, endpoint }
    }

    /// The matching predicate.
    #[must_use]
    pub fn spec(&self) -> &MessageSpecification {
        &self.spec
    }

    /// The destination endpoint name.
    #[must_use]
    pub fn endpoint(&self) -> &EndpointName {
        &self.endpoint
    }
}

/// Routes inbound messages to a handler through a queue.
///
/// Multiple rules may target one queue; the queue's listener fans each
/// delivered message out to all handlers whose rule matches.
#[derive(Clone)]
pub struct HandlingRule {
    spec: MessageSpecification,
    handler: Arc<dyn MessageHandler>,
    queue: QueueName,
}

impl HandlingRule {
    /// Dispatch messages matching `spec` to `handler` via `queue`.
    #[must_use]
    pub fn new(
        spec: MessageSpecification,
        handler: Arc<dyn MessageHandler>,
        queue: QueueName,
    ) -> Self {
        Self {
            spec,
            handler,
            queue,
        }
    }

    /// The matching predicate.
    #[must_use]
    pub fn spec(&self) -> &MessageSpecification {
        &self.spec
    }

    /// The handler invoked for matching messages.
    #[must_use]
    pub fn handler(&self) -> &Arc<dyn MessageHandler> {
        &self.handler
    }

    /// The queue matching messages are delivered through.
    #[must_use]
    pub fn queue(&self) -> &QueueName {
        &self.queue
    }
}

impl fmt::Debug for HandlingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlingRule")
            .field("spec", &self.spec)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
