//! The closed error taxonomy of the bus.

use crate::ids::{EndpointName, QueueName, TopicName};
use thiserror::Error;

/// Every fallible bus operation surfaces one of these kinds.
///
/// The set is closed so callers can decide retry policy independent of the
/// transport in use: `NameResolution`, `ConnectionRefused`, and `Transport`
/// are transient; the rest are not.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The transport failed after a connection was established, or the peer
    /// answered with a server error.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The peer's host name could not be resolved.
    #[error("name resolution failed for {0}")]
    NameResolution(String),

    /// The peer actively refused the connection.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The peer rejected the sender's credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// No handler on the receiving bus acknowledged the message.
    #[error("message was not acknowledged")]
    NotAcknowledged,

    /// The request was malformed or referenced something that cannot exist.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No endpoint with the given name is configured.
    #[error("endpoint not found: {0}")]
    EndpointNotFound(EndpointName),

    /// The topic is not declared by this bus.
    #[error("topic not found: {0}")]
    TopicNotFound(TopicName),

    /// A queue with this name was already created in this process.
    #[error("queue already exists: {0}")]
    QueueExists(QueueName),

    /// No queue with this name was created.
    #[error("queue not found: {0}")]
    QueueNotFound(QueueName),

    /// The message name does not map to a registered payload type.
    #[error("unknown message type: {0}")]
    UnknownMessage(String),

    /// Send could not resolve any destination endpoint.
    #[error("no endpoints resolved for message")]
    NoEndpoints,

    /// The operation was cancelled by bus shutdown while in flight.
    #[error("operation cancelled")]
    Cancelled,

    /// The bus has been shut down.
    #[error("bus has been disposed")]
    Disposed,

    /// Invalid configuration rejected before the bus was built.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A persistence backend failed.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl BusError {
    /// Whether retrying later could plausibly succeed.
    ///
    /// Subscription-renewal workers back off and retry on transient errors
    /// and stop permanently on everything else.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::NameResolution(_) | Self::ConnectionRefused(_)
        )
    }
}
