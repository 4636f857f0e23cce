//! The transport port: how messages and subscription requests move between
//! peers, and how inbound traffic reaches the bus.

use async_trait::async_trait;
use courier_types::{BusError, Credentials, Message, Principal, TopicName};
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use url::Url;

/// Kind of subscription request sent to a publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionOp {
    /// Create or renew a subscription.
    Add,
    /// Cancel a subscription.
    Remove,
}

impl fmt::Display for SubscriptionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => f.write_str("add"),
            Self::Remove => f.write_str("remove"),
        }
    }
}

/// Receives inbound traffic surfaced by a transport.
///
/// The bus core is the one observer per bus instance; it demultiplexes
/// messages from subscription requests without the transport having to know
/// any bus semantics.
#[async_trait]
pub trait InboundObserver: Send + Sync {
    /// A message arrived from a peer.
    ///
    /// An `Err` return tells the transport front-end to fail the inbound
    /// request (`NotAcknowledged` drives the HTTP 422 contract).
    async fn on_message(
        &self,
        message: Message,
        principal: Option<Principal>,
    ) -> Result<(), BusError>;

    /// A subscription request arrived from a would-be subscriber.
    async fn on_subscription_request(
        &self,
        op: SubscriptionOp,
        topic: TopicName,
        subscriber: Url,
        ttl: Option<Duration>,
        principal: Option<Principal>,
    ) -> Result<(), BusError>;
}

/// Moves serialized messages and subscription requests to and from peers.
///
/// Errors are normalized to the closed [`BusError`] taxonomy so upper layers
/// can decide retry policy independent of the concrete protocol.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a message to the destination named in its headers.
    async fn send_message(
        &self,
        message: &Message,
        credentials: Option<&Credentials>,
    ) -> Result<(), BusError>;

    /// Deliver a subscription request to a publisher.
    async fn send_subscription_request(
        &self,
        op: SubscriptionOp,
        publisher: &Url,
        credentials: Option<&Credentials>,
        topic: &TopicName,
        subscriber: &Url,
        ttl: Option<Duration>,
    ) -> Result<(), BusError>;

    /// Register the single inbound observer for this transport.
    fn set_observer(&self, observer: Weak<dyn InboundObserver>);

    /// Hand an inbound message to the observer (invoked by the front-end).
    async fn accept_message(
        &self,
        message: Message,
        principal: Option<Principal>,
    ) -> Result<(), BusError>;

    /// Hand an inbound subscription request to the observer.
    async fn accept_subscription_request(
        &self,
        op: SubscriptionOp,
        topic: TopicName,
        subscriber: Url,
        ttl: Option<Duration>,
        principal: Option<Principal>,
    ) -> Result<(), BusError>;
}

/// Holds the observer registration for a transport implementation.
///
/// The reference is weak: the bus owns the transport, so a strong reference
/// here would form a cycle that outlives shutdown.
#[derive(Default)]
pub struct ObserverCell {
    observer: RwLock<Option<Weak<dyn InboundObserver>>>,
}

impl ObserverCell {
    /// An empty cell.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registered observer.
    pub fn set(&self, observer: Weak<dyn InboundObserver>) {
        *self.observer.write() = Some(observer);
    }

    /// The observer, when registered and still alive.
    pub fn get(&self) -> Result<Arc<dyn InboundObserver>, BusError> {
        self.observer
            .read()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(BusError::Disposed)
    }
}

impl fmt::Debug for ObserverCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered = self.observer.read().is_some();
        f.debug_struct("ObserverCell")
            .field("registered", &registered)
            .finish()
    }
}
