//! # Courier Bus - Messaging Runtime
//!
//! The core of the courier peer-to-peer message bus: an embeddable runtime
//! that sends addressed messages, publishes events on declared topics,
//! maintains subscriptions to remote topics, and dispatches inbound
//! messages to registered handlers with durable queueing, bounded
//! concurrency, retry, and reply correlation.
//!
//! ## Architecture
//!
//! ```text
//!  caller ──► Bus ──► send rules ──► endpoints ─┬─► outbound queue ─► Transport
//!                                               └─────── (non-durable) ──► Transport
//!
//!  Transport ──► Bus (inbound observer) ─┬─► reply hub (related-to set)
//!                                        ├─► handler queues ─► handlers
//!                                        └─► subscription tracker (topic requests)
//! ```
//!
//! The runtime is transport- and storage-agnostic: it consumes the driven
//! ports in [`ports`] and ships with in-memory implementations for tests in
//! [`testing`]. HTTP and filesystem adapters live in the `courier-http` and
//! `courier-store` crates.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod builder;
pub mod bus;
pub mod config;
mod dispatch;
pub mod handlers;
pub mod naming;
pub mod ports;
pub mod queue;
pub mod replies;
pub mod rules;
pub mod subscriptions;
pub mod testing;

pub use builder::BusBuilder;
pub use bus::{Bus, SendOptions, SubscriptionPlan, OUTBOUND_QUEUE};
pub use config::{
    BusConfig, CredentialType, EndpointConfig, JournalingConfig, SendRuleConfig, StorageConfig,
    SubscriptionConfig, TopicConfig,
};
pub use handlers::{typed_handler, MessageContext, MessageHandler, ReplyOptions};
pub use naming::{AnyPayload, MessageRegistry, PayloadFormat, SerializerRegistry};
pub use queue::{QueueEngine, QueueListener, QueueOptions, QueuedMessageContext};
pub use replies::{Replies, ReplyHub, SentMessage, DEFAULT_REPLY_TTL};
pub use rules::{HandlingRule, MessageSpecification, SendRule};
pub use subscriptions::SubscriptionTracker;

// The shared types are part of this crate's public API surface.
pub use courier_types as types;
