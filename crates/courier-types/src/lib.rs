//! # Courier Types - Shared Domain Types
//!
//! Single source of truth for the types that cross crate boundaries in the
//! courier message bus: message identifiers, the header map, endpoints and
//! credentials, queued-message records, and the closed error taxonomy.
//!
//! ## Design Principles
//!
//! - **Named scalars**: every string-ish identifier on the wire gets its own
//!   wrapper type with value equality and parsing (`MessageId`, `QueueName`,
//!   `TopicName`, `EndpointName`, `MessageName`, `HeaderName`).
//! - **Case-insensitive headers**: header names compare and hash without
//!   regard to case; well-known fields have typed accessors.
//! - **One error enum**: every fallible bus operation surfaces `BusError`,
//!   a closed set callers can match on to decide retry policy.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod endpoint;
pub mod error;
pub mod headers;
pub mod ids;
pub mod importance;
pub mod message;
pub mod principal;
pub mod queued;

pub use endpoint::{Credentials, Endpoint};
pub use error::BusError;
pub use headers::{header_names, MessageHeaders};
pub use ids::{EndpointName, HeaderName, MessageId, MessageName, NameError, QueueName, TopicName};
pub use importance::Importance;
pub use message::Message;
pub use principal::Principal;
pub use queued::QueuedMessage;

/// Default media type for message content.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";
