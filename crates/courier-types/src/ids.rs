//! Named identifier types.
//!
//! The wire protocol and the configuration surface deal in strings; these
//! wrappers give each kind of name value equality, validation, and serde
//! support so a queue name can never be handed to an API expecting a topic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error produced when parsing one of the named identifier types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameError {
    /// The name was empty or whitespace-only.
    #[error("{kind} must not be empty")]
    Empty {
        /// Which identifier kind was being parsed.
        kind: &'static str,
    },
    /// The value was not a valid message id.
    #[error("invalid message id: {0}")]
    InvalidMessageId(String),
}

/// Unique 128-bit identifier of a single message.
///
/// Generated once per logical message; copies of a message addressed to
/// multiple endpoints share the same id so replies from any recipient
/// correlate to the same sent-message handle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generate a fresh identifier, unique within this process lifetime.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| NameError::InvalidMessageId(e.to_string()))
    }
}

macro_rules! named_string {
    ($(#[$doc:meta])* $name:ident, $kind:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw string, rejecting empty values.
            pub fn new(value: impl Into<String>) -> Result<Self, NameError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(NameError::Empty { kind: $kind });
                }
                Ok(Self(value))
            }

            /// The underlying string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = NameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

named_string!(
    /// Stable logical name of a message type (the `message-name` header).
    MessageName,
    "message name"
);

named_string!(
    /// Name of a durable queue owned by one bus instance.
    QueueName,
    "queue name"
);

named_string!(
    /// Name of a publish/subscribe topic declared by a bus instance.
    TopicName,
    "topic name"
);

named_string!(
    /// Name of a configured remote endpoint.
    EndpointName,
    "endpoint name"
);

/// Case-insensitive header name.
///
/// Stored lowercased so equality, hashing, and ordering ignore case; the
/// original spelling is not preserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderName(String);

impl HeaderName {
    /// Normalize a raw header name.
    #[must_use]
    pub fn normalize(value: &str) -> Self {
        Self(value.trim().to_ascii_lowercase())
    }

    /// The normalized (lowercase) name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HeaderName {
    fn from(value: &str) -> Self {
        Self::normalize(value)
    }
}

impl From<String> for HeaderName {
    fn from(value: String) -> Self {
        Self::normalize(&value)
    }
}
