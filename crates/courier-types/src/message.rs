//! The immutable message: headers plus opaque content bytes.

use crate::headers::MessageHeaders;
use serde::{Deserialize, Serialize};

/// An immutable pair of headers and opaque content.
///
/// The content is whatever the sender's serializer produced; receivers
/// decode it using the `message-name` and `content-type` headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    headers: MessageHeaders,
    content: Vec<u8>,
}

impl Message {
    /// Assemble a message from headers and serialized content.
    #[must_use]
    pub fn new(headers: MessageHeaders, content: Vec<u8>) -> Self {
        Self { headers, content }
    }

    /// The message headers.
    #[must_use]
    pub fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    /// The opaque content bytes.
    #[must_use]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Decompose into headers and content.
    #[must_use]
    pub fn into_parts(self) -> (MessageHeaders, Vec<u8>) {
        (self.headers, self.content)
    }

    /// Copy of this message with one header changed.
    ///
    /// Used when addressing one logical message to several endpoints: each
    /// copy differs only in its `destination` header.
    #[must_use]
    pub fn with_headers(&self, headers: MessageHeaders) -> Self {
        Self {
            headers,
            content: self.content.clone(),
        }
    }
}
