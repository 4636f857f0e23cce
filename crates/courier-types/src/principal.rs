//! Sender identity attached by the transport front-end.

use serde::{Deserialize, Serialize};

/// Identity of the peer that delivered a message, as established by the
/// transport's authentication layer. Absent for anonymous senders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    name: String,
    scheme: Option<String>,
}

impl Principal {
    /// An authenticated principal.
    #[must_use]
    pub fn new(name: impl Into<String>, scheme: Option<String>) -> Self {
        Self {
            name: name.into(),
            scheme,
        }
    }

    /// The principal's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Authentication scheme that established the identity, when known.
    #[must_use]
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }
}
