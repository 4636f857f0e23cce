//! Remote endpoints and their credentials.

use crate::ids::EndpointName;
use serde::{Deserialize, Serialize};
use url::Url;

/// Credentials presented when talking to a remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Credentials {
    /// HTTP basic authentication.
    Basic {
        /// User name.
        username: String,
        /// Password, sent as-is.
        password: String,
    },
    /// Authenticate with the ambient identity of the host process.
    ///
    /// The HTTP transport attaches nothing explicit for this variant; how
    /// the ambient identity reaches the peer is deployment-specific.
    HostIdentity,
}

/// A named remote bus with an address and optional credentials.
///
/// Unique by name within one bus instance; also resolvable by address when
/// choosing credentials for ad-hoc destinations (reply routing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    name: EndpointName,
    address: Url,
    credentials: Option<Credentials>,
}

impl Endpoint {
    /// Describe a remote endpoint.
    #[must_use]
    pub fn new(name: EndpointName, address: Url, credentials: Option<Credentials>) -> Self {
        Self {
            name,
            address,
            credentials,
        }
    }

    /// The endpoint's configured name.
    #[must_use]
    pub fn name(&self) -> &EndpointName {
        &self.name
    }

    /// The endpoint's base address.
    #[must_use]
    pub fn address(&self) -> &Url {
        &self.address
    }

    /// Credentials to present, when configured.
    #[must_use]
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Whether `uri` addresses this endpoint (same scheme, host, and port).
    #[must_use]
    pub fn matches_address(&self, uri: &Url) -> bool {
        self.address.scheme() == uri.scheme()
            && self.address.host_str() == uri.host_str()
            && self.address.port_or_known_default() == uri.port_or_known_default()
    }
}
