//! Declarative bus configuration.
//!
//! Mirrors the recognized option names of the configuration surface:
//! `baseUri`, `replyTimeout`, `queueing.{provider,path}`,
//! `subscriptionTracking.{provider,path}`, `journaling.{provider,enabled,
//! path}`, plus the `endpoints`, `topics`, `sendRules`, and `subscriptions`
//! tables. Handlers and concrete port implementations cannot come from a
//! file; [`crate::builder::BusBuilder::from_config`] applies the
//! declarative part and the host adds the rest programmatically.

use crate::builder::BusBuilder;
use crate::rules::MessageSpecification;
use courier_types::{BusError, Credentials, Endpoint, EndpointName, TopicName};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Root configuration document for one bus instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BusConfig {
    /// URI peers use to reach this bus.
    pub base_uri: Option<Url>,
    /// Seconds an unobserved reply stream is kept before eviction.
    pub reply_timeout: Option<u64>,
    /// Queue persistence backend.
    pub queueing: StorageConfig,
    /// Subscription-tracking persistence backend.
    pub subscription_tracking: StorageConfig,
    /// Message journaling backend.
    pub journaling: JournalingConfig,
    /// Remote endpoints.
    pub endpoints: Vec<EndpointConfig>,
    /// Topics this bus publishes.
    pub topics: Vec<TopicConfig>,
    /// Outbound routing rules.
    pub send_rules: Vec<SendRuleConfig>,
    /// Outbound subscriptions to maintain.
    pub subscriptions: Vec<SubscriptionConfig>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            base_uri: None,
            reply_timeout: None,
            queueing: StorageConfig::default(),
            subscription_tracking: StorageConfig::default(),
            journaling: JournalingConfig::default(),
            endpoints: Vec::new(),
            topics: Vec::new(),
            send_rules: Vec::new(),
            subscriptions: Vec::new(),
        }
    }
}

/// Persistence backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
    /// Backend name; `memory` and `filesystem` ship with the workspace.
    pub provider: String,
    /// Root path for filesystem-backed providers.
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: "memory".to_string(),
            path: None,
        }
    }
}

/// Journaling backend selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JournalingConfig {
    /// Backend name; empty with `enabled = false` disables journaling.
    pub provider: String,
    /// Whether journaling is active.
    pub enabled: bool,
    /// Journal file path for filesystem-backed providers.
    pub path: Option<PathBuf>,
}

/// Credential kind for an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialType {
    /// No credentials.
    #[default]
    None,
    /// HTTP basic authentication.
    Basic,
    /// The host process's ambient identity.
    Windows,
}

/// One remote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    /// Unique endpoint name.
    pub name: String,
    /// Base address of the remote bus.
    pub address: Url,
    /// Credential kind.
    #[serde(default)]
    pub credential_type: CredentialType,
    /// Basic-auth user name.
    #[serde(default)]
    pub username: Option<String>,
    /// Basic-auth password.
    #[serde(default)]
    pub password: Option<String>,
}

/// One declared topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Topic name.
    pub name: String,
}

/// One outbound routing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRuleConfig {
    /// Regex over the logical message name.
    pub name_pattern: String,
    /// Destination endpoint name.
    pub endpoint: String,
}

/// One outbound subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionConfig {
    /// Publisher endpoint name.
    pub endpoint: String,
    /// Topic to subscribe to.
    pub topic: String,
    /// Requested TTL in seconds; zero requests a non-expiring subscription.
    #[serde(default)]
    pub ttl: u64,
}

impl BusConfig {
    /// Check internal consistency without building anything.
    pub fn validate(&self) -> Result<(), BusError> {
        if self.base_uri.is_none() {
            return Err(BusError::Configuration("baseUri is required".to_string()));
        }

        let mut endpoint_names = HashSet::new();
        for endpoint in &self.endpoints {
            if !endpoint_names.insert(endpoint.name.as_str()) {
                return Err(BusError::Configuration(format!(
                    "duplicate endpoint name: {}",
                    endpoint.name
                )));
            }
            if endpoint.credential_type == CredentialType::Basic
                && (endpoint.username.is_none() || endpoint.password.is_none())
            {
                return Err(BusError::Configuration(format!(
                    "endpoint {} uses basic credentials without username/password",
                    endpoint.name
                )));
            }
        }

        let mut topic_names = HashSet::new();
        for topic in &self.topics {
            if !topic_names.insert(topic.name.as_str()) {
                return Err(BusError::Configuration(format!(
                    "duplicate topic: {}",
                    topic.name
                )));
            }
        }

        for rule in &self.send_rules {
            Regex::new(&rule.name_pattern).map_err(|e| {
                BusError::Configuration(format!("invalid name pattern: {e}"))
            })?;
            if !endpoint_names.contains(rule.endpoint.as_str()) {
                return Err(BusError::Configuration(format!(
                    "send rule references unknown endpoint: {}",
                    rule.endpoint
                )));
            }
        }

        for subscription in &self.subscriptions {
            if !endpoint_names.contains(subscription.endpoint.as_str()) {
                return Err(BusError::Configuration(format!(
                    "subscription references unknown endpoint: {}",
                    subscription.endpoint
                )));
            }
        }
        Ok(())
    }
}

impl EndpointConfig {
    fn credentials(&self) -> Option<Credentials> {
        match self.credential_type {
            CredentialType::None => None,
            CredentialType::Basic => Some(Credentials::Basic {
                username: self.username.clone().unwrap_or_default(),
                password: self.password.clone().unwrap_or_default(),
            }),
            CredentialType::Windows => Some(Credentials::HostIdentity),
        }
    }
}

impl BusBuilder {
    /// Seed a builder from a declarative configuration document.
    ///
    /// Ports, payload registrations, and handlers are still added
    /// programmatically afterwards.
    pub fn from_config(config: BusConfig) -> Result<Self, BusError> {
        config.validate()?;
        let base_uri = config
            .base_uri
            .ok_or_else(|| BusError::Configuration("baseUri is required".to_string()))?;

        let mut builder = Self::new(base_uri);
        if let Some(reply_timeout) = config.reply_timeout {
            builder = builder.reply_ttl(Duration::from_secs(reply_timeout));
        }
        for endpoint in &config.endpoints {
            let name = EndpointName::new(&endpoint.name)
                .map_err(|e| BusError::Configuration(e.to_string()))?;
            builder = builder.endpoint(Endpoint::new(
                name,
                endpoint.address.clone(),
                endpoint.credentials(),
            ));
        }
        for topic in &config.topics {
            let name =
                TopicName::new(&topic.name).map_err(|e| BusError::Configuration(e.to_string()))?;
            builder = builder.topic(name);
        }
        for rule in &config.send_rules {
            let spec = MessageSpecification::pattern(&rule.name_pattern)?;
            let endpoint = EndpointName::new(&rule.endpoint)
                .map_err(|e| BusError::Configuration(e.to_string()))?;
            builder = builder.send_rule(spec, endpoint);
        }
        for subscription in &config.subscriptions {
            let endpoint = EndpointName::new(&subscription.endpoint)
                .map_err(|e| BusError::Configuration(e.to_string()))?;
            let topic = TopicName::new(&subscription.topic)
                .map_err(|e| BusError::Configuration(e.to_string()))?;
            builder = builder.subscribe(endpoint, topic, Duration::from_secs(subscription.ttl));
        }
        Ok(builder)
    }
}
