//! The message header map.
//!
//! Headers are a case-insensitive mapping from header name to string value.
//! Well-known fields get typed accessors; everything else is reachable via
//! the raw `get`/`insert` API. Timestamps are RFC 3339 UTC on the wire.

use crate::ids::{HeaderName, MessageId, MessageName, TopicName};
use crate::importance::Importance;
use crate::DEFAULT_CONTENT_TYPE;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// Well-known header names.
pub mod header_names {
    /// Unique identifier of the message.
    pub const MESSAGE_ID: &str = "message-id";
    /// Stable logical type name of the content.
    pub const MESSAGE_NAME: &str = "message-name";
    /// Base URI of the sending bus.
    pub const ORIGINATION: &str = "origination";
    /// Base URI of the intended recipient bus.
    pub const DESTINATION: &str = "destination";
    /// Optional URI overriding origination for replies.
    pub const REPLY_TO: &str = "reply-to";
    /// Message id this message replies to.
    pub const RELATED_TO: &str = "related-to";
    /// UTC timestamp at which an event was published.
    pub const PUBLISHED: &str = "published";
    /// Topic an event was published on.
    pub const TOPIC: &str = "topic";
    /// Severity influencing queueing on receive.
    pub const IMPORTANCE: &str = "importance";
    /// UTC timestamp after which the message must be discarded.
    pub const EXPIRES: &str = "expires";
    /// Media type of the content.
    pub const CONTENT_TYPE: &str = "content-type";
    /// Marks a reply as the final one for its correlation stream.
    pub const LAST_REPLY: &str = "x-courier-last-reply";
}

/// Case-insensitive header map.
///
/// Values are plain strings; multi-line values survive serialization because
/// persistence encodes the whole map as a JSON document rather than a
/// line-oriented format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageHeaders {
    entries: BTreeMap<HeaderName, String>,
}

impl MessageHeaders {
    /// An empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw lookup by (case-insensitive) name.
    pub fn get(&self, name: impl Into<HeaderName>) -> Option<&str> {
        self.entries.get(&name.into()).map(String::as_str)
    }

    /// Raw insert; replaces any existing value for the name.
    pub fn insert(&mut self, name: impl Into<HeaderName>, value: impl Into<String>) {
        self.entries.insert(name.into(), value.into());
    }

    /// Remove a header, returning its previous value.
    pub fn remove(&mut self, name: impl Into<HeaderName>) -> Option<String> {
        self.entries.remove(&name.into())
    }

    /// Iterate over all entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &str)> {
        self.entries.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// Number of headers present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no headers are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get_parsed<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.get(name).and_then(|v| v.parse().ok())
    }

    fn get_timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        self.get(name)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    fn set_timestamp(&mut self, name: &str, value: DateTime<Utc>) {
        self.insert(name, value.to_rfc3339_opts(SecondsFormat::Millis, true));
    }

    /// The message id, when present and valid.
    #[must_use]
    pub fn message_id(&self) -> Option<MessageId> {
        self.get_parsed(header_names::MESSAGE_ID)
    }

    /// Set the message id.
    pub fn set_message_id(&mut self, id: MessageId) {
        self.insert(header_names::MESSAGE_ID, id.to_string());
    }

    /// The logical message type name.
    #[must_use]
    pub fn message_name(&self) -> Option<MessageName> {
        self.get_parsed(header_names::MESSAGE_NAME)
    }

    /// Set the logical message type name.
    pub fn set_message_name(&mut self, name: &MessageName) {
        self.insert(header_names::MESSAGE_NAME, name.as_str());
    }

    /// URI of the sending bus.
    #[must_use]
    pub fn origination(&self) -> Option<Url> {
        self.get_parsed(header_names::ORIGINATION)
    }

    /// Set the sending bus URI.
    pub fn set_origination(&mut self, uri: &Url) {
        self.insert(header_names::ORIGINATION, uri.as_str());
    }

    /// URI of the intended recipient bus.
    #[must_use]
    pub fn destination(&self) -> Option<Url> {
        self.get_parsed(header_names::DESTINATION)
    }

    /// Set the recipient bus URI.
    pub fn set_destination(&mut self, uri: &Url) {
        self.insert(header_names::DESTINATION, uri.as_str());
    }

    /// Reply-routing override, when present.
    #[must_use]
    pub fn reply_to(&self) -> Option<Url> {
        self.get_parsed(header_names::REPLY_TO)
    }

    /// Set the reply-routing override.
    pub fn set_reply_to(&mut self, uri: &Url) {
        self.insert(header_names::REPLY_TO, uri.as_str());
    }

    /// Id of the message this one replies to.
    #[must_use]
    pub fn related_to(&self) -> Option<MessageId> {
        self.get_parsed(header_names::RELATED_TO)
    }

    /// Mark this message as a reply to `id`.
    pub fn set_related_to(&mut self, id: MessageId) {
        self.insert(header_names::RELATED_TO, id.to_string());
    }

    /// Publish timestamp for topic events.
    #[must_use]
    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.get_timestamp(header_names::PUBLISHED)
    }

    /// Set the publish timestamp.
    pub fn set_published(&mut self, when: DateTime<Utc>) {
        self.set_timestamp(header_names::PUBLISHED, when);
    }

    /// Topic for published events.
    #[must_use]
    pub fn topic(&self) -> Option<TopicName> {
        self.get_parsed(header_names::TOPIC)
    }

    /// Set the topic for a published event.
    pub fn set_topic(&mut self, topic: &TopicName) {
        self.insert(header_names::TOPIC, topic.as_str());
    }

    /// Message importance; absent or unparseable values read as `Normal`.
    #[must_use]
    pub fn importance(&self) -> Importance {
        self.get_parsed(header_names::IMPORTANCE).unwrap_or_default()
    }

    /// Set the message importance.
    pub fn set_importance(&mut self, importance: Importance) {
        self.insert(header_names::IMPORTANCE, importance.to_string());
    }

    /// Expiration timestamp, when present.
    #[must_use]
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.get_timestamp(header_names::EXPIRES)
    }

    /// Set the expiration timestamp.
    pub fn set_expires(&mut self, when: DateTime<Utc>) {
        self.set_timestamp(header_names::EXPIRES, when);
    }

    /// True when an expiration is set and lies in the past.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires().is_some_and(|e| e < now)
    }

    /// Media type of the content; defaults to `application/json`.
    #[must_use]
    pub fn content_type(&self) -> &str {
        self.get(header_names::CONTENT_TYPE)
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    /// Set the content media type.
    pub fn set_content_type(&mut self, media_type: &str) {
        self.insert(header_names::CONTENT_TYPE, media_type);
    }

    /// True when this message carries the final-reply marker.
    #[must_use]
    pub fn is_last_reply(&self) -> bool {
        self.get(header_names::LAST_REPLY)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Mark this message as the final reply of its correlation stream.
    pub fn set_last_reply(&mut self) {
        self.insert(header_names::LAST_REPLY, "true");
    }
}

impl<'a> IntoIterator for &'a MessageHeaders {
    type Item = (&'a HeaderName, &'a String);
    type IntoIter = std::collections::btree_map::Iter<'a, HeaderName, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl FromIterator<(HeaderName, String)> for MessageHeaders {
    fn from_iter<I: IntoIterator<Item = (HeaderName, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
