//! Outbound HTTP transport built on reqwest.

use async_trait::async_trait;
use courier_bus::ports::{InboundObserver, ObserverCell, SubscriptionOp, Transport};
use courier_types::{BusError, Credentials, Message, Principal, TopicName};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use std::sync::Weak;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Client-side tunables.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Overall per-request timeout.
    pub request_timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// The default transport: POSTs messages and subscription requests to peer
/// buses and normalizes failures into the closed error taxonomy.
pub struct HttpTransport {
    client: Client,
    observer: ObserverCell,
}

impl HttpTransport {
    /// Build a transport with the given tunables.
    pub fn new(config: HttpTransportConfig) -> Result<Self, BusError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| BusError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            observer: ObserverCell::new(),
        })
    }

    /// Hostname resolution happens before the request so DNS failures
    /// surface as `NameResolution` rather than a generic transport error.
    async fn resolve(&self, uri: &Url) -> Result<(), BusError> {
        let host = uri
            .host_str()
            .ok_or_else(|| BusError::InvalidRequest(format!("uri has no host: {uri}")))?;
        let port = uri.port_or_known_default().unwrap_or(80);
        let mut addresses = tokio::net::lookup_host((host, port))
            .await
            .map_err(|_| BusError::NameResolution(host.to_string()))?;
        if addresses.next().is_none() {
            return Err(BusError::NameResolution(host.to_string()));
        }
        Ok(())
    }

    fn authorize(request: RequestBuilder, credentials: Option<&Credentials>) -> RequestBuilder {
        match credentials {
            Some(Credentials::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            // The ambient identity is deployment-specific; nothing explicit
            // goes on the wire.
            Some(Credentials::HostIdentity) | None => request,
        }
    }

    async fn execute(&self, uri: &Url, request: RequestBuilder) -> Result<(), BusError> {
        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                BusError::ConnectionRefused(uri.to_string())
            } else if e.is_timeout() {
                BusError::Transport(format!("request to {uri} timed out"))
            } else {
                BusError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        match status {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED => Err(BusError::Unauthorized),
            StatusCode::UNPROCESSABLE_ENTITY => Err(BusError::NotAcknowledged),
            s if s.is_client_error() => {
                let body = response.text().await.unwrap_or_default();
                Err(BusError::InvalidRequest(format!(
                    "{uri} answered {s}: {body}"
                )))
            }
            s => Err(BusError::Transport(format!("{uri} answered {s}"))),
        }
    }
}

/// `{destination}/message/{urlEncodedMessageId}`
fn message_url(destination: &Url, message_id: &str) -> Result<Url, BusError> {
    let mut url = destination.clone();
    url.path_segments_mut()
        .map_err(|()| BusError::InvalidRequest(format!("uri cannot be a base: {destination}")))?
        .pop_if_empty()
        .push("message")
        .push(message_id);
    Ok(url)
}

/// `{publisher}/topic/{urlEncodedTopic}/subscriber?uri={subscriber}[&ttl=s]`
fn subscriber_url(
    publisher: &Url,
    topic: &TopicName,
    subscriber: &Url,
    ttl: Option<Duration>,
) -> Result<Url, BusError> {
    let mut url = publisher.clone();
    url.path_segments_mut()
        .map_err(|()| BusError::InvalidRequest(format!("uri cannot be a base: {publisher}")))?
        .pop_if_empty()
        .push("topic")
        .push(topic.as_str())
        .push("subscriber");
    url.query_pairs_mut()
        .append_pair("uri", subscriber.as_str());
    if let Some(ttl) = ttl {
        url.query_pairs_mut()
            .append_pair("ttl", &ttl.as_secs().to_string());
    }
    Ok(url)
}

fn wire_headers(message: &Message) -> Result<HeaderMap, BusError> {
    let mut map = HeaderMap::with_capacity(message.headers().len());
    for (name, value) in message.headers() {
        let name = HeaderName::from_bytes(name.as_str().as_bytes())
            .map_err(|e| BusError::InvalidRequest(format!("invalid header name: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| BusError::InvalidRequest(format!("invalid header value: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_message(
        &self,
        message: &Message,
        credentials: Option<&Credentials>,
    ) -> Result<(), BusError> {
        let destination = message
            .headers()
            .destination()
            .ok_or_else(|| BusError::InvalidRequest("message has no destination".to_string()))?;
        let id = message
            .headers()
            .message_id()
            .ok_or_else(|| BusError::InvalidRequest("message has no id".to_string()))?;

        self.resolve(&destination).await?;
        let url = message_url(&destination, &id.to_string())?;
        debug!(destination = %destination, message_id = %id, "posting message");

        let request = Self::authorize(
            self.client
                .request(Method::POST, url.clone())
                .headers(wire_headers(message)?)
                .body(message.content().to_vec()),
            credentials,
        );
        self.execute(&url, request).await
    }

    async fn send_subscription_request(
        &self,
        op: SubscriptionOp,
        publisher: &Url,
        credentials: Option<&Credentials>,
        topic: &TopicName,
        subscriber: &Url,
        ttl: Option<Duration>,
    ) -> Result<(), BusError> {
        self.resolve(publisher).await?;
        let include_ttl = matches!(op, SubscriptionOp::Add);
        let url = subscriber_url(publisher, topic, subscriber, ttl.filter(|_| include_ttl))?;
        let method = match op {
            SubscriptionOp::Add => Method::POST,
            SubscriptionOp::Remove => Method::DELETE,
        };
        debug!(publisher = %publisher, topic = %topic, %op, "sending subscription request");

        let request = Self::authorize(self.client.request(method, url.clone()), credentials);
        self.execute(&url, request).await
    }

    fn set_observer(&self, observer: Weak<dyn InboundObserver>) {
        self.observer.set(observer);
    }

    async fn accept_message(
        &self,
        message: Message,
        principal: Option<Principal>,
    ) -> Result<(), BusError> {
        self.observer.get()?.on_message(message, principal).await
    }

    async fn accept_subscription_request(
        &self,
        op: SubscriptionOp,
        topic: TopicName,
        subscriber: Url,
        ttl: Option<Duration>,
        principal: Option<Principal>,
    ) -> Result<(), BusError> {
        let observer = self.observer.get()?;
        if let Err(e) = observer
            .on_subscription_request(op, topic.clone(), subscriber.clone(), ttl, principal)
            .await
        {
            warn!(topic = %topic, subscriber = %subscriber, error = %e,
                  "subscription request rejected");
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::MessageId;

    #[test]
    fn message_url_is_percent_encoded() {
        let base = Url::parse("http://bus-b.internal:8080/").unwrap();
        let url = message_url(&base, "abc def").unwrap();
        assert_eq!(
            url.as_str(),
            "http://bus-b.internal:8080/message/abc%20def"
        );
    }

    #[test]
    fn message_url_survives_missing_trailing_slash() {
        let base = Url::parse("http://bus-b.internal:8080").unwrap();
        let id = MessageId::new();
        let url = message_url(&base, &id.to_string()).unwrap();
        assert_eq!(
            url.as_str(),
            format!("http://bus-b.internal:8080/message/{id}")
        );
    }

    #[test]
    fn subscriber_url_carries_uri_and_ttl() {
        let publisher = Url::parse("http://bus-a.internal:8080/").unwrap();
        let subscriber = Url::parse("http://bus-b.internal:8080/").unwrap();
        let topic = TopicName::new("order events").unwrap();
        let url = subscriber_url(
            &publisher,
            &topic,
            &subscriber,
            Some(Duration::from_secs(60)),
        )
        .unwrap();

        assert!(url.path().contains("/topic/order%20events/subscriber"));
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("uri".to_string(), subscriber.to_string())));
        assert!(pairs.contains(&("ttl".to_string(), "60".to_string())));
    }

    #[test]
    fn subscriber_url_omits_absent_ttl() {
        let publisher = Url::parse("http://bus-a.internal:8080/").unwrap();
        let subscriber = Url::parse("http://bus-b.internal:8080/").unwrap();
        let topic = TopicName::new("t").unwrap();
        let url = subscriber_url(&publisher, &topic, &subscriber, None).unwrap();
        assert!(!url.query().unwrap_or("").contains("ttl"));
    }

    #[test]
    fn wire_headers_reject_control_characters() {
        let mut headers = courier_types::MessageHeaders::new();
        headers.insert("x-multi", "line one\nline two");
        let message = Message::new(headers, Vec::new());
        assert!(matches!(
            wire_headers(&message),
            Err(BusError::InvalidRequest(_))
        ));
    }
}
