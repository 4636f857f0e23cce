//! Inbound HTTP binding: an axum router feeding a bus transport.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap as HttpHeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use courier_bus::ports::{SubscriptionOp, Transport};
use courier_types::{BusError, Message, MessageHeaders, Principal, TopicName};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Server-side tunables.
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    /// Bind address; use port 0 for an ephemeral port.
    pub bind_addr: SocketAddr,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        }
    }
}

/// Establishes the sender identity of an inbound request.
pub trait Authenticator: Send + Sync {
    /// Validate the `Authorization` header value, returning the sender
    /// principal (or `None` for anonymous) on success.
    fn authenticate(&self, authorization: Option<&str>) -> Result<Option<Principal>, BusError>;
}

/// Accepts every request without identifying the sender.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAnonymous;

impl Authenticator for AllowAnonymous {
    fn authenticate(&self, _authorization: Option<&str>) -> Result<Option<Principal>, BusError> {
        Ok(None)
    }
}

/// Verifies HTTP basic credentials against a fixed user table.
#[derive(Debug, Default)]
pub struct BasicAuthenticator {
    users: HashMap<String, String>,
}

impl BasicAuthenticator {
    /// An authenticator with no users (rejects everything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `username` with `password`.
    #[must_use]
    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }
}

impl Authenticator for BasicAuthenticator {
    fn authenticate(&self, authorization: Option<&str>) -> Result<Option<Principal>, BusError> {
        let header = authorization.ok_or(BusError::Unauthorized)?;
        let encoded = header
            .strip_prefix("Basic ")
            .ok_or(BusError::Unauthorized)?;
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|_| BusError::Unauthorized)?;
        let decoded = String::from_utf8(decoded).map_err(|_| BusError::Unauthorized)?;
        let (username, password) = decoded.split_once(':').ok_or(BusError::Unauthorized)?;

        match self.users.get(username) {
            Some(expected) if expected == password => Ok(Some(Principal::new(
                username,
                Some("basic".to_string()),
            ))),
            _ => Err(BusError::Unauthorized),
        }
    }
}

/// Shared state behind the router.
#[derive(Clone)]
pub struct ServerState {
    transport: Arc<dyn Transport>,
    authenticator: Arc<dyn Authenticator>,
}

impl ServerState {
    /// State feeding `transport`, authenticating with `authenticator`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            transport,
            authenticator,
        }
    }
}

/// Build the message-bus router.
///
/// Topic names and message ids arrive percent-encoded in the path; the
/// subscriber URI travels as a query parameter precisely so that no path
/// rewriting can corrupt it.
#[must_use]
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/message/:message_id", post(handle_message))
        .route(
            "/topic/:topic/subscriber",
            post(handle_subscribe).delete(handle_unsubscribe),
        )
        .with_state(state)
}

fn status_for(error: &BusError) -> StatusCode {
    match error {
        BusError::Unauthorized => StatusCode::UNAUTHORIZED,
        BusError::NotAcknowledged => StatusCode::UNPROCESSABLE_ENTITY,
        BusError::InvalidRequest(_) | BusError::TopicNotFound(_) | BusError::UnknownMessage(_) => {
            StatusCode::BAD_REQUEST
        }
        BusError::Disposed | BusError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(error: &BusError) -> Response {
    (status_for(error), error.to_string()).into_response()
}

fn authenticate(state: &ServerState, headers: &HttpHeaderMap) -> Result<Option<Principal>, BusError> {
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok());
    state.authenticator.authenticate(authorization)
}

/// Copy inbound HTTP headers into a message header map, skipping transport
/// plumbing that is not message metadata.
fn message_headers(headers: &HttpHeaderMap) -> MessageHeaders {
    const SKIPPED: &[&str] = &[
        "authorization",
        "host",
        "content-length",
        "connection",
        "accept",
        "accept-encoding",
        "user-agent",
    ];
    headers
        .iter()
        .filter(|(name, _)| !SKIPPED.contains(&name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().into(), v.to_string()))
        })
        .collect()
}

async fn handle_message(
    State(state): State<ServerState>,
    Path(message_id): Path<String>,
    headers: HttpHeaderMap,
    body: Bytes,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(e) => {
            debug!(message_id = %message_id, "rejected unauthenticated message");
            return failure(&e);
        }
    };

    let mut message_headers = message_headers(&headers);
    if message_headers.message_id().is_none() {
        match message_id.parse() {
            Ok(id) => message_headers.set_message_id(id),
            Err(_) => {
                return failure(&BusError::InvalidRequest(format!(
                    "invalid message id: {message_id}"
                )))
            }
        }
    }

    let message = Message::new(message_headers, body.to_vec());
    match state.transport.accept_message(message, principal).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            debug!(message_id = %message_id, error = %e, "inbound message failed");
            failure(&e)
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubscriberQuery {
    uri: String,
    ttl: Option<u64>,
}

async fn handle_subscribe(
    State(state): State<ServerState>,
    Path(topic): Path<String>,
    Query(query): Query<SubscriberQuery>,
    headers: HttpHeaderMap,
) -> Response {
    handle_subscription(state, topic, query, headers, SubscriptionOp::Add).await
}

async fn handle_unsubscribe(
    State(state): State<ServerState>,
    Path(topic): Path<String>,
    Query(query): Query<SubscriberQuery>,
    headers: HttpHeaderMap,
) -> Response {
    handle_subscription(state, topic, query, headers, SubscriptionOp::Remove).await
}

async fn handle_subscription(
    state: ServerState,
    topic: String,
    query: SubscriberQuery,
    headers: HttpHeaderMap,
    op: SubscriptionOp,
) -> Response {
    let principal = match authenticate(&state, &headers) {
        Ok(p) => p,
        Err(e) => return failure(&e),
    };

    let topic = match TopicName::new(topic) {
        Ok(t) => t,
        Err(e) => return failure(&BusError::InvalidRequest(e.to_string())),
    };
    let subscriber = match Url::parse(&query.uri) {
        Ok(u) => u,
        Err(e) => {
            return failure(&BusError::InvalidRequest(format!(
                "invalid subscriber uri: {e}"
            )))
        }
    };
    let ttl = query.ttl.map(Duration::from_secs);

    match state
        .transport
        .accept_subscription_request(op, topic.clone(), subscriber, ttl, principal)
        .await
    {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            warn!(topic = %topic, %op, error = %e, "subscription request failed");
            failure(&e)
        }
    }
}

/// A running HTTP front-end for one bus.
pub struct HttpServer {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl HttpServer {
    /// Bind and start serving the bus wire protocol.
    pub async fn start(config: HttpServerConfig, state: ServerState) -> Result<Self, BusError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|e| BusError::Transport(format!("bind failed: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| BusError::Transport(format!("no local address: {e}")))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let app = router(state);
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                warn!(error = %e, "http server stopped with error");
            }
        });

        info!(addr = %local_addr, "http server started");
        Ok(Self {
            local_addr,
            shutdown_tx,
            handle,
        })
    }

    /// Address the server is listening on.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Base URI peers should use to reach this server.
    pub fn base_uri(&self) -> Result<Url, BusError> {
        Url::parse(&format!("http://{}/", self.local_addr))
            .map_err(|e| BusError::InvalidRequest(e.to_string()))
    }

    /// Stop accepting requests and wait for in-flight ones to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_authenticator_accepts_known_user() {
        let auth = BasicAuthenticator::new().with_user("alice", "s3cret");
        let header = format!("Basic {}", BASE64.encode("alice:s3cret"));
        let principal = auth.authenticate(Some(&header)).unwrap().unwrap();
        assert_eq!(principal.name(), "alice");
        assert_eq!(principal.scheme(), Some("basic"));
    }

    #[test]
    fn basic_authenticator_rejects_bad_password() {
        let auth = BasicAuthenticator::new().with_user("alice", "s3cret");
        let header = format!("Basic {}", BASE64.encode("alice:wrong"));
        assert_eq!(auth.authenticate(Some(&header)), Err(BusError::Unauthorized));
    }

    #[test]
    fn basic_authenticator_rejects_missing_header() {
        let auth = BasicAuthenticator::new().with_user("alice", "s3cret");
        assert_eq!(auth.authenticate(None), Err(BusError::Unauthorized));
    }

    #[test]
    fn anonymous_authenticator_accepts_everything() {
        assert_eq!(AllowAnonymous.authenticate(None), Ok(None));
    }

    #[test]
    fn status_mapping_matches_wire_contract() {
        assert_eq!(status_for(&BusError::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for(&BusError::NotAcknowledged),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&BusError::InvalidRequest("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&BusError::Transport("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn http_headers_become_message_headers() {
        let mut headers = HttpHeaderMap::new();
        headers.insert("Message-Id", "not-checked-here".parse().unwrap());
        headers.insert("Content-Type", "application/json".parse().unwrap());
        headers.insert("Authorization", "Basic abc".parse().unwrap());
        headers.insert("Host", "bus-b.internal".parse().unwrap());

        let converted = message_headers(&headers);
        assert_eq!(converted.get("message-id"), Some("not-checked-here"));
        assert_eq!(converted.content_type(), "application/json");
        assert!(converted.get("authorization").is_none());
        assert!(converted.get("host").is_none());
    }
}
