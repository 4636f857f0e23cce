//! Shared scaffolding for the end-to-end scenarios: test payload types and
//! helpers that stand up complete bus instances over HTTP or the in-memory
//! transport.

use chrono::{DateTime, Utc};
use courier_bus::testing::{InMemoryQueueStore, InMemorySubscriptionStore};
use courier_bus::{Bus, BusBuilder};
use courier_http::{
    Authenticator, HttpServer, HttpServerConfig, HttpTransport, HttpTransportConfig, ServerState,
};
use courier_types::MessageName;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

/// Counts handler invocations and lets tests await a target count.
#[derive(Default)]
pub struct Probe {
    count: AtomicUsize,
    notify: Notify,
}

impl Probe {
    /// A fresh probe.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record one hit.
    pub fn hit(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Hits so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait (unbounded; wrap in a timeout) until at least `target` hits.
    pub async fn wait_for(&self, target: usize) {
        loop {
            // Register for the wakeup before checking, so a hit landing
            // between the check and the await is not lost.
            let notified = self.notify.notified();
            if self.count() >= target {
                return;
            }
            notified.await;
        }
    }
}

/// Command payload used by the send/reply scenarios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCommand {
    pub guid_data: Uuid,
    pub int_data: i32,
    pub string_data: String,
    pub date_data: DateTime<Utc>,
}

impl TestCommand {
    /// The literal payload of the simple send/reply scenario.
    #[must_use]
    pub fn sample() -> Self {
        Self {
            guid_data: Uuid::new_v4(),
            int_data: 42,
            string_data: "Hello, world!".to_string(),
            date_data: "2020-01-01T00:00:00Z".parse().expect("valid timestamp"),
        }
    }
}

/// Reply payload echoing the command's integer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReply {
    pub echo: i32,
}

/// Event payload for the publish scenarios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestEvent {
    pub label: String,
}

/// Wire name of [`TestCommand`].
#[must_use]
pub fn command_name() -> MessageName {
    MessageName::new("test:Command").expect("valid name")
}

/// Wire name of [`TestReply`].
#[must_use]
pub fn reply_name() -> MessageName {
    MessageName::new("test:Reply").expect("valid name")
}

/// Wire name of [`TestEvent`].
#[must_use]
pub fn event_name() -> MessageName {
    MessageName::new("test:Event").expect("valid name")
}

/// Register the three test payload types on a builder.
#[must_use]
pub fn register_test_types(builder: BusBuilder) -> BusBuilder {
    builder
        .register::<TestCommand>(command_name())
        .register::<TestReply>(reply_name())
        .register::<TestEvent>(event_name())
}

/// One bus instance wired to a real loopback HTTP server.
pub struct HttpBus {
    pub bus: Arc<Bus>,
    pub server: HttpServer,
    pub transport: Arc<HttpTransport>,
    pub queue_store: Arc<InMemoryQueueStore>,
}

impl HttpBus {
    /// Shut the bus down and stop its server.
    pub async fn stop(self) {
        self.bus.shutdown().await;
        self.server.shutdown().await;
    }
}

/// Stand up a bus behind a loopback HTTP server on an ephemeral port.
///
/// `configure` receives a builder already carrying the server's base URI,
/// the transport, in-memory stores, and the test payload registrations.
pub async fn start_http_bus<F>(authenticator: Arc<dyn Authenticator>, configure: F) -> HttpBus
where
    F: FnOnce(BusBuilder) -> BusBuilder,
{
    let transport = Arc::new(
        HttpTransport::new(HttpTransportConfig::default()).expect("http transport builds"),
    );
    let server = HttpServer::start(
        HttpServerConfig::default(),
        ServerState::new(transport.clone(), authenticator),
    )
    .await
    .expect("server starts");
    let base_uri = server.base_uri().expect("base uri");

    let queue_store = Arc::new(InMemoryQueueStore::new());
    let builder = register_test_types(BusBuilder::new(base_uri))
        .transport(transport.clone())
        .queue_store(queue_store.clone())
        .subscription_store(Arc::new(InMemorySubscriptionStore::new()));
    let bus = configure(builder).build().await.expect("bus builds");

    HttpBus {
        bus,
        server,
        transport,
        queue_store,
    }
}
