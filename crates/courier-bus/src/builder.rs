//! Bus construction and initialization.

use crate::bus::{subscription_worker, Bus, SubscriptionPlan, OUTBOUND_QUEUE};
use crate::dispatch::{HandlingListener, OutboundListener};
use crate::handlers::MessageHandler;
use crate::naming::{MessageRegistry, SerializerRegistry};
use crate::ports::{InboundObserver, MessageJournal, QueueStore, SubscriptionStore, Transport};
use crate::queue::{QueueEngine, QueueOptions};
use crate::replies::{self, ReplyHub, DEFAULT_REPLY_TTL};
use crate::rules::{HandlingRule, MessageSpecification, SendRule};
use crate::subscriptions::{self, SubscriptionTracker};
use courier_types::{
    BusError, Endpoint, EndpointName, MessageName, QueueName, TopicName,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use url::Url;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Assembles a [`Bus`] from its ports and configuration tables.
///
/// Everything registered here is immutable once `build` returns; the
/// builder validates cross-references (rules → endpoints, subscriptions →
/// endpoints) before any worker starts.
pub struct BusBuilder {
    base_uri: Url,
    transport: Option<Arc<dyn Transport>>,
    queue_store: Option<Arc<dyn QueueStore>>,
    subscription_store: Option<Arc<dyn SubscriptionStore>>,
    journal: Option<Arc<dyn MessageJournal>>,
    registry: MessageRegistry,
    serializers: SerializerRegistry,
    endpoints: Vec<Endpoint>,
    topics: Vec<TopicName>,
    send_rules: Vec<SendRule>,
    handling_rules: Vec<HandlingRule>,
    queue_options: HashMap<QueueName, QueueOptions>,
    outbound_options: QueueOptions,
    subscriptions: Vec<SubscriptionPlan>,
    reply_ttl: Duration,
    next_handler_queue: usize,
}

impl BusBuilder {
    /// Start building a bus reachable at `base_uri`.
    #[must_use]
    pub fn new(base_uri: Url) -> Self {
        Self {
            base_uri,
            transport: None,
            queue_store: None,
            subscription_store: None,
            journal: None,
            registry: MessageRegistry::new(),
            serializers: SerializerRegistry::new(),
            endpoints: Vec::new(),
            topics: Vec::new(),
            send_rules: Vec::new(),
            handling_rules: Vec::new(),
            queue_options: HashMap::new(),
            outbound_options: QueueOptions::default(),
            subscriptions: Vec::new(),
            reply_ttl: DEFAULT_REPLY_TTL,
            next_handler_queue: 0,
        }
    }

    /// The transport moving messages between peers.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Durable storage for queues.
    #[must_use]
    pub fn queue_store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.queue_store = Some(store);
        self
    }

    /// Durable storage for subscription tracking.
    #[must_use]
    pub fn subscription_store(mut self, store: Arc<dyn SubscriptionStore>) -> Self {
        self.subscription_store = Some(store);
        self
    }

    /// Optional best-effort message journal.
    #[must_use]
    pub fn journal(mut self, journal: Arc<dyn MessageJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Register a payload type under its stable wire name.
    #[must_use]
    pub fn register<T>(mut self, name: MessageName) -> Self
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.registry.register::<T>(name);
        self
    }

    /// Register `Vec<u8>` as a raw octet-stream payload.
    #[must_use]
    pub fn register_raw(mut self, name: MessageName) -> Self {
        self.registry.register_raw(name);
        self
    }

    /// Declare a remote endpoint.
    #[must_use]
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Declare a topic this bus publishes.
    #[must_use]
    pub fn topic(mut self, topic: TopicName) -> Self {
        self.topics.push(topic);
        self
    }

    /// Route outbound messages matching `spec` to a named endpoint.
    #[must_use]
    pub fn send_rule(mut self, spec: MessageSpecification, endpoint: EndpointName) -> Self {
        self.send_rules.push(SendRule::new(spec, endpoint));
        self
    }

    /// Dispatch inbound messages matching `spec` to `handler` on a fresh
    /// dedicated queue.
    #[must_use]
    pub fn handle(mut self, spec: MessageSpecification, handler: Arc<dyn MessageHandler>) -> Self {
        let queue = QueueName::new(format!("handler-{}", self.next_handler_queue))
            .unwrap_or_else(|_| unreachable!("generated queue names are never empty"));
        self.next_handler_queue += 1;
        self.handling_rules
            .push(HandlingRule::new(spec, handler, queue));
        self
    }

    /// Dispatch inbound messages matching `spec` to `handler` on a shared
    /// named queue.
    #[must_use]
    pub fn handle_on_queue(
        mut self,
        spec: MessageSpecification,
        handler: Arc<dyn MessageHandler>,
        queue: QueueName,
    ) -> Self {
        self.handling_rules
            .push(HandlingRule::new(spec, handler, queue));
        self
    }

    /// Override the options of one handler queue.
    #[must_use]
    pub fn queue_options(mut self, queue: QueueName, options: QueueOptions) -> Self {
        self.queue_options.insert(queue, options);
        self
    }

    /// Override the outbound queue's options (retry pacing for durable
    /// sends).
    #[must_use]
    pub fn outbound_options(mut self, options: QueueOptions) -> Self {
        self.outbound_options = options;
        self
    }

    /// Maintain a subscription to `topic` on the publisher endpoint.
    ///
    /// A zero TTL requests a non-expiring subscription (no renewal worker
    /// iteration after the first success).
    #[must_use]
    pub fn subscribe(mut self, endpoint: EndpointName, topic: TopicName, ttl: Duration) -> Self {
        self.subscriptions.push(SubscriptionPlan {
            endpoint,
            topic,
            ttl,
        });
        self
    }

    /// Idle TTL after which unobserved reply streams are evicted.
    #[must_use]
    pub fn reply_ttl(mut self, ttl: Duration) -> Self {
        self.reply_ttl = ttl;
        self
    }

    /// Apply a configuration mutator callback.
    ///
    /// Hosts that discover configuration hooks dynamically resolve them to
    /// callbacks and apply them here.
    #[must_use]
    pub fn apply<F>(mut self, mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        mutator(&mut self);
        self
    }

    fn validate(&self) -> Result<(), BusError> {
        let mut names = HashSet::new();
        for endpoint in &self.endpoints {
            if !names.insert(endpoint.name().clone()) {
                return Err(BusError::Configuration(format!(
                    "duplicate endpoint name: {}",
                    endpoint.name()
                )));
            }
        }
        for rule in &self.send_rules {
            if !self.endpoints.iter().any(|e| e.name() == rule.endpoint()) {
                return Err(BusError::Configuration(format!(
                    "send rule references unknown endpoint: {}",
                    rule.endpoint()
                )));
            }
        }
        for plan in &self.subscriptions {
            if !self.endpoints.iter().any(|e| e.name() == &plan.endpoint) {
                return Err(BusError::Configuration(format!(
                    "subscription references unknown endpoint: {}",
                    plan.endpoint
                )));
            }
        }
        let mut topics = HashSet::new();
        for topic in &self.topics {
            if !topics.insert(topic.clone()) {
                return Err(BusError::Configuration(format!(
                    "duplicate topic: {topic}"
                )));
            }
        }
        Ok(())
    }

    /// Validate, create the queues, register the transport observer, and
    /// start the background workers.
    ///
    /// # Errors
    ///
    /// `Configuration` for missing ports or dangling references; `Storage`
    /// when recovery reads fail.
    pub async fn build(self) -> Result<Arc<Bus>, BusError> {
        self.validate()?;

        let transport = self
            .transport
            .ok_or_else(|| BusError::Configuration("a transport is required".to_string()))?;
        let queue_store = self
            .queue_store
            .ok_or_else(|| BusError::Configuration("a queue store is required".to_string()))?;
        let subscription_store = self.subscription_store.ok_or_else(|| {
            BusError::Configuration("a subscription store is required".to_string())
        })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = QueueEngine::new(queue_store, shutdown_rx.clone());
        let tracker = Arc::new(SubscriptionTracker::init(subscription_store).await?);
        let reply_hub = Arc::new(ReplyHub::new(self.reply_ttl));
        let registry = Arc::new(self.registry);
        let serializers = Arc::new(self.serializers);
        let endpoints = Arc::new(self.endpoints);
        let handling_rules = Arc::new(self.handling_rules);
        let outbound_queue = QueueName::new(OUTBOUND_QUEUE)
            .unwrap_or_else(|_| unreachable!("outbound queue name is never empty"));

        let bus = Arc::new(Bus {
            base_uri: self.base_uri,
            transport: Arc::clone(&transport),
            registry: Arc::clone(&registry),
            serializers: Arc::clone(&serializers),
            endpoints: Arc::clone(&endpoints),
            topics: self.topics,
            send_rules: self.send_rules,
            handling_rules: Arc::clone(&handling_rules),
            engine,
            tracker: Arc::clone(&tracker),
            reply_hub: Arc::clone(&reply_hub),
            journal: self.journal,
            shutdown_tx,
            workers: parking_lot::Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
            outbound_queue: outbound_queue.clone(),
            self_ref: OnceLock::new(),
        });
        let _ = bus.self_ref.set(Arc::downgrade(&bus));

        // Outbound queue: durable sends flow through here to the transport.
        let outbound_listener = Arc::new(OutboundListener::new(
            Arc::clone(&transport),
            Arc::clone(&endpoints),
        ));
        bus.engine
            .create_queue(
                outbound_queue,
                outbound_listener,
                self.outbound_options.clone(),
            )
            .await?;

        // One queue per distinct handling-rule target, each fanning out to
        // all of its matching handlers.
        let mut handler_queues: Vec<QueueName> = handling_rules
            .iter()
            .map(|r| r.queue().clone())
            .collect();
        handler_queues.sort();
        handler_queues.dedup();
        for queue in handler_queues {
            let listener = Arc::new(HandlingListener::new(
                queue.clone(),
                Arc::clone(&handling_rules),
                Arc::clone(&registry),
                Arc::clone(&serializers),
                bus.replier()?,
            ));
            let options = self
                .queue_options
                .get(&queue)
                .cloned()
                .unwrap_or_default();
            bus.engine.create_queue(queue, listener, options).await?;
        }

        // The bus is the transport's single inbound observer.
        let observer: Arc<dyn InboundObserver> = Arc::clone(&bus) as Arc<dyn InboundObserver>;
        transport.set_observer(Arc::downgrade(&observer));

        let mut workers = Vec::new();
        let cleanup_interval = (self.reply_ttl / 2).max(Duration::from_millis(50));
        workers.push(tokio::spawn(replies::cleanup_task(
            Arc::clone(&reply_hub),
            cleanup_interval,
            shutdown_rx.clone(),
        )));
        workers.push(tokio::spawn(subscriptions::sweep_task(
            Arc::clone(&tracker),
            SWEEP_INTERVAL,
            shutdown_rx.clone(),
        )));

        for plan in self.subscriptions {
            let publisher = endpoints
                .iter()
                .find(|e| e.name() == &plan.endpoint)
                .cloned()
                .ok_or_else(|| BusError::EndpointNotFound(plan.endpoint.clone()))?;
            workers.push(tokio::spawn(subscription_worker(
                Arc::clone(&transport),
                publisher,
                plan.topic,
                plan.ttl,
                bus.base_uri.clone(),
                shutdown_rx.clone(),
            )));
        }

        *bus.workers.lock() = workers;
        tracing::info!(base_uri = %bus.base_uri, "bus started");
        Ok(bus)
    }
}
