//! # Bus Core
//!
//! Composes transport, queue engine, subscription tracker, reply hub, and
//! the message registry into the public API: send, publish, handler
//! dispatch, reply routing, subscription maintenance, and lifecycle.
//!
//! Configuration tables (endpoints, topics, rules, subscriptions) are
//! assembled by [`crate::builder::BusBuilder`] and immutable once the bus
//! is built; only the reply hub and subscription tracker mutate at runtime.

use crate::dispatch::run_handlers;
use crate::handlers::{MessageContext, ReplyDispatcher, ReplyOptions};
use crate::naming::{MessageRegistry, SerializerRegistry};
use crate::ports::{
    InboundObserver, JournalCategory, MessageJournal, SubscriptionOp, Transport,
};
use crate::queue::QueueEngine;
use crate::replies::{ReplyHub, SentMessage};
use crate::rules::{HandlingRule, SendRule};
use crate::subscriptions::SubscriptionTracker;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use courier_types::{
    BusError, Credentials, Endpoint, Importance, Message, MessageHeaders, MessageId, MessageName,
    Principal, QueueName, TopicName, DEFAULT_CONTENT_TYPE,
};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

/// Name of the durable outbound queue every bus owns.
pub const OUTBOUND_QUEUE: &str = "outbound";

/// Backoff applied by subscription workers after a transient failure.
const SUBSCRIPTION_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Per-send knobs.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Persist to the outbound queue and return before network I/O.
    pub durable: bool,
    /// Severity stamped on the message; drives queueing on receive.
    pub importance: Importance,
    /// Content media type; `application/json` when unset.
    pub content_type: Option<String>,
    /// Sets the `expires` header to now + ttl.
    pub ttl: Option<Duration>,
}

/// One configured outbound subscription, maintained by a renewal worker.
#[derive(Debug, Clone)]
pub struct SubscriptionPlan {
    /// Endpoint of the publisher.
    pub endpoint: courier_types::EndpointName,
    /// Topic to subscribe to.
    pub topic: TopicName,
    /// Requested TTL; zero means non-expiring (no renewal scheduled).
    pub ttl: Duration,
}

/// A configured bus instance.
///
/// Built by [`crate::builder::BusBuilder`]; always handled through `Arc`.
/// Call [`Bus::shutdown`] to stop workers and release the transport.
pub struct Bus {
    pub(crate) base_uri: Url,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) registry: Arc<MessageRegistry>,
    pub(crate) serializers: Arc<SerializerRegistry>,
    pub(crate) endpoints: Arc<Vec<Endpoint>>,
    pub(crate) topics: Vec<TopicName>,
    pub(crate) send_rules: Vec<SendRule>,
    pub(crate) handling_rules: Arc<Vec<HandlingRule>>,
    pub(crate) engine: QueueEngine,
    pub(crate) tracker: Arc<SubscriptionTracker>,
    pub(crate) reply_hub: Arc<ReplyHub>,
    pub(crate) journal: Option<Arc<dyn MessageJournal>>,
    pub(crate) shutdown_tx: watch::Sender<bool>,
    pub(crate) workers: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) disposed: AtomicBool,
    pub(crate) outbound_queue: QueueName,
    /// Back-reference set once by the builder; lets `&self` methods hand
    /// out `Arc<dyn ReplyDispatcher>` handles to message contexts.
    pub(crate) self_ref: OnceLock<Weak<Bus>>,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus").finish_non_exhaustive()
    }
}

impl Bus {
    /// Base URI peers use to reach this bus.
    #[must_use]
    pub fn base_uri(&self) -> &Url {
        &self.base_uri
    }

    /// Live subscribers of a declared topic.
    #[must_use]
    pub fn subscribers(&self, topic: &TopicName) -> Vec<Url> {
        self.tracker.subscribers(topic)
    }

    /// Send a message, resolving destinations through the send rules.
    ///
    /// # Errors
    ///
    /// `NoEndpoints` when no rule matches and resolves; transport errors
    /// surface unwrapped so callers decide retry policy.
    pub async fn send<P>(&self, payload: P) -> Result<SentMessage, BusError>
    where
        P: Any + Send + Sync,
    {
        self.send_with(payload, SendOptions::default()).await
    }

    /// [`Bus::send`] with explicit options.
    pub async fn send_with<P>(
        &self,
        payload: P,
        options: SendOptions,
    ) -> Result<SentMessage, BusError>
    where
        P: Any + Send + Sync,
    {
        self.ensure_active()?;
        let (name, content, content_type) = self.encode(&payload, &options)?;

        let mut destinations = Vec::new();
        let mut seen = HashSet::new();
        for rule in self.send_rules.iter().filter(|r| r.spec().matches(&name)) {
            let endpoint = self.endpoint_by_name(rule.endpoint())?;
            if seen.insert(endpoint.name().clone()) {
                destinations.push((
                    endpoint.address().clone(),
                    endpoint.credentials().cloned(),
                ));
            }
        }
        if destinations.is_empty() {
            return Err(BusError::NoEndpoints);
        }

        self.send_addressed(name, content, content_type, destinations, options)
            .await
    }

    /// Send a message to one named endpoint.
    pub async fn send_to<P>(
        &self,
        payload: P,
        endpoint: &courier_types::EndpointName,
    ) -> Result<SentMessage, BusError>
    where
        P: Any + Send + Sync,
    {
        self.send_to_with(payload, endpoint, SendOptions::default())
            .await
    }

    /// [`Bus::send_to`] with explicit options.
    pub async fn send_to_with<P>(
        &self,
        payload: P,
        endpoint: &courier_types::EndpointName,
        options: SendOptions,
    ) -> Result<SentMessage, BusError>
    where
        P: Any + Send + Sync,
    {
        self.ensure_active()?;
        let (name, content, content_type) = self.encode(&payload, &options)?;
        let endpoint = self.endpoint_by_name(endpoint)?;
        let destinations = vec![(
            endpoint.address().clone(),
            endpoint.credentials().cloned(),
        )];
        self.send_addressed(name, content, content_type, destinations, options)
            .await
    }

    /// Send a message to an ad-hoc URI, optionally with explicit
    /// credentials (the endpoint table is consulted by address otherwise).
    pub async fn send_to_uri<P>(
        &self,
        payload: P,
        destination: Url,
        credentials: Option<Credentials>,
        options: SendOptions,
    ) -> Result<SentMessage, BusError>
    where
        P: Any + Send + Sync,
    {
        self.ensure_active()?;
        let (name, content, content_type) = self.encode(&payload, &options)?;
        let credentials =
            credentials.or_else(|| self.credentials_for(&destination).cloned());
        let destinations = vec![(destination, credentials)];
        self.send_addressed(name, content, content_type, destinations, options)
            .await
    }

    /// Publish an event on a declared topic.
    ///
    /// The subscriber set is enumerated atomically at the time of the call;
    /// per-subscriber delivery failures are logged, not surfaced, because
    /// publishers treat subscribers as advisory.
    pub async fn publish<P>(&self, payload: P, topic: &TopicName) -> Result<(), BusError>
    where
        P: Any + Send + Sync,
    {
        self.ensure_active()?;
        if !self.topics.contains(topic) {
            return Err(BusError::TopicNotFound(topic.clone()));
        }

        let options = SendOptions::default();
        let (name, content, content_type) = self.encode(&payload, &options)?;
        let mut headers = self.base_headers(&name, &content_type, &options);
        headers.set_topic(topic);
        headers.set_published(Utc::now());
        let prototype = Message::new(headers, content);

        self.journal_append(JournalCategory::Published, &prototype)
            .await;

        let subscribers = self.tracker.subscribers(topic);
        debug!(topic = %topic, subscribers = subscribers.len(), "publishing");

        let legs = subscribers.into_iter().map(|uri| {
            let mut headers = prototype.headers().clone();
            headers.set_destination(&uri);
            let copy = prototype.with_headers(headers);
            let credentials = self.credentials_for(&uri).cloned();
            async move {
                let outcome = self
                    .transport
                    .send_message(&copy, credentials.as_ref())
                    .await;
                (uri, outcome)
            }
        });
        for (uri, outcome) in futures::future::join_all(legs).await {
            if let Err(e) = outcome {
                warn!(topic = %topic, subscriber = %uri, error = %e,
                      "publish delivery failed");
            }
        }
        Ok(())
    }

    /// Stop the bus: cancel every worker, close the reply hub, and refuse
    /// further operations with `Disposed`. Idempotent.
    pub async fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.await;
        }
        self.reply_hub.close();
        info!(base_uri = %self.base_uri, "bus stopped");
    }

    fn ensure_active(&self) -> Result<(), BusError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(BusError::Disposed);
        }
        Ok(())
    }

    fn endpoint_by_name(
        &self,
        name: &courier_types::EndpointName,
    ) -> Result<&Endpoint, BusError> {
        self.endpoints
            .iter()
            .find(|e| e.name() == name)
            .ok_or_else(|| BusError::EndpointNotFound(name.clone()))
    }

    fn credentials_for(&self, address: &Url) -> Option<&Credentials> {
        self.endpoints
            .iter()
            .find(|e| e.matches_address(address))
            .and_then(Endpoint::credentials)
    }

    fn encode(
        &self,
        payload: &(dyn Any + Send + Sync),
        options: &SendOptions,
    ) -> Result<(MessageName, Vec<u8>, String), BusError> {
        let content_type = options
            .content_type
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let (name, content) = self
            .registry
            .encode(payload, &content_type, &self.serializers)?;
        Ok((name, content, content_type))
    }

    fn base_headers(
        &self,
        name: &MessageName,
        content_type: &str,
        options: &SendOptions,
    ) -> MessageHeaders {
        let mut headers = MessageHeaders::new();
        headers.set_message_id(MessageId::new());
        headers.set_message_name(name);
        headers.set_origination(&self.base_uri);
        headers.set_content_type(content_type);
        headers.set_importance(options.importance);
        if let Some(ttl) = options.ttl {
            let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::max_value());
            headers.set_expires(Utc::now() + ttl);
        }
        headers
    }

    /// Address one copy per destination and transport them in parallel.
    ///
    /// The sent-message handle is registered in the reply hub before any
    /// leg starts, so a reply can never race the registration.
    async fn send_addressed(
        &self,
        name: MessageName,
        content: Vec<u8>,
        content_type: String,
        destinations: Vec<(Url, Option<Credentials>)>,
        options: SendOptions,
    ) -> Result<SentMessage, BusError> {
        let headers = self.base_headers(&name, &content_type, &options);
        let id = headers
            .message_id()
            .ok_or_else(|| BusError::InvalidRequest("message id missing".to_string()))?;
        let prototype = Message::new(headers, content);

        let sent = self.reply_hub.sent_message(id);

        let legs = destinations.into_iter().map(|(uri, credentials)| {
            let mut headers = prototype.headers().clone();
            headers.set_destination(&uri);
            let copy = prototype.with_headers(headers);
            let durable = options.durable;
            async move {
                self.journal_append(JournalCategory::Sent, &copy).await;
                if durable {
                    self.engine
                        .enqueue(&self.outbound_queue, copy, None)
                        .await
                } else {
                    self.transport
                        .send_message(&copy, credentials.as_ref())
                        .await
                }
            }
        });
        futures::future::try_join_all(legs).await?;

        debug!(message = %name, message_id = %id, durable = options.durable, "message sent");
        Ok(sent)
    }

    async fn journal_append(&self, category: JournalCategory, message: &Message) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(category, message).await {
                warn!(category = %category, error = %e, "journal append failed");
            }
        }
    }
}

#[async_trait]
impl InboundObserver for Bus {
    async fn on_message(
        &self,
        message: Message,
        principal: Option<Principal>,
    ) -> Result<(), BusError> {
        self.ensure_active()?;
        self.journal_append(JournalCategory::Received, &message)
            .await;

        let headers = message.headers();
        if headers.is_expired(Utc::now()) {
            debug!(message_id = ?headers.message_id(), "expired inbound message discarded");
            return Ok(());
        }

        let name = headers
            .message_name()
            .ok_or_else(|| BusError::InvalidRequest("message has no name".to_string()))?;
        let payload = self.registry.decode(
            &name,
            headers.content_type(),
            message.content(),
            &self.serializers,
        );

        // Replies notify the hub and count as acknowledged regardless of
        // whether any handling rule also matches.
        let mut acknowledged = false;
        if let Some(related) = headers.related_to() {
            match &payload {
                Ok(decoded) => {
                    self.reply_hub.reply_received(related, Arc::clone(decoded));
                    if headers.is_last_reply() {
                        self.reply_hub.notify_last_reply(related);
                    }
                    acknowledged = true;
                }
                Err(e) => {
                    warn!(related_to = %related, error = %e, "undecodable reply dropped");
                }
            }
        }

        let matching: Vec<&HandlingRule> = self
            .handling_rules
            .iter()
            .filter(|r| r.spec().matches(&name))
            .collect();
        if matching.is_empty() {
            return if acknowledged {
                Ok(())
            } else {
                Err(BusError::NotAcknowledged)
            };
        }

        if headers.importance().requires_queueing() {
            // Enqueue into every distinct queue reached by matching rules;
            // the enqueue awaits durable acceptance, which is what lets the
            // front-end answer "accepted for future processing".
            let queues: HashSet<&QueueName> = matching.iter().map(|r| r.queue()).collect();
            for queue in queues {
                self.engine
                    .enqueue(queue, message.clone(), principal.clone())
                    .await?;
            }
            return Ok(());
        }

        let payload = payload?;
        let context = Arc::new(MessageContext::new(
            headers.clone(),
            principal,
            Some(self.replier()?),
        ));
        let handlers: Vec<_> = matching.iter().map(|r| Arc::clone(r.handler())).collect();
        if let Err(e) = run_handlers(&handlers, payload, Arc::clone(&context)).await {
            warn!(message = %name, error = %e, "inline handler failed");
        }

        if context.is_acknowledged() || acknowledged {
            Ok(())
        } else {
            Err(BusError::NotAcknowledged)
        }
    }

    async fn on_subscription_request(
        &self,
        op: SubscriptionOp,
        topic: TopicName,
        subscriber: Url,
        ttl: Option<Duration>,
        _principal: Option<Principal>,
    ) -> Result<(), BusError> {
        self.ensure_active()?;
        if !self.topics.contains(&topic) {
            return Err(BusError::TopicNotFound(topic));
        }
        match op {
            SubscriptionOp::Add => {
                self.tracker
                    .add_subscription(&topic, subscriber, ttl)
                    .await
            }
            SubscriptionOp::Remove => {
                self.tracker.remove_subscription(&topic, &subscriber).await
            }
        }
    }
}

impl Bus {
    /// Reply dispatcher handle for message contexts.
    pub(crate) fn replier(&self) -> Result<Arc<dyn ReplyDispatcher>, BusError> {
        self.self_ref
            .get()
            .and_then(Weak::upgrade)
            .map(|bus| bus as Arc<dyn ReplyDispatcher>)
            .ok_or(BusError::Disposed)
    }
}

#[async_trait]
impl ReplyDispatcher for Bus {
    async fn dispatch_reply(
        &self,
        inbound: &MessageHeaders,
        payload: &(dyn Any + Send + Sync),
        options: ReplyOptions,
    ) -> Result<(), BusError> {
        self.ensure_active()?;
        let related = inbound
            .message_id()
            .ok_or_else(|| BusError::InvalidRequest("inbound message has no id".to_string()))?;
        let destination = inbound
            .reply_to()
            .or_else(|| inbound.origination())
            .ok_or_else(|| {
                BusError::InvalidRequest("inbound message has no reply destination".to_string())
            })?;

        let (name, content) =
            self.registry
                .encode(payload, DEFAULT_CONTENT_TYPE, &self.serializers)?;
        let mut headers = MessageHeaders::new();
        headers.set_message_id(MessageId::new());
        headers.set_message_name(&name);
        headers.set_origination(&self.base_uri);
        headers.set_destination(&destination);
        headers.set_related_to(related);
        headers.set_content_type(DEFAULT_CONTENT_TYPE);
        if options.last {
            headers.set_last_reply();
        }
        let reply = Message::new(headers, content);

        self.journal_append(JournalCategory::Sent, &reply).await;
        self.transport
            .send_message(&reply, self.credentials_for(&destination))
            .await
    }
}

/// Long-lived renewal worker for one configured outbound subscription.
///
/// Sends an Add request, sleeps half the TTL on success (no renewal for
/// non-expiring subscriptions), backs off 30 s on transient failures, and
/// stops permanently on anything else.
pub(crate) async fn subscription_worker(
    transport: Arc<dyn Transport>,
    publisher: Endpoint,
    topic: TopicName,
    ttl: Duration,
    subscriber: Url,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        let requested_ttl = (!ttl.is_zero()).then_some(ttl);
        let result = transport
            .send_subscription_request(
                SubscriptionOp::Add,
                publisher.address(),
                publisher.credentials(),
                &topic,
                &subscriber,
                requested_ttl,
            )
            .await;

        let delay = match result {
            Ok(()) => {
                if ttl.is_zero() {
                    debug!(topic = %topic, publisher = %publisher.name(),
                           "non-expiring subscription established");
                    return;
                }
                debug!(topic = %topic, publisher = %publisher.name(), "subscription renewed");
                ttl / 2
            }
            Err(e) if e.is_transient() => {
                warn!(topic = %topic, publisher = %publisher.name(), error = %e,
                      "subscription request failed, will retry");
                SUBSCRIPTION_RETRY_BACKOFF
            }
            Err(e) => {
                error!(topic = %topic, publisher = %publisher.name(), error = %e,
                       "subscription request rejected, giving up");
                return;
            }
        };

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}
