//! Queue listeners: handler fan-out for inbound queues and transport
//! delivery for the outbound queue.

use crate::handlers::{MessageContext, MessageHandler, ReplyDispatcher};
use crate::naming::{AnyPayload, MessageRegistry, SerializerRegistry};
use crate::ports::Transport;
use crate::queue::{QueueListener, QueuedMessageContext};
use crate::rules::HandlingRule;
use async_trait::async_trait;
use chrono::Utc;
use courier_types::{BusError, Credentials, Endpoint, Message, QueueName};
use std::sync::Arc;
use tracing::{debug, warn};

/// Listener for handler queues: decodes the payload, fans out to every
/// handler whose rule targets this queue and matches the message name, and
/// acknowledges the queue entry when any handler acknowledged the message.
pub(crate) struct HandlingListener {
    queue: QueueName,
    rules: Arc<Vec<HandlingRule>>,
    registry: Arc<MessageRegistry>,
    serializers: Arc<SerializerRegistry>,
    replier: Arc<dyn ReplyDispatcher>,
}

impl HandlingListener {
    pub(crate) fn new(
        queue: QueueName,
        rules: Arc<Vec<HandlingRule>>,
        registry: Arc<MessageRegistry>,
        serializers: Arc<SerializerRegistry>,
        replier: Arc<dyn ReplyDispatcher>,
    ) -> Self {
        Self {
            queue,
            rules,
            registry,
            serializers,
            replier,
        }
    }
}

#[async_trait]
impl QueueListener for HandlingListener {
    async fn message_received(
        &self,
        message: &Message,
        context: &QueuedMessageContext,
    ) -> Result<(), BusError> {
        let headers = message.headers();
        if headers.is_expired(Utc::now()) {
            debug!(queue = %self.queue, "expired message skipped");
            context.acknowledge();
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
        )?;

        let handlers: Vec<Arc<dyn MessageHandler>> = self
            .rules
            .iter()
            .filter(|r| r.queue() == &self.queue && r.spec().matches(&name))
            .map(|r| Arc::clone(r.handler()))
            .collect();
        if handlers.is_empty() {
            warn!(queue = %self.queue, message = %name, "no matching handlers for queued message");
            return Err(BusError::NotAcknowledged);
        }

        let message_context = Arc::new(MessageContext::new(
            headers.clone(),
            context.principal().cloned(),
            Some(Arc::clone(&self.replier)),
        ));
        run_handlers(&handlers, payload, Arc::clone(&message_context)).await?;

        if message_context.is_acknowledged() {
            context.acknowledge();
        }
        Ok(())
    }
}

/// Run all handlers concurrently and await them; the first error (if any)
/// propagates after every handler has finished.
pub(crate) async fn run_handlers(
    handlers: &[Arc<dyn MessageHandler>],
    payload: AnyPayload,
    context: Arc<MessageContext>,
) -> Result<(), BusError> {
    let invocations = handlers.iter().map(|handler| {
        let handler = Arc::clone(handler);
        let payload = Arc::clone(&payload);
        let context = Arc::clone(&context);
        async move { handler.handle(payload, context).await }
    });
    let results = futures::future::join_all(invocations).await;
    results.into_iter().collect::<Result<(), BusError>>()
}

/// Listener for the outbound queue: delivers each queued message to its
/// destination. Transport failures leave the entry unacknowledged so the
/// engine's retry cycle takes over.
pub(crate) struct OutboundListener {
    transport: Arc<dyn Transport>,
    endpoints: Arc<Vec<Endpoint>>,
}

impl OutboundListener {
    pub(crate) fn new(transport: Arc<dyn Transport>, endpoints: Arc<Vec<Endpoint>>) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    fn credentials_for(&self, destination: &url::Url) -> Option<&Credentials> {
        self.endpoints
            .iter()
            .find(|e| e.matches_address(destination))
            .and_then(Endpoint::credentials)
    }
}

#[async_trait]
impl QueueListener for OutboundListener {
    async fn message_received(
        &self,
        message: &Message,
        context: &QueuedMessageContext,
    ) -> Result<(), BusError> {
        let destination = message
            .headers()
            .destination()
            .ok_or_else(|| BusError::InvalidRequest("queued message has no destination".to_string()))?;

        self.transport
            .send_message(message, self.credentials_for(&destination))
            .await?;
        context.acknowledge();
        Ok(())
    }
}
