//! Message handlers and the per-message context they receive.

use crate::naming::AnyPayload;
use async_trait::async_trait;
use courier_types::{BusError, MessageHeaders, Principal};
use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Options for a reply sent from inside a handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyOptions {
    /// Mark this reply as the final one for the correlation stream.
    pub last: bool,
}

/// Sends replies on behalf of a handler; implemented by the bus core.
#[async_trait]
pub trait ReplyDispatcher: Send + Sync {
    /// Transport a reply correlated to the inbound message described by
    /// `inbound`.
    async fn dispatch_reply(
        &self,
        inbound: &MessageHeaders,
        payload: &(dyn Any + Send + Sync),
        options: ReplyOptions,
    ) -> Result<(), BusError>;
}

/// Context handed to every handler invocation for one inbound message.
///
/// Shared by all handlers matching the message: an acknowledgement by any
/// one of them acknowledges the message.
pub struct MessageContext {
    headers: MessageHeaders,
    principal: Option<Principal>,
    acknowledged: AtomicBool,
    replier: Option<Arc<dyn ReplyDispatcher>>,
}

impl MessageContext {
    /// Context wired to a reply dispatcher.
    #[must_use]
    pub fn new(
        headers: MessageHeaders,
        principal: Option<Principal>,
        replier: Option<Arc<dyn ReplyDispatcher>>,
    ) -> Self {
        Self {
            headers,
            principal,
            acknowledged: AtomicBool::new(false),
            replier,
        }
    }

    /// Headers of the inbound message.
    #[must_use]
    pub fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    /// Identity of the sender, when authenticated.
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Mark the message as successfully handled.
    pub fn acknowledge(&self) {
        self.acknowledged.store(true, Ordering::SeqCst);
    }

    /// Whether any handler acknowledged the message.
    #[must_use]
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::SeqCst)
    }

    /// Send a reply to the originator of the inbound message.
    ///
    /// The reply's `related-to` header is set to the inbound message id and
    /// it is routed to the inbound `reply-to` (falling back to
    /// `origination`).
    pub async fn send_reply<P>(&self, payload: P) -> Result<(), BusError>
    where
        P: Any + Send + Sync,
    {
        self.reply_with(payload, ReplyOptions::default()).await
    }

    /// Send a reply and mark it as the final one for this message.
    pub async fn send_last_reply<P>(&self, payload: P) -> Result<(), BusError>
    where
        P: Any + Send + Sync,
    {
        self.reply_with(payload, ReplyOptions { last: true }).await
    }

    async fn reply_with<P>(&self, payload: P, options: ReplyOptions) -> Result<(), BusError>
    where
        P: Any + Send + Sync,
    {
        let replier = self.replier.as_ref().ok_or_else(|| {
            BusError::InvalidRequest("replies are not available in this context".to_string())
        })?;
        replier
            .dispatch_reply(&self.headers, &payload, options)
            .await
    }
}

/// Handles one inbound message.
///
/// Handlers receive the decoded payload as `AnyPayload` plus the shared
/// context; typed handlers are built with [`typed_handler`]. A handler that
/// completes without calling [`MessageContext::acknowledge`] leaves the
/// message unacknowledged, which triggers the queue retry cycle (or an HTTP
/// 422 for in-line dispatch).
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one decoded message.
    async fn handle(
        &self,
        payload: AnyPayload,
        context: Arc<MessageContext>,
    ) -> Result<(), BusError>;
}

struct TypedHandler<T, F> {
    inner: F,
    _marker: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, F, Fut> MessageHandler for TypedHandler<T, F>
where
    T: Any + Send + Sync,
    F: Fn(Arc<T>, Arc<MessageContext>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BusError>> + Send,
{
    async fn handle(
        &self,
        payload: AnyPayload,
        context: Arc<MessageContext>,
    ) -> Result<(), BusError> {
        let typed = payload.downcast::<T>().map_err(|_| {
            BusError::InvalidRequest("payload type does not match handler".to_string())
        })?;
        (self.inner)(typed, context).await
    }
}

/// Wrap an async closure over a concrete payload type as a handler.
///
/// ```ignore
/// let handler = typed_handler(|order: Arc<OrderPlaced>, ctx| async move {
///     ctx.acknowledge();
///     ctx.send_reply(OrderAccepted { id: order.id }).await
/// });
/// ```
pub fn typed_handler<T, F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    T: Any + Send + Sync,
    F: Fn(Arc<T>, Arc<MessageContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BusError>> + Send + 'static,
{
    Arc::new(TypedHandler {
        inner: f,
        _marker: PhantomData,
    })
}
