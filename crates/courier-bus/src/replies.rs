//! # Reply Hub
//!
//! Correlates inbound replies to the originating outbound message and
//! exposes them as a lazy stream per sent message.
//!
//! Flow:
//! 1. `send` registers a stream keyed by the outbound message id *before*
//!    the transport is started, so no reply can race the registration.
//! 2. The inbound path decodes any message with `related-to` set and calls
//!    [`ReplyHub::reply_received`].
//! 3. Callers read replies through [`SentMessage::observe_replies`]; the
//!    stream ends on the last-reply notification or when the entry is
//!    evicted after its idle TTL.
//!
//! Observers that subscribe after replies arrived see only subsequent
//! replies; the bus core always subscribes before sending is observable
//! externally, so this is invisible in practice.

use crate::naming::AnyPayload;
use dashmap::DashMap;
use courier_types::MessageId;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};

/// Default idle TTL after which reply streams are evicted.
pub const DEFAULT_REPLY_TTL: Duration = Duration::from_secs(300);

const REPLY_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
enum ReplyEvent {
    Payload(AnyPayload),
    Last,
}

struct ReplyEntry {
    tx: broadcast::Sender<ReplyEvent>,
    last_activity: parking_lot::Mutex<Instant>,
}

impl ReplyEntry {
    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }
}

/// Correlation table from outbound message ids to reply streams.
pub struct ReplyHub {
    streams: DashMap<MessageId, ReplyEntry>,
    idle_ttl: Duration,
}

impl ReplyHub {
    /// A hub evicting streams idle longer than `idle_ttl`.
    #[must_use]
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            streams: DashMap::new(),
            idle_ttl,
        }
    }

    /// Register a reply stream for an outbound message and return its
    /// handle. Must be called before the message is handed to transport.
    ///
    /// The handle holds an initial subscription taken here, so replies
    /// arriving between the send and the first `observe_replies` call are
    /// not lost.
    #[must_use]
    pub fn sent_message(self: &Arc<Self>, id: MessageId) -> SentMessage {
        let (tx, initial_rx) = broadcast::channel(REPLY_CHANNEL_CAPACITY);
        self.streams.insert(
            id,
            ReplyEntry {
                tx,
                last_activity: parking_lot::Mutex::new(Instant::now()),
            },
        );
        trace!(message_id = %id, "reply stream registered");
        SentMessage {
            id,
            hub: Arc::clone(self),
            initial: Arc::new(parking_lot::Mutex::new(Some(initial_rx))),
        }
    }

    /// Append a decoded reply to the stream for `related_to`.
    ///
    /// Returns false when no stream is registered (sender unknown or
    /// already evicted).
    pub fn reply_received(&self, related_to: MessageId, payload: AnyPayload) -> bool {
        match self.streams.get(&related_to) {
            Some(entry) => {
                entry.touch();
                // An Err here only means no observer is currently
                // subscribed; the reply is dropped, matching the
                // non-replayable stream contract.
                let delivered = entry.tx.send(ReplyEvent::Payload(payload)).is_ok();
                trace!(related_to = %related_to, delivered, "reply received");
                true
            }
            None => {
                debug!(related_to = %related_to, "reply for unknown or evicted message");
                false
            }
        }
    }

    /// Complete the stream for `related_to` and drop the registration.
    pub fn notify_last_reply(&self, related_to: MessageId) {
        if let Some((_, entry)) = self.streams.remove(&related_to) {
            let _ = entry.tx.send(ReplyEvent::Last);
            debug!(related_to = %related_to, "reply stream completed");
        }
    }

    /// Evict streams idle longer than the hub TTL; returns how many.
    pub fn remove_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.streams.len();
        self.streams
            .retain(|_, entry| now.duration_since(*entry.last_activity.lock()) < self.idle_ttl);
        before - self.streams.len()
    }

    /// Drop every stream; pending observers see end-of-stream.
    pub fn close(&self) {
        self.streams.clear();
    }

    /// Number of live reply streams.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

/// Periodically evict idle reply streams until shutdown.
pub async fn cleanup_task(
    hub: Arc<ReplyHub>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                let evicted = hub.remove_idle();
                if evicted > 0 {
                    debug!(evicted, "evicted idle reply streams");
                }
            }
        }
    }
}

/// Handle for a message handed to `send`; exposes the reply stream.
#[derive(Clone)]
pub struct SentMessage {
    id: MessageId,
    hub: Arc<ReplyHub>,
    initial: Arc<parking_lot::Mutex<Option<broadcast::Receiver<ReplyEvent>>>>,
}

impl std::fmt::Debug for SentMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentMessage").field("id", &self.id).finish_non_exhaustive()
    }
}

impl SentMessage {
    /// Id shared by every addressed copy of the sent message.
    #[must_use]
    pub fn message_id(&self) -> MessageId {
        self.id
    }

    /// Subscribe to replies correlated to this message.
    ///
    /// The first observer receives the subscription taken when the message
    /// was registered and therefore sees every reply since the send; later
    /// observers see only subsequent replies. All observers of one sent
    /// message see the same ordering.
    #[must_use]
    pub fn observe_replies(&self) -> Replies {
        if let Some(rx) = self.initial.lock().take() {
            return Replies { rx: Some(rx) };
        }
        let rx = self.hub.streams.get(&self.id).map(|e| e.tx.subscribe());
        Replies { rx }
    }
}

/// Lazy sequence of decoded reply payloads for one sent message.
pub struct Replies {
    rx: Option<broadcast::Receiver<ReplyEvent>>,
}

impl Replies {
    /// Next reply, or `None` once the stream is finished (last-reply
    /// notification, hub eviction, or bus shutdown).
    pub async fn recv(&mut self) -> Option<AnyPayload> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(ReplyEvent::Payload(payload)) => return Some(payload),
                Ok(ReplyEvent::Last) => {
                    self.rx = None;
                    return None;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "reply observer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Adapt into a `futures` stream of reply payloads.
    pub fn into_stream(self) -> impl futures::Stream<Item = AnyPayload> + Send {
        futures::stream::unfold(self, |mut replies| async move {
            replies.recv().await.map(|payload| (payload, replies))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn payload(text: &str) -> AnyPayload {
        Arc::new(text.to_string())
    }

    #[tokio::test]
    async fn replies_flow_to_observers() {
        let hub = Arc::new(ReplyHub::new(DEFAULT_REPLY_TTL));
        let sent = hub.sent_message(MessageId::new());
        let mut replies = sent.observe_replies();

        assert!(hub.reply_received(sent.message_id(), payload("first")));
        let got = timeout(Duration::from_secs(1), replies.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.downcast_ref::<String>().map(String::as_str), Some("first"));
    }

    #[tokio::test]
    async fn last_reply_completes_the_stream() {
        let hub = Arc::new(ReplyHub::new(DEFAULT_REPLY_TTL));
        let sent = hub.sent_message(MessageId::new());
        let mut replies = sent.observe_replies();

        hub.reply_received(sent.message_id(), payload("only"));
        hub.notify_last_reply(sent.message_id());

        assert!(replies.recv().await.is_some());
        assert!(replies.recv().await.is_none());
        assert_eq!(hub.stream_count(), 0);
    }

    #[tokio::test]
    async fn multiple_observers_see_the_same_sequence() {
        let hub = Arc::new(ReplyHub::new(DEFAULT_REPLY_TTL));
        let sent = hub.sent_message(MessageId::new());
        let mut a = sent.observe_replies();
        let mut b = sent.observe_replies();

        hub.reply_received(sent.message_id(), payload("r1"));
        hub.reply_received(sent.message_id(), payload("r2"));
        hub.notify_last_reply(sent.message_id());

        for observer in [&mut a, &mut b] {
            let first = observer.recv().await.unwrap();
            assert_eq!(first.downcast_ref::<String>().map(String::as_str), Some("r1"));
            let second = observer.recv().await.unwrap();
            assert_eq!(second.downcast_ref::<String>().map(String::as_str), Some("r2"));
            assert!(observer.recv().await.is_none());
        }
    }

    #[tokio::test]
    async fn replies_for_unknown_ids_are_dropped() {
        let hub = Arc::new(ReplyHub::new(DEFAULT_REPLY_TTL));
        assert!(!hub.reply_received(MessageId::new(), payload("orphan")));
    }

    #[tokio::test]
    async fn idle_streams_are_evicted() {
        let hub = Arc::new(ReplyHub::new(Duration::from_millis(10)));
        let sent = hub.sent_message(MessageId::new());
        let mut replies = sent.observe_replies();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(hub.remove_idle(), 1);
        assert!(replies.recv().await.is_none());
        assert!(!hub.reply_received(sent.message_id(), payload("late")));
    }

    #[tokio::test]
    async fn close_ends_every_stream() {
        let hub = Arc::new(ReplyHub::new(DEFAULT_REPLY_TTL));
        let sent = hub.sent_message(MessageId::new());
        let mut replies = sent.observe_replies();
        hub.close();
        assert!(replies.recv().await.is_none());
    }

    #[tokio::test]
    async fn first_observer_sees_replies_since_the_send() {
        let hub = Arc::new(ReplyHub::new(DEFAULT_REPLY_TTL));
        let sent = hub.sent_message(MessageId::new());

        // Reply lands before anyone observes, as happens when the peer
        // handles the message inline during the send itself.
        hub.reply_received(sent.message_id(), payload("early"));

        let mut replies = sent.observe_replies();
        let got = timeout(Duration::from_secs(1), replies.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.downcast_ref::<String>().map(String::as_str), Some("early"));
    }

    #[tokio::test]
    async fn late_observers_see_only_subsequent_replies() {
        let hub = Arc::new(ReplyHub::new(DEFAULT_REPLY_TTL));
        let sent = hub.sent_message(MessageId::new());

        let _first = sent.observe_replies();
        hub.reply_received(sent.message_id(), payload("early"));
        let mut late = sent.observe_replies();
        hub.reply_received(sent.message_id(), payload("later"));

        let got = timeout(Duration::from_secs(1), late.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.downcast_ref::<String>().map(String::as_str), Some("later"));
    }
}
