//! The queue engine: queue creation, enqueueing, and the dispatch loop.

use super::context::QueuedMessageContext;
use super::QueueListener;
use crate::ports::QueueStore;
use chrono::Utc;
use courier_types::{BusError, Message, Principal, QueueName, QueuedMessage};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tracing::{debug, error, warn};

/// Tunables for one queue.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Maximum listener invocations in flight at once. Messages dispatch in
    /// enqueue order only when this is 1.
    pub concurrency_limit: usize,
    /// Acknowledge automatically when the listener returns without error.
    pub auto_acknowledge: bool,
    /// Dispatch attempts before a message is abandoned.
    pub max_attempts: u32,
    /// Pause between attempts for one message.
    pub retry_delay: Duration,
    /// Capacity of the in-memory buffer; enqueues await when it is full.
    pub buffer_size: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: 1,
            auto_acknowledge: false,
            max_attempts: 10,
            retry_delay: Duration::ZERO,
            buffer_size: 1024,
        }
    }
}

impl QueueOptions {
    fn validate(&self) -> Result<(), BusError> {
        if self.concurrency_limit == 0 {
            return Err(BusError::Configuration(
                "concurrency limit must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(BusError::Configuration(
                "max attempts must be at least 1".to_string(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(BusError::Configuration(
                "buffer size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

struct QueueHandle {
    buffer_tx: mpsc::Sender<QueuedMessage>,
    next_sequence: Arc<AtomicU64>,
}

/// Durable queues with listener dispatch.
///
/// One engine serves all queues of a bus instance over a single store.
pub struct QueueEngine {
    store: Arc<dyn QueueStore>,
    queues: RwLock<HashMap<QueueName, Arc<QueueHandle>>>,
    create_lock: Mutex<()>,
    shutdown: watch::Receiver<bool>,
}

impl QueueEngine {
    /// An engine over `store`, stopping all dispatch when `shutdown` flips.
    #[must_use]
    pub fn new(store: Arc<dyn QueueStore>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            store,
            queues: RwLock::new(HashMap::new()),
            create_lock: Mutex::new(()),
            shutdown,
        }
    }

    /// Create a queue, replay its non-terminal persisted messages, and
    /// start its dispatcher.
    ///
    /// # Errors
    ///
    /// - `QueueExists` when the name was already created in this process.
    /// - `Configuration` for invalid options.
    /// - `Storage` when recovery reads fail.
    pub async fn create_queue(
        &self,
        name: QueueName,
        listener: Arc<dyn QueueListener>,
        options: QueueOptions,
    ) -> Result<(), BusError> {
        options.validate()?;

        let _guard = self.create_lock.lock().await;
        if self.queues.read().contains_key(&name) {
            return Err(BusError::QueueExists(name));
        }

        let recovered = self.store.load_pending(&name).await?;
        let next_sequence = recovered
            .iter()
            .map(|r| r.sequence + 1)
            .max()
            .unwrap_or(0);

        let (buffer_tx, buffer_rx) = mpsc::channel(options.buffer_size);
        let semaphore = Arc::new(Semaphore::new(options.concurrency_limit));
        let worker = Arc::new(QueueWorker {
            name: name.clone(),
            listener,
            options,
            store: Arc::clone(&self.store),
            semaphore,
            shutdown: self.shutdown.clone(),
        });

        tokio::spawn(pull_loop(Arc::clone(&worker), buffer_rx));

        debug!(queue = %name, recovered = recovered.len(), "queue created");
        for record in recovered {
            if buffer_tx.send(record).await.is_err() {
                return Err(BusError::Cancelled);
            }
        }

        self.queues.write().insert(
            name,
            Arc::new(QueueHandle {
                buffer_tx,
                next_sequence: Arc::new(AtomicU64::new(next_sequence)),
            }),
        );
        Ok(())
    }

    /// Persist a message onto a queue and signal the dispatcher.
    ///
    /// Awaits when the in-memory buffer is full; this is the backpressure
    /// inbound paths rely on before answering "accepted".
    ///
    /// # Errors
    ///
    /// - `QueueNotFound` when the queue was never created.
    /// - `Storage` when the insert fails.
    /// - `Cancelled` when the bus shuts down mid-enqueue.
    pub async fn enqueue(
        &self,
        name: &QueueName,
        message: Message,
        principal: Option<Principal>,
    ) -> Result<(), BusError> {
        let handle = self
            .queues
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BusError::QueueNotFound(name.clone()))?;

        let sequence = handle.next_sequence.fetch_add(1, Ordering::SeqCst);
        let record = QueuedMessage::new(message, principal, sequence);
        self.store.insert(name, record.clone()).await?;

        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow_and_update() {
            // Persisted but not dispatched: the record is replayed on the
            // next process start.
            return Err(BusError::Cancelled);
        }
        tokio::select! {
            _ = shutdown.changed() => Err(BusError::Cancelled),
            sent = handle.buffer_tx.send(record) => {
                sent.map_err(|_| BusError::Cancelled)
            }
        }
    }

    /// Whether a queue with this name was created.
    #[must_use]
    pub fn has_queue(&self, name: &QueueName) -> bool {
        self.queues.read().contains_key(name)
    }
}

struct QueueWorker {
    name: QueueName,
    listener: Arc<dyn QueueListener>,
    options: QueueOptions,
    store: Arc<dyn QueueStore>,
    semaphore: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
}

/// Receives from the buffer and launches one process task per message.
///
/// The loop itself is unbounded; real concurrency is bounded by the permit
/// each process task must hold while dispatching.
async fn pull_loop(worker: Arc<QueueWorker>, mut buffer_rx: mpsc::Receiver<QueuedMessage>) {
    let mut shutdown = worker.shutdown.clone();
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(queue = %worker.name, "queue dispatcher stopping");
                    return;
                }
            }
            next = buffer_rx.recv() => {
                match next {
                    Some(record) => {
                        tokio::spawn(process_entry(Arc::clone(&worker), record));
                    }
                    None => {
                        debug!(queue = %worker.name, "queue buffer closed");
                        return;
                    }
                }
            }
        }
    }
}

/// Drive one queued message through its attempt cycles to a terminal state.
async fn process_entry(worker: Arc<QueueWorker>, mut record: QueuedMessage) {
    let mut shutdown = worker.shutdown.clone();

    let _permit = tokio::select! {
        _ = shutdown.changed() => return,
        permit = Arc::clone(&worker.semaphore).acquire_owned() => match permit {
            Ok(p) => p,
            Err(_) => return,
        },
    };

    let id = match record.message.headers().message_id() {
        Some(id) => id,
        None => {
            warn!(queue = %worker.name, "queued message without id, dropping");
            return;
        }
    };

    loop {
        if *shutdown.borrow() {
            // Leave the record pending; it is durable and will be replayed.
            return;
        }

        if record.message.headers().is_expired(Utc::now()) {
            record.attempts += 1;
            debug!(queue = %worker.name, message_id = %id, "expired message skipped");
            if let Err(e) = worker
                .store
                .mark_acknowledged(&worker.name, id, record.attempts, Utc::now())
                .await
            {
                error!(queue = %worker.name, message_id = %id, error = %e,
                       "failed to persist expiry acknowledgement");
            }
            return;
        }

        record.attempts += 1;
        let context =
            QueuedMessageContext::new(record.message.headers().clone(), record.principal.clone());

        let acknowledged = match worker.listener.message_received(&record.message, &context).await
        {
            Ok(()) => context.is_acknowledged() || worker.options.auto_acknowledge,
            Err(e) => {
                warn!(queue = %worker.name, message_id = %id, attempt = record.attempts,
                      error = %e, "queue listener failed");
                false
            }
        };

        if acknowledged {
            if let Err(e) = worker
                .store
                .mark_acknowledged(&worker.name, id, record.attempts, Utc::now())
                .await
            {
                error!(queue = %worker.name, message_id = %id, error = %e,
                       "failed to persist acknowledgement");
            }
            return;
        }

        if record.attempts >= worker.options.max_attempts {
            warn!(queue = %worker.name, message_id = %id, attempts = record.attempts,
                  "message abandoned after exhausting attempts");
            if let Err(e) = worker
                .store
                .mark_abandoned(&worker.name, id, record.attempts, Utc::now())
                .await
            {
                error!(queue = %worker.name, message_id = %id, error = %e,
                       "failed to persist abandonment");
            }
            return;
        }

        if let Err(e) = worker
            .store
            .update_attempts(&worker.name, id, record.attempts)
            .await
        {
            error!(queue = %worker.name, message_id = %id, error = %e,
                   "failed to persist attempt count");
        }

        if !worker.options.retry_delay.is_zero() {
            tokio::select! {
                _ = shutdown.changed() => return,
                () = tokio::time::sleep(worker.options.retry_delay) => {}
            }
        }
    }
}
