// In-process event bus
//
// Copy-on-write dispatch: the subscriber set is snapshotted under a single
// lock, and handlers run outside it, so subscribe/unsubscribe during a
// publish can never corrupt iteration. Each subscriber gets its own FIFO
// queue drained by a dedicated task; a shared semaphore bounds how many
// sync handlers run at once. A concurrent subscription takes effect for
// subsequent publishes only.
//
// The subscriber-set lock is one of the two locks the orchestrator core
// holds, and it is never held across a suspension point.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{error, warn};

use crate::config::EventsConfig;
use crate::event::{Event, EventType, Severity};

/// Opaque subscription handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What a subscriber wants to see. Empty filters match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_types: Option<Vec<EventType>>,
    pub severities: Option<Vec<Severity>>,
}

impl EventFilter {
    pub fn for_types(event_types: Vec<EventType>) -> Self {
        Self {
            event_types: Some(event_types),
            severities: None,
        }
    }

    pub fn for_severities(severities: Vec<Severity>) -> Self {
        Self {
            event_types: None,
            severities: Some(severities),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(types) = &self.event_types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(severities) = &self.severities {
            if !severities.contains(&event.severity) {
                return false;
            }
        }
        true
    }
}

/// A subscriber callback, declared sync or cooperative-async at
/// subscription time
#[derive(Clone)]
pub enum EventHandler {
    Sync(Arc<dyn Fn(&Event) + Send + Sync>),
    Async(Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>),
}

impl EventHandler {
    pub fn sync(f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        EventHandler::Sync(Arc::new(f))
    }

    pub fn cooperative<F, Fut>(f: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        EventHandler::Async(Arc::new(move |event| f(event).boxed()))
    }
}

/// Bus tuning knobs
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Concurrency bound for sync handlers; 0 runs them inline in `publish`
    pub max_workers: usize,
    /// Dispatches slower than this are flagged
    pub slow_handler_threshold: Duration,
    /// Default deadline for `publish_blocking`
    pub blocking_deadline: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            slow_handler_threshold: Duration::from_millis(1000),
            blocking_deadline: Duration::from_secs(30),
        }
    }
}

impl From<&EventsConfig> for BusConfig {
    fn from(config: &EventsConfig) -> Self {
        Self {
            max_workers: config.max_workers,
            slow_handler_threshold: Duration::from_millis(config.slow_handler_ms),
            ..Default::default()
        }
    }
}

struct DispatchJob {
    event: Event,
    done: Option<oneshot::Sender<()>>,
}

struct Subscriber {
    id: SubscriptionId,
    filter: EventFilter,
    handler: EventHandler,
    /// FIFO queue into the subscriber's worker task; `None` means the
    /// subscriber dispatches inline (no runtime, or max_workers = 0)
    queue: Option<mpsc::UnboundedSender<DispatchJob>>,
}

/// Thread-safe copy-on-write pub/sub dispatcher
pub struct EventBus {
    subscribers: Mutex<Arc<Vec<Arc<Subscriber>>>>,
    next_id: AtomicU64,
    limiter: Option<Arc<Semaphore>>,
    config: BusConfig,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        let limiter = if config.max_workers > 0 {
            Some(Arc::new(Semaphore::new(config.max_workers)))
        } else {
            None
        };
        Self {
            subscribers: Mutex::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
            limiter,
            config,
        }
    }

    /// Register a handler. Takes effect for subsequent publishes only.
    pub fn subscribe(&self, handler: EventHandler, filter: Option<EventFilter>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        // Queued dispatch needs a runtime for the worker task; without one
        // (or with an inline pool) the handler runs on the publisher.
        let queue = if self.limiter.is_some() && Handle::try_current().is_ok() {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_worker(
                rx,
                handler.clone(),
                self.limiter.clone(),
                self.config.slow_handler_threshold,
                id,
            ));
            Some(tx)
        } else {
            None
        };

        let subscriber = Arc::new(Subscriber {
            id,
            filter: filter.unwrap_or_default(),
            handler,
            queue,
        });

        let mut guard = self.subscribers.lock();
        let mut set = (**guard).clone();
        set.push(subscriber);
        *guard = Arc::new(set);
        id
    }

    /// Remove a subscription. Idempotent; in-flight dispatches for the
    /// removed subscriber still complete.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut guard = self.subscribers.lock();
        if !guard.iter().any(|s| s.id == id) {
            return;
        }
        let set: Vec<Arc<Subscriber>> = guard.iter().filter(|s| s.id != id).cloned().collect();
        *guard = Arc::new(set);
    }

    /// Fire-and-forget publish: returns once dispatch is scheduled.
    pub fn publish(&self, event: Event) {
        let snapshot = self.snapshot();
        for subscriber in snapshot.iter() {
            if !subscriber.filter.matches(&event) {
                continue;
            }
            match &subscriber.queue {
                Some(tx) => {
                    let _ = tx.send(DispatchJob {
                        event: event.clone(),
                        done: None,
                    });
                }
                None => self.dispatch_inline(subscriber, &event),
            }
        }
    }

    /// Publish and wait until every matching handler has completed, or the
    /// default deadline expires.
    pub async fn publish_blocking(&self, event: Event) {
        self.publish_blocking_with_deadline(event, self.config.blocking_deadline)
            .await
    }

    /// Publish and wait with an explicit deadline.
    pub async fn publish_blocking_with_deadline(&self, event: Event, deadline: Duration) {
        let snapshot = self.snapshot();
        let mut pending = Vec::new();

        for subscriber in snapshot.iter() {
            if !subscriber.filter.matches(&event) {
                continue;
            }
            match &subscriber.queue {
                Some(tx) => {
                    let (done_tx, done_rx) = oneshot::channel();
                    let sent = tx.send(DispatchJob {
                        event: event.clone(),
                        done: Some(done_tx),
                    });
                    if sent.is_ok() {
                        pending.push(done_rx);
                    }
                }
                None => invoke(&subscriber.handler, &event, self.config.slow_handler_threshold, subscriber.id).await,
            }
        }

        if pending.is_empty() {
            return;
        }
        let all = futures::future::join_all(pending);
        if tokio::time::timeout(deadline, all).await.is_err() {
            warn!(
                event_type = %event.event_type,
                deadline_ms = deadline.as_millis() as u64,
                "blocking publish deadline expired before all handlers completed"
            );
        }
    }

    /// Current subscription ids, in subscription order.
    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        self.snapshot().iter().map(|s| s.id).collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.snapshot().len()
    }

    fn snapshot(&self) -> Arc<Vec<Arc<Subscriber>>> {
        self.subscribers.lock().clone()
    }

    fn dispatch_inline(&self, subscriber: &Subscriber, event: &Event) {
        match &subscriber.handler {
            EventHandler::Sync(_) => {
                invoke_sync(&subscriber.handler, event, self.config.slow_handler_threshold, subscriber.id);
            }
            EventHandler::Async(f) => match Handle::try_current() {
                Ok(handle) => {
                    let fut = f(event.clone());
                    let threshold = self.config.slow_handler_threshold;
                    let id = subscriber.id;
                    let event_type = event.event_type;
                    handle.spawn(async move {
                        let started = Instant::now();
                        if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
                            error!(subscription = %id, event_type = %event_type, "async event handler panicked");
                        }
                        flag_slow(started.elapsed(), threshold, id, event_type);
                    });
                }
                Err(_) => {
                    warn!(
                        subscription = %subscriber.id,
                        event_type = %event.event_type,
                        "no async runtime active, skipping cooperative-async handler"
                    );
                }
            },
        }
    }
}

/// Per-subscriber worker loop: drains the FIFO queue, bounding sync
/// handler concurrency with the shared semaphore.
async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<DispatchJob>,
    handler: EventHandler,
    limiter: Option<Arc<Semaphore>>,
    slow_threshold: Duration,
    id: SubscriptionId,
) {
    while let Some(job) = rx.recv().await {
        let _permit = match (&limiter, &handler) {
            (Some(semaphore), EventHandler::Sync(_)) => {
                semaphore.clone().acquire_owned().await.ok()
            }
            _ => None,
        };
        invoke(&handler, &job.event, slow_threshold, id).await;
        if let Some(done) = job.done {
            let _ = done.send(());
        }
    }
}

async fn invoke(handler: &EventHandler, event: &Event, slow_threshold: Duration, id: SubscriptionId) {
    let started = Instant::now();
    match handler {
        EventHandler::Sync(_) => {
            invoke_sync(handler, event, slow_threshold, id);
            return;
        }
        EventHandler::Async(f) => {
            let fut = f(event.clone());
            if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
                error!(subscription = %id, event_type = %event.event_type, "async event handler panicked");
            }
        }
    }
    flag_slow(started.elapsed(), slow_threshold, id, event.event_type);
}

fn invoke_sync(handler: &EventHandler, event: &Event, slow_threshold: Duration, id: SubscriptionId) {
    let EventHandler::Sync(f) = handler else {
        return;
    };
    let started = Instant::now();
    if catch_unwind(AssertUnwindSafe(|| f(event))).is_err() {
        error!(subscription = %id, event_type = %event.event_type, "event handler panicked");
    }
    flag_slow(started.elapsed(), slow_threshold, id, event.event_type);
}

fn flag_slow(elapsed: Duration, threshold: Duration, id: SubscriptionId, event_type: EventType) {
    if elapsed > threshold {
        warn!(
            subscription = %id,
            event_type = %event_type,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow event handler"
        );
    }
}
