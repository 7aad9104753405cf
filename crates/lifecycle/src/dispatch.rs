//! Background delivery of advertisements to observers.
//!
//! Controllers enqueue advertisements while holding their state lock; a
//! single tokio task drains the queue and calls observers. Observers never
//! run on an engine callback thread or on the thread issuing a command.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use smpflow_protocol::{Advertisement, InstallFatalErrorType, LifecycleState, LogLevel};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Receives advertisements from one controller.
///
/// Every method has a no-op default. Override the per-event methods, or
/// override [`on_advertisement`](Observer::on_advertisement) to take the
/// multiplexed feed instead.
pub trait Observer: Send + Sync {
    fn on_state_changed(&self, _old: LifecycleState, _new: LifecycleState) {}
    fn on_progress(&self, _resource: &str, _percent: u8, _instant_kbps: f64, _average_kbps: f64) {}
    fn on_busy_changed(&self, _busy: bool) {}
    fn on_started(&self, _resource: &str, _total_bytes: u64) {}
    fn on_completed(&self, _resource: &str, _payload: Option<&[u8]>) {}
    fn on_failed(
        &self,
        _resource: &str,
        _message: &str,
        _code: i32,
        _fatal_error_type: Option<InstallFatalErrorType>,
    ) {
    }
    fn on_cancelling(&self, _reason: &str) {}
    fn on_cancelled(&self, _reason: &str) {}
    fn on_log(&self, _message: &str, _category: &str, _level: LogLevel, _resource: &str) {}
    fn on_overall_progress(&self, _percent: u8) {}
    fn on_firmware_already_cached(&self, _active: bool) {}

    /// Entry point used by the dispatcher. Routes to the per-event methods.
    fn on_advertisement(&self, ad: &Advertisement) {
        match ad {
            Advertisement::StateChanged { old, new } => self.on_state_changed(*old, *new),
            Advertisement::Progress {
                resource,
                percent,
                instant_kbps,
                average_kbps,
            } => self.on_progress(resource, *percent, *instant_kbps, *average_kbps),
            Advertisement::BusyChanged { busy } => self.on_busy_changed(*busy),
            Advertisement::Started {
                resource,
                total_bytes,
            } => self.on_started(resource, *total_bytes),
            Advertisement::Completed { resource, payload } => {
                self.on_completed(resource, payload.as_deref())
            }
            Advertisement::Failed {
                resource,
                message,
                code,
                fatal_error_type,
            } => self.on_failed(resource, message, *code, *fatal_error_type),
            Advertisement::Cancelling { reason } => self.on_cancelling(reason),
            Advertisement::Cancelled { reason } => self.on_cancelled(reason),
            Advertisement::Log {
                message,
                category,
                level,
                resource,
            } => self.on_log(message, category, *level, resource),
            Advertisement::OverallProgress { percent } => self.on_overall_progress(*percent),
            Advertisement::FirmwareAlreadyCached { active } => {
                self.on_firmware_already_cached(*active)
            }
        }
    }
}

/// Forwards every advertisement into an unbounded channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<Advertisement>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Advertisement>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Observer for ChannelObserver {
    fn on_advertisement(&self, ad: &Advertisement) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(ad.clone());
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type ObserverList = Arc<RwLock<Vec<(SubscriptionId, Arc<dyn Observer>)>>>;

enum Envelope {
    Advertise(Advertisement),
    Flush(oneshot::Sender<()>),
}

/// Single-consumer advertisement queue.
pub(crate) struct Dispatcher {
    tx: mpsc::UnboundedSender<Envelope>,
    observers: ObserverList,
    next_id: AtomicU64,
    depth: Arc<AtomicUsize>,
    warn_depth: usize,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Spawns the consumer task. Must be called from within a tokio runtime.
    pub(crate) fn spawn(warn_depth: usize, category: &'static str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let observers: ObserverList = Arc::new(RwLock::new(Vec::new()));
        let depth = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        tokio::spawn(consume(
            rx,
            Arc::clone(&observers),
            Arc::clone(&depth),
            shutdown.clone(),
            category,
        ));

        Self {
            tx,
            observers,
            next_id: AtomicU64::new(1),
            depth,
            warn_depth: warn_depth.max(1),
            shutdown,
        }
    }

    /// Queues advertisements in order. Never blocks.
    pub(crate) fn enqueue(&self, ads: impl IntoIterator<Item = Advertisement>) {
        for ad in ads {
            if self.tx.send(Envelope::Advertise(ad)).is_err() {
                return;
            }
            let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
            if depth == self.warn_depth {
                warn!(depth, "observers are falling behind the advertisement queue");
            }
        }
    }

    pub(crate) fn subscribe(&self, observer: Arc<dyn Observer>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    /// Returns `true` if the subscription existed.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(sid, _)| *sid != id);
        observers.len() != before
    }

    /// Resolves once everything queued before the call has been delivered.
    pub(crate) async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Envelope::Flush(tx)).is_err() {
            return;
        }
        let _ = rx.await;
    }

    /// Delivers what is already queued, then stops the consumer task.
    pub(crate) fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn consume(
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    observers: ObserverList,
    depth: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    category: &'static str,
) {
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(envelope) => handle(envelope, &observers, &depth, category),
                None => break,
            },
            _ = shutdown.cancelled() => {
                rx.close();
                while let Ok(envelope) = rx.try_recv() {
                    handle(envelope, &observers, &depth, category);
                }
                break;
            }
        }
    }
    debug!(category, "advertisement dispatcher stopped");
}

fn handle(
    envelope: Envelope,
    observers: &ObserverList,
    depth: &AtomicUsize,
    category: &'static str,
) {
    match envelope {
        Envelope::Advertise(ad) => {
            depth.fetch_sub(1, Ordering::Relaxed);
            deliver(&ad, observers, category);
        }
        Envelope::Flush(done) => {
            let _ = done.send(());
        }
    }
}

fn deliver(ad: &Advertisement, observers: &ObserverList, category: &'static str) {
    // Snapshot so observers may (un)subscribe from inside a callback.
    let snapshot: Vec<Arc<dyn Observer>> = observers
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .map(|(_, o)| Arc::clone(o))
        .collect();

    for observer in snapshot {
        if catch_unwind(AssertUnwindSafe(|| observer.on_advertisement(ad))).is_err() {
            error!(
                category,
                advertisement = ?ad,
                "observer panicked; advertisement dropped for it"
            );
        }
    }
}
