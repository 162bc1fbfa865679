//! The Transfer Queue orchestrator: registration, dispatch, result
//! arbitration, retry/error collection, and quiescence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::adapter::AdapterDriver;
use crate::batcher::Batcher;
use crate::collaborators::{AdapterFactory, ConfigWriter, ErrorClassifier, MetadataClient, ProgressMeter, QueueConfig};
use crate::error::QueueError;
use crate::negotiator;
use crate::retry::RetryLedger;
use crate::types::{Direction, TransferResult, Transferable, MAX_RETRIES};
use crate::watcher::WatcherSet;

/// Race-free "wait until zero" counter: `increment`/`decrement` never block,
/// `wait_zero` suspends until the count reaches zero, built the same way
/// the teacher tracks `Producer::in_flight` (an atomic plus a `Notify`,
/// with the `notified()` future constructed before the count is checked so
/// a decrement landing between the check and the wait can never be missed).
struct PendingCounter {
    count: AtomicUsize,
    zero: Notify,
}

impl PendingCounter {
    fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            zero: Notify::new(),
        }
    }

    fn increment(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.zero.notify_waiters();
        }
    }

    async fn wait_zero(&self) {
        loop {
            let notified = self.zero.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Tracks bytes expected (declared at registration) against bytes
/// accounted for (skip, success, or failure) so the balance the progress
/// meter is supposed to maintain (§7: "the progress meter is advanced
/// even for failures and skips") can be checked rather than assumed.
/// Purely a diagnostic: it never feeds back into control flow.
struct ProgressState {
    expected: AtomicUsize,
    accounted: AtomicUsize,
}

impl ProgressState {
    fn new() -> Self {
        Self {
            expected: AtomicUsize::new(0),
            accounted: AtomicUsize::new(0),
        }
    }

    fn expect(&self, size: u64) {
        self.expected.fetch_add(size as usize, Ordering::SeqCst);
    }

    fn account(&self, size: u64) {
        self.accounted.fetch_add(size as usize, Ordering::SeqCst);
    }
}

/// A channel with exactly one closer: the producing side sends freely until
/// `close` is called, after which `close` drops the sender so the
/// corresponding receiver drains and ends.
struct Intake<T> {
    tx: SyncMutex<Option<mpsc::UnboundedSender<T>>>,
}

impl<T> Intake<T> {
    fn new() -> (Self, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: SyncMutex::new(Some(tx)) }, rx)
    }

    fn send(&self, item: T) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(item);
        }
    }

    fn close(&self) {
        self.tx.lock().take();
    }
}

/// The shared state behind every handle to a queue. Always accessed through
/// an `Arc`, mirroring the teacher's `Arc<Mutex<ProducerState>>` ownership
/// shape so background loops can hold a cheap clone.
pub(crate) struct Inner {
    pub(crate) direction: Direction,
    registry: SyncMutex<HashMap<String, Transferable>>,
    pending: PendingCounter,
    pub(crate) retry_ledger: RetryLedger,
    pub(crate) batcher: Batcher<Transferable>,
    legacy_tx: SyncMutex<Option<mpsc::UnboundedSender<Transferable>>>,
    pub(crate) legacy_rx: AsyncMutex<mpsc::UnboundedReceiver<Transferable>>,
    pub(crate) adapter_driver: AdapterDriver,
    watchers: WatcherSet,
    error_intake: Intake<QueueError>,
    errors: AsyncMutex<Vec<QueueError>>,
    pub(crate) retry_intake: Intake<Transferable>,
    progress_state: ProgressState,
    pub(crate) metadata: Arc<dyn MetadataClient>,
    pub(crate) classifier: Arc<dyn ErrorClassifier>,
    pub(crate) config: Arc<dyn QueueConfig>,
    pub(crate) config_writer: Arc<dyn ConfigWriter>,
    pub(crate) progress: Arc<dyn ProgressMeter>,
    pub(crate) adapter_names: Vec<String>,
    pub(crate) batch_mode: AtomicBool,
    pub(crate) legacy_started: AtomicBool,
    pub(crate) legacy_claimed: AtomicBool,
    pub(crate) progress_started: AtomicBool,
    waited: AtomicBool,
    tasks: SyncMutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    pub(crate) fn lookup(&self, oid: &str) -> Option<Transferable> {
        self.registry.lock().get(oid).cloned()
    }

    pub(crate) fn finish_pending(&self, oid: &str) {
        trace!(oid, "pending cleared");
        if let Some(t) = self.lookup(oid) {
            self.progress_state.account(t.size);
        }
        self.pending.decrement();
    }

    pub(crate) fn report_error(&self, err: QueueError) {
        self.error_intake.send(err);
    }

    /// Starts the progress meter exactly once per queue lifetime, on the
    /// first successful negotiation (batch or legacy).
    pub(crate) fn ensure_progress_started(&self) {
        if !self.progress_started.swap(true, Ordering::SeqCst) {
            self.progress.start();
        }
    }

    pub(crate) fn spawn_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    pub(crate) fn send_legacy(&self, t: Transferable) {
        if let Some(tx) = self.legacy_tx.lock().as_ref() {
            let _ = tx.send(t);
        }
    }

    /// Routes one item to whichever path is currently active.
    fn forward(&self, t: Transferable) {
        if self.batch_mode.load(Ordering::SeqCst) {
            self.batcher.add(t);
        } else {
            self.send_legacy(t);
        }
    }

    fn add(&self, t: Transferable) {
        let is_new = {
            let mut registry = self.registry.lock();
            if registry.contains_key(&t.oid) {
                false
            } else {
                registry.insert(t.oid.clone(), t.clone());
                true
            }
        };
        if is_new {
            self.pending.increment();
            self.progress_state.expect(t.size);
            self.forward(t);
        }
    }

    /// Re-enters a previously-failed item: bypasses the dedup gate in
    /// `add` because the OID is already registered, and in batch mode
    /// forces a flush so the retried item doesn't sit waiting for peers
    /// that will never arrive.
    fn requeue(&self, t: Transferable) {
        self.forward(t);
        if self.batch_mode.load(Ordering::SeqCst) {
            self.batcher.flush();
        }
    }

    fn handle_result(&self, result: TransferResult) {
        let Some(err) = result.error else {
            self.watchers.notify_success(&result.oid);
            self.progress.finish_transfer(&result.oid);
            self.finish_pending(&result.oid);
            return;
        };

        if self.lookup(&result.oid).is_none() {
            warn!(oid = %result.oid, "adapter result for an unregistered oid, ignoring");
            return;
        }

        if self.retry_ledger.can_retry(&result.oid, &err) {
            if let Some(t) = self.lookup(&result.oid) {
                self.retry_intake.send(t);
            }
        } else {
            self.report_error(err);
            self.finish_pending(&result.oid);
        }
    }
}

/// Begins a transfer session on the currently-selected adapter if one isn't
/// already running, and only when this call actually starts a fresh
/// session spawns the background task that drains its results into
/// `handle_result`. A no-op when a session is already in progress.
///
/// Returns `false` when the adapter refused to begin (`AdapterInitError`,
/// §7 kind 4): the error is already reported here, but the caller still
/// owns the batch/item's OIDs and must decrement `pending` for each of
/// them itself rather than proceeding to `submit`.
pub(crate) async fn ensure_adapter_session(inner: &Arc<Inner>) -> bool {
    let concurrency = inner.config.concurrent_transfers().max(1);
    let (tx, rx) = mpsc::channel(20);
    match inner.adapter_driver.begin(concurrency, inner.progress.clone(), tx).await {
        Ok(true) => {
            inner.spawn_task(tokio::spawn(result_consumer(inner.clone(), rx)));
            true
        }
        Ok(false) => true,
        Err(e) => {
            inner.report_error(e);
            false
        }
    }
}

async fn result_consumer(inner: Arc<Inner>, mut rx: mpsc::Receiver<TransferResult>) {
    while let Some(result) = rx.recv().await {
        inner.handle_result(result);
    }
}

async fn retry_collector(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<Transferable>) {
    while let Some(t) = rx.recv().await {
        inner.requeue(t);
    }
}

async fn error_collector(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<QueueError>) {
    while let Some(e) = rx.recv().await {
        inner.errors.lock().await.push(e);
    }
}

/// Bundles the collaborators a queue needs; `build` spawns every background
/// worker immediately.
pub struct TransferQueueBuilder {
    direction: Direction,
    metadata: Arc<dyn MetadataClient>,
    classifier: Arc<dyn ErrorClassifier>,
    adapter_factory: Arc<dyn AdapterFactory>,
    config: Arc<dyn QueueConfig>,
    config_writer: Arc<dyn ConfigWriter>,
    progress: Arc<dyn ProgressMeter>,
    adapter_names: Vec<String>,
    max_retries: u32,
}

impl TransferQueueBuilder {
    pub fn new(
        direction: Direction,
        metadata: Arc<dyn MetadataClient>,
        classifier: Arc<dyn ErrorClassifier>,
        adapter_factory: Arc<dyn AdapterFactory>,
        config: Arc<dyn QueueConfig>,
        config_writer: Arc<dyn ConfigWriter>,
        progress: Arc<dyn ProgressMeter>,
    ) -> Self {
        Self {
            direction,
            metadata,
            classifier,
            adapter_factory,
            config,
            config_writer,
            progress,
            adapter_names: vec!["basic".to_string()],
            max_retries: MAX_RETRIES,
        }
    }

    /// Client-preference-ordered list of adapter names offered to the
    /// remote during batch negotiation. Defaults to `["basic"]`.
    pub fn adapter_names(mut self, names: Vec<String>) -> Self {
        self.adapter_names = names;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn build(self) -> TransferQueue {
        let (legacy_tx, legacy_rx) = mpsc::unbounded_channel();
        let (error_intake, error_rx) = Intake::new();
        let (retry_intake, retry_rx) = Intake::new();

        let batch_mode = self.config.batch_transfer();
        let inner = Arc::new(Inner {
            direction: self.direction,
            registry: SyncMutex::new(HashMap::new()),
            pending: PendingCounter::new(),
            retry_ledger: RetryLedger::new(self.max_retries, self.classifier.clone()),
            batcher: Batcher::new(),
            legacy_tx: SyncMutex::new(Some(legacy_tx)),
            legacy_rx: AsyncMutex::new(legacy_rx),
            adapter_driver: AdapterDriver::new(self.adapter_factory, self.direction),
            watchers: WatcherSet::new(),
            error_intake,
            errors: AsyncMutex::new(Vec::new()),
            retry_intake,
            progress_state: ProgressState::new(),
            metadata: self.metadata,
            classifier: self.classifier,
            config: self.config,
            config_writer: self.config_writer,
            progress: self.progress,
            adapter_names: self.adapter_names,
            batch_mode: AtomicBool::new(batch_mode),
            legacy_started: AtomicBool::new(false),
            legacy_claimed: AtomicBool::new(false),
            progress_started: AtomicBool::new(false),
            waited: AtomicBool::new(false),
            tasks: SyncMutex::new(Vec::new()),
        });

        let retry_handle = tokio::spawn(retry_collector(inner.clone(), retry_rx));
        inner.spawn_task(retry_handle);
        let error_handle = tokio::spawn(error_collector(inner.clone(), error_rx));
        inner.spawn_task(error_handle);

        if batch_mode {
            debug!("starting in batch negotiation mode");
            let handle = tokio::spawn(negotiator::run_batch_mode(inner.clone()));
            inner.spawn_task(handle);
        } else {
            debug!("starting in legacy negotiation mode");
            negotiator::spawn_legacy_workers(inner.clone());
        }

        TransferQueue { inner }
    }
}

/// A handle to a running transfer queue. Cheap to clone; every clone shares
/// the same registry, batcher, and background workers.
#[derive(Clone)]
pub struct TransferQueue {
    inner: Arc<Inner>,
}

impl TransferQueue {
    /// Registers `t` if its OID is new, forwarding it to whichever
    /// negotiation path is currently active. A no-op on a known OID.
    pub fn add(&self, t: Transferable) {
        self.inner.add(t);
    }

    /// Informs the progress meter that `size` bytes will never be
    /// transferred.
    pub fn skip(&self, size: u64) {
        self.inner.progress.skip(size);
    }

    /// Registers a new success sink. Must be called before `wait`.
    pub fn watch(&self) -> mpsc::UnboundedReceiver<String> {
        self.inner.watchers.watch()
    }

    /// Seals the queue: stops accepting new work, waits for every
    /// registered OID to terminate, then tears down every background
    /// worker. Idempotent once initiated.
    pub async fn wait(&self) {
        // Flush (but don't yet close) the batcher: the caller's final
        // partial batch needs to reach the negotiator, but a retry arising
        // from it must still be able to re-enter the same path below.
        self.inner.batcher.flush();
        self.inner.pending.wait_zero().await;

        let expected = self.inner.progress_state.expected.load(Ordering::SeqCst);
        let accounted = self.inner.progress_state.accounted.load(Ordering::SeqCst);
        if expected == accounted {
            debug!(expected, accounted, "progress accounting balanced at quiescence");
        } else {
            warn!(expected, accounted, "progress accounting did not balance at quiescence");
        }

        if !self.inner.waited.swap(true, Ordering::SeqCst) {
            // Nothing outstanding means no further retry can surface, so
            // closing both input paths now is safe.
            self.inner.batcher.exit();
            self.inner.legacy_tx.lock().take();
            self.inner.retry_intake.close();
            if let Err(e) = self.inner.adapter_driver.end().await {
                warn!(error = %e, "adapter end failed during wait");
            }
            self.inner.error_intake.close();
            self.inner.watchers.close();
            self.inner.progress.finish();

            let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tasks.lock());
            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    /// All errors accumulated so far, in the order they were reported.
    pub async fn errors(&self) -> Vec<QueueError> {
        self.inner.errors.lock().await.clone()
    }
}
