//! The queue link: gate, enqueue, cancellation, and diagnostics.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::boot::{self, BootHandle};
use crate::cache::Cache;
use crate::client::Client;
use crate::error::LinkError;
use crate::forward::{Forward, ResultSink};
use crate::identify::DEFAULT_TEMP_ID_PREFIX;
use crate::key::operation_key;
use crate::operation::Operation;
use crate::persisted::{PENDING_OPERATIONS_FIELD, PersistedOperationLog, PersistedOperationRecord};
use crate::queue::{Entry, EntryId, PendingOperation, PendingQueue};
use crate::replay::{self, Replay};
use crate::serialize::serialize_operation;
use crate::stream::{OperationStream, ReleaseGuard};

/// Queue link configuration.
#[derive(Debug, Clone)]
pub struct QueueLinkConfig {
    /// Prefix marking a client-generated placeholder identifier.
    pub temp_id_prefix: String,
    /// Cache field backing the persisted operation log.
    pub log_field: String,
    /// Mirror queued entries into the cache.
    pub persist_operations: bool,
}

impl Default for QueueLinkConfig {
    fn default() -> Self {
        Self {
            temp_id_prefix: DEFAULT_TEMP_ID_PREFIX.to_string(),
            log_field: PENDING_OPERATIONS_FIELD.to_string(),
            persist_operations: true,
        }
    }
}

/// Queue link builder.
pub struct QueueLinkBuilder {
    cache: Arc<dyn Cache>,
    config: QueueLinkConfig,
}

impl QueueLinkBuilder {
    /// Create a builder persisting into `cache`.
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            config: QueueLinkConfig::default(),
        }
    }

    /// Set the temporary identifier prefix.
    #[must_use]
    pub fn with_temp_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.temp_id_prefix = prefix.into();
        self
    }

    /// Set the cache field of the persisted log.
    #[must_use]
    pub fn with_log_field(mut self, field: impl Into<String>) -> Self {
        self.config.log_field = field.into();
        self
    }

    /// Enable or disable persistence.
    #[must_use]
    pub const fn with_persistence(mut self, enabled: bool) -> Self {
        self.config.persist_operations = enabled;
        self
    }

    /// Build the link.
    #[must_use]
    pub fn build(self) -> QueueLink {
        QueueLink::with_config(self.cache, self.config)
    }
}

/// Queue link metrics.
#[derive(Debug, Default)]
pub struct QueueLinkMetrics {
    enqueued: AtomicU64,
    forwarded: AtomicU64,
    replayed: AtomicU64,
    reconciled: AtomicU64,
    removed: AtomicU64,
    cancelled: AtomicU64,
    resubmitted: AtomicU64,
    persistence_failures: AtomicU64,
}

impl QueueLinkMetrics {
    /// Snapshot current metrics.
    #[must_use]
    pub fn snapshot(&self) -> QueueLinkMetricsSnapshot {
        QueueLinkMetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            reconciled: self.reconciled.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            resubmitted: self.resubmitted.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_replayed(&self) {
        self.replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resubmitted(&self) {
        self.resubmitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueLinkMetricsSnapshot {
    /// Requests queued while the gate was closed.
    pub enqueued: u64,
    /// Requests passed straight through an open gate.
    pub forwarded: u64,
    /// Replay rounds started.
    pub replayed: u64,
    /// Entries whose temporary identifier was rewritten.
    pub reconciled: u64,
    /// Entries removed from the queue for any reason.
    pub removed: u64,
    /// Entries removed because their caller cancelled.
    pub cancelled: u64,
    /// Persisted operations resubmitted at boot.
    pub resubmitted: u64,
    /// Failed writes to the persisted log.
    pub persistence_failures: u64,
}

#[derive(Debug)]
pub(crate) struct LinkState {
    pub(crate) open: bool,
    pub(crate) loaded: bool,
    pub(crate) queue: PendingQueue,
}

/// State shared by every clone of a [`QueueLink`].
///
/// One mutex covers the gate, the buckets, and every write to the
/// persisted log.
#[derive(Debug)]
pub(crate) struct LinkShared {
    pub(crate) state: Mutex<LinkState>,
    pub(crate) log: PersistedOperationLog,
    pub(crate) config: QueueLinkConfig,
    pub(crate) metrics: QueueLinkMetrics,
}

impl LinkShared {
    /// Write a record for a new entry. Failures are logged, never raised.
    fn persist(&self, key: &str, operation: &Operation) -> Option<String> {
        if !self.config.persist_operations {
            return None;
        }
        let args = match serialize_operation(operation) {
            Ok(args) => args,
            Err(err) => {
                warn!(key = %key, error = %err, "could not serialize queued operation");
                self.metrics.record_persistence_failure();
                return None;
            }
        };
        match self.log.prepend(&PersistedOperationRecord::new(key, args.clone())) {
            Ok(()) => Some(args),
            Err(err) => {
                warn!(key = %key, error = %err, "could not persist queued operation");
                self.metrics.record_persistence_failure();
                None
            }
        }
    }

    fn unpersist(&self, entry: &Entry) {
        let Some(args) = entry.args.as_deref() else {
            return;
        };
        match self.log.remove(&entry.key, Some(args)) {
            Ok(true) => {}
            Ok(false) => debug!(key = %entry.key, "persisted record already gone"),
            Err(err) => {
                warn!(key = %entry.key, error = %err, "could not remove persisted operation");
                self.metrics.record_persistence_failure();
            }
        }
    }

    /// Remove an entry from the queue and the log. No-op if already gone.
    pub(crate) fn remove_entry(&self, key: &str, id: EntryId) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.queue.remove(key, id) else {
            return false;
        };
        self.unpersist(&entry);
        self.metrics.removed.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, entry = %id, pending = state.queue.len(), "removed entry");
        true
    }

    /// Caller-side release. Entries already forwarded are left to resolve.
    pub(crate) fn cancel(&self, key: &str, id: EntryId) {
        let mut state = self.state.lock();
        if state.queue.get(key, id).is_none_or(|entry| entry.in_flight) {
            return;
        }
        if let Some(entry) = state.queue.remove(key, id) {
            self.unpersist(&entry);
            self.metrics.removed.fetch_add(1, Ordering::Relaxed);
            self.metrics.cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, entry = %id, pending = state.queue.len(), "cancelled queued operation");
        }
    }

    /// Current operation of an entry.
    pub(crate) fn operation_of(&self, key: &str, id: EntryId) -> Option<Operation> {
        self.state
            .lock()
            .queue
            .get(key, id)
            .map(|entry| entry.operation.clone())
    }

    /// Rewrite `temp_id` to `new_id` in every other entry that targets it.
    ///
    /// Returns the number of rewritten entries.
    pub(crate) fn reconcile(&self, temp_id: &str, new_id: &str, origin: EntryId) -> usize {
        let mut state = self.state.lock();
        let mut rewritten = 0;
        for (key, bucket) in state.queue.buckets_mut() {
            if !key.starts_with(temp_id) {
                continue;
            }
            for entry in bucket.iter_mut() {
                if entry.id == origin
                    || !entry
                        .operation
                        .identifier()
                        .is_some_and(|id| id.starts_with(temp_id))
                {
                    continue;
                }
                debug!(key = %key, entry = %entry.id, from = %temp_id, to = %new_id, "reconciled identifier");
                entry.operation.set_id(new_id);
                if let Some(old) = entry.args.take() {
                    entry.args = Some(self.repersist(key, old, &entry.operation));
                }
                rewritten += 1;
            }
        }
        self.metrics.reconciled.fetch_add(
            u64::try_from(rewritten).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        rewritten
    }

    /// Refresh a record after its operation changed; keeps `old` on failure.
    fn repersist(&self, key: &str, old: String, operation: &Operation) -> String {
        let new = match serialize_operation(operation) {
            Ok(new) => new,
            Err(err) => {
                warn!(key = %key, error = %err, "could not serialize reconciled operation");
                self.metrics.record_persistence_failure();
                return old;
            }
        };
        match self.log.replace(key, &old, &new) {
            Ok(true) => new,
            Ok(false) => {
                debug!(key = %key, "no persisted record to refresh");
                old
            }
            Err(err) => {
                warn!(key = %key, error = %err, "could not refresh persisted operation");
                self.metrics.record_persistence_failure();
                old
            }
        }
    }
}

/// Link that queues operations while offline and replays them on reconnect.
///
/// Clones share one queue.
#[derive(Debug, Clone)]
pub struct QueueLink {
    pub(crate) shared: Arc<LinkShared>,
}

impl QueueLink {
    /// Create a link with default configuration.
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self::with_config(cache, QueueLinkConfig::default())
    }

    /// Create a builder.
    #[must_use]
    pub fn builder(cache: Arc<dyn Cache>) -> QueueLinkBuilder {
        QueueLinkBuilder::new(cache)
    }

    /// Create a link with custom configuration.
    #[must_use]
    pub fn with_config(cache: Arc<dyn Cache>, config: QueueLinkConfig) -> Self {
        let log = PersistedOperationLog::new(cache, config.log_field.clone());
        Self {
            shared: Arc::new(LinkShared {
                state: Mutex::new(LinkState {
                    open: true,
                    loaded: false,
                    queue: PendingQueue::default(),
                }),
                log,
                config,
                metrics: QueueLinkMetrics::default(),
            }),
        }
    }

    /// Link configuration.
    #[must_use]
    pub fn config(&self) -> &QueueLinkConfig {
        &self.shared.config
    }

    /// The persisted operation log.
    #[must_use]
    pub fn persisted_log(&self) -> &PersistedOperationLog {
        &self.shared.log
    }

    /// Return metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> QueueLinkMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Send `operation` on, or queue it while the gate is closed.
    ///
    /// Never blocks; results arrive on the returned stream.
    pub fn request(&self, operation: Operation, forward: Arc<dyn Forward>) -> OperationStream {
        let mut state = self.shared.state.lock();
        if state.open {
            drop(state);
            self.shared.metrics.forwarded.fetch_add(1, Ordering::Relaxed);
            debug!("gate open, forwarding request");
            return OperationStream::direct(forward.forward(operation));
        }

        let key = operation_key(&operation);
        let id = state.queue.next_id();
        let args = self.shared.persist(&key, &operation);
        let (sink, rx) = ResultSink::channel();
        state.queue.push(Entry {
            id,
            key: key.clone(),
            operation,
            forward,
            sink,
            args,
            in_flight: false,
            enrolled: false,
        });
        self.shared.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, entry = %id, pending = state.queue.len(), "gate closed, queued request");
        drop(state);

        OperationStream::queued(rx, ReleaseGuard::new(Arc::downgrade(&self.shared), key, id))
    }

    /// Close the gate: subsequent requests are queued.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if state.open {
            info!(pending = state.queue.len(), "gate closed");
        }
        state.open = false;
    }

    /// Open the gate and replay every bucket.
    ///
    /// Replay runs on spawned tasks; with nothing pending no task is
    /// spawned and nothing is forwarded.
    pub fn open(&self) -> Replay {
        let groups = {
            let mut state = self.shared.state.lock();
            state.open = true;
            if state.queue.is_empty() {
                Vec::new()
            } else {
                replay::plan(&mut state.queue, &self.shared.config.temp_id_prefix)
            }
        };
        let replay = Replay::start(&self.shared, groups);
        info!(rounds = replay.rounds(), "gate opened");
        replay
    }

    /// Returns `true` if requests currently pass straight through.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    /// Resubmit operations persisted by an earlier process through `client`.
    ///
    /// Runs at most once per link; later calls return an empty handle. A
    /// cache failure leaves the link unloaded so the call can be retried.
    pub fn load(&self, client: Arc<dyn Client>) -> Result<BootHandle, LinkError> {
        boot::load(&self.shared, client)
    }

    /// Queued entries by bucket key, in arrival order.
    #[must_use]
    pub fn pending_operations(&self) -> BTreeMap<String, Vec<PendingOperation>> {
        let state = self.shared.state.lock();
        state
            .queue
            .buckets()
            .map(|(key, entries)| {
                (
                    key.clone(),
                    entries.iter().map(PendingOperation::from).collect(),
                )
            })
            .collect()
    }

    /// Total number of queued entries.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().queue.len()
    }
}
