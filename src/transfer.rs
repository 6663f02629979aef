//! Slot-limited transfer pipeline.
//!
//! Identifiers are queued with [`BoundedTransferPipeline::request`]. A
//! scheduler thread hands the queue head to a free slot and starts a worker
//! thread for it. The worker asks the [`TransferSource`] to fetch the item,
//! then blocks on the slot's signal until the source reports back through a
//! [`TransferHandle`] or the transfer timeout elapses. At most `slots`
//! transfers are in flight at once.
//!
//! ```text
//! Queued ──▶ Assigned(slot) ──┬──▶ Completed  (result cached on success)
//!                             ├──▶ TimedOut
//!                             └──▶ Aborted
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::config::TransferConfig;

/// Which variant of an asset a transfer asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransferKind {
    #[default]
    Normal,
    Baked,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("transfer timed out")]
    TransferTimeout,
    #[error("transfer aborted")]
    TransferAborted,
    /// Reported by a source, or set when the source panics.
    #[error("transfer failed: {0}")]
    SourceFailed(String),
}

/// What a source reports for a finished fetch.
#[derive(Debug, Clone)]
pub enum TransferOutcome {
    Completed(Bytes),
    Failed(TransferError),
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Completed(_))
    }
}

/// A queued or in-flight transfer.
#[derive(Debug, Clone)]
pub struct TransferTask<K> {
    pub id: K,
    pub kind: TransferKind,
    /// Set once the scheduler assigns the task.
    pub slot: Option<usize>,
}

/// Performs the actual fetch.
///
/// Called on the slot's worker thread with no pipeline lock held. The fetch
/// may finish synchronously or later, from any thread, by calling
/// [`TransferHandle::complete`].
pub trait TransferSource<K>: Send + Sync + 'static {
    fn request(&self, id: &K, kind: TransferKind, handle: &TransferHandle<K>);
}

pub trait TransferObserver<K>: Send + Sync + 'static {
    /// Fired once per transfer that left the pipeline.
    fn download_finished(&self, _id: &K, _success: bool) {}

    /// Fired for progress reports on active transfers.
    fn download_progress(&self, _id: &K, _received: usize, _total: usize) {}
}

/// Auto-reset event: a successful wait consumes the signal.
#[derive(Default)]
struct SlotSignal {
    set: Mutex<bool>,
    cond: Condvar,
}

impl SlotSignal {
    fn reset(&self) {
        *self.set.lock() = false;
    }

    fn set(&self) {
        *self.set.lock() = true;
        self.cond.notify_one();
    }

    /// Returns false when `timeout` elapsed without a signal.
    fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut set = self.set.lock();
        while !*set {
            if self.cond.wait_until(&mut set, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *set, false)
    }
}

struct State<K> {
    queue: VecDeque<TransferTask<K>>,
    active: HashMap<K, TransferTask<K>>,
    busy: Vec<bool>,
    results: HashMap<K, Bytes>,
    running: bool,
}

impl<K> State<K> {
    fn free_slot(&self) -> Option<usize> {
        self.busy.iter().position(|busy| !busy)
    }
}

struct Shared<K> {
    state: Mutex<State<K>>,
    wakeup: Condvar,
    signals: Box<[SlotSignal]>,
    source: Arc<dyn TransferSource<K>>,
    observer: Arc<dyn TransferObserver<K>>,
    timeout: Duration,
    poll_interval: Duration,
}

/// Cloneable completion side of the pipeline, given to sources.
pub struct TransferHandle<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for TransferHandle<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> TransferHandle<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    /// Finishes an active transfer. Unknown ids, such as late completions
    /// after a timeout or abort, are ignored.
    pub fn complete(&self, id: &K, outcome: TransferOutcome) {
        let shared = &self.shared;
        let success = outcome.is_success();

        {
            let mut state = shared.state.lock();
            let Some(task) = state.active.remove(id) else {
                debug!(id = ?id, "Ignoring completion of an inactive transfer");
                return;
            };

            match outcome {
                TransferOutcome::Completed(data) => {
                    state.results.insert(id.clone(), data);
                }
                TransferOutcome::Failed(e) => {
                    warn!(id = ?id, error = %e, "Transfer failed");
                }
            }

            if let Some(slot) = task.slot {
                shared.signals[slot].set();
            }
        }

        shared.observer.download_finished(id, success);
    }

    /// Forwards progress for active transfers only.
    pub fn report_progress(&self, id: &K, received: usize, total: usize) {
        let active = self.shared.state.lock().active.contains_key(id);
        if active {
            self.shared.observer.download_progress(id, received, total);
        }
    }
}

pub struct BoundedTransferPipeline<K> {
    handle: TransferHandle<K>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl<K> BoundedTransferPipeline<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    /// Starts the scheduler thread.
    pub fn new(
        cfg: &TransferConfig,
        source: Arc<dyn TransferSource<K>>,
        observer: Arc<dyn TransferObserver<K>>,
    ) -> std::io::Result<Self> {
        let slots = cfg.slots.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                active: HashMap::new(),
                busy: vec![false; slots],
                results: HashMap::new(),
                running: true,
            }),
            wakeup: Condvar::new(),
            signals: (0..slots).map(|_| SlotSignal::default()).collect(),
            source,
            observer,
            timeout: cfg.timeout(),
            poll_interval: cfg.poll_interval(),
        });

        let scheduler = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("transfer-scheduler".to_string())
                .spawn(move || schedule(shared))?
        };

        Ok(Self {
            handle: TransferHandle { shared },
            scheduler: Mutex::new(Some(scheduler)),
        })
    }

    pub fn handle(&self) -> TransferHandle<K> {
        self.handle.clone()
    }

    /// Queues a fetch. Returns false, doing nothing, when `id` is already
    /// queued, in flight or cached, or the pipeline is shut down.
    pub fn request(&self, id: K, kind: TransferKind) -> bool {
        let shared = &self.handle.shared;
        let mut state = shared.state.lock();

        if !state.running
            || state.active.contains_key(&id)
            || state.results.contains_key(&id)
            || state.queue.iter().any(|task| task.id == id)
        {
            return false;
        }

        debug!(id = ?id, kind = ?kind, "Queueing transfer");
        state.queue.push_back(TransferTask {
            id,
            kind,
            slot: None,
        });
        shared.wakeup.notify_one();
        true
    }

    pub fn complete(&self, id: &K, outcome: TransferOutcome) {
        self.handle.complete(id, outcome);
    }

    pub fn report_progress(&self, id: &K, received: usize, total: usize) {
        self.handle.report_progress(id, received, total);
    }

    /// Drops a queued or active transfer without storing a result.
    pub fn abort(&self, id: &K) -> bool {
        let shared = &self.handle.shared;

        let aborted = {
            let mut state = shared.state.lock();
            let queued = state.queue.len();
            state.queue.retain(|task| task.id != *id);
            let dequeued = state.queue.len() != queued;

            let active = match state.active.remove(id) {
                Some(task) => {
                    if let Some(slot) = task.slot {
                        shared.signals[slot].set();
                    }
                    true
                }
                None => false,
            };
            dequeued || active
        };

        if aborted {
            debug!(id = ?id, error = %TransferError::TransferAborted, "Transfer dropped");
            shared.observer.download_finished(id, false);
        }
        aborted
    }

    pub fn result(&self, id: &K) -> Option<Bytes> {
        self.handle.shared.state.lock().results.get(id).cloned()
    }

    pub fn remove_result(&self, id: &K) -> Option<Bytes> {
        self.handle.shared.state.lock().results.remove(id)
    }

    pub fn active_count(&self) -> usize {
        self.handle.shared.state.lock().active.len()
    }

    pub fn queued_count(&self) -> usize {
        self.handle.shared.state.lock().queue.len()
    }
}

impl<K> BoundedTransferPipeline<K> {
    /// Clears the queue, wakes every worker and joins the scheduler.
    /// In-flight fetches are left to finish or time out unobserved.
    pub fn shutdown(&self) {
        let shared = &self.handle.shared;
        {
            let mut state = shared.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
            state.queue.clear();
            shared.wakeup.notify_all();
        }

        for signal in shared.signals.iter() {
            signal.set();
        }

        if let Some(scheduler) = self.scheduler.lock().take() {
            if scheduler.join().is_err() {
                error!("Transfer scheduler panicked");
            }
        }
    }
}

impl<K> Drop for BoundedTransferPipeline<K> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn schedule<K>(shared: Arc<Shared<K>>)
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    let mut state = shared.state.lock();

    while state.running {
        let assigned = match state.free_slot() {
            Some(slot) if !state.queue.is_empty() => {
                state.queue.pop_front().map(|task| (slot, task))
            }
            _ => None,
        };

        let Some((slot, mut task)) = assigned else {
            shared.wakeup.wait_for(&mut state, shared.poll_interval);
            continue;
        };

        task.slot = Some(slot);
        state.busy[slot] = true;
        state.active.insert(task.id.clone(), task.clone());
        // before the worker runs, so an abort from here on is not lost
        shared.signals[slot].reset();

        let id = task.id.clone();
        let worker_shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name(format!("transfer-slot-{slot}"))
            .spawn(move || work(worker_shared, task));

        if let Err(e) = spawned {
            error!(slot, error = %e, "Failed to start transfer worker");
            state.busy[slot] = false;
            state.active.remove(&id);
        }
    }

    debug!("Transfer scheduler stopped");
}

fn work<K>(shared: Arc<Shared<K>>, task: TransferTask<K>)
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    let Some(slot) = task.slot else {
        return;
    };

    let handle = TransferHandle {
        shared: Arc::clone(&shared),
    };
    let fetched = panic::catch_unwind(AssertUnwindSafe(|| {
        shared.source.request(&task.id, task.kind, &handle)
    }));
    if fetched.is_err() {
        error!(id = ?task.id, slot, "Transfer source panicked");
        handle.complete(
            &task.id,
            TransferOutcome::Failed(TransferError::SourceFailed("source panicked".to_string())),
        );
    }

    let signaled = shared.signals[slot].wait_for(shared.timeout);

    let timed_out = {
        let mut state = shared.state.lock();
        state.busy[slot] = false;
        shared.wakeup.notify_one();

        let still_ours = !signaled
            && state
                .active
                .get(&task.id)
                .is_some_and(|active| active.slot == Some(slot));
        if still_ours {
            state.active.remove(&task.id);
        }
        still_ours
    };

    if timed_out {
        warn!(
            id = ?task.id,
            slot,
            error = %TransferError::TransferTimeout,
            "Transfer dropped"
        );
        shared.observer.download_finished(&task.id, false);
    }
}
