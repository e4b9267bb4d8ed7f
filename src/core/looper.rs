//! Keyed, debounced, cancelable task scheduling.
//!
//! The [`Looper`] turns rapid repeated submissions into a single up-to-date
//! background execution per [`MessageKey`]. Submitting a task for a key that
//! is already occupied cancels the occupant before installing the new task;
//! a pending occupant is evicted outright (its `run`/`post` never execute),
//! a running occupant keeps running but its result is discarded when it
//! arrives. `pre` and `post` always execute on the UI thread via the
//! [`UiExecutor`] marshal; `run` always executes on a worker thread.
//!
//! # Design
//!
//! - **Slot map**: one slot per key that has ever been submitted, guarded by
//!   a `parking_lot::Mutex` and reused for the looper's lifetime. A slot
//!   tracks the occupying generation, its phase, and the cancellation flag.
//! - **Timer**: a dedicated thread sleeping on a `Condvar` over a min-heap of
//!   deadlines; superseded entries are dropped lazily when they fire.
//! - **Workers**: dedicated OS threads fed by a bounded crossbeam channel;
//!   blocking `recv`, no polling. Dropping the sender unblocks them on
//!   shutdown.
//! - **Delivery**: a finished run's result reaches `post` only if its
//!   generation still occupies the slot and the slot was not canceled;
//!   otherwise the result is dropped and counted as superseded.
//!
//! # Example
//!
//! ```rust,ignore
//! let main = MainLoop::new();
//! let looper = Looper::new(LooperConfig::new(), Arc::new(main.handle()))?;
//!
//! let convert_key = MessageKey::new("convert");
//! looper.submit(
//!     TaskDescriptor::new(convert_key.clone(), Duration::from_millis(1000), move || {
//!         converter.convert(&request)
//!     })
//!     .on_pre(move || preview.show_loading())
//!     .on_post(move |result| preview.show_finished(&result))
//!     .on_cancel(move || cancel_handle.cancel()),
//! );
//! ```

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::LooperConfig;
use crate::core::error::LooperError;
use crate::core::task::{ArmedTask, CancelHook, MessageKey, TaskDescriptor};
use crate::marshal::{UiExecutor, UiJob};

/// Lifecycle phase of a slot's occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting out the debounce delay.
    Pending,
    /// `run` dispatched to a worker (or completing).
    Running,
}

/// Per-key bookkeeping record. Created on first submission, reused forever.
struct Slot {
    /// Generation of the current (or most recent) occupant. Incremented on
    /// every install; a worker result is delivered only if its generation
    /// still matches.
    generation: u64,
    /// Whether a descriptor currently occupies this slot.
    occupied: bool,
    phase: Phase,
    /// Set by `cancel_key` on a running occupant; forces its result to be
    /// dropped even though the generation still matches.
    canceled: bool,
    /// Current occupant's cancel hook. Taken when fired so it can never fire
    /// after `post`.
    cancel: Option<CancelHook>,
    /// The fused run+post body, present only while pending.
    work: Option<Box<dyn FnOnce() -> UiJob + Send>>,
}

impl Slot {
    const fn vacant() -> Self {
        Self {
            generation: 0,
            occupied: false,
            phase: Phase::Pending,
            canceled: false,
            cancel: None,
            work: None,
        }
    }
}

/// One armed deadline in the timer heap. Entries are compared so the heap
/// yields the earliest deadline first; entries whose generation no longer
/// occupies their slot are ignored when they fire.
struct TimerEntry {
    deadline: Instant,
    key: MessageKey,
    generation: u64,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest deadline on top.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

/// A run body handed to a worker thread.
struct WorkItem {
    key: MessageKey,
    generation: u64,
    work: Box<dyn FnOnce() -> UiJob + Send>,
}

/// Timer heap plus its shutdown flag. The flag lives under the same mutex as
/// the heap so a shutdown notification can never be lost between the check
/// and the wait.
struct TimerState {
    heap: BinaryHeap<TimerEntry>,
    shutdown: bool,
}

/// Internal counters (lock-free atomics).
#[derive(Debug, Default)]
struct LooperCounters {
    submitted: AtomicU64,
    debounced: AtomicU64,
    canceled: AtomicU64,
    superseded: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of looper activity.
#[derive(Debug, Clone, Default)]
pub struct LooperStats {
    /// Tasks accepted by `submit`.
    pub submitted: u64,
    /// Pending tasks evicted before their delay elapsed (debounce).
    pub debounced: u64,
    /// Running occupants canceled, whether superseded mid-run or via
    /// `cancel_key`.
    pub canceled: u64,
    /// Finished runs whose result was dropped (superseded or canceled).
    pub superseded: u64,
    /// Results delivered to `post`.
    pub delivered: u64,
    /// Submissions lost to scheduler-internal faults (queue full/closed).
    pub dropped: u64,
}

/// State shared between the public handle, the timer thread, and workers.
struct LooperShared {
    slots: Mutex<HashMap<MessageKey, Slot>>,
    timer: Mutex<TimerState>,
    timer_cv: Condvar,
    work_tx: Mutex<Option<Sender<WorkItem>>>,
    ui: Arc<dyn UiExecutor>,
    counters: LooperCounters,
    shutdown: AtomicBool,
}

impl LooperShared {
    /// Evict the slot's occupant under the lock; returns the hook to fire
    /// once the lock is released (hooks run user code and must not be called
    /// while holding the slot map).
    fn evict_locked(&self, slot: &mut Slot, key: &MessageKey) -> Option<CancelHook> {
        slot.canceled = true;
        slot.work = None;
        let hook = slot.cancel.take();
        match slot.phase {
            Phase::Pending => {
                slot.occupied = false;
                self.counters.debounced.fetch_add(1, Ordering::Relaxed);
                debug!(
                    key = key.label(),
                    generation = slot.generation,
                    "pending task evicted"
                );
            }
            Phase::Running => {
                self.counters.canceled.fetch_add(1, Ordering::Relaxed);
                debug!(
                    key = key.label(),
                    generation = slot.generation,
                    "running task canceled, its result will be dropped"
                );
            }
        }
        hook
    }

    /// Timer callback: transition pending to running and hand the body to a
    /// worker. A no-op for entries whose occupant was superseded or canceled
    /// while they waited.
    fn fire(&self, entry: TimerEntry) {
        let work = {
            let mut slots = self.slots.lock();
            let Some(slot) = slots.get_mut(&entry.key) else {
                return;
            };
            if !slot.occupied || slot.generation != entry.generation || slot.phase != Phase::Pending
            {
                debug!(
                    key = entry.key.label(),
                    generation = entry.generation,
                    "stale timer entry ignored"
                );
                return;
            }
            slot.phase = Phase::Running;
            slot.work.take()
        };

        let Some(work) = work else { return };
        let key = entry.key.clone();
        let generation = entry.generation;

        if let Err(err) = self.dispatch(WorkItem {
            key: key.clone(),
            generation,
            work,
        }) {
            warn!(
                key = key.label(),
                generation,
                error = %err,
                "failed to dispatch task, dropping this submission"
            );
            self.abandon(&key, generation);
        }
    }

    /// Hand a work item to the worker pool without blocking.
    fn dispatch(&self, item: WorkItem) -> Result<(), LooperError> {
        let tx = self.work_tx.lock();
        let Some(tx) = tx.as_ref() else {
            return Err(LooperError::Shutdown);
        };
        match tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(LooperError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(LooperError::Shutdown),
        }
    }

    /// Forget a submission that could not be dispatched. Fatal to that one
    /// submission only; the slot becomes reusable immediately.
    fn abandon(&self, key: &MessageKey, generation: u64) {
        let hook = {
            let mut slots = self.slots.lock();
            match slots.get_mut(key) {
                Some(slot) if slot.occupied && slot.generation == generation => {
                    slot.occupied = false;
                    slot.work = None;
                    slot.cancel.take()
                }
                _ => None,
            }
        };
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        if let Some(hook) = hook {
            hook.fire();
        }
    }

    /// Worker callback: decide whether a finished run's result still stands,
    /// then deliver it to `post` on the UI thread or drop it.
    fn complete(&self, key: &MessageKey, generation: u64, deliver_job: UiJob) {
        let decision = {
            let mut slots = self.slots.lock();
            match slots.get_mut(key) {
                Some(slot) if slot.occupied && slot.generation == generation => {
                    let canceled = slot.canceled;
                    // The descriptor leaves the slot either way; its cancel
                    // hook is disposed of before any post can run.
                    slot.occupied = false;
                    slot.work = None;
                    Some((canceled, slot.cancel.take()))
                }
                _ => None,
            }
        };

        match decision {
            Some((false, hook)) => {
                // Completion disposal: every descriptor's hook fires exactly
                // once, at the latest right before its post is marshaled.
                if let Some(hook) = hook {
                    hook.fire();
                }
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(key = key.label(), generation, "delivering result to post");
                self.ui.execute(deliver_job);
            }
            Some((true, _)) | None => {
                self.counters.superseded.fetch_add(1, Ordering::Relaxed);
                debug!(key = key.label(), generation, "stale result dropped");
            }
        }
    }
}

/// Keyed, debounced, cancelable task scheduler.
///
/// An explicit instance with a constructor/shutdown lifecycle, passed to
/// collaborators rather than accessed globally. All UI mutation driven by its
/// tasks flows through the [`UiExecutor`] it was built with.
pub struct Looper {
    shared: Arc<LooperShared>,
    config: LooperConfig,
    timer_thread: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Looper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Looper")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Looper {
    /// Create a looper with `config.worker_count` worker threads and one
    /// timer thread.
    ///
    /// # Errors
    ///
    /// Returns [`LooperError::InvalidConfig`] if the configuration is invalid
    /// and [`LooperError::Spawn`] if a thread could not be started.
    pub fn new(config: LooperConfig, ui: Arc<dyn UiExecutor>) -> Result<Self, LooperError> {
        config.validate().map_err(LooperError::InvalidConfig)?;

        let (work_tx, work_rx) = bounded::<WorkItem>(config.max_queue_depth);
        let shared = Arc::new(LooperShared {
            slots: Mutex::new(HashMap::new()),
            timer: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                shutdown: false,
            }),
            timer_cv: Condvar::new(),
            work_tx: Mutex::new(Some(work_tx)),
            ui,
            counters: LooperCounters::default(),
            shutdown: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            workers.push(spawn_worker(
                worker_id,
                work_rx.clone(),
                Arc::clone(&shared),
                config.thread_stack_size,
            )?);
        }
        let timer_thread = spawn_timer(Arc::clone(&shared))?;

        info!(
            worker_count = config.worker_count,
            max_queue_depth = config.max_queue_depth,
            "looper initialized"
        );

        Ok(Self {
            shared,
            config,
            timer_thread: Mutex::new(Some(timer_thread)),
            workers: Mutex::new(workers),
        })
    }

    /// Submit a task, superseding any occupant of the task's key.
    ///
    /// The occupant (if any) is canceled first: still pending, it is evicted
    /// outright and its `run`/`post` never execute; already running, it keeps
    /// running but its result is discarded on arrival. The new task's `pre`
    /// runs on the UI thread (inline when submitting from the UI thread),
    /// then the delay countdown starts from zero.
    ///
    /// Never blocks and never returns an error; scheduler-internal faults are
    /// fatal to the one submission only and are logged.
    pub fn submit<R: Send + 'static>(&self, task: TaskDescriptor<R>) {
        if self.shared.shutdown.load(Ordering::Acquire) {
            warn!(key = task.key().label(), "submit after shutdown ignored");
            return;
        }

        let ArmedTask {
            key,
            delay,
            pre,
            work,
            cancel,
        } = task.arm();
        let deadline = Instant::now() + delay;

        let (generation, evicted) = {
            let mut slots = self.shared.slots.lock();
            let slot = slots.entry(key.clone()).or_insert_with(Slot::vacant);
            let evicted = if slot.occupied {
                self.shared.evict_locked(slot, &key)
            } else {
                None
            };
            slot.generation += 1;
            slot.occupied = true;
            slot.phase = Phase::Pending;
            slot.canceled = false;
            slot.cancel = Some(cancel);
            slot.work = Some(work);
            (slot.generation, evicted)
        };

        if let Some(hook) = evicted {
            hook.fire();
        }

        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);

        if let Some(pre) = pre {
            self.shared.ui.execute(pre);
        }

        {
            let mut timer = self.shared.timer.lock();
            timer.heap.push(TimerEntry {
                deadline,
                key: key.clone(),
                generation,
            });
        }
        self.shared.timer_cv.notify_one();

        debug!(
            key = key.label(),
            generation,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "task installed"
        );
    }

    /// Cancel whatever occupies `key`'s slot. A no-op on an empty slot.
    ///
    /// A pending occupant is evicted without running; a running occupant
    /// gets its cancel hook invoked and its eventual result is dropped
    /// before `post`.
    pub fn cancel_key(&self, key: &MessageKey) {
        let hook = {
            let mut slots = self.shared.slots.lock();
            match slots.get_mut(key) {
                Some(slot) if slot.occupied => self.shared.evict_locked(slot, key),
                _ => None,
            }
        };
        if let Some(hook) = hook {
            hook.fire();
        }
    }

    /// Snapshot activity counters.
    #[must_use]
    pub fn stats(&self) -> LooperStats {
        let c = &self.shared.counters;
        LooperStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            debounced: c.debounced.load(Ordering::Relaxed),
            canceled: c.canceled.load(Ordering::Relaxed),
            superseded: c.superseded.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
        }
    }

    /// Shut down gracefully: stop the timer, close the worker queue, and
    /// join workers with a bounded timeout. Workers stuck in a long `run`
    /// are detached rather than waited for. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("shutting down looper");

        {
            let mut timer = self.shared.timer.lock();
            timer.shutdown = true;
        }
        self.shared.timer_cv.notify_all();
        if let Some(timer_thread) = self.timer_thread.lock().take() {
            if timer_thread.join().is_err() {
                warn!("timer thread panicked");
            }
        }

        // Drop the sender to unblock all workers waiting on recv().
        {
            let mut work_tx = self.shared.work_tx.lock();
            *work_tx = None;
        }

        let mut workers = self.workers.lock();
        let worker_count = workers.len();
        for (worker_id, worker) in workers.drain(..).enumerate() {
            let (done_tx, done_rx) = std::sync::mpsc::channel();
            let joiner = thread::spawn(move || {
                let ok = worker.join().is_ok();
                let _ = done_tx.send(ok);
            });
            match done_rx.recv_timeout(self.config.join_timeout()) {
                Ok(true) => {
                    let _ = joiner.join();
                    debug!(worker_id, "worker joined");
                }
                Ok(false) => {
                    let _ = joiner.join();
                    warn!(worker_id, "worker panicked");
                }
                Err(_) => {
                    // Detach: the run body owns the thread until it returns.
                    drop(joiner);
                    warn!(worker_id, "worker did not exit within timeout, detaching");
                }
            }
        }

        info!(worker_count, "looper shut down");
    }
}

impl Drop for Looper {
    fn drop(&mut self) {
        // Signal shutdown but do not join; explicit shutdown() is required
        // for a graceful exit.
        if !self.shared.shutdown.swap(true, Ordering::AcqRel) {
            {
                let mut timer = self.shared.timer.lock();
                timer.shutdown = true;
            }
            self.shared.timer_cv.notify_all();
            let mut work_tx = self.shared.work_tx.lock();
            *work_tx = None;
            debug!("looper dropped without explicit shutdown, threads detached");
        }
    }
}

/// Spawn the timer thread: sleep until the earliest deadline, fire due
/// entries, repeat. Waits on the condvar when the heap is empty.
fn spawn_timer(shared: Arc<LooperShared>) -> Result<JoinHandle<()>, LooperError> {
    thread::Builder::new()
        .name("looper-timer".into())
        .spawn(move || {
            debug!("timer thread started");
            loop {
                let entry = {
                    let mut timer = shared.timer.lock();
                    loop {
                        if timer.shutdown {
                            debug!("timer thread exiting");
                            return;
                        }
                        let next_deadline = timer.heap.peek().map(|e| e.deadline);
                        match next_deadline {
                            Some(deadline) if deadline <= Instant::now() => {
                                if let Some(entry) = timer.heap.pop() {
                                    break entry;
                                }
                            }
                            Some(deadline) => {
                                let _ = shared.timer_cv.wait_until(&mut timer, deadline);
                            }
                            None => {
                                shared.timer_cv.wait(&mut timer);
                            }
                        }
                    }
                };
                shared.fire(entry);
            }
        })
        .map_err(|e| LooperError::Spawn(e.to_string()))
}

/// Spawn one worker thread. Blocks on channel recv; exits when the sender is
/// dropped at shutdown.
fn spawn_worker(
    worker_id: usize,
    work_rx: Receiver<WorkItem>,
    shared: Arc<LooperShared>,
    stack_size: usize,
) -> Result<JoinHandle<()>, LooperError> {
    thread::Builder::new()
        .name(format!("looper-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(worker_id, "worker thread started");
            while let Ok(item) = work_rx.recv() {
                if shared.shutdown.load(Ordering::Acquire) {
                    break;
                }
                debug!(
                    worker_id,
                    key = item.key.label(),
                    generation = item.generation,
                    "executing task"
                );
                let deliver_job = (item.work)();
                shared.complete(&item.key, item.generation, deliver_job);
            }
            debug!(worker_id, "worker thread exiting");
        })
        .map_err(|e| {
            error!(worker_id, error = %e, "failed to spawn worker");
            LooperError::Spawn(e.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::MainLoop;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn small_looper(main: &MainLoop) -> Looper {
        let config = LooperConfig::new().with_worker_count(2).with_max_queue_depth(8);
        Looper::new(config, Arc::new(main.handle())).unwrap()
    }

    #[test]
    fn test_cancel_key_on_empty_slot_is_noop() {
        let main = MainLoop::new();
        let looper = small_looper(&main);
        let key = MessageKey::new("never-submitted");

        let cancels = Arc::new(AtomicUsize::new(0));
        looper.cancel_key(&key);

        assert_eq!(cancels.load(Ordering::SeqCst), 0);
        assert_eq!(looper.stats().submitted, 0);
        looper.shutdown();
    }

    #[test]
    fn test_submit_after_shutdown_is_ignored() {
        let main = MainLoop::new();
        let looper = small_looper(&main);
        looper.shutdown();

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_in_task = Arc::clone(&ran);
        looper.submit(TaskDescriptor::new(
            MessageKey::new("late"),
            Duration::ZERO,
            move || {
                ran_in_task.fetch_add(1, Ordering::SeqCst);
            },
        ));

        std::thread::sleep(Duration::from_millis(50));
        main.drain();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(looper.stats().submitted, 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let main = MainLoop::new();
        let looper = small_looper(&main);
        looper.shutdown();
        looper.shutdown();
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let main = MainLoop::new();
        let config = LooperConfig::new().with_worker_count(0);
        let err = Looper::new(config, Arc::new(main.handle())).unwrap_err();
        assert!(matches!(err, LooperError::InvalidConfig(_)));
    }

    #[test]
    fn test_timer_entry_ordering_is_earliest_first() {
        let key = MessageKey::new("k");
        let now = Instant::now();
        let mut heap = BinaryHeap::new();
        heap.push(TimerEntry {
            deadline: now + Duration::from_millis(300),
            key: key.clone(),
            generation: 2,
        });
        heap.push(TimerEntry {
            deadline: now + Duration::from_millis(100),
            key: key.clone(),
            generation: 3,
        });
        heap.push(TimerEntry {
            deadline: now + Duration::from_millis(200),
            key,
            generation: 1,
        });

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.generation)).collect();
        assert_eq!(order, vec![3, 1, 2]);
    }
}
