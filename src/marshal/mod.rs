//! UI-thread marshaling.
//!
//! GUI toolkits require widget mutation to happen on one designated thread.
//! Instead of reasoning about widget thread-safety case by case, everything
//! that touches UI state is funneled through a single primitive: a
//! [`UiExecutor`] that runs closures on the UI thread, in submission order
//! for closures sent from the same non-UI thread.
//!
//! [`MainLoop`]/[`MainHandle`] is the shipped channel-backed implementation.
//! The loop is created on the UI thread; the host drains it from its frame
//! or event loop. Handles are cheap to clone and `Send`, and execute inline
//! when already called on the UI thread.

use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::warn;

/// A closure marshaled to the UI thread.
pub type UiJob = Box<dyn FnOnce() + Send>;

/// Execution context for UI-thread callbacks.
///
/// The looper invokes every `pre` and `post` through this trait and nothing
/// else; `run` bodies never pass through it.
pub trait UiExecutor: Send + Sync + 'static {
    /// Execute `job` on the UI thread. Implementations must preserve
    /// submission order among jobs sent from the same non-UI thread.
    fn execute(&self, job: UiJob);
}

/// Receiving end of the UI-thread queue. Owned and drained by the UI thread.
pub struct MainLoop {
    rx: Receiver<UiJob>,
    handle: MainHandle,
}

/// Clonable, `Send` handle for marshaling closures to the [`MainLoop`]'s
/// thread.
#[derive(Clone)]
pub struct MainHandle {
    tx: Sender<UiJob>,
    ui_thread: ThreadId,
}

impl MainLoop {
    /// Create the loop on the current thread, which becomes the UI thread.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            rx,
            handle: MainHandle {
                tx,
                ui_thread: thread::current().id(),
            },
        }
    }

    /// A handle for producers on other threads.
    #[must_use]
    pub fn handle(&self) -> MainHandle {
        self.handle.clone()
    }

    /// Run every job queued so far and return how many ran. Call this from
    /// the UI thread's frame or event loop; calling it from any other thread
    /// is a misuse and does nothing.
    pub fn drain(&self) -> usize {
        if thread::current().id() != self.handle.ui_thread {
            warn!("MainLoop::drain called off the UI thread, ignoring");
            return 0;
        }
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Block the UI thread up to `timeout`, running jobs as they arrive.
    /// Returns how many ran. Useful for hosts without their own frame loop
    /// and for tests.
    pub fn pump(&self, timeout: Duration) -> usize {
        if thread::current().id() != self.handle.ui_thread {
            warn!("MainLoop::pump called off the UI thread, ignoring");
            return 0;
        }
        let deadline = Instant::now() + timeout;
        let mut ran = 0;
        while let Ok(job) = self.rx.recv_deadline(deadline) {
            job();
            ran += 1;
        }
        ran
    }
}

impl Default for MainLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl MainHandle {
    /// Execute `f` on the UI thread: inline when already there, queued
    /// otherwise. Dropped with a warning if the loop is gone.
    pub fn run_on_main(&self, f: impl FnOnce() + Send + 'static) {
        self.execute(Box::new(f));
    }

    /// Whether the calling thread is the UI thread.
    #[must_use]
    pub fn is_ui_thread(&self) -> bool {
        thread::current().id() == self.ui_thread
    }
}

impl UiExecutor for MainHandle {
    fn execute(&self, job: UiJob) {
        if self.is_ui_thread() {
            job();
        } else if self.tx.send(job).is_err() {
            warn!("UI loop is gone, dropping marshaled call");
        }
    }
}
