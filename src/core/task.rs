//! Message keys and task descriptors.
//!
//! A [`MessageKey`] names a debounce "slot": all submissions sharing a key are
//! mutually exclusive in time, and a newer submission supersedes an older one.
//! A [`TaskDescriptor`] bundles the key, the debounce delay, and the
//! three-phase callback set (`pre` on the UI thread, `run` on a worker,
//! `post` back on the UI thread) plus a shared `cancel` hook.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::marshal::UiJob;

/// Opaque identity of a debounce slot.
///
/// Keys use reference equality: clones of one key compare equal, while two
/// keys constructed with the same label are distinct identities. Requesters
/// are expected to create a key once and keep it for the life of the app,
/// the way the GIF converter keeps its `"convert"` and `"dismiss-notification"`
/// keys.
#[derive(Clone)]
pub struct MessageKey {
    inner: Arc<KeyInner>,
}

struct KeyInner {
    label: &'static str,
}

impl MessageKey {
    /// Create a new key. The label is only used in logs and `Debug` output;
    /// identity comes from the allocation, not the label.
    #[must_use]
    pub fn new(label: &'static str) -> Self {
        Self {
            inner: Arc::new(KeyInner { label }),
        }
    }

    /// Human-readable label for logging.
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.inner.label
    }
}

impl PartialEq for MessageKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for MessageKey {}

impl Hash for MessageKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(Arc::as_ptr(&self.inner) as usize);
    }
}

impl fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageKey").field(&self.inner.label).finish()
    }
}

/// Cancel hook shared between the scheduler and an in-flight task.
///
/// Fires at most once per descriptor, no matter how many paths race to fire
/// it (debounce eviction, explicit cancellation, completion disposal).
#[derive(Clone)]
pub(crate) struct CancelHook {
    hook: Option<Arc<dyn Fn() + Send + Sync>>,
    fired: Arc<AtomicBool>,
}

impl CancelHook {
    fn new(hook: Option<Arc<dyn Fn() + Send + Sync>>) -> Self {
        Self {
            hook,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Invoke the hook if it has not been invoked yet.
    pub(crate) fn fire(&self) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            if let Some(hook) = &self.hook {
                hook();
            }
        }
    }
}

/// One unit of deferred work, immutable once submitted.
///
/// The callbacks are plain closure values rather than a trait hierarchy:
/// `pre` and `post` touch UI state and are marshaled to the UI thread, `run`
/// does the heavy lifting on a worker thread and must not touch UI state,
/// and `cancel` asks an in-flight `run` to stop cooperatively (it never
/// preempts; a `run` that finishes anyway simply has its result discarded).
///
/// Scheduling identity is entirely the key: a new descriptor with the same
/// key supersedes any earlier one, regardless of instance.
///
/// # Example
///
/// ```rust,ignore
/// let task = TaskDescriptor::new(convert_key.clone(), Duration::from_millis(1000), move || {
///     converter.convert(&request)
/// })
/// .on_pre(move || preview.show_loading())
/// .on_post(move |result| preview.show_finished(&result))
/// .on_cancel(move || converter_handle.cancel());
/// looper.submit(task);
/// ```
pub struct TaskDescriptor<R> {
    key: MessageKey,
    delay: Duration,
    pre: Option<Box<dyn FnOnce() + Send>>,
    run: Box<dyn FnOnce() -> R + Send>,
    post: Option<Box<dyn FnOnce(R) + Send>>,
    cancel: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl<R: Send + 'static> TaskDescriptor<R> {
    /// Create a descriptor with the mandatory `run` callback. The other
    /// hooks default to no-ops.
    pub fn new(
        key: MessageKey,
        delay: Duration,
        run: impl FnOnce() -> R + Send + 'static,
    ) -> Self {
        Self {
            key,
            delay,
            pre: None,
            run: Box::new(run),
            post: None,
            cancel: None,
        }
    }

    /// UI-thread callback invoked synchronously at submission, before the
    /// delay starts.
    #[must_use]
    pub fn on_pre(mut self, pre: impl FnOnce() + Send + 'static) -> Self {
        self.pre = Some(Box::new(pre));
        self
    }

    /// UI-thread callback receiving `run`'s result, if it is not discarded.
    #[must_use]
    pub fn on_post(mut self, post: impl FnOnce(R) + Send + 'static) -> Self {
        self.post = Some(Box::new(post));
        self
    }

    /// Cooperative stop signal. Must be cheap, non-blocking, and safe to call
    /// concurrently with `run`; invoked exactly once per descriptor, never
    /// after `post`.
    #[must_use]
    pub fn on_cancel(mut self, cancel: impl Fn() + Send + Sync + 'static) -> Self {
        self.cancel = Some(Arc::new(cancel));
        self
    }

    /// The slot this descriptor occupies.
    #[must_use]
    pub fn key(&self) -> &MessageKey {
        &self.key
    }

    /// Debounce delay before `run` is dispatched.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Erase the result type by fusing `run` with `post`: the worker executes
    /// the returned closure, which yields the UI-thread delivery job.
    pub(crate) fn arm(self) -> ArmedTask {
        let run = self.run;
        let post = self.post;
        let work: Box<dyn FnOnce() -> UiJob + Send> = Box::new(move || {
            let out = run();
            match post {
                Some(post) => Box::new(move || post(out)),
                None => Box::new(|| {}),
            }
        });
        ArmedTask {
            key: self.key,
            delay: self.delay,
            pre: self.pre,
            work,
            cancel: CancelHook::new(self.cancel),
        }
    }
}

impl<R> fmt::Debug for TaskDescriptor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("key", &self.key)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

/// Scheduler-internal, type-erased form of a descriptor.
pub(crate) struct ArmedTask {
    pub(crate) key: MessageKey,
    pub(crate) delay: Duration,
    pub(crate) pre: Option<Box<dyn FnOnce() + Send>>,
    pub(crate) work: Box<dyn FnOnce() -> UiJob + Send>,
    pub(crate) cancel: CancelHook,
}
