//! End-to-end scenario tests: a stub media converter driven through the
//! looper the way the GIF preview controller drives the real one.
//!
//! The controller pattern under test:
//! - every widget change resubmits a "convert" task built from the freshest
//!   widget values, debounced behind a shared key
//! - the task's cancel hook forwards to `MediaConverter::cancel`, so a
//!   superseded conversion returns promptly with a canceled result
//! - `post` surfaces success/failure through a notification and schedules a
//!   delayed "dismiss-notification" task

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use ui_looper::config::LooperConfig;
use ui_looper::core::{Looper, MessageKey, TaskDescriptor};
use ui_looper::marshal::MainLoop;
use ui_looper::media::{ConvertRequest, ConvertResult, MediaConverter, Progress};

// ============================================================================
// STUB CONVERTER
// ============================================================================

/// Converter that "works" in 10ms slices, honoring cancellation between
/// slices and publishing progress as it goes.
struct StubConverter {
    canceled: AtomicBool,
    progress: Arc<Progress>,
    conversions: AtomicUsize,
    last_frame_rate: Mutex<Option<f64>>,
    work: Duration,
}

impl StubConverter {
    fn new(work: Duration) -> Self {
        Self {
            canceled: AtomicBool::new(false),
            progress: Arc::new(Progress::new()),
            conversions: AtomicUsize::new(0),
            last_frame_rate: Mutex::new(None),
            work,
        }
    }
}

impl MediaConverter for StubConverter {
    fn convert(&self, request: &ConvertRequest) -> ConvertResult {
        let started = Instant::now();
        self.canceled.store(false, Ordering::SeqCst);
        self.progress.reset();
        self.conversions.fetch_add(1, Ordering::SeqCst);
        *self.last_frame_rate.lock() = Some(request.frame_rate);

        let slices = 10u32;
        for slice in 0..slices {
            if self.canceled.load(Ordering::SeqCst) {
                return ConvertResult::canceled(started.elapsed());
            }
            thread::sleep(self.work / slices);
            #[allow(clippy::cast_precision_loss)]
            self.progress.set((slice + 1) as f32 / slices as f32);
        }

        if !request.has_supported_extension() {
            return ConvertResult::failed("unsupported input format", started.elapsed());
        }
        ConvertResult::success(PathBuf::from("out.gif"), 150_000, started.elapsed())
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }
}

// ============================================================================
// CONTROLLER HARNESS
// ============================================================================

struct Harness {
    main: MainLoop,
    looper: Arc<Looper>,
    converter: Arc<StubConverter>,
    convert_key: MessageKey,
    dismiss_key: MessageKey,
    notifications: Arc<Mutex<Vec<String>>>,
    loading: Arc<AtomicBool>,
}

impl Harness {
    fn new(work: Duration) -> Self {
        ui_looper::util::init_tracing();
        let main = MainLoop::new();
        let config = LooperConfig::new().with_worker_count(2);
        let looper = Arc::new(Looper::new(config, Arc::new(main.handle())).unwrap());
        Self {
            main,
            looper,
            converter: Arc::new(StubConverter::new(work)),
            convert_key: MessageKey::new("convert"),
            dismiss_key: MessageKey::new("dismiss-notification"),
            notifications: Arc::new(Mutex::new(Vec::new())),
            loading: Arc::new(AtomicBool::new(false)),
        }
    }

    /// What the controller does on every widget change: capture the current
    /// widget values and resubmit.
    fn reload_convert(&self, frame_rate: f64, delay: Duration) {
        let request = ConvertRequest {
            input: PathBuf::from("video.mp4"),
            frame_rate,
            scale: 0.5,
            range_start_secs: 0.0,
            range_duration_secs: 10.0,
            reverse: false,
        };

        let converter = Arc::clone(&self.converter);
        let cancel_handle = Arc::clone(&self.converter);
        let loading = Arc::clone(&self.loading);
        let loading_done = Arc::clone(&self.loading);
        let notifications = Arc::clone(&self.notifications);
        let looper = Arc::clone(&self.looper);
        let dismiss_key = self.dismiss_key.clone();

        self.looper.submit(
            TaskDescriptor::new(self.convert_key.clone(), delay, move || {
                converter.convert(&request)
            })
            .on_pre(move || {
                loading.store(true, Ordering::SeqCst);
            })
            .on_post(move |result| {
                loading_done.store(false, Ordering::SeqCst);
                if result.is_canceled() {
                    // Surfaced as silence.
                } else if result.is_success() {
                    notifications.lock().push(format!(
                        "converted in {}, size {}",
                        result.elapsed_display(),
                        result.size_display()
                    ));
                    Self::schedule_dismiss(&looper, &dismiss_key, &notifications);
                } else {
                    notifications
                        .lock()
                        .push("conversion failed, is the input a valid video?".into());
                    Self::schedule_dismiss(&looper, &dismiss_key, &notifications);
                }
            })
            .on_cancel(move || {
                cancel_handle.cancel();
            }),
        );
    }

    fn schedule_dismiss(
        looper: &Arc<Looper>,
        dismiss_key: &MessageKey,
        notifications: &Arc<Mutex<Vec<String>>>,
    ) {
        looper.cancel_key(dismiss_key);
        let notifications = Arc::clone(notifications);
        looper.submit(
            TaskDescriptor::new(dismiss_key.clone(), Duration::from_millis(150), || ()).on_post(
                move |()| {
                    notifications.lock().clear();
                },
            ),
        );
    }

    fn drain_until(&self, timeout: Duration, cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.main.drain();
            if cond() {
                return true;
            }
            if Instant::now() >= deadline {
                self.main.drain();
                return cond();
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[test]
fn slider_storm_converts_once_with_freshest_parameters() {
    let harness = Harness::new(Duration::from_millis(100));

    // A slider drag: three parameter changes inside the debounce window.
    for frame_rate in [5.0, 10.0, 24.0] {
        harness.reload_convert(frame_rate, Duration::from_millis(200));
        thread::sleep(Duration::from_millis(20));
    }
    assert!(harness.loading.load(Ordering::SeqCst), "pre shows the loading state");

    let notifications = Arc::clone(&harness.notifications);
    assert!(harness.drain_until(Duration::from_secs(3), move || {
        !notifications.lock().is_empty()
    }));

    assert_eq!(harness.converter.conversions.load(Ordering::SeqCst), 1);
    assert_eq!(*harness.converter.last_frame_rate.lock(), Some(24.0));
    assert!(!harness.loading.load(Ordering::SeqCst));
    {
        let notes = harness.notifications.lock();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].starts_with("converted in"), "got: {}", notes[0]);
    }

    // The delayed dismiss task clears the notification on its own.
    let notifications = Arc::clone(&harness.notifications);
    assert!(harness.drain_until(Duration::from_secs(3), move || {
        notifications.lock().is_empty()
    }));

    harness.looper.shutdown();
}

#[test]
fn superseding_a_running_conversion_cancels_it_and_surfaces_only_the_new_result() {
    let harness = Harness::new(Duration::from_millis(400));

    harness.reload_convert(5.0, Duration::ZERO);

    // Wait until the first conversion is genuinely in flight.
    let converter = Arc::clone(&harness.converter);
    assert!(harness.drain_until(Duration::from_secs(2), move || {
        converter.conversions.load(Ordering::SeqCst) == 1
    }));
    thread::sleep(Duration::from_millis(50));

    // A new widget value arrives mid-conversion.
    harness.reload_convert(12.0, Duration::ZERO);

    let notifications = Arc::clone(&harness.notifications);
    assert!(harness.drain_until(Duration::from_secs(5), move || {
        !notifications.lock().is_empty()
    }));

    // Both conversions started, but only the second one's result surfaced.
    assert_eq!(harness.converter.conversions.load(Ordering::SeqCst), 2);
    assert_eq!(*harness.converter.last_frame_rate.lock(), Some(12.0));
    assert_eq!(harness.notifications.lock().len(), 1);

    let stats = harness.looper.stats();
    assert_eq!(stats.superseded, 1, "first conversion's result was dropped");
    assert!(stats.delivered >= 1);

    harness.looper.shutdown();
}

#[test]
fn progress_is_observable_from_the_ui_thread() {
    let harness = Harness::new(Duration::from_millis(100));
    let progress = harness.converter.progress();

    harness.reload_convert(8.0, Duration::ZERO);

    let notifications = Arc::clone(&harness.notifications);
    assert!(harness.drain_until(Duration::from_secs(3), move || {
        !notifications.lock().is_empty()
    }));

    assert!((progress.get() - 1.0).abs() < f32::EPSILON);
    harness.looper.shutdown();
}
