//! Conversion collaborator boundary.
//!
//! The looper never inspects what a conversion produced; these types exist so
//! the requester and the converter agree on the shape of a job. The actual
//! transcoding lives behind [`MediaConverter`], outside this crate.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Video formats the converter accepts, by lowercase extension.
pub const SUPPORTED_VIDEO_EXTENSIONS: &[&str] =
    &["mp4", "avi", "mkv", "mov", "flv", "wmv", "webm", "mpg"];

/// Parameters of one conversion, captured from live widget state at
/// submission time (never read lazily at run time).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertRequest {
    /// Input video file.
    pub input: PathBuf,
    /// Output frames per second.
    pub frame_rate: f64,
    /// Output scale factor relative to the source resolution.
    pub scale: f64,
    /// Start of the selected range, in seconds.
    pub range_start_secs: f64,
    /// Length of the selected range, in seconds.
    pub range_duration_secs: f64,
    /// Whether to play the output backwards.
    pub reverse: bool,
}

impl ConvertRequest {
    /// Selected range length as a [`Duration`]. Negative lengths collapse to
    /// zero.
    #[must_use]
    pub fn range_duration(&self) -> Duration {
        Duration::from_secs_f64(self.range_duration_secs.max(0.0))
    }

    /// Whether the input file's extension is a supported video format.
    #[must_use]
    pub fn has_supported_extension(&self) -> bool {
        self.input
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                let ext = ext.to_ascii_lowercase();
                SUPPORTED_VIDEO_EXTENSIONS.contains(&ext.as_str())
            })
    }
}

/// Tri-state outcome of a conversion. Interpreted by the requester in its
/// `post` callback; canceled conversions are surfaced as silence, failed
/// ones through the notification collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvertOutcome {
    /// The output file was produced.
    Success,
    /// The conversion observed a cancel request and stopped early.
    Canceled,
    /// The conversion failed, with a human-readable reason.
    Failed(String),
}

/// What one conversion produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertResult {
    /// Success, canceled, or failed.
    pub outcome: ConvertOutcome,
    /// Wall-clock time the conversion took.
    pub elapsed: Duration,
    /// The output file, when one was produced.
    pub output: Option<PathBuf>,
    /// Size of the output file in bytes, when one was produced.
    pub output_size_bytes: Option<u64>,
}

impl ConvertResult {
    /// A successful conversion.
    #[must_use]
    pub fn success(output: PathBuf, output_size_bytes: u64, elapsed: Duration) -> Self {
        Self {
            outcome: ConvertOutcome::Success,
            elapsed,
            output: Some(output),
            output_size_bytes: Some(output_size_bytes),
        }
    }

    /// A conversion that stopped early after a cancel request.
    #[must_use]
    pub fn canceled(elapsed: Duration) -> Self {
        Self {
            outcome: ConvertOutcome::Canceled,
            elapsed,
            output: None,
            output_size_bytes: None,
        }
    }

    /// A failed conversion.
    #[must_use]
    pub fn failed(reason: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            outcome: ConvertOutcome::Failed(reason.into()),
            elapsed,
            output: None,
            output_size_bytes: None,
        }
    }

    /// Whether the conversion produced an output file.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == ConvertOutcome::Success
    }

    /// Whether the conversion stopped for a cancel request.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.outcome == ConvertOutcome::Canceled
    }

    /// Elapsed time formatted for a notification, e.g. `"2.4s"`.
    #[must_use]
    pub fn elapsed_display(&self) -> String {
        format!("{:.1}s", self.elapsed.as_secs_f64())
    }

    /// Output size formatted for a notification, e.g. `"1.5 MiB"`; empty when
    /// there is no output.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn size_display(&self) -> String {
        match self.output_size_bytes {
            None => String::new(),
            Some(bytes) if bytes < 1024 => format!("{bytes} B"),
            Some(bytes) if bytes < 1024 * 1024 => format!("{:.1} KiB", bytes as f64 / 1024.0),
            Some(bytes) => format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0)),
        }
    }
}

/// Observable conversion progress in `[0, 1]`.
///
/// Written by the converter from its worker thread, read from the UI thread
/// (e.g. bound to a status bar each frame). Values outside `[0, 1]` are
/// clamped on write.
#[derive(Debug, Default)]
pub struct Progress {
    bits: AtomicU32,
}

impl Progress {
    /// A fresh progress at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new progress value, clamped to `[0, 1]`.
    pub fn set(&self, value: f32) {
        self.bits
            .store(value.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    }

    /// Read the current progress value.
    #[must_use]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Reset to zero, e.g. when a new conversion starts.
    pub fn reset(&self) {
        self.set(0.0);
    }
}

/// The conversion collaborator.
///
/// `convert` blocks its caller for the duration of the work and is intended
/// to be called from a task's `run` body. `cancel` may be called from any
/// thread and must make a concurrently running `convert` return promptly
/// with a canceled result; it requests a stop, it does not preempt.
pub trait MediaConverter: Send + Sync + 'static {
    /// Perform one conversion.
    fn convert(&self, request: &ConvertRequest) -> ConvertResult;

    /// Ask a concurrently running `convert` to stop.
    fn cancel(&self);

    /// The shared progress observable this converter updates.
    fn progress(&self) -> Arc<Progress>;
}
