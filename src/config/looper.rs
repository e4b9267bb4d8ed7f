//! Looper configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::core::Looper`] instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LooperConfig {
    /// Number of worker threads executing `run` bodies. Different keys may
    /// run concurrently up to this count.
    pub worker_count: usize,
    /// Maximum dispatched-but-not-started tasks before a dispatch is dropped.
    pub max_queue_depth: usize,
    /// Stack size for worker threads, in bytes.
    pub thread_stack_size: usize,
    /// How long `shutdown` waits for each worker before detaching it, in
    /// milliseconds.
    pub join_timeout_ms: u64,
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().clamp(1, 4),
            max_queue_depth: 64,
            thread_stack_size: 2 * 1024 * 1024,
            join_timeout_ms: 2_000,
        }
    }
}

impl LooperConfig {
    /// Create a configuration with defaults sized for a desktop app.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the maximum dispatch queue depth.
    #[must_use]
    pub fn with_max_queue_depth(mut self, max_queue_depth: usize) -> Self {
        self.max_queue_depth = max_queue_depth;
        self
    }

    /// Set the worker thread stack size in bytes.
    #[must_use]
    pub fn with_thread_stack_size(mut self, thread_stack_size: usize) -> Self {
        self.thread_stack_size = thread_stack_size;
        self
    }

    /// Set the per-worker shutdown join timeout.
    #[must_use]
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// The per-worker shutdown join timeout as a [`Duration`].
    #[must_use]
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        if self.join_timeout_ms == 0 {
            return Err("join_timeout_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse a configuration from a JSON string and validate it.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error description.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
