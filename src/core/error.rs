//! Error types for looper operations.

use thiserror::Error;

/// Errors produced by looper components.
///
/// Note that the hot-path operations (`submit`, `cancel_key`) never surface
/// these to the caller; faults there are fatal to the one submission only and
/// are logged and swallowed. Construction and configuration validation do
/// return them.
#[derive(Debug, Error)]
pub enum LooperError {
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The worker queue rejected a dispatch because it is full.
    #[error("worker queue full")]
    QueueFull,
    /// The looper has been shut down.
    #[error("looper has been shut down")]
    Shutdown,
    /// An OS thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Spawn(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
