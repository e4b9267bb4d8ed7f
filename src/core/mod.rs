//! Core scheduling abstractions: keys, descriptors, and the looper.

pub mod error;
pub mod looper;
pub mod task;

pub use error::{AppResult, LooperError};
pub use looper::{Looper, LooperStats};
pub use task::{MessageKey, TaskDescriptor};
