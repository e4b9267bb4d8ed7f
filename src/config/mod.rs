//! Configuration models for the looper.

pub mod looper;

pub use looper::LooperConfig;
