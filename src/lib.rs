//! # ui_looper
//!
//! A keyed, debounced, cancelable task queue with UI-thread marshaling, built
//! for desktop media tools where a handful of sliders drive an expensive
//! background job.
//!
//! ## Core Problem Solved
//!
//! Interactive conversion previews have an awkward shape:
//!
//! - **Input arrives in bursts**: a slider drag produces dozens of change
//!   events per second, each describing a conversion only the last of which
//!   matters
//! - **The work is expensive**: re-encoding a video range takes seconds, so
//!   superseded work must be cancelled, not queued
//! - **UI state is single-threaded**: toolkits require widget mutation on one
//!   designated thread, while the conversion must run anywhere else
//! - **Late results lie**: a slow, superseded conversion finishing after a
//!   newer one would repaint the preview with stale output
//!
//! ## Key Features
//!
//! - **Debounce per key**: submissions sharing a [`core::MessageKey`] collapse
//!   so only the most recent one runs after its quiet period
//! - **Single-flight per key**: at most one task occupies a key's slot;
//!   different keys run concurrently on the worker pool
//! - **Cooperative cancellation**: superseded or cancelled tasks get a cancel
//!   hook invocation; a run that finishes anyway has its result discarded
//! - **Asymmetric thread affinity**: `pre` and `post` execute on the UI
//!   thread via [`marshal::UiExecutor`], `run` never does
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ui_looper::config::LooperConfig;
//! use ui_looper::core::{Looper, MessageKey, TaskDescriptor};
//! use ui_looper::marshal::MainLoop;
//!
//! let main = MainLoop::new(); // on the UI thread
//! let looper = Looper::new(LooperConfig::new(), Arc::new(main.handle()))?;
//!
//! let convert_key = MessageKey::new("convert");
//! // On every slider tick, resubmit with the freshest parameters:
//! looper.submit(
//!     TaskDescriptor::new(convert_key.clone(), Duration::from_millis(1000), move || {
//!         converter.convert(&request)
//!     })
//!     .on_pre(move || preview.show_loading())
//!     .on_post(move |result| preview.show_finished(&result))
//!     .on_cancel(move || cancel_handle.cancel()),
//! );
//!
//! // Host frame loop:
//! main.drain();
//! ```
//!
//! For complete examples, see `tests/looper_test.rs` and
//! `tests/convert_flow_test.rs`.

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: keys, descriptors, and the looper.
pub mod core;
/// Configuration models for the looper.
pub mod config;
/// UI-thread marshaling primitives.
pub mod marshal;
/// Boundary types for the media conversion collaborator.
pub mod media;
/// Shared utilities.
pub mod util;
