//! # Prometheus Thread Control
//!
//! A bounded-concurrency limiter with join semantics for fan-out workloads.
//!
//! `ThreadControl` caps how many units of work run at the same time, counts
//! the units in flight, and lets the caller block until every one of them has
//! finished. It is the building block for "spawn a worker per item, but never
//! more than N at once, then wait for the batch" loops.
//!
//! ## Core Contract
//!
//! - **Admission**: `begin` blocks until one of `capacity` slots is free.
//!   A capacity of zero or less disables the gate entirely.
//! - **Completion**: `done` retires one unit and hands its slot back.
//! - **Join**: `wait` blocks until nothing is outstanding; it is reusable
//!   across batches.
//! - **Caller guard**: `lock` protects caller-owned state (typically a result
//!   accumulator) independently of the admission machinery.
//!
//! ## Key Features
//!
//! - **Batch admission**: `begin_n(delta)` registers `delta` units under a
//!   single slot
//! - **Bounded waiting**: `try_*`, `*_timeout`, and `*_deadline` variants
//! - **RAII permits**: `admit` / `admit_n` / `spawn` complete their units on
//!   drop, even on panic
//! - **Async twin**: `AsyncThreadControl` for tokio tasks (feature
//!   `tokio-runtime`, on by default)
//! - **Config-driven**: JSON and environment configuration plus builders
//!
//! ## Blocking example
//!
//! ```
//! use prometheus_thread_control::ThreadControl;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let control = Arc::new(ThreadControl::with_state(3, 0_u64));
//!
//! for n in 1..=10_u64 {
//!     control.begin();
//!     let control = Arc::clone(&control);
//!     thread::spawn(move || {
//!         *control.lock() += n;
//!         control.done().unwrap();
//!     });
//! }
//!
//! control.wait();
//! assert_eq!(*control.lock(), 55);
//! ```
//!
//! ## From configuration
//!
//! ```
//! use prometheus_thread_control::builders::build_limiters;
//! use prometheus_thread_control::config::LimiterSetConfig;
//!
//! let cfg = LimiterSetConfig::from_json_str(
//!     r#"{ "limiters": { "fetch": { "name": "fetch", "max_threads": 8 } } }"#,
//! )
//! .unwrap();
//! let limiters = build_limiters(&cfg).unwrap();
//! assert_eq!(limiters["fetch"].capacity().limit(), Some(8));
//! ```
//!
//! For complete examples, see:
//! - `tests/thread_control_tests.rs` - Blocking limiter integration tests
//! - `tests/async_control_tests.rs` - Async limiter integration tests

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core admission, completion, and join primitives.
pub mod core;
/// Configuration models for limiters.
pub mod config;
/// Builders to construct limiters from configuration.
pub mod builders;
/// Shared utilities.
pub mod util;

pub use crate::core::{
    AppResult, BatchPermit, Capacity, LimiterError, LimiterStats, OwnedWorkPermit, ThreadControl,
    WorkPermit,
};
#[cfg(feature = "tokio-runtime")]
pub use crate::core::{AsyncBatchPermit, AsyncThreadControl, AsyncWorkPermit};
