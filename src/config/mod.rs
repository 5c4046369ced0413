//! Configuration models for limiters.

pub mod limiter;

pub use limiter::{LimiterConfig, LimiterSetConfig};
