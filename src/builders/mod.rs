//! Builders to construct limiters from configuration.

pub mod limiter_builder;

pub use limiter_builder::{build_limiters, LimiterBuilder};
