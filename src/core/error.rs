//! Error types for limiter operations.

use thiserror::Error;

/// Errors produced by limiter components.
#[derive(Debug, Error)]
pub enum LimiterError {
    /// No admission slot is free right now.
    #[error("limiter at capacity")]
    AtCapacity,
    /// A bounded admission or join ran out of time.
    #[error("timed out waiting for limiter")]
    Timeout,
    /// Admitting the requested units would overflow the unit counter.
    #[error("too many outstanding work units")]
    Overflow,
    /// `done` was called with no outstanding work unit.
    #[error("done called without a matching begin")]
    Unbalanced,
    /// The OS refused to create a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
