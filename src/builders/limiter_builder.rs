//! Builders to construct limiters from configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{LimiterConfig, LimiterSetConfig};
use crate::core::{Capacity, LimiterError, ThreadControl};

#[cfg(feature = "tokio-runtime")]
use crate::core::AsyncThreadControl;

/// Fluent builder for [`ThreadControl`] and its async counterpart.
#[derive(Debug, Clone)]
pub struct LimiterBuilder {
    name: String,
    capacity: Capacity,
    join_timeout: Option<Duration>,
}

impl LimiterBuilder {
    /// Start a builder for an unbounded limiter called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: Capacity::Unbounded,
            join_timeout: None,
        }
    }

    /// Start from a validated configuration.
    ///
    /// # Errors
    ///
    /// [`LimiterError::InvalidConfig`] if `cfg` fails validation.
    pub fn from_config(cfg: &LimiterConfig) -> Result<Self, LimiterError> {
        cfg.validate().map_err(LimiterError::InvalidConfig)?;
        Ok(Self {
            name: cfg.name.clone(),
            capacity: cfg.capacity(),
            join_timeout: cfg.wait_timeout(),
        })
    }

    /// Cap concurrent admissions; zero or negative means unbounded.
    #[must_use]
    pub fn max_threads(mut self, max_threads: i64) -> Self {
        self.capacity = Capacity::from_max_threads(max_threads);
        self
    }

    /// One slot per logical CPU.
    #[must_use]
    pub fn per_cpu(mut self) -> Self {
        self.capacity = Capacity::per_cpu();
        self
    }

    /// Timeout used by `join`.
    #[must_use]
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = Some(timeout);
        self
    }

    /// Limiter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capacity the built limiter will enforce.
    #[must_use]
    pub const fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// Build a blocking limiter with no guarded state.
    #[must_use]
    pub fn build(self) -> ThreadControl {
        self.build_with_state(())
    }

    /// Build a blocking limiter whose guard protects `state`.
    #[must_use]
    pub fn build_with_state<S>(self, state: S) -> ThreadControl<S> {
        ThreadControl::from_parts(self.name, self.capacity, state)
            .with_join_timeout(self.join_timeout)
    }

    /// Build an async limiter with no guarded state.
    #[cfg(feature = "tokio-runtime")]
    #[must_use]
    pub fn build_async(self) -> AsyncThreadControl {
        AsyncThreadControl::from_parts(self.name, self.capacity, ())
            .with_join_timeout(self.join_timeout)
    }
}

/// Build one shared limiter per entry of a limiter set.
///
/// # Errors
///
/// [`LimiterError::InvalidConfig`] if the set fails validation.
pub fn build_limiters(
    cfg: &LimiterSetConfig,
) -> Result<HashMap<String, Arc<ThreadControl>>, LimiterError> {
    cfg.validate()
        .map_err(|e| LimiterError::InvalidConfig(format!("config invalid: {e}")))?;

    let mut limiters = HashMap::with_capacity(cfg.limiters.len());
    for (key, limiter_cfg) in &cfg.limiters {
        let control = LimiterBuilder::from_config(limiter_cfg)?.build();
        tracing::info!(
            key = %key,
            limiter = %control.name(),
            limit = ?control.capacity().limit(),
            "limiter built"
        );
        limiters.insert(key.clone(), Arc::new(control));
    }

    Ok(limiters)
}
