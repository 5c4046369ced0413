//! Point-in-time statistics for a limiter.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Statistics about limiter utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterStats {
    /// Limiter name used in logs.
    pub name: String,

    /// Unique limiter identifier.
    pub id: Uuid,

    /// Slot limit, `None` when unbounded.
    pub capacity: Option<usize>,

    /// Work units between admission and completion.
    pub active: usize,

    /// Admission slots currently consumed.
    pub held_slots: usize,

    /// Highest `active` value observed.
    pub peak_active: usize,

    /// Total work units admitted.
    pub admitted_total: u64,

    /// Total work units completed.
    pub completed_total: u64,
}

impl LimiterStats {
    /// Fraction of slots in use, `None` when unbounded.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization(&self) -> Option<f64> {
        self.capacity
            .map(|limit| self.held_slots as f64 / limit as f64)
    }

    /// Work units admitted but not yet completed, derived from the totals.
    #[must_use]
    pub const fn outstanding(&self) -> u64 {
        self.admitted_total.saturating_sub(self.completed_total)
    }
}
