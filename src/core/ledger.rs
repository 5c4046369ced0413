//! Admission bookkeeping shared by the blocking and async limiters.
//!
//! The ledger owns every counter a limiter keeps. Front-ends hold it behind a
//! lock and only go through its admit and complete methods, so `active` can
//! never be read-modify-written from outside.
//!
//! # Slot accounting
//!
//! An admission reserves a single gate slot no matter how many work units it
//! registers: `begin_n(5)` takes one slot and expects five completions.
//!
//! Permits know which admission they belong to, so a permit hands its slot
//! back as soon as its own units are done.
//!
//! Anonymous completions (`done`) cannot tell a batch unit from a single
//! unit. For those the ledger keeps a separate pool and hands a slot back on
//! the completion that leaves fewer anonymous units than anonymous slots.
//! Balanced callers get one release per `begin` and one release on the last
//! of the `delta` completions of a `begin_n(delta)`. Mixing the two is
//! conservative: while an anonymous batch is outstanding, the slot of a
//! finished plain `begin` stays held until the batch has drained down to the
//! units still running. Use `admit_n` for batches that run beside single
//! admissions.
//!
//! Held slots never exceed active units, and a unit count that would overflow
//! `usize` is refused before any counter moves.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use super::error::LimiterError;
use super::stats::LimiterStats;

/// Maximum number of admissions a limiter lets run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capacity {
    /// No admission gate; `begin` never waits for a slot.
    #[default]
    Unbounded,
    /// At most this many admissions hold a slot concurrently.
    Bounded(NonZeroUsize),
}

impl Capacity {
    /// Map a signed thread count onto a capacity. Zero and negative values
    /// mean unbounded.
    #[must_use]
    pub fn from_max_threads(max_threads: i64) -> Self {
        usize::try_from(max_threads)
            .ok()
            .and_then(NonZeroUsize::new)
            .map_or(Self::Unbounded, Self::Bounded)
    }

    /// One slot per logical CPU.
    #[must_use]
    pub fn per_cpu() -> Self {
        NonZeroUsize::new(num_cpus::get()).map_or(Self::Unbounded, Self::Bounded)
    }

    /// The slot limit, or `None` when unbounded.
    #[must_use]
    pub const fn limit(self) -> Option<usize> {
        match self {
            Self::Unbounded => None,
            Self::Bounded(n) => Some(n.get()),
        }
    }

    /// Whether an admission gate is enforced.
    #[must_use]
    pub const fn is_bounded(self) -> bool {
        matches!(self, Self::Bounded(_))
    }
}

impl From<i64> for Capacity {
    fn from(max_threads: i64) -> Self {
        Self::from_max_threads(max_threads)
    }
}

/// Outcome of a successful completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Completion {
    /// A gate slot went back to the pool; wake one admission waiter.
    pub slot_released: bool,
    /// Nothing is outstanding any more; wake every joiner.
    pub idle: bool,
}

/// Who answers for an admission's completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Holder {
    /// Completed through anonymous `done` calls.
    Loose,
    /// Completed by a permit that owns the slot.
    Owned,
}

/// Counter state for one limiter.
#[derive(Debug, Clone)]
pub(crate) struct Ledger {
    capacity: Capacity,
    held_slots: usize,
    active: usize,
    loose_slots: usize,
    loose_active: usize,
    peak_active: usize,
    admitted_total: u64,
    completed_total: u64,
}

impl Ledger {
    pub(crate) const fn new(capacity: Capacity) -> Self {
        Self {
            capacity,
            held_slots: 0,
            active: 0,
            loose_slots: 0,
            loose_active: 0,
            peak_active: 0,
            admitted_total: 0,
            completed_total: 0,
        }
    }

    pub(crate) const fn active(&self) -> usize {
        self.active
    }

    pub(crate) const fn held_slots(&self) -> usize {
        self.held_slots
    }

    pub(crate) fn has_free_slot(&self) -> bool {
        self.capacity
            .limit()
            .is_none_or(|limit| self.held_slots < limit)
    }

    pub(crate) fn available_slots(&self) -> Option<usize> {
        self.capacity
            .limit()
            .map(|limit| limit.saturating_sub(self.held_slots))
    }

    /// Admit `delta` units under one slot if a slot is free.
    ///
    /// Returns `Ok(false)` when every slot is held. A zero `delta` admits
    /// nothing and reports success.
    ///
    /// # Errors
    ///
    /// [`LimiterError::Overflow`] when `delta` more units cannot be counted.
    /// No counter is touched in that case.
    pub(crate) fn try_admit(
        &mut self,
        delta: usize,
        holder: Holder,
    ) -> Result<bool, LimiterError> {
        if delta == 0 {
            return Ok(true);
        }
        let active = self
            .active
            .checked_add(delta)
            .ok_or(LimiterError::Overflow)?;
        if !self.has_free_slot() {
            return Ok(false);
        }

        let bounded = self.capacity.is_bounded();
        if bounded {
            self.held_slots += 1;
        }
        if holder == Holder::Loose {
            // loose_active <= active, so this cannot overflow either.
            self.loose_active += delta;
            if bounded {
                self.loose_slots += 1;
            }
        }
        self.active = active;
        self.peak_active = self.peak_active.max(active);
        self.admitted_total = self.admitted_total.saturating_add(delta as u64);
        Ok(true)
    }

    /// Retire one anonymous unit.
    ///
    /// With no anonymous unit outstanding the ledger is left untouched and
    /// [`LimiterError::Unbalanced`] is returned.
    pub(crate) fn complete(&mut self) -> Result<Completion, LimiterError> {
        if self.loose_active == 0 {
            return Err(LimiterError::Unbalanced);
        }
        self.loose_active -= 1;
        self.active -= 1;
        self.completed_total += 1;

        let slot_released = self.loose_slots > self.loose_active;
        if slot_released {
            self.loose_slots -= 1;
            self.held_slots -= 1;
        }
        Ok(self.completion(slot_released))
    }

    /// Retire `units` units of a permit-owned admission, handing its slot
    /// back when `release_slot` is set.
    pub(crate) fn complete_owned(&mut self, units: usize, release_slot: bool) -> Completion {
        let units = units.min(self.active - self.loose_active);
        self.active -= units;
        self.completed_total = self.completed_total.saturating_add(units as u64);

        let slot_released =
            release_slot && self.capacity.is_bounded() && self.held_slots > self.loose_slots;
        if slot_released {
            self.held_slots -= 1;
        }
        self.completion(slot_released)
    }

    const fn completion(&self, slot_released: bool) -> Completion {
        Completion {
            slot_released,
            idle: self.active == 0,
        }
    }

    pub(crate) fn snapshot(&self, name: &str, id: uuid::Uuid) -> LimiterStats {
        LimiterStats {
            name: name.to_owned(),
            id,
            capacity: self.capacity.limit(),
            active: self.active,
            held_slots: self.held_slots,
            peak_active: self.peak_active,
            admitted_total: self.admitted_total,
            completed_total: self.completed_total,
        }
    }
}
