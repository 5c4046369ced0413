//! RAII admission permits.
//!
//! A permit stands for one admission and completes it when dropped,
//! including during unwinding. [`WorkPermit`] borrows its limiter;
//! [`OwnedWorkPermit`] holds an `Arc` and can move to another thread.
//! [`BatchPermit`] covers the units of one `admit_n` call and hands the
//! batch's slot back when its last unit is done.
//!
//! Permits own their slot, so they never wait on anonymous `done` calls
//! made for other admissions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::error::LimiterError;
use super::thread_control::ThreadControl;

/// One admitted unit borrowed from a [`ThreadControl`].
#[must_use = "dropping a permit completes its work unit immediately"]
pub struct WorkPermit<'a, S = ()> {
    control: &'a ThreadControl<S>,
    armed: bool,
}

impl<'a, S> WorkPermit<'a, S> {
    pub(crate) const fn new(control: &'a ThreadControl<S>) -> Self {
        Self {
            control,
            armed: true,
        }
    }

    /// The limiter this permit was admitted by.
    pub const fn control(&self) -> &'a ThreadControl<S> {
        self.control
    }

    /// Complete the unit now instead of at drop.
    pub fn complete(mut self) {
        self.armed = false;
        self.control.release_owned(1, true);
    }
}

impl<S> Drop for WorkPermit<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            self.control.release_owned(1, true);
        }
    }
}

/// One admitted unit holding a shared handle to its [`ThreadControl`].
#[must_use = "dropping a permit completes its work unit immediately"]
pub struct OwnedWorkPermit<S = ()> {
    control: Arc<ThreadControl<S>>,
    armed: bool,
}

impl<S> OwnedWorkPermit<S> {
    pub(crate) fn new(control: Arc<ThreadControl<S>>) -> Self {
        Self {
            control,
            armed: true,
        }
    }

    /// The limiter this permit was admitted by.
    pub const fn control(&self) -> &Arc<ThreadControl<S>> {
        &self.control
    }

    /// Complete the unit now instead of at drop.
    pub fn complete(mut self) {
        self.armed = false;
        self.control.release_owned(1, true);
    }
}

impl<S> Drop for OwnedWorkPermit<S> {
    fn drop(&mut self) {
        if self.armed {
            self.control.release_owned(1, true);
        }
    }
}

/// A batch of units admitted together under one slot.
///
/// Share it between workers with an `Arc`; each worker calls
/// [`unit_done`](Self::unit_done) once. Dropping the permit completes
/// whatever units are still open.
#[must_use = "dropping a batch permit completes all of its units immediately"]
pub struct BatchPermit<S = ()> {
    control: Arc<ThreadControl<S>>,
    remaining: AtomicUsize,
}

impl<S> BatchPermit<S> {
    pub(crate) fn new(control: Arc<ThreadControl<S>>, units: usize) -> Self {
        Self {
            control,
            remaining: AtomicUsize::new(units),
        }
    }

    /// The limiter this batch was admitted by.
    pub const fn control(&self) -> &Arc<ThreadControl<S>> {
        &self.control
    }

    /// Units of the batch not yet completed.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Complete one unit of the batch. The last one hands the slot back.
    ///
    /// # Errors
    ///
    /// [`LimiterError::Unbalanced`] once every unit is already done.
    pub fn unit_done(&self) -> Result<(), LimiterError> {
        let before = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map_err(|_| LimiterError::Unbalanced)?;
        self.control.release_owned(1, before == 1);
        Ok(())
    }
}

impl<S> Drop for BatchPermit<S> {
    fn drop(&mut self) {
        let left = *self.remaining.get_mut();
        if left > 0 {
            self.control.release_owned(left, true);
        }
    }
}
