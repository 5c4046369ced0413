//! Async bounded-concurrency limiter for tokio tasks.
//!
//! [`AsyncThreadControl`] has the same contract as
//! [`ThreadControl`](super::ThreadControl) but suspends with `.await`
//! instead of parking the thread. Dropping a pending `begin` or `wait`
//! future cancels it without side effects.
//!
//! Wake-ups go through [`Notify`]. Each waiter registers interest before it
//! re-checks the ledger, so a release that lands between the check and the
//! `.await` is never lost.
//!
//! # Examples
//!
//! ```
//! use prometheus_thread_control::AsyncThreadControl;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "multi_thread", worker_threads = 2)]
//! # async fn main() {
//! let control = Arc::new(AsyncThreadControl::new(2));
//!
//! for n in 0..5u32 {
//!     control.spawn(async move { n + 1 }).await;
//! }
//!
//! control.wait().await;
//! assert_eq!(control.stats().completed_total, 5);
//! # }
//! ```

use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::LimiterError;
use super::ledger::{Capacity, Completion, Holder, Ledger};
use super::stats::LimiterStats;

const DEFAULT_NAME: &str = "async-thread-control";

/// Async limiter with join semantics.
pub struct AsyncThreadControl<S = ()> {
    id: Uuid,
    name: String,
    capacity: Capacity,
    ledger: Mutex<Ledger>,
    slot_freed: Notify,
    idle: Notify,
    join_timeout: Option<Duration>,
    shared: tokio::sync::Mutex<S>,
}

impl AsyncThreadControl<()> {
    /// Create a limiter admitting at most `max_threads` units at once.
    ///
    /// `max_threads <= 0` disables the admission gate.
    #[must_use]
    pub fn new(max_threads: i64) -> Self {
        Self::with_state(max_threads, ())
    }

    /// Create a limiter with a name that appears in its log lines.
    #[must_use]
    pub fn named(name: impl Into<String>, max_threads: i64) -> Self {
        Self::from_parts(name.into(), Capacity::from_max_threads(max_threads), ())
    }
}

impl<S> AsyncThreadControl<S> {
    /// Create a limiter whose guard protects `state`.
    #[must_use]
    pub fn with_state(max_threads: i64, state: S) -> Self {
        Self::from_parts(
            DEFAULT_NAME.to_owned(),
            Capacity::from_max_threads(max_threads),
            state,
        )
    }

    pub(crate) fn from_parts(name: String, capacity: Capacity, state: S) -> Self {
        let id = Uuid::new_v4();
        debug!(limiter = %name, %id, limit = ?capacity.limit(), "async limiter created");
        Self {
            id,
            name,
            capacity,
            ledger: Mutex::new(Ledger::new(capacity)),
            slot_freed: Notify::new(),
            idle: Notify::new(),
            join_timeout: None,
            shared: tokio::sync::Mutex::new(state),
        }
    }

    /// Set the timeout [`join`](Self::join) applies.
    #[must_use]
    pub fn with_join_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Acquire the caller guard. Dropping the returned guard releases it.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, S> {
        self.shared.lock().await
    }

    async fn acquire(&self, delta: usize, holder: Holder) -> Result<(), LimiterError> {
        if delta == 0 {
            return Ok(());
        }
        loop {
            let mut notified = pin!(self.slot_freed.notified());
            notified.as_mut().enable();

            let outcome = self.ledger.lock().try_admit(delta, holder);
            match outcome {
                Ok(true) => {
                    debug!(limiter = %self.name, delta, "work admitted");
                    return Ok(());
                }
                Ok(false) => notified.await,
                Err(e) => {
                    warn!(limiter = %self.name, delta, error = %e, "admission refused");
                    return Err(e);
                }
            }
        }
    }

    async fn acquire_one(&self, holder: Holder) {
        if let Err(e) = self.acquire(1, holder).await {
            panic!("limiter `{}` cannot admit another unit: {e}", self.name);
        }
    }

    /// Admit one unit, suspending until a slot is free.
    ///
    /// # Panics
    ///
    /// If `usize::MAX` units are already outstanding.
    pub async fn begin(&self) {
        self.acquire_one(Holder::Loose).await;
    }

    /// Admit `delta` units as one batch under a single slot.
    ///
    /// See [`ThreadControl::begin_n`](super::ThreadControl::begin_n) for the
    /// slot accounting.
    ///
    /// # Errors
    ///
    /// [`LimiterError::Overflow`] if `delta` more units cannot be counted.
    pub async fn begin_n(&self, delta: usize) -> Result<(), LimiterError> {
        self.acquire(delta, Holder::Loose).await
    }

    /// Admit one unit only if a slot is free right now.
    ///
    /// # Errors
    ///
    /// [`LimiterError::AtCapacity`] when every slot is held.
    pub fn try_begin(&self) -> Result<(), LimiterError> {
        self.try_begin_n(1)
    }

    /// Admit `delta` units only if a slot is free right now.
    ///
    /// # Errors
    ///
    /// [`LimiterError::AtCapacity`] when every slot is held,
    /// [`LimiterError::Overflow`] if the units cannot be counted.
    pub fn try_begin_n(&self, delta: usize) -> Result<(), LimiterError> {
        self.try_acquire(delta, Holder::Loose)
    }

    fn try_acquire(&self, delta: usize, holder: Holder) -> Result<(), LimiterError> {
        if self.ledger.lock().try_admit(delta, holder)? {
            debug!(limiter = %self.name, delta, "work admitted");
            Ok(())
        } else {
            Err(LimiterError::AtCapacity)
        }
    }

    /// Admit one unit, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`LimiterError::Timeout`] if no slot freed up in time.
    pub async fn begin_timeout(&self, timeout: Duration) -> Result<(), LimiterError> {
        self.begin_n_timeout(1, timeout).await
    }

    /// Admit `delta` units, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`LimiterError::Timeout`] if no slot freed up in time,
    /// [`LimiterError::Overflow`] if the units cannot be counted.
    pub async fn begin_n_timeout(&self, delta: usize, timeout: Duration) -> Result<(), LimiterError> {
        self.acquire_timeout(delta, Holder::Loose, timeout).await
    }

    async fn acquire_timeout(
        &self,
        delta: usize,
        holder: Holder,
        timeout: Duration,
    ) -> Result<(), LimiterError> {
        if let Ok(outcome) = tokio::time::timeout(timeout, self.acquire(delta, holder)).await {
            outcome
        } else {
            warn!(limiter = %self.name, delta, "admission timed out");
            Err(LimiterError::Timeout)
        }
    }

    /// Retire one unit admitted by `begin` or `begin_n`. Never suspends.
    ///
    /// Units held by permits are completed by the permit, never here.
    ///
    /// # Errors
    ///
    /// [`LimiterError::Unbalanced`] when no such unit is outstanding.
    pub fn done(&self) -> Result<(), LimiterError> {
        let outcome = self.ledger.lock().complete();
        match outcome {
            Ok(completion) => {
                self.wake(completion);
                Ok(())
            }
            Err(e) => {
                warn!(limiter = %self.name, "done called with nothing outstanding");
                Err(e)
            }
        }
    }

    fn release_owned(&self, units: usize, release_slot: bool) {
        let completion = self.ledger.lock().complete_owned(units, release_slot);
        self.wake(completion);
    }

    fn wake(&self, completion: Completion) {
        if completion.slot_released {
            self.slot_freed.notify_waiters();
        }
        if completion.idle {
            self.idle.notify_waiters();
        }
    }

    /// Suspend until every admitted unit has completed.
    pub async fn wait(&self) {
        loop {
            let mut notified = pin!(self.idle.notified());
            notified.as_mut().enable();

            let active = self.ledger.lock().active();
            if active == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Suspend until every admitted unit has completed or `timeout` passes.
    ///
    /// # Errors
    ///
    /// [`LimiterError::Timeout`] if units were still outstanding.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<(), LimiterError> {
        if tokio::time::timeout(timeout, self.wait()).await.is_ok() {
            Ok(())
        } else {
            warn!(limiter = %self.name, active = self.active(), "join timed out");
            Err(LimiterError::Timeout)
        }
    }

    /// Wait using the configured join timeout, or indefinitely when none is
    /// set.
    ///
    /// # Errors
    ///
    /// [`LimiterError::Timeout`] if the configured timeout elapsed first.
    pub async fn join(&self) -> Result<(), LimiterError> {
        match self.join_timeout {
            Some(timeout) => self.wait_timeout(timeout).await,
            None => {
                self.wait().await;
                Ok(())
            }
        }
    }

    /// Timeout applied by [`join`](Self::join).
    pub const fn join_timeout(&self) -> Option<Duration> {
        self.join_timeout
    }

    /// Unique identifier used in log lines.
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Limiter name used in log lines.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured capacity.
    pub const fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// Units currently between admission and completion.
    pub fn active(&self) -> usize {
        self.ledger.lock().active()
    }

    /// Free admission slots, `None` when unbounded.
    pub fn available_slots(&self) -> Option<usize> {
        self.ledger.lock().available_slots()
    }

    /// Snapshot of the limiter's counters.
    pub fn stats(&self) -> LimiterStats {
        self.ledger.lock().snapshot(&self.name, self.id)
    }
}

impl<S: Send + 'static> AsyncThreadControl<S> {
    /// Admit one unit and return a permit that completes it on drop.
    ///
    /// # Panics
    ///
    /// If `usize::MAX` units are already outstanding.
    pub async fn admit(self: &Arc<Self>) -> AsyncWorkPermit<S> {
        self.acquire_one(Holder::Owned).await;
        AsyncWorkPermit {
            control: Arc::clone(self),
            armed: true,
        }
    }

    /// Admit one unit, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`LimiterError::Timeout`] if no slot freed up in time.
    pub async fn admit_timeout(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<AsyncWorkPermit<S>, LimiterError> {
        self.acquire_timeout(1, Holder::Owned, timeout).await?;
        Ok(AsyncWorkPermit {
            control: Arc::clone(self),
            armed: true,
        })
    }

    /// Admit `delta` units under one slot. The permit hands the slot back on
    /// its last unit.
    ///
    /// # Errors
    ///
    /// [`LimiterError::Overflow`] if `delta` more units cannot be counted.
    pub async fn admit_n(self: &Arc<Self>, delta: usize) -> Result<AsyncBatchPermit<S>, LimiterError> {
        self.acquire(delta, Holder::Owned).await?;
        Ok(AsyncBatchPermit {
            control: Arc::clone(self),
            remaining: AtomicUsize::new(delta),
        })
    }

    /// Admit one unit, then run `fut` as a tokio task holding the admission.
    ///
    /// Admission happens before this returns; the unit completes when the
    /// task finishes, panics, or is aborted.
    ///
    /// # Panics
    ///
    /// If `usize::MAX` units are already outstanding.
    pub async fn spawn<F>(self: &Arc<Self>, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = self.admit().await;
        tokio::spawn(async move {
            let _permit = permit;
            fut.await
        })
    }
}

impl<S> std::fmt::Debug for AsyncThreadControl<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncThreadControl")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("active", &self.active())
            .finish_non_exhaustive()
    }
}

/// One admitted unit of an [`AsyncThreadControl`].
#[must_use = "dropping a permit completes its work unit immediately"]
pub struct AsyncWorkPermit<S = ()> {
    control: Arc<AsyncThreadControl<S>>,
    armed: bool,
}

impl<S> AsyncWorkPermit<S> {
    /// Complete the unit now instead of at drop.
    pub fn complete(mut self) {
        self.armed = false;
        self.control.release_owned(1, true);
    }
}

impl<S> Drop for AsyncWorkPermit<S> {
    fn drop(&mut self) {
        if self.armed {
            self.control.release_owned(1, true);
        }
    }
}

/// A batch of units of an [`AsyncThreadControl`] admitted under one slot.
#[must_use = "dropping a batch permit completes all of its units immediately"]
pub struct AsyncBatchPermit<S = ()> {
    control: Arc<AsyncThreadControl<S>>,
    remaining: AtomicUsize,
}

impl<S> AsyncBatchPermit<S> {
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

impl<S> Drop for AsyncBatchPermit<S> {
    fn drop(&mut self) {
        let left = *self.remaining.get_mut();
        if left > 0 {
            self.control.release_owned(left, true);
        }
    }
}
