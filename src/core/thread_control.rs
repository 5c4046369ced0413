//! Blocking bounded-concurrency limiter.
//!
//! [`ThreadControl`] caps how many units of work run at once, counts the
//! units in flight, and lets a caller join on all of them. It also carries a
//! general-purpose lock over caller-owned state, so a batch of workers can
//! collect results without a second mutex.
//!
//! # Examples
//!
//! ```
//! use prometheus_thread_control::ThreadControl;
//! use std::sync::Arc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::LimiterError;
use super::ledger::{Capacity, Completion, Holder, Ledger};
use super::permit::{BatchPermit, OwnedWorkPermit, WorkPermit};
use super::stats::LimiterStats;

const DEFAULT_NAME: &str = "thread-control";

/// Bounded-concurrency limiter with join semantics.
///
/// Every successful admission (`begin`, `begin_n`, a permit) must be matched
/// by completions (`done` or dropping the permit). Missing completions hold
/// a slot forever and keep [`wait`](Self::wait) blocked; prefer
/// [`admit`](Self::admit), [`admit_n`](Self::admit_n) or
/// [`spawn`](Self::spawn) when the unit's lifetime is lexical.
///
/// The caller guard ([`lock`](Self::lock)) is never taken internally. Holding
/// it while blocked in `begin` stalls any other worker that needs it.
pub struct ThreadControl<S = ()> {
    id: Uuid,
    name: String,
    capacity: Capacity,
    ledger: Mutex<Ledger>,
    slot_freed: Condvar,
    idle: Condvar,
    join_timeout: Option<Duration>,
    shared: Mutex<S>,
}

impl ThreadControl<()> {
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

    /// Create a limiter with one slot per logical CPU.
    #[must_use]
    pub fn per_cpu() -> Self {
        Self::from_parts(DEFAULT_NAME.to_owned(), Capacity::per_cpu(), ())
    }
}

impl<S> ThreadControl<S> {
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
        debug!(limiter = %name, %id, limit = ?capacity.limit(), "limiter created");
        Self {
            id,
            name,
            capacity,
            ledger: Mutex::new(Ledger::new(capacity)),
            slot_freed: Condvar::new(),
            idle: Condvar::new(),
            join_timeout: None,
            shared: Mutex::new(state),
        }
    }

    /// Set the timeout [`join`](Self::join) applies.
    #[must_use]
    pub fn with_join_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.join_timeout = timeout;
        self
    }

    // ----- caller guard -----

    /// Acquire the caller guard. Dropping the returned guard releases it.
    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.shared.lock()
    }

    /// Acquire the caller guard if nobody else holds it.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, S>> {
        self.shared.try_lock()
    }

    /// Release a guard obtained from [`lock`](Self::lock).
    pub fn unlock(&self, guard: MutexGuard<'_, S>) {
        drop(guard);
    }

    /// Consume the limiter and return the guarded state.
    pub fn into_state(self) -> S {
        self.shared.into_inner()
    }

    // ----- admission -----

    fn acquire(
        &self,
        delta: usize,
        holder: Holder,
        deadline: Option<Instant>,
    ) -> Result<(), LimiterError> {
        if delta == 0 {
            return Ok(());
        }
        let mut ledger = self.ledger.lock();
        let mut expired = false;
        loop {
            match ledger.try_admit(delta, holder) {
                Ok(true) => break,
                Ok(false) if expired => {
                    drop(ledger);
                    warn!(limiter = %self.name, delta, "admission timed out");
                    return Err(LimiterError::Timeout);
                }
                Ok(false) => {}
                Err(e) => {
                    drop(ledger);
                    warn!(limiter = %self.name, delta, error = %e, "admission refused");
                    return Err(e);
                }
            }
            match deadline {
                Some(deadline) => {
                    expired = self.slot_freed.wait_until(&mut ledger, deadline).timed_out();
                }
                None => self.slot_freed.wait(&mut ledger),
            }
        }
        let active = ledger.active();
        drop(ledger);
        debug!(limiter = %self.name, delta, active, "work admitted");
        Ok(())
    }

    fn try_acquire(&self, delta: usize, holder: Holder) -> Result<(), LimiterError> {
        let admitted = self.ledger.lock().try_admit(delta, holder)?;
        if admitted {
            debug!(limiter = %self.name, delta, "work admitted");
            Ok(())
        } else {
            Err(LimiterError::AtCapacity)
        }
    }

    fn acquire_one(&self, holder: Holder) {
        if let Err(e) = self.acquire(1, holder, None) {
            panic!("limiter `{}` cannot admit another unit: {e}", self.name);
        }
    }

    /// Admit one unit, blocking until a slot is free.
    ///
    /// # Panics
    ///
    /// If `usize::MAX` units are already outstanding.
    pub fn begin(&self) {
        self.acquire_one(Holder::Loose);
    }

    /// Admit `delta` units as one batch, blocking until a slot is free.
    ///
    /// The batch consumes a single admission slot regardless of `delta`, so
    /// capacity throttles concurrent admissions rather than raw unit count.
    /// `delta` completions are expected; the slot returns on the last one.
    /// `begin_n(0)` admits nothing.
    ///
    /// [`done`](Self::done) cannot tell which admission a unit came from.
    /// While an anonymous batch is outstanding, the slot of a finished plain
    /// [`begin`](Self::begin) stays held until the batch drains. Use
    /// [`admit_n`](Self::admit_n) for batches that run beside single units.
    ///
    /// # Errors
    ///
    /// [`LimiterError::Overflow`] if `delta` more units cannot be counted.
    /// Nothing is admitted in that case.
    pub fn begin_n(&self, delta: usize) -> Result<(), LimiterError> {
        self.acquire(delta, Holder::Loose, None)
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

    /// Admit one unit, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`LimiterError::Timeout`] if no slot freed up in time. Nothing is
    /// admitted in that case.
    pub fn begin_timeout(&self, timeout: Duration) -> Result<(), LimiterError> {
        self.begin_n_timeout(1, timeout)
    }

    /// Admit `delta` units, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`LimiterError::Timeout`] if no slot freed up in time,
    /// [`LimiterError::Overflow`] if the units cannot be counted.
    pub fn begin_n_timeout(&self, delta: usize, timeout: Duration) -> Result<(), LimiterError> {
        self.acquire(delta, Holder::Loose, Instant::now().checked_add(timeout))
    }

    /// Admit `delta` units, giving up at `deadline`.
    ///
    /// # Errors
    ///
    /// [`LimiterError::Timeout`] if no slot freed up before the deadline,
    /// [`LimiterError::Overflow`] if the units cannot be counted.
    pub fn begin_n_deadline(&self, delta: usize, deadline: Instant) -> Result<(), LimiterError> {
        self.acquire(delta, Holder::Loose, Some(deadline))
    }

    // ----- completion -----

    /// Retire one unit admitted by `begin` or `begin_n` and hand its slot
    /// back when due.
    ///
    /// Units held by permits are completed by the permit, never here. The
    /// slot accounting for mixed `begin`/`begin_n` use is described on
    /// [`begin_n`](Self::begin_n).
    ///
    /// # Errors
    ///
    /// [`LimiterError::Unbalanced`] when no such unit is outstanding.
    /// Counters are left untouched, so the caller's bug does not widen the
    /// gate.
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

    pub(crate) fn release_owned(&self, units: usize, release_slot: bool) {
        let completion = self.ledger.lock().complete_owned(units, release_slot);
        self.wake(completion);
    }

    fn wake(&self, completion: Completion) {
        if completion.slot_released {
            self.slot_freed.notify_one();
        }
        if completion.idle {
            self.idle.notify_all();
        }
    }

    // ----- join -----

    /// Block until every admitted unit has completed.
    ///
    /// Returns immediately when nothing is outstanding. Reusable across
    /// batches.
    pub fn wait(&self) {
        let mut ledger = self.ledger.lock();
        while ledger.active() > 0 {
            self.idle.wait(&mut ledger);
        }
    }

    /// Block until every admitted unit has completed or `timeout` passes.
    ///
    /// # Errors
    ///
    /// [`LimiterError::Timeout`] if units were still outstanding.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), LimiterError> {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_deadline(deadline),
            None => {
                self.wait();
                Ok(())
            }
        }
    }

    /// Block until every admitted unit has completed or `deadline` passes.
    ///
    /// # Errors
    ///
    /// [`LimiterError::Timeout`] if units were still outstanding.
    pub fn wait_deadline(&self, deadline: Instant) -> Result<(), LimiterError> {
        let mut ledger = self.ledger.lock();
        while ledger.active() > 0 {
            if self.idle.wait_until(&mut ledger, deadline).timed_out() && ledger.active() > 0 {
                let active = ledger.active();
                drop(ledger);
                warn!(limiter = %self.name, active, "join timed out");
                return Err(LimiterError::Timeout);
            }
        }
        Ok(())
    }

    /// Wait using the configured join timeout, or indefinitely when none is
    /// set.
    ///
    /// # Errors
    ///
    /// [`LimiterError::Timeout`] if the configured timeout elapsed first.
    pub fn join(&self) -> Result<(), LimiterError> {
        match self.join_timeout {
            Some(timeout) => self.wait_timeout(timeout),
            None => {
                self.wait();
                Ok(())
            }
        }
    }

    // ----- permits -----

    /// Admit one unit and return a permit that completes it on drop.
    ///
    /// # Panics
    ///
    /// If `usize::MAX` units are already outstanding.
    pub fn admit(&self) -> WorkPermit<'_, S> {
        self.acquire_one(Holder::Owned);
        WorkPermit::new(self)
    }

    /// Admit one unit if a slot is free right now.
    ///
    /// # Errors
    ///
    /// [`LimiterError::AtCapacity`] when every slot is held.
    pub fn try_admit(&self) -> Result<WorkPermit<'_, S>, LimiterError> {
        self.try_acquire(1, Holder::Owned)?;
        Ok(WorkPermit::new(self))
    }

    /// Admit one unit, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`LimiterError::Timeout`] if no slot freed up in time.
    pub fn admit_timeout(&self, timeout: Duration) -> Result<WorkPermit<'_, S>, LimiterError> {
        self.acquire(1, Holder::Owned, Instant::now().checked_add(timeout))?;
        Ok(WorkPermit::new(self))
    }

    /// Admit one unit and return a permit that owns a handle to the limiter.
    ///
    /// # Panics
    ///
    /// If `usize::MAX` units are already outstanding.
    pub fn admit_owned(self: &Arc<Self>) -> OwnedWorkPermit<S> {
        self.acquire_one(Holder::Owned);
        OwnedWorkPermit::new(Arc::clone(self))
    }

    /// Admit `delta` units under one slot, blocking until a slot is free.
    ///
    /// The returned permit hands the slot back on its last unit, whatever
    /// other admissions are outstanding.
    ///
    /// # Errors
    ///
    /// [`LimiterError::Overflow`] if `delta` more units cannot be counted.
    pub fn admit_n(self: &Arc<Self>, delta: usize) -> Result<BatchPermit<S>, LimiterError> {
        self.acquire(delta, Holder::Owned, None)?;
        Ok(BatchPermit::new(Arc::clone(self), delta))
    }

    // ----- observers -----

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

    /// Admission slots currently consumed.
    pub fn held_slots(&self) -> usize {
        self.ledger.lock().held_slots()
    }

    /// Free admission slots, `None` when unbounded.
    pub fn available_slots(&self) -> Option<usize> {
        self.ledger.lock().available_slots()
    }

    /// Whether nothing is outstanding.
    pub fn is_idle(&self) -> bool {
        self.active() == 0
    }

    /// Timeout applied by [`join`](Self::join).
    pub const fn join_timeout(&self) -> Option<Duration> {
        self.join_timeout
    }

    /// Snapshot of the limiter's counters.
    pub fn stats(&self) -> LimiterStats {
        self.ledger.lock().snapshot(&self.name, self.id)
    }
}

impl<S: Send + 'static> ThreadControl<S> {
    /// Admit one unit (blocking) and run `f` on a new OS thread.
    ///
    /// The thread holds the admission until `f` returns or panics.
    ///
    /// # Errors
    ///
    /// [`LimiterError::Spawn`] if the thread could not be created; the
    /// admission is released before returning.
    ///
    /// # Panics
    ///
    /// If `usize::MAX` units are already outstanding.
    pub fn spawn<F, R>(self: &Arc<Self>, f: F) -> Result<JoinHandle<R>, LimiterError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let permit = self.admit_owned();
        let handle = thread::Builder::new()
            .name(format!("{}-worker", self.name))
            .spawn(move || {
                let _permit = permit;
                f()
            })?;
        Ok(handle)
    }
}

impl Default for ThreadControl<()> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<S> std::fmt::Debug for ThreadControl<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ledger = self.ledger.lock();
        f.debug_struct("ThreadControl")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("active", &ledger.active())
            .field("held_slots", &ledger.held_slots())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_new_bounded_and_unbounded() {
        assert_eq!(ThreadControl::new(3).capacity().limit(), Some(3));
        assert_eq!(ThreadControl::new(0).capacity(), Capacity::Unbounded);
        assert_eq!(ThreadControl::new(-1).capacity(), Capacity::Unbounded);
        assert!(ThreadControl::default().is_idle());
    }

    #[test]
    fn test_begin_done_counts() {
        let control = ThreadControl::new(2);
        control.begin();
        control.begin();
        assert_eq!(control.active(), 2);
        assert_eq!(control.available_slots(), Some(0));
        control.done().unwrap();
        assert_eq!(control.active(), 1);
        assert_eq!(control.available_slots(), Some(1));
        control.done().unwrap();
        assert!(control.is_idle());
    }

    #[test]
    fn test_try_begin_at_capacity() {
        let control = ThreadControl::new(1);
        control.try_begin().unwrap();
        assert!(matches!(control.try_begin(), Err(LimiterError::AtCapacity)));
        control.done().unwrap();
        assert!(control.try_begin().is_ok());
        control.done().unwrap();
    }

    #[test]
    fn test_begin_timeout_admits_nothing() {
        let control = ThreadControl::new(1);
        control.begin();
        let result = control.begin_timeout(Duration::from_millis(20));
        assert!(matches!(result, Err(LimiterError::Timeout)));
        assert_eq!(control.active(), 1);
        assert_eq!(control.held_slots(), 1);
        control.done().unwrap();
    }

    #[test]
    fn test_wait_timeout_with_outstanding_work() {
        let control = ThreadControl::new(1);
        control.begin();
        assert!(matches!(
            control.wait_timeout(Duration::from_millis(20)),
            Err(LimiterError::Timeout)
        ));
        control.done().unwrap();
        assert!(control.wait_timeout(Duration::from_millis(20)).is_ok());
    }

    #[test]
    fn test_join_uses_configured_timeout() {
        let control = ThreadControl::new(1).with_join_timeout(Some(Duration::from_millis(20)));
        control.begin();
        assert!(matches!(control.join(), Err(LimiterError::Timeout)));
        control.done().unwrap();
        assert!(control.join().is_ok());
    }

    #[test]
    fn test_done_without_begin() {
        let control = ThreadControl::new(2);
        assert!(matches!(control.done(), Err(LimiterError::Unbalanced)));
        assert_eq!(control.active(), 0);
        assert_eq!(control.available_slots(), Some(2));
    }

    #[test]
    fn test_begin_n_zero_is_noop() {
        let control = ThreadControl::new(1);
        control.begin_n(0).unwrap();
        assert!(control.is_idle());
        assert_eq!(control.held_slots(), 0);
    }

    #[test]
    fn test_anonymous_batch_holds_plain_slot_until_drained() {
        let control = ThreadControl::new(2);
        control.begin_n(100).unwrap();
        control.begin();
        control.done().unwrap();

        // done cannot tell the plain unit from a batch unit.
        assert_eq!(control.available_slots(), Some(0));
        assert!(matches!(control.try_begin(), Err(LimiterError::AtCapacity)));

        for _ in 0..99 {
            control.done().unwrap();
        }
        assert_eq!(control.active(), 1);
        assert_eq!(control.available_slots(), Some(1));

        control.done().unwrap();
        assert!(control.is_idle());
        assert_eq!(control.available_slots(), Some(2));
    }

    #[test]
    fn test_batch_permit_leaves_plain_slots_free() {
        let control = Arc::new(ThreadControl::new(2));
        let batch = control.admit_n(100).unwrap();
        control.begin();
        control.done().unwrap();

        assert_eq!(control.available_slots(), Some(1));
        control.try_begin().unwrap();
        control.done().unwrap();

        for _ in 0..100 {
            batch.unit_done().unwrap();
        }
        assert!(control.is_idle());
        assert_eq!(control.available_slots(), Some(2));
    }

    #[test]
    fn test_overflowing_batch_is_refused_cleanly() {
        let control = ThreadControl::new(2);
        control.begin();

        assert!(matches!(
            control.begin_n(usize::MAX),
            Err(LimiterError::Overflow)
        ));
        assert!(matches!(
            control.try_begin_n(usize::MAX),
            Err(LimiterError::Overflow)
        ));
        assert_eq!(control.held_slots(), 1);
        assert_eq!(control.active(), 1);

        control.done().unwrap();
        assert!(control.is_idle());
        assert_eq!(control.held_slots(), 0);
        assert_eq!(control.available_slots(), Some(2));
    }

    #[test]
    fn test_begin_n_deadline_admits_when_free() {
        let control = ThreadControl::new(1);
        let deadline = Instant::now() + Duration::from_millis(50);
        control.begin_n_deadline(2, deadline).unwrap();
        assert_eq!(control.active(), 2);
        assert!(matches!(
            control.begin_n_deadline(1, Instant::now()),
            Err(LimiterError::Timeout)
        ));
        control.done().unwrap();
        control.done().unwrap();
        assert!(control.is_idle());
    }

    #[test]
    fn test_lock_protects_state() {
        let control = Arc::new(ThreadControl::with_state(0, 0_u64));
        let mut handles = vec![];

        for _ in 0..8 {
            let control = Arc::clone(&control);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    let mut guard = control.lock();
                    *guard += 1;
                    control.unlock(guard);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*control.lock(), 8000);
    }

    #[test]
    fn test_try_lock_while_held() {
        let control = ThreadControl::with_state(1, String::new());
        let guard = control.lock();
        assert!(control.try_lock().is_none());
        drop(guard);
        assert!(control.try_lock().is_some());
    }

    #[test]
    fn test_permit_released_on_panic() {
        let control = Arc::new(ThreadControl::new(1));
        let worker = Arc::clone(&control);
        let result = thread::spawn(move || {
            let _permit = worker.admit();
            panic!("worker failed");
        })
        .join();

        assert!(result.is_err());
        assert!(control.is_idle());
        assert!(control.try_begin().is_ok());
        control.done().unwrap();
    }

    #[test]
    fn test_spawn_respects_capacity() {
        let control = Arc::new(ThreadControl::new(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                control
                    .spawn(move || {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .unwrap()
            })
            .collect();

        control.wait();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(control.stats().completed_total, 6);
    }

    #[test]
    fn test_debug_output() {
        let control = ThreadControl::named("fetch", 3);
        let text = format!("{control:?}");
        assert!(text.contains("fetch"));
        assert!(text.contains("held_slots"));
    }
}
