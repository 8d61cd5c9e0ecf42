//! Clock and deferred-dispatch capabilities.
//!
//! The engine never reads ambient time sources or global timer queues. Both
//! concerns sit behind the [`Scheduler`] trait and are injected at
//! [`Context`](crate::context::Context) construction: `now()` supplies a
//! monotonic millisecond clock, and `defer()` queues a callback to run after
//! the current synchronous execution completes. Entities use `defer` to
//! coalesce change notifications; the [`World`](crate::world::World) uses
//! `now` for frequency gating.
//!
//! Hosts hand the engine whatever primitive they drive frames with
//! ([`FrameScheduler`] covers the common case); tests use
//! [`ManualScheduler`] to advance time and flush callbacks by hand.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::Instant;

/// A callback queued via [`Scheduler::defer`].
pub type Deferred = Box<dyn FnOnce()>;

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// The injected clock + deferred-execution capability.
pub trait Scheduler {
    /// Current time in milliseconds. Must be monotonically non-decreasing
    /// for the lifetime of the scheduler.
    fn now(&self) -> f64;

    /// Queue `callback` to run exactly once, after the current synchronous
    /// execution completes. Implementations must not invoke the callback
    /// from inside `defer` itself; a whole synchronous chain of mutations
    /// has to finish before any queued callback observes it.
    fn defer(&self, callback: Deferred);
}

// ---------------------------------------------------------------------------
// FrameScheduler
// ---------------------------------------------------------------------------

/// Production scheduler backed by [`Instant`].
///
/// Deferred callbacks accumulate until the host drains them with
/// [`run_deferred`](FrameScheduler::run_deferred), typically once per frame
/// right before calling [`World::tick`](crate::world::World::tick).
pub struct FrameScheduler {
    start: Instant,
    queue: RefCell<VecDeque<Deferred>>,
}

impl FrameScheduler {
    /// Create a scheduler whose clock starts at 0 ms.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            queue: RefCell::new(VecDeque::new()),
        }
    }

    /// Drain and run every callback queued so far.
    ///
    /// Callbacks queued while draining are held for the next call. Draining
    /// an empty queue is a no-op.
    pub fn run_deferred(&self) {
        let drained: Vec<Deferred> = self.queue.borrow_mut().drain(..).collect();
        for callback in drained {
            callback();
        }
    }

    /// Number of callbacks currently queued.
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }
}

impl Scheduler for FrameScheduler {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    fn defer(&self, callback: Deferred) {
        self.queue.borrow_mut().push_back(callback);
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ManualScheduler
// ---------------------------------------------------------------------------

/// Manually driven scheduler for tests and lockstep hosts.
///
/// The clock only moves when told to via [`advance`](ManualScheduler::advance)
/// or [`set_now`](ManualScheduler::set_now), and deferred callbacks only run
/// when [`flush`](ManualScheduler::flush) is called. This makes every timing
/// and coalescing behavior of the engine deterministic under test.
pub struct ManualScheduler {
    now: Cell<f64>,
    queue: RefCell<VecDeque<Deferred>>,
}

impl ManualScheduler {
    /// Create a scheduler with the clock at 0 ms and an empty queue.
    pub fn new() -> Self {
        Self {
            now: Cell::new(0.0),
            queue: RefCell::new(VecDeque::new()),
        }
    }

    /// Move the clock forward by `ms` milliseconds.
    pub fn advance(&self, ms: f64) {
        assert!(ms >= 0.0, "clock must not move backwards");
        self.now.set(self.now.get() + ms);
    }

    /// Set the clock to an absolute timestamp.
    ///
    /// # Panics
    ///
    /// Panics if `ms` is earlier than the current time; the clock contract
    /// is monotonic.
    pub fn set_now(&self, ms: f64) {
        assert!(ms >= self.now.get(), "clock must not move backwards");
        self.now.set(ms);
    }

    /// Run every callback queued so far, in FIFO order.
    ///
    /// Callbacks queued during the flush (for example a component mutation
    /// made inside a change handler) are held for the *next* flush. Flushing
    /// with nothing pending is a no-op.
    pub fn flush(&self) {
        let drained: Vec<Deferred> = self.queue.borrow_mut().drain(..).collect();
        for callback in drained {
            callback();
        }
    }

    /// Number of callbacks currently queued.
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> f64 {
        self.now.get()
    }

    fn defer(&self, callback: Deferred) {
        self.queue.borrow_mut().push_back(callback);
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn manual_clock_starts_at_zero_and_advances() {
        let scheduler = ManualScheduler::new();
        assert_eq!(scheduler.now(), 0.0);
        scheduler.advance(16.0);
        assert_eq!(scheduler.now(), 16.0);
        scheduler.set_now(100.0);
        assert_eq!(scheduler.now(), 100.0);
    }

    #[test]
    #[should_panic(expected = "clock must not move backwards")]
    fn manual_clock_rejects_regression() {
        let scheduler = ManualScheduler::new();
        scheduler.set_now(50.0);
        scheduler.set_now(10.0);
    }

    #[test]
    fn flush_runs_callbacks_in_fifo_order() {
        let scheduler = ManualScheduler::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            scheduler.defer(Box::new(move || order.borrow_mut().push(i)));
        }
        assert_eq!(scheduler.pending(), 3);

        scheduler.flush();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn flush_with_nothing_pending_is_a_noop() {
        let scheduler = ManualScheduler::new();
        scheduler.flush();
        scheduler.flush();
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn callbacks_queued_mid_flush_wait_for_the_next_flush() {
        let scheduler = Rc::new(ManualScheduler::new());
        let ran = Rc::new(Cell::new(0u32));

        let inner_ran = ran.clone();
        let inner_scheduler = scheduler.clone();
        scheduler.defer(Box::new(move || {
            let ran = inner_ran.clone();
            inner_scheduler.defer(Box::new(move || ran.set(ran.get() + 10)));
            inner_ran.set(inner_ran.get() + 1);
        }));

        scheduler.flush();
        assert_eq!(ran.get(), 1, "nested callback must not run in same flush");
        assert_eq!(scheduler.pending(), 1);

        scheduler.flush();
        assert_eq!(ran.get(), 11);
    }

    #[test]
    fn frame_scheduler_queues_until_drained() {
        let scheduler = FrameScheduler::new();
        let ran = Rc::new(Cell::new(false));

        let flag = ran.clone();
        scheduler.defer(Box::new(move || flag.set(true)));
        assert!(!ran.get());
        assert_eq!(scheduler.pending(), 1);

        scheduler.run_deferred();
        assert!(ran.get());
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn frame_scheduler_clock_is_monotonic() {
        let scheduler = FrameScheduler::new();
        let a = scheduler.now();
        let b = scheduler.now();
        assert!(b >= a);
    }
}
