//! Deterministic virtual-time scheduler driver for tests.
//!
//! `LabScheduler` owns a FIFO ready queue and a deadline heap keyed by
//! virtual [`Time`]. Nothing runs until the test drives it with
//! [`step`](LabScheduler::step), [`run_until_idle`](LabScheduler::run_until_idle)
//! or [`advance`](LabScheduler::advance), which makes interleavings
//! reproducible down to the queue order.
//!
//! Failures reported by the runtime are collected for inspection instead of
//! being printed.

use super::timer::TimerQueue;
use super::{Scheduler, Thunk};
use crate::error::RuntimeFailure;
use crate::time::{TimeSource, VirtualClock};
use crate::types::Time;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

/// Deterministic scheduler driven by virtual time.
///
/// Cheap to clone; clones share the same queues and clock.
#[derive(Clone)]
pub struct LabScheduler {
    inner: Rc<Inner>,
}

struct Inner {
    queue: RefCell<VecDeque<Thunk>>,
    timers: RefCell<TimerQueue>,
    clock: VirtualClock,
    failures: RefCell<Vec<RuntimeFailure>>,
}

impl LabScheduler {
    /// Creates an idle scheduler at virtual time zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                queue: RefCell::new(VecDeque::new()),
                timers: RefCell::new(TimerQueue::new()),
                clock: VirtualClock::new(),
                failures: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Returns the current virtual time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.inner.clock.now()
    }

    /// Number of thunks ready to run (not counting pending timers).
    #[must_use]
    pub fn ready(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    /// Number of timers that have not fired yet.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.borrow().len()
    }

    /// Earliest pending timer deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Time> {
        self.inner.timers.borrow().peek_deadline()
    }

    /// Runs one ready thunk. Returns false if the ready queue was empty.
    pub fn step(&self) -> bool {
        let thunk = self.inner.queue.borrow_mut().pop_front();
        match thunk {
            Some(thunk) => {
                thunk();
                true
            }
            None => false,
        }
    }

    /// Runs ready thunks until the queue drains, including work they
    /// enqueue. Pending timers do not fire. Returns the number of thunks
    /// executed.
    pub fn run_until_idle(&self) -> usize {
        let mut executed = 0;
        while self.step() {
            executed += 1;
        }
        executed
    }

    /// Advances virtual time by `delta`, firing due timers in deadline
    /// order and draining the ready queue after each firing. Returns the
    /// number of thunks executed.
    pub fn advance(&self, delta: Duration) -> usize {
        let mut executed = self.run_until_idle();
        let target = self.inner.clock.now() + delta;
        loop {
            let next = self
                .inner
                .timers
                .borrow()
                .peek_deadline()
                .filter(|deadline| *deadline <= target);
            let Some(deadline) = next else { break };
            self.inner.clock.set(deadline);
            let due = self.inner.timers.borrow_mut().pop_due(deadline);
            for thunk in due {
                self.inner.queue.borrow_mut().push_back(thunk);
            }
            executed += self.run_until_idle();
        }
        self.inner.clock.set(target);
        executed
    }

    /// Returns the failures reported so far, leaving them recorded.
    #[must_use]
    pub fn failures(&self) -> Vec<RuntimeFailure> {
        self.inner.failures.borrow().clone()
    }

    /// Drains and returns the failures reported so far.
    pub fn take_failures(&self) -> Vec<RuntimeFailure> {
        std::mem::take(&mut *self.inner.failures.borrow_mut())
    }
}

impl Default for LabScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for LabScheduler {
    fn execute_now(&self, thunk: Thunk) {
        self.inner.queue.borrow_mut().push_back(thunk);
    }

    fn schedule_after(&self, delay: Duration, thunk: Thunk) {
        let deadline = self.inner.clock.now() + delay;
        self.inner.timers.borrow_mut().insert(deadline, thunk);
    }

    fn report_failure(&self, failure: RuntimeFailure) {
        crate::rt_warn!("runtime failure: {failure}");
        self.inner.failures.borrow_mut().push(failure);
    }
}

impl std::fmt::Debug for LabScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabScheduler")
            .field("now", &self.now())
            .field("ready", &self.ready())
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn execute_now_runs_in_fifo_order() {
        let sched = LabScheduler::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            sched.execute_now(Box::new(move || order.borrow_mut().push(n)));
        }
        assert_eq!(sched.run_until_idle(), 3);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn timers_do_not_fire_without_advance() {
        let sched = LabScheduler::new();
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        sched.schedule_after(Duration::from_millis(10), Box::new(move || flag.set(true)));

        sched.run_until_idle();
        assert!(!fired.get());

        sched.advance(Duration::from_millis(9));
        assert!(!fired.get());

        sched.advance(Duration::from_millis(1));
        assert!(fired.get());
    }

    #[test]
    fn advance_fires_timers_in_deadline_order() {
        let sched = LabScheduler::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for (label, ms) in [("late", 20u64), ("early", 5)] {
            let order = order.clone();
            sched.schedule_after(
                Duration::from_millis(ms),
                Box::new(move || order.borrow_mut().push(label)),
            );
        }
        sched.advance(Duration::from_millis(30));
        assert_eq!(*order.borrow(), vec!["early", "late"]);
        assert_eq!(sched.now(), Time::from_millis(30));
    }

    #[test]
    fn timer_thunks_can_reschedule() {
        let sched = LabScheduler::new();
        let count = Rc::new(Cell::new(0u32));
        let chain = count.clone();
        let sched2 = sched.clone();
        sched.schedule_after(
            Duration::from_millis(1),
            Box::new(move || {
                chain.set(chain.get() + 1);
                let chain2 = chain.clone();
                sched2.schedule_after(
                    Duration::from_millis(1),
                    Box::new(move || chain2.set(chain2.get() + 1)),
                );
            }),
        );
        sched.advance(Duration::from_millis(5));
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn failures_are_collected() {
        let sched = LabScheduler::new();
        sched.report_failure(RuntimeFailure::UnobservedError {
            fiber: crate::types::FiberId::new_for_test(1),
            error: "boom".into(),
        });
        assert_eq!(sched.failures().len(), 1);
        assert_eq!(sched.take_failures().len(), 1);
        assert!(sched.failures().is_empty());
    }
}
