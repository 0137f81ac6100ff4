//! Wall-clock scheduler driver.
//!
//! `BlockingScheduler` drives fibers on the calling thread, sleeping between
//! timer deadlines. It is the production counterpart of
//! [`LabScheduler`](super::LabScheduler) for programs that want a plain
//! blocking entry point rather than embedding the runtime in a host event
//! loop.

use super::timer::TimerQueue;
use super::{Scheduler, Thunk};
use crate::effect::Effect;
use crate::error::RuntimeFailure;
use crate::runtime::Runtime;
use crate::time::{TimeSource, WallClock};
use crate::types::Outcome;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Scheduler that parks the calling thread between deadlines.
///
/// Cheap to clone; clones share the same queues and clock.
#[derive(Clone)]
pub struct BlockingScheduler {
    inner: Rc<Inner>,
}

struct Inner {
    queue: RefCell<VecDeque<Thunk>>,
    timers: RefCell<TimerQueue>,
    clock: WallClock,
    failures: RefCell<Vec<RuntimeFailure>>,
}

impl BlockingScheduler {
    /// Creates an idle scheduler whose clock starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                queue: RefCell::new(VecDeque::new()),
                timers: RefCell::new(TimerQueue::new()),
                clock: WallClock::new(),
                failures: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Runs `effect` to completion on the calling thread and returns its
    /// outcome.
    ///
    /// # Panics
    ///
    /// Panics if the run deadlocks: no ready work remains, no timer is
    /// pending, and the fiber has not completed. With this driver every
    /// suspension is timer-backed, so that state means a completion nobody
    /// can deliver (for example an async registration whose callback was
    /// dropped).
    pub fn block_on<A, E>(&self, runtime: &Rc<Runtime>, effect: Effect<A, E>) -> Outcome<A, E>
    where
        A: Clone + 'static,
        E: Clone + fmt::Debug + 'static,
    {
        let handle = runtime.spawn(effect);
        loop {
            loop {
                let thunk = self.inner.queue.borrow_mut().pop_front();
                match thunk {
                    Some(thunk) => thunk(),
                    None => break,
                }
            }
            if let Some(outcome) = handle.try_outcome() {
                return outcome;
            }
            let deadline = self.inner.timers.borrow().peek_deadline();
            let Some(deadline) = deadline else {
                panic!("block_on deadlocked: fiber awaits a completion nobody can deliver");
            };
            let now = self.inner.clock.now();
            if deadline > now {
                std::thread::sleep(deadline.duration_since(now));
            }
            let now = self.inner.clock.now().max(deadline);
            let due = self.inner.timers.borrow_mut().pop_due(now);
            for thunk in due {
                self.inner.queue.borrow_mut().push_back(thunk);
            }
        }
    }

    /// Returns the failures reported so far, leaving them recorded.
    #[must_use]
    pub fn failures(&self) -> Vec<RuntimeFailure> {
        self.inner.failures.borrow().clone()
    }
}

impl Default for BlockingScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for BlockingScheduler {
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

impl fmt::Debug for BlockingScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingScheduler")
            .field("ready", &self.inner.queue.borrow().len())
            .field("pending_timers", &self.inner.timers.borrow().len())
            .finish()
    }
}
