//! The per-executor runtime context.
//!
//! A [`Runtime`] ties together the scheduler binding, the fairness budget,
//! the trace buffer, and the fiber-id counter. All of its state is scoped
//! to the one context; nothing is process-global.

pub(crate) mod fiber;
pub(crate) mod frame;
mod interpreter;

pub use fiber::FiberHandle;

use crate::effect::Effect;
use crate::effect::node::{ErrorFormatter, Node, format_error};
use crate::error::RuntimeFailure;
use crate::scheduler::Scheduler;
use crate::trace::{TraceBuffer, TraceEvent, TraceEventKind};
use crate::types::{FiberId, Outcome};
use fiber::RawFiber;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Default fairness budget: synchronous steps before a voluntary yield.
const DEFAULT_STEP_BUDGET: u32 = 1024;

/// Default trace ring capacity.
const DEFAULT_TRACE_CAPACITY: usize = 256;

/// The executor context fibers run inside.
pub struct Runtime {
    scheduler: Rc<dyn Scheduler>,
    step_budget: u32,
    trace: RefCell<Option<TraceBuffer>>,
    next_fiber: Cell<u64>,
}

impl Runtime {
    /// Creates a runtime with default configuration over the given
    /// scheduler binding.
    #[must_use]
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Rc<Self> {
        Self::builder(scheduler).build()
    }

    /// Starts building a runtime over the given scheduler binding.
    #[must_use]
    pub fn builder(scheduler: Rc<dyn Scheduler>) -> RuntimeBuilder {
        RuntimeBuilder {
            scheduler,
            step_budget: DEFAULT_STEP_BUDGET,
            trace_capacity: DEFAULT_TRACE_CAPACITY,
        }
    }

    /// Starts `effect` on a new fiber, scheduled through the scheduler
    /// binding, and returns an externally-awaitable handle.
    ///
    /// The fiber is fire-and-forget until joined: if it fails and nobody
    /// joined it, the error is reported to the scheduler binding.
    pub fn spawn<A, E>(self: &Rc<Self>, effect: Effect<A, E>) -> FiberHandle<A, E>
    where
        A: 'static,
        E: fmt::Debug + 'static,
    {
        let fiber = self.new_fiber(format_error::<E>);
        self.schedule_start(&fiber, effect.into_node());
        FiberHandle::new(fiber)
    }

    /// Runs `effect` immediately on the calling stack.
    ///
    /// Returns [`RunResult::Completed`] only if the whole effect ran
    /// without suspending; otherwise the fiber continues through the
    /// scheduler binding and a handle is returned.
    pub fn run_sync<A, E>(self: &Rc<Self>, effect: Effect<A, E>) -> RunResult<A, E>
    where
        A: Clone + 'static,
        E: Clone + fmt::Debug + 'static,
    {
        let fiber = self.new_fiber(format_error::<E>);
        fiber.prime(effect.into_node());
        fiber.run();
        let handle = FiberHandle::new(fiber);
        match handle.try_outcome() {
            Some(outcome) => RunResult::Completed(outcome),
            None => RunResult::Pending(handle),
        }
    }

    /// Returns the retained trace events, newest first. Empty when tracing
    /// is disabled or already invalidated.
    #[must_use]
    pub fn trace_snapshot(&self) -> Vec<TraceEvent> {
        self.trace
            .borrow()
            .as_ref()
            .map_or_else(Vec::new, TraceBuffer::snapshot)
    }

    /// Releases the trace buffer's storage. Recording stops; further
    /// snapshots are empty.
    pub fn invalidate_trace(&self) {
        if let Some(mut buffer) = self.trace.borrow_mut().take() {
            buffer.invalidate();
        }
    }

    pub(crate) fn scheduler(&self) -> &Rc<dyn Scheduler> {
        &self.scheduler
    }

    pub(crate) fn step_budget(&self) -> u32 {
        self.step_budget
    }

    pub(crate) fn record(&self, fiber: FiberId, kind: TraceEventKind) {
        crate::rt_trace!("{fiber} {kind:?}");
        if let Some(buffer) = self.trace.borrow_mut().as_mut() {
            buffer.push(fiber, kind);
        }
    }

    pub(crate) fn report_failure(&self, failure: RuntimeFailure) {
        self.scheduler.report_failure(failure);
    }

    pub(crate) fn new_fiber(self: &Rc<Self>, error_debug: ErrorFormatter) -> Rc<RawFiber> {
        let id = FiberId::from_raw(self.next_fiber.get());
        self.next_fiber.set(self.next_fiber.get() + 1);
        let fiber = Rc::new(RawFiber::new(id, Rc::clone(self), error_debug));
        self.record(id, TraceEventKind::Spawned);
        fiber
    }

    pub(crate) fn schedule_start(&self, fiber: &Rc<RawFiber>, node: Node) {
        fiber.prime(node);
        let scheduled = Rc::clone(fiber);
        self.scheduler
            .execute_now(Box::new(move || scheduled.run()));
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("step_budget", &self.step_budget)
            .field("fibers_spawned", &self.next_fiber.get())
            .finish_non_exhaustive()
    }
}

/// Configures a [`Runtime`].
#[derive(Clone)]
pub struct RuntimeBuilder {
    scheduler: Rc<dyn Scheduler>,
    step_budget: u32,
    trace_capacity: usize,
}

impl RuntimeBuilder {
    /// Sets how many synchronous steps a fiber may take before the
    /// interpreter yields it back to the scheduler. Clamped to at least 1.
    #[must_use]
    pub fn step_budget(mut self, budget: u32) -> Self {
        self.step_budget = budget.max(1);
        self
    }

    /// Sets the trace ring capacity. Zero disables tracing entirely.
    #[must_use]
    pub fn trace_capacity(mut self, capacity: usize) -> Self {
        self.trace_capacity = capacity;
        self
    }

    /// Builds the runtime.
    #[must_use]
    pub fn build(self) -> Rc<Runtime> {
        Rc::new(Runtime {
            scheduler: self.scheduler,
            step_budget: self.step_budget,
            trace: RefCell::new(if self.trace_capacity == 0 {
                None
            } else {
                Some(TraceBuffer::new(self.trace_capacity))
            }),
            next_fiber: Cell::new(0),
        })
    }
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("step_budget", &self.step_budget)
            .field("trace_capacity", &self.trace_capacity)
            .finish_non_exhaustive()
    }
}

/// Result of [`Runtime::run_sync`].
#[derive(Debug)]
pub enum RunResult<A, E> {
    /// The effect ran to completion without suspending.
    Completed(Outcome<A, E>),
    /// The effect suspended; the fiber continues through the scheduler.
    Pending(FiberHandle<A, E>),
}

impl<A, E> RunResult<A, E> {
    /// Returns the synchronous outcome, if the run never suspended.
    pub fn completed(self) -> Option<Outcome<A, E>> {
        match self {
            Self::Completed(outcome) => Some(outcome),
            Self::Pending(_) => None,
        }
    }

    /// Returns the handle, if the run suspended.
    pub fn pending(self) -> Option<FiberHandle<A, E>> {
        match self {
            Self::Completed(_) => None,
            Self::Pending(handle) => Some(handle),
        }
    }
}
