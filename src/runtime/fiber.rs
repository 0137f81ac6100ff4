//! Fiber run-state and the typed fiber handle.
//!
//! A [`RawFiber`] is the mutable run-state of one logical unit of
//! concurrent execution. The hot interpreter state ([`FiberCore`]) is taken
//! out of the fiber while its run loop executes, so user closures invoked
//! from the loop can reentrantly touch the fiber's control surface (cancel
//! requests, listener registration, async completions) without aliasing the
//! loop's own state.
//!
//! Fibers transition `Created → Queued → Running → {Queued | Awaiting}* →
//! Completed`, complete exactly once, and are immutable afterwards.

use crate::effect::node::{AnyValue, ErrorFormatter, Node};
use crate::effect::{AsyncCallback, Effect};
use crate::runtime::Runtime;
use crate::runtime::frame::{Frame, Resumption};
use crate::supervisor::SupervisorShared;
use crate::trace::TraceEventKind;
use crate::types::{FiberId, Outcome};
use smallvec::SmallVec;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

/// A fiber outcome with erased payloads, shared among listeners.
pub(crate) type ErasedOutcome = Outcome<Rc<dyn Any>, Rc<dyn Any>>;

/// A join-listener: invoked exactly once with the terminal outcome.
pub(crate) type Listener = Box<dyn FnOnce(ErasedOutcome)>;

/// Lifecycle phase of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Created but never scheduled.
    Created,
    /// Scheduled; a run thunk is in the scheduler's queue.
    Queued,
    /// The run loop is executing on the driving thread.
    Running,
    /// Suspended awaiting an async completion.
    Awaiting,
    /// Terminal.
    Completed,
}

/// Hot interpreter state, owned by the run loop while it executes.
pub(crate) struct FiberCore {
    /// Continuation stack; innermost pending frame last.
    pub(crate) stack: SmallVec<[Frame; 4]>,
    /// Cancellation is deferred while positive.
    pub(crate) mask_depth: u32,
    /// The cancellation unwind is in progress.
    pub(crate) unwinding: bool,
    /// Cancel action returned by the current async registration, if any.
    pub(crate) async_cancel: Option<Node>,
    /// Rendered errors raised by finalizers during the unwind.
    pub(crate) finalizer_errors: Vec<String>,
}

impl FiberCore {
    fn new() -> Self {
        Self {
            stack: SmallVec::new(),
            mask_depth: 0,
            unwinding: false,
            async_cancel: None,
            finalizer_errors: Vec::new(),
        }
    }
}

/// The mutable run-state of one fiber.
pub(crate) struct RawFiber {
    id: FiberId,
    runtime: Rc<Runtime>,
    phase: Cell<Phase>,
    cancel_requested: Cell<bool>,
    /// Identifies the current async suspension; bumped whenever the fiber
    /// moves past an await so that stale callbacks are discarded.
    gate_epoch: Cell<u64>,
    core: RefCell<Option<FiberCore>>,
    completion: RefCell<Option<ErasedOutcome>>,
    listeners: RefCell<Vec<Listener>>,
    supervisor: RefCell<Option<Attachment>>,
    error_debug: ErrorFormatter,
}

/// Back-reference into the owning supervisor's registry.
pub(crate) struct Attachment {
    pub(crate) registry: Weak<SupervisorShared>,
    pub(crate) key: usize,
}

impl RawFiber {
    pub(crate) fn new(id: FiberId, runtime: Rc<Runtime>, error_debug: ErrorFormatter) -> Self {
        Self {
            id,
            runtime,
            phase: Cell::new(Phase::Created),
            cancel_requested: Cell::new(false),
            gate_epoch: Cell::new(0),
            core: RefCell::new(Some(FiberCore::new())),
            completion: RefCell::new(None),
            listeners: RefCell::new(Vec::new()),
            supervisor: RefCell::new(None),
            error_debug,
        }
    }

    pub(crate) fn id(&self) -> FiberId {
        self.id
    }

    pub(crate) fn runtime(&self) -> &Rc<Runtime> {
        &self.runtime
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase.get()
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.phase.set(phase);
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel_requested.get()
    }

    pub(crate) fn error_debug(&self) -> ErrorFormatter {
        self.error_debug
    }

    pub(crate) fn is_completed(&self) -> bool {
        matches!(self.phase.get(), Phase::Completed)
    }

    /// Takes the hot state for a run burst.
    pub(crate) fn take_core(&self) -> Option<FiberCore> {
        self.core.borrow_mut().take()
    }

    /// Returns the hot state after a suspension or yield.
    pub(crate) fn put_core(&self, core: FiberCore) {
        *self.core.borrow_mut() = Some(core);
    }

    /// Marks the cancel flag, recording the first request.
    pub(crate) fn mark_cancel_requested(&self) {
        if !self.cancel_requested.replace(true) {
            self.runtime.record(self.id, TraceEventKind::CancelRequested);
        }
    }

    /// Allocates the identity for the next async suspension.
    pub(crate) fn next_gate_epoch(&self) -> u64 {
        let epoch = self.gate_epoch.get() + 1;
        self.gate_epoch.set(epoch);
        epoch
    }

    pub(crate) fn current_gate_epoch(&self) -> u64 {
        self.gate_epoch.get()
    }

    /// Pushes the initial continuation and marks the fiber runnable.
    /// The caller hands the resulting run to the scheduler.
    pub(crate) fn prime(&self, node: Node) {
        if let Some(core) = self.core.borrow_mut().as_mut() {
            core.stack
                .push(Frame::Resume(Box::new(Resumption::Start(node))));
        }
        self.phase.set(Phase::Queued);
    }

    /// Requests cooperative cancellation.
    ///
    /// No-op once completed. If the fiber is suspended on an async await
    /// outside any mask, it is rescheduled to run its cancellation unwind;
    /// otherwise the request takes effect at the fiber's next zero-masking
    /// checkpoint.
    pub(crate) fn cancel(self: &Rc<Self>) {
        if self.is_completed() {
            return;
        }
        self.mark_cancel_requested();
        if self.phase.get() != Phase::Awaiting {
            return;
        }
        let can_interrupt = self
            .core
            .borrow()
            .as_ref()
            .is_some_and(|core| core.mask_depth == 0 && !core.unwinding);
        if !can_interrupt {
            return;
        }
        // Invalidate the pending await so a late callback is discarded.
        self.next_gate_epoch();
        if let Some(core) = self.core.borrow_mut().as_mut() {
            core.stack
                .push(Frame::Resume(Box::new(Resumption::Cancel)));
        }
        self.phase.set(Phase::Queued);
        let fiber = Rc::clone(self);
        self.runtime
            .scheduler()
            .execute_now(Box::new(move || fiber.run()));
    }

    /// Registers a completion listener, or fires it immediately if the
    /// fiber has already completed.
    pub(crate) fn on_completion(&self, listener: Listener) {
        let completed = self.completion.borrow().clone();
        match completed {
            Some(outcome) => listener(outcome),
            None => self.listeners.borrow_mut().push(listener),
        }
    }

    pub(crate) fn try_completion(&self) -> Option<ErasedOutcome> {
        self.completion.borrow().clone()
    }

    pub(crate) fn attach_supervisor(&self, registry: Weak<SupervisorShared>, key: usize) {
        *self.supervisor.borrow_mut() = Some(Attachment { registry, key });
    }

    /// Transitions to `Completed` exactly once: records the outcome,
    /// deregisters from the supervisor, reports stray failures, and fires
    /// listeners in registration order.
    pub(crate) fn complete(self: &Rc<Self>, core: FiberCore, outcome: ErasedOutcome) {
        debug_assert!(!self.is_completed(), "fiber completed twice");
        self.phase.set(Phase::Completed);
        *self.completion.borrow_mut() = Some(outcome.clone());
        if let Some(attachment) = self.supervisor.borrow_mut().take() {
            if let Some(registry) = attachment.registry.upgrade() {
                registry.remove(attachment.key);
            }
        }
        self.runtime
            .record(self.id, TraceEventKind::Completed(outcome.kind()));
        if !core.finalizer_errors.is_empty() {
            self.runtime
                .report_failure(crate::error::RuntimeFailure::FinalizerErrors {
                    fiber: self.id,
                    errors: core.finalizer_errors.clone(),
                });
        }
        drop(core);
        let listeners = std::mem::take(&mut *self.listeners.borrow_mut());
        if listeners.is_empty() {
            if let Outcome::Failed(error) = &outcome {
                self.runtime
                    .report_failure(crate::error::RuntimeFailure::UnobservedError {
                        fiber: self.id,
                        error: (self.error_debug)(error.as_ref()),
                    });
            }
        }
        for listener in listeners {
            listener(outcome.clone());
        }
    }
}

impl fmt::Debug for RawFiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFiber")
            .field("id", &self.id)
            .field("phase", &self.phase.get())
            .field("cancel_requested", &self.cancel_requested.get())
            .finish_non_exhaustive()
    }
}

/// Single-shot completion gate for one async suspension.
///
/// A gate is valid for exactly one await of one fiber (identified by an
/// epoch). Completing a stale, duplicate, or dead gate is a safe no-op:
/// the result is discarded.
pub(crate) struct Gate {
    fiber: Weak<RawFiber>,
    epoch: u64,
    slot: RefCell<Option<Result<AnyValue, AnyValue>>>,
    consumed: Cell<bool>,
}

impl Gate {
    pub(crate) fn new(fiber: Weak<RawFiber>, epoch: u64) -> Self {
        Self {
            fiber,
            epoch,
            slot: RefCell::new(None),
            consumed: Cell::new(false),
        }
    }

    /// Delivers the awaited result.
    ///
    /// If the owning fiber is mid-registration (the loop is still inside
    /// `register`), the result is buffered for synchronous pickup.
    /// If the fiber is suspended on this gate, it is rescheduled with the
    /// result. Anything else means the fiber moved on; discard.
    pub(crate) fn complete(&self, result: Result<AnyValue, AnyValue>) {
        if self.consumed.replace(true) {
            return;
        }
        let Some(fiber) = self.fiber.upgrade() else {
            return;
        };
        if self.epoch != fiber.current_gate_epoch() {
            return;
        }
        match fiber.phase() {
            Phase::Running => {
                *self.slot.borrow_mut() = Some(result);
            }
            Phase::Awaiting => {
                let resumption = match result {
                    Ok(value) => Resumption::Value(value),
                    Err(error) => Resumption::Error(error),
                };
                if let Some(core) = fiber.core.borrow_mut().as_mut() {
                    core.async_cancel = None;
                    core.stack.push(Frame::Resume(Box::new(resumption)));
                } else {
                    return;
                }
                fiber.set_phase(Phase::Queued);
                fiber
                    .runtime()
                    .record(fiber.id(), TraceEventKind::Resumed);
                let scheduled = Rc::clone(&fiber);
                fiber
                    .runtime()
                    .scheduler()
                    .execute_now(Box::new(move || scheduled.run()));
            }
            Phase::Created | Phase::Queued | Phase::Completed => {}
        }
    }

    /// Takes a result delivered synchronously during registration.
    pub(crate) fn take_buffered(&self) -> Option<Result<AnyValue, AnyValue>> {
        self.slot.borrow_mut().take()
    }
}

/// Typed handle to a running (or completed) fiber.
///
/// Handles are cheap to clone and remain valid after completion.
pub struct FiberHandle<A, E> {
    raw: Rc<RawFiber>,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A: 'static, E: 'static> FiberHandle<A, E> {
    pub(crate) fn new(raw: Rc<RawFiber>) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// The fiber's identifier within its runtime.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.raw.id()
    }

    /// Returns true once the fiber has reached its terminal outcome.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.raw.is_completed()
    }

    /// Requests cancellation from host code, outside any fiber.
    pub fn request_cancel(&self) {
        self.raw.cancel();
    }

    /// An effect that requests cancellation of this fiber.
    ///
    /// Cancellation is requested, not forced: it takes effect at the
    /// target's next zero-masking checkpoint.
    pub fn cancel<E2: 'static>(&self) -> Effect<(), E2> {
        let raw = Rc::clone(&self.raw);
        Effect::delay(move || raw.cancel())
    }

    /// An effect that suspends until this fiber completes and yields its
    /// [`Outcome`]. Never fails: failures arrive as data.
    pub fn join<E2: 'static>(&self) -> Effect<Outcome<A, E>, E2>
    where
        A: Clone,
        E: Clone,
    {
        let raw = Rc::clone(&self.raw);
        Effect::from_async(move |callback: AsyncCallback<Outcome<A, E>, E2>| {
            raw.on_completion(Box::new(move |erased| {
                callback.complete(Ok(typed_outcome::<A, E>(erased)));
            }));
            None
        })
    }

    /// Returns the outcome if the fiber has completed, without suspending.
    #[must_use]
    pub fn try_outcome(&self) -> Option<Outcome<A, E>>
    where
        A: Clone,
        E: Clone,
    {
        self.raw.try_completion().map(typed_outcome::<A, E>)
    }
}

impl<A, E> Clone for FiberHandle<A, E> {
    fn clone(&self) -> Self {
        Self {
            raw: Rc::clone(&self.raw),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for FiberHandle<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberHandle({})", self.raw.id())
    }
}

fn typed_outcome<A: Clone + 'static, E: Clone + 'static>(erased: ErasedOutcome) -> Outcome<A, E> {
    match erased {
        Outcome::Succeeded(value) => match value.downcast::<A>() {
            Ok(value) => Outcome::Succeeded((*value).clone()),
            Err(_) => unreachable!("fiber value type confusion"),
        },
        Outcome::Failed(error) => match error.downcast::<E>() {
            Ok(error) => Outcome::Failed((*error).clone()),
            Err(_) => unreachable!("fiber error type confusion"),
        },
        Outcome::Canceled => Outcome::Canceled,
    }
}
