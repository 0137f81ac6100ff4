//! The effect tree: immutable descriptions of deferred computations.
//!
//! An [`Effect<A, E>`] describes a computation that, when interpreted by a
//! fiber, produces a value of type `A`, fails with a domain error of type
//! `E`, or is canceled. Nothing runs at construction time: every combinator
//! allocates a new tree node referencing its operands, and `delay`'s thunk
//! is not called until a fiber interprets it.
//!
//! Effects are single-shot values: running one consumes it. To run the same
//! logic again, rebuild the tree (typically through [`Effect::defer`]).
//!
//! # Errors and panics
//!
//! Rust has no exceptions, so fallible synchronous work enters the tree as
//! [`Effect::raise_error`] or [`Effect::delay_result`] rather than by
//! catching anything. Panics in user closures are defects and propagate;
//! they are never converted into `Failed` outcomes.

pub(crate) mod node;

use crate::runtime::fiber::{FiberHandle, Gate};
use crate::types::Outcome;
use node::{AnyValue, Node, format_error, unbox};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::time::Duration;

/// An immutable description of a deferred, cancellable computation.
#[must_use = "effects do nothing until run on a fiber"]
pub struct Effect<A, E> {
    node: Node,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A: 'static, E: 'static> Effect<A, E> {
    pub(crate) fn from_node(node: Node) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_node(self) -> Node {
        self.node
    }

    /// Lifts an already-computed value.
    pub fn pure(value: A) -> Self {
        Self::from_node(Node::Pure(Box::new(value)))
    }

    /// Defers a synchronous computation until interpretation time.
    pub fn delay<F>(thunk: F) -> Self
    where
        F: FnOnce() -> A + 'static,
    {
        Self::from_node(Node::Delay(Box::new(move || Box::new(thunk()) as AnyValue)))
    }

    /// Defers the construction of an entire effect until interpretation
    /// time.
    pub fn defer<F>(thunk: F) -> Self
    where
        F: FnOnce() -> Self + 'static,
    {
        Effect::<Self, E>::delay(thunk).flat_map(|effect| effect)
    }

    /// Raises a domain error.
    pub fn raise_error(error: E) -> Self {
        Self::from_node(Node::RaiseError(Box::new(error)))
    }

    /// Lifts a `Result`: `Ok` succeeds, `Err` raises.
    pub fn from_result(result: Result<A, E>) -> Self {
        Self::delay_result(move || result)
    }

    /// Defers a fallible synchronous computation until interpretation time.
    pub fn delay_result<F>(thunk: F) -> Self
    where
        F: FnOnce() -> Result<A, E> + 'static,
    {
        Self::from_node(Node::FromResult(Box::new(move || {
            thunk()
                .map(|a| Box::new(a) as AnyValue)
                .map_err(|e| Box::new(e) as AnyValue)
        })))
    }

    /// A computation completed by an externally-invoked callback.
    ///
    /// `register` receives a single-shot [`AsyncCallback`] and may return an
    /// optional cancel action to run if the fiber is canceled while
    /// awaiting. Late or duplicate invocations of the callback are
    /// discarded.
    pub fn from_async<F>(register: F) -> Self
    where
        F: FnOnce(AsyncCallback<A, E>) -> Option<Effect<(), E>> + 'static,
    {
        Self::from_node(Node::Async {
            register: Box::new(move |gate| {
                register(AsyncCallback::new(gate)).map(Effect::into_node)
            }),
        })
    }

    /// An effect that never completes. Cancelable.
    pub fn never() -> Self {
        Self::from_async(|_callback| None)
    }

    /// Transforms the result value.
    pub fn map<B, F>(self, f: F) -> Effect<B, E>
    where
        B: 'static,
        F: FnOnce(A) -> B + 'static,
    {
        Effect::from_node(Node::Map {
            source: Box::new(self.node),
            f: Box::new(move |value| Box::new(f(unbox::<A>(value))) as AnyValue),
        })
    }

    /// Sequences a dependent effect after this one.
    pub fn flat_map<B, F>(self, f: F) -> Effect<B, E>
    where
        B: 'static,
        F: FnOnce(A) -> Effect<B, E> + 'static,
    {
        Effect::from_node(Node::FlatMap {
            source: Box::new(self.node),
            f: Box::new(move |value| f(unbox::<A>(value)).into_node()),
        })
    }

    /// Discards the result value.
    pub fn void(self) -> Effect<(), E> {
        self.map(|_| ())
    }

    /// Recovers from a domain error with a fallback effect.
    ///
    /// Cancellation is not an error and never reaches `handler`.
    pub fn handle_error_with<F>(self, handler: F) -> Self
    where
        F: FnOnce(E) -> Self + 'static,
    {
        Self::from_node(Node::HandleErrorWith {
            source: Box::new(self.node),
            handler: Box::new(move |error| handler(unbox::<E>(error)).into_node()),
        })
    }

    /// Reifies failure as a value. Never propagates a domain error.
    pub fn attempt(self) -> Effect<Result<A, E>, E> {
        Effect::from_node(Node::Attempt {
            source: Box::new(self.node),
            reify: Box::new(|result| {
                let typed: Result<A, E> = match result {
                    Ok(value) => Ok(unbox::<A>(value)),
                    Err(error) => Err(unbox::<E>(error)),
                };
                Box::new(typed) as AnyValue
            }),
        })
    }

    /// Registers a finalizer to run if the fiber is canceled while this
    /// effect is running. Finalizers run in LIFO order of registration.
    pub fn on_cancel(self, finalizer: Effect<(), E>) -> Self {
        Self::from_node(Node::OnCancel {
            source: Box::new(self.node),
            finalizer: Box::new(finalizer.into_node()),
        })
    }

    /// Masks cancellation for the extent of the effect `body` returns.
    ///
    /// The body receives an [`Unmask`] token; applying it to a sub-effect
    /// restores the masking state that was in force when this
    /// `uncancelable` was entered, for the scope of that sub-effect only.
    pub fn uncancelable<F>(body: F) -> Self
    where
        F: FnOnce(Unmask) -> Self + 'static,
    {
        Self::from_node(Node::Uncancelable {
            body: Box::new(move |token| body(token).into_node()),
        })
    }

    /// Starts this effect on a new fiber and yields its handle.
    ///
    /// The child is not registered with any supervisor: this is
    /// fire-and-forget mode. Use
    /// [`Supervisor::supervise`](crate::supervisor::Supervisor::supervise)
    /// for structured spawning.
    pub fn fork(self) -> Effect<FiberHandle<A, E>, E>
    where
        E: fmt::Debug,
    {
        Effect::from_node(Node::Fork {
            source: Box::new(self.node),
            supervisor: None,
            error_debug: format_error::<E>,
            wrap: Box::new(|fiber| {
                let fiber = fiber.unwrap_or_else(|_| {
                    unreachable!("unsupervised fork cannot be rejected")
                });
                Box::new(FiberHandle::<A, E>::new(fiber)) as AnyValue
            }),
        })
    }

    /// Bounds this effect with a deadline, expressed as a race between the
    /// effect and a timer-driven cancellation.
    ///
    /// Returns `Some(value)` if the effect wins, `None` if the deadline
    /// canceled it first. An error from the effect is re-raised either way.
    pub fn timeout(self, duration: Duration) -> Effect<Option<A>, E>
    where
        A: Clone,
        E: Clone + fmt::Debug,
    {
        self.fork().flat_map(move |fiber| {
            let watchdog_target = fiber.clone();
            Effect::sleep(duration)
                .flat_map(move |()| watchdog_target.cancel())
                .fork()
                .flat_map(move |watchdog| {
                    fiber.join().flat_map(move |outcome| {
                        watchdog.cancel().flat_map(move |()| match outcome {
                            Outcome::Succeeded(value) => Effect::pure(Some(value)),
                            Outcome::Failed(error) => Effect::raise_error(error),
                            Outcome::Canceled => Effect::pure(None),
                        })
                    })
                })
        })
    }
}

impl<E: 'static> Effect<(), E> {
    /// The unit effect.
    pub fn unit() -> Self {
        Self::pure(())
    }

    /// Suspends for `duration` via the scheduler binding's timer.
    pub fn sleep(duration: Duration) -> Self {
        Self::from_node(Node::Sleep(duration))
    }

    /// Voluntarily yields to the scheduler, letting other ready fibers run
    /// before this one continues.
    pub fn cede() -> Self {
        Self::from_node(Node::Cede)
    }

    /// Requests cancellation of the current fiber.
    ///
    /// Takes effect at the next zero-masking checkpoint; under a mask it
    /// completes as unit and the request is deferred.
    pub fn canceled() -> Self {
        Self::from_node(Node::Canceled)
    }
}

impl<A, E> fmt::Debug for Effect<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Effect({:?})", self.node)
    }
}

/// Token supplied to [`Effect::uncancelable`]'s body.
///
/// Applying it restores the masking depth that was active when the
/// enclosing `uncancelable` was entered, for the scope of the argument
/// effect only. The token may be applied any number of times.
#[derive(Debug, Clone, Copy)]
pub struct Unmask {
    restore_depth: u32,
}

impl Unmask {
    pub(crate) const fn new(restore_depth: u32) -> Self {
        Self { restore_depth }
    }

    /// Runs `effect` with the pre-mask cancellation state restored.
    pub fn apply<A: 'static, E: 'static>(self, effect: Effect<A, E>) -> Effect<A, E> {
        Effect::from_node(Node::Unmasked {
            source: Box::new(effect.into_node()),
            restore_depth: self.restore_depth,
        })
    }
}

/// Single-shot completion callback handed to [`Effect::from_async`]
/// registrations.
///
/// Completing consumes the callback. If the owning fiber has meanwhile
/// completed or moved on, the result is discarded.
pub struct AsyncCallback<A, E> {
    gate: Rc<Gate>,
    _marker: PhantomData<fn(A, E)>,
}

impl<A: 'static, E: 'static> AsyncCallback<A, E> {
    pub(crate) fn new(gate: Rc<Gate>) -> Self {
        Self {
            gate,
            _marker: PhantomData,
        }
    }

    /// Delivers the awaited result and resumes the suspended fiber.
    pub fn complete(self, result: Result<A, E>) {
        self.gate.complete(
            result
                .map(|a| Box::new(a) as AnyValue)
                .map_err(|e| Box::new(e) as AnyValue),
        );
    }
}

impl<A, E> fmt::Debug for AsyncCallback<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCallback").finish_non_exhaustive()
    }
}
