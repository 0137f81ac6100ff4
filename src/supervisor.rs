//! Structured concurrency: supervisors and supervised scopes.
//!
//! A [`Supervisor`] tracks the fibers forked under it and guarantees none
//! outlive its scope: closing the scope cancels every still-registered
//! child and waits for each to reach its terminal outcome. Children
//! deregister themselves on completion, so a long-lived supervisor does not
//! accumulate dead entries.
//!
//! The registry is a slab keyed by insertion index; each child fiber holds
//! a weak back-reference plus its key, avoiding ownership cycles between
//! fiber and supervisor.

use crate::effect::Effect;
use crate::effect::node::{AnyValue, Node, format_error, unit_value};
use crate::error::SuperviseError;
use crate::runtime::FiberHandle;
use crate::runtime::fiber::RawFiber;
use slab::Slab;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Shared registry behind a [`Supervisor`] and its children.
pub(crate) struct SupervisorShared {
    children: RefCell<Slab<Rc<RawFiber>>>,
    closing: Cell<bool>,
}

impl SupervisorShared {
    pub(crate) fn is_closing(&self) -> bool {
        self.closing.get()
    }

    pub(crate) fn insert(&self, fiber: Rc<RawFiber>) -> usize {
        self.children.borrow_mut().insert(fiber)
    }

    pub(crate) fn remove(&self, key: usize) {
        let _ = self.children.borrow_mut().try_remove(key);
    }
}

/// A structured-concurrency registry for child fibers.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Supervisor {
    shared: Rc<SupervisorShared>,
}

impl Supervisor {
    /// Creates an open supervisor with no children.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Rc::new(SupervisorShared {
                children: RefCell::new(Slab::new()),
                closing: Cell::new(false),
            }),
        }
    }

    /// Number of children currently registered.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.shared.children.borrow().len()
    }

    /// Returns true once the scope has begun closing.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.shared.is_closing()
    }

    /// Forks `effect` as a child registered with this supervisor.
    ///
    /// Registration happens at interpretation time. If the scope has begun
    /// closing by then, no fiber is created and the effect yields
    /// `Err(SuperviseError)` — a child can never leak past the scope.
    pub fn supervise<A, E, E2>(
        &self,
        effect: Effect<A, E>,
    ) -> Effect<Result<FiberHandle<A, E>, SuperviseError>, E2>
    where
        A: 'static,
        E: fmt::Debug + 'static,
        E2: 'static,
    {
        let shared = Rc::clone(&self.shared);
        Effect::from_node(Node::Fork {
            source: Box::new(effect.into_node()),
            supervisor: Some(shared),
            error_debug: format_error::<E>,
            wrap: Box::new(|fiber| {
                Box::new(fiber.map(FiberHandle::<A, E>::new)) as AnyValue
            }),
        })
    }

    /// Closes the scope: marks it closing, cancels every registered child,
    /// and waits for each to reach its terminal outcome.
    ///
    /// Masked internally, so a cancellation of the closing fiber cannot
    /// leave children behind. Idempotent: closing an already-closed
    /// supervisor completes immediately.
    pub fn close<E: 'static>(&self) -> Effect<(), E> {
        let shared = Rc::clone(&self.shared);
        Effect::uncancelable(move |_| {
            Effect::defer(move || {
                shared.closing.set(true);
                let children: Vec<Rc<RawFiber>> = shared
                    .children
                    .borrow()
                    .iter()
                    .map(|(_, fiber)| Rc::clone(fiber))
                    .collect();
                for child in &children {
                    child.cancel();
                }
                children
                    .into_iter()
                    .fold(Effect::unit(), |wait, child| {
                        wait.flat_map(move |()| await_termination(child))
                    })
            })
        })
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("children", &self.child_count())
            .field("closing", &self.is_closing())
            .finish()
    }
}

/// Runs `body` with a fresh supervisor and closes its scope on the way
/// out — on success, error, or cancellation of the outer effect — before
/// propagating the body's result.
pub fn supervised<A, E, F>(body: F) -> Effect<A, E>
where
    A: 'static,
    E: 'static,
    F: FnOnce(Supervisor) -> Effect<A, E> + 'static,
{
    Effect::uncancelable(move |unmask| {
        let supervisor = Supervisor::new();
        let guard = supervisor.clone();
        let closer = supervisor.clone();
        unmask
            .apply(body(supervisor))
            .on_cancel(guard.close())
            .attempt()
            .flat_map(move |result| {
                closer
                    .close()
                    .flat_map(move |()| Effect::from_result(result))
            })
    })
}

/// Suspends until `fiber` completes, discarding its outcome.
fn await_termination<E: 'static>(fiber: Rc<RawFiber>) -> Effect<(), E> {
    Effect::from_node(Node::Async {
        register: Box::new(move |gate| {
            fiber.on_completion(Box::new(move |_outcome| {
                gate.complete(Ok(unit_value()));
            }));
            None
        }),
    })
}
