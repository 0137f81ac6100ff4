//! Erased representation of the effect tree.
//!
//! The public [`Effect`](super::Effect) type is a thin typed wrapper over
//! [`Node`]. Values and errors travel through the interpreter as
//! `Box<dyn Any>`; the typed constructors embed monomorphized closures that
//! box and unbox at the boundaries, so a downcast failure can only mean a
//! bug in this crate, never in user code.

use crate::error::SuperviseError;
use crate::runtime::fiber::{Gate, RawFiber};
use crate::supervisor::SupervisorShared;
use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// An erased value or error payload.
pub(crate) type AnyValue = Box<dyn Any>;

/// Monomorphized renderer for an erased error value, used for diagnostics
/// reported through the scheduler binding.
pub(crate) type ErrorFormatter = fn(&dyn Any) -> String;

/// Renders an erased error of concrete type `E` with its `Debug` impl.
pub(crate) fn format_error<E: fmt::Debug + 'static>(error: &dyn Any) -> String {
    error
        .downcast_ref::<E>()
        .map_or_else(|| String::from("<opaque error>"), |e| format!("{e:?}"))
}

/// Moves an erased value back to its concrete type.
pub(crate) fn unbox<T: 'static>(value: AnyValue) -> T {
    match value.downcast::<T>() {
        Ok(boxed) => *boxed,
        Err(_) => unreachable!("effect value type confusion"),
    }
}

/// A unit payload.
pub(crate) fn unit_value() -> AnyValue {
    Box::new(())
}

/// One node of the effect tree.
///
/// The tree is immutable once built: combinators always wrap, never mutate.
/// Nodes are consumed exactly once, by the interpreter or by `Drop`.
pub(crate) enum Node {
    /// An already-computed value.
    Pure(AnyValue),
    /// A deferred synchronous computation.
    Delay(Box<dyn FnOnce() -> AnyValue>),
    /// A deferred synchronous computation that may fail.
    FromResult(Box<dyn FnOnce() -> Result<AnyValue, AnyValue>>),
    /// An immediately-raised domain error.
    RaiseError(AnyValue),
    /// Value transformation.
    Map {
        source: Box<Node>,
        f: Box<dyn FnOnce(AnyValue) -> AnyValue>,
    },
    /// Sequencing.
    FlatMap {
        source: Box<Node>,
        f: Box<dyn FnOnce(AnyValue) -> Node>,
    },
    /// Error recovery.
    HandleErrorWith {
        source: Box<Node>,
        handler: Box<dyn FnOnce(AnyValue) -> Node>,
    },
    /// Failure reification: `reify` rebuilds the typed `Result` payload.
    Attempt {
        source: Box<Node>,
        reify: Box<dyn FnOnce(Result<AnyValue, AnyValue>) -> AnyValue>,
    },
    /// Registers a finalizer to run if the fiber is canceled while running
    /// `source`.
    OnCancel {
        source: Box<Node>,
        finalizer: Box<Node>,
    },
    /// Masks cancellation for the extent of `body`'s effect. The body
    /// receives an unmask token at interpretation time.
    Uncancelable {
        body: Box<dyn FnOnce(super::Unmask) -> Node>,
    },
    /// An applied unmask token: restores `restore_depth` while `source`
    /// runs.
    Unmasked {
        source: Box<Node>,
        restore_depth: u32,
    },
    /// Requests cancellation of the current fiber.
    Canceled,
    /// Starts `source` on a new fiber, optionally registered with a
    /// supervisor, and yields a handle produced by `wrap`.
    Fork {
        source: Box<Node>,
        supervisor: Option<Rc<SupervisorShared>>,
        error_debug: ErrorFormatter,
        wrap: Box<dyn FnOnce(Result<Rc<RawFiber>, SuperviseError>) -> AnyValue>,
    },
    /// A computation completed by an externally-invoked callback.
    /// Registration may return an optional cancel action.
    Async {
        register: Box<dyn FnOnce(Rc<Gate>) -> Option<Node>>,
    },
    /// Suspends for `duration` via the scheduler binding's timer.
    Sleep(Duration),
    /// Voluntarily yields to the scheduler.
    Cede,
}

impl Node {
    /// Detaches directly-owned child nodes into `out`, leaving trivial
    /// placeholders behind.
    fn strip_children(&mut self, out: &mut Vec<Self>) {
        match self {
            Self::Map { source, .. }
            | Self::FlatMap { source, .. }
            | Self::HandleErrorWith { source, .. }
            | Self::Attempt { source, .. }
            | Self::Unmasked { source, .. }
            | Self::Fork { source, .. } => {
                out.push(std::mem::replace(&mut **source, Self::Canceled));
            }
            Self::OnCancel { source, finalizer } => {
                out.push(std::mem::replace(&mut **source, Self::Canceled));
                out.push(std::mem::replace(&mut **finalizer, Self::Canceled));
            }
            _ => {}
        }
    }

    const fn tag(&self) -> &'static str {
        match self {
            Self::Pure(_) => "Pure",
            Self::Delay(_) => "Delay",
            Self::FromResult(_) => "FromResult",
            Self::RaiseError(_) => "RaiseError",
            Self::Map { .. } => "Map",
            Self::FlatMap { .. } => "FlatMap",
            Self::HandleErrorWith { .. } => "HandleErrorWith",
            Self::Attempt { .. } => "Attempt",
            Self::OnCancel { .. } => "OnCancel",
            Self::Uncancelable { .. } => "Uncancelable",
            Self::Unmasked { .. } => "Unmasked",
            Self::Canceled => "Canceled",
            Self::Fork { .. } => "Fork",
            Self::Async { .. } => "Async",
            Self::Sleep(_) => "Sleep",
            Self::Cede => "Cede",
        }
    }
}

// A long combinator chain is a deep linked list through `source` boxes.
// The default recursive drop would overflow the stack on the same trees the
// interpreter is required to run, so children are drained iteratively.
impl Drop for Node {
    fn drop(&mut self) {
        let mut work: Vec<Self> = Vec::new();
        self.strip_children(&mut work);
        while let Some(mut node) = work.pop() {
            node.strip_children(&mut work);
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
