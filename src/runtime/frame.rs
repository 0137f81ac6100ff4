//! Continuation frames: one entry per pending combinator.
//!
//! The interpreter pushes a frame when it descends into a combinator's
//! source and pops it when the source yields a value or an error. The
//! innermost pending frame is processed first.

use crate::effect::node::{AnyValue, Node};
use std::fmt;

/// A pending continuation awaiting its source effect's result.
pub(crate) enum Frame {
    /// Apply a value transformation.
    Map(Box<dyn FnOnce(AnyValue) -> AnyValue>),
    /// Continue with a dependent effect.
    FlatMap(Box<dyn FnOnce(AnyValue) -> Node>),
    /// Recover from a domain error.
    ErrorHandler(Box<dyn FnOnce(AnyValue) -> Node>),
    /// Reify success or failure as a value.
    Attempt(Box<dyn FnOnce(Result<AnyValue, AnyValue>) -> AnyValue>),
    /// Cancellation guard: the pending finalizer runs only if the
    /// cancellation unwind passes this frame.
    CancelGuard(Node),
    /// An `uncancelable` region is open; popping decrements the masking
    /// depth.
    MaskEnter,
    /// An unmask token is applied; popping restores the saved depth.
    MaskExit {
        /// Masking depth to restore when the unmasked region ends.
        restore: u32,
    },
    /// Resume-on-executor: what a scheduled re-entry should process next.
    /// Always the top frame when a fiber leaves the run loop non-terminally.
    Resume(Box<Resumption>),
    /// Cancellation loop: a finalizer is running; when it finishes, the
    /// unwind continues.
    CancelLoop,
}

/// Payload of a [`Frame::Resume`].
pub(crate) enum Resumption {
    /// Interpret a fresh node (initial run).
    Start(Node),
    /// Feed a value to the continuation stack.
    Value(AnyValue),
    /// Feed an error to the continuation stack.
    Error(AnyValue),
    /// Enter (or continue) the cancellation unwind.
    Cancel,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Map(_) => "Map",
            Self::FlatMap(_) => "FlatMap",
            Self::ErrorHandler(_) => "ErrorHandler",
            Self::Attempt(_) => "Attempt",
            Self::CancelGuard(_) => "CancelGuard",
            Self::MaskEnter => "MaskEnter",
            Self::MaskExit { .. } => "MaskExit",
            Self::Resume(_) => "Resume",
            Self::CancelLoop => "CancelLoop",
        };
        f.write_str(tag)
    }
}
