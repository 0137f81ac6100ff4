//! Error types reported by the runtime.
//!
//! Fiber-level domain errors travel through the typed error channel of an
//! [`Effect`](crate::effect::Effect) and never appear here. The types in
//! this module cover the runtime's own failure surface: supervision
//! registration races and diagnostics funneled through
//! [`Scheduler::report_failure`](crate::scheduler::Scheduler::report_failure).

use crate::types::FiberId;
use thiserror::Error;

/// Returned when a child registration reaches a supervisor whose scope has
/// already begun closing.
///
/// The fiber is not created; nothing leaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("supervisor scope is closing")]
pub struct SuperviseError;

/// A failure that surfaced outside every fiber's error channel.
///
/// These are delivered to the scheduler binding's `report_failure` hook
/// rather than thrown into host machinery. Payloads are pre-rendered to
/// strings because the originating error type is erased at this boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeFailure {
    /// A fiber completed with `Failed` and nobody had registered a
    /// join-listener to observe it.
    #[error("fiber {fiber} failed with no observer: {error}")]
    UnobservedError {
        /// The fiber that failed.
        fiber: FiberId,
        /// Rendered error value.
        error: String,
    },
    /// One or more cancellation finalizers failed while the fiber was
    /// unwinding. The unwind itself completed and the fiber's outcome is
    /// still `Canceled`.
    #[error("fiber {fiber} finalizer errors during cancellation: {errors:?}")]
    FinalizerErrors {
        /// The fiber that was unwinding.
        fiber: FiberId,
        /// Rendered error values, in the order the finalizers ran.
        errors: Vec<String>,
    },
    /// A domain error was displaced because cancellation was observed while
    /// the error was still propagating through a masked region.
    #[error("fiber {fiber} error displaced by cancellation: {error}")]
    ErrorDisplacedByCancel {
        /// The fiber that was canceled.
        fiber: FiberId,
        /// Rendered error value that lost to cancellation.
        error: String,
    },
}
