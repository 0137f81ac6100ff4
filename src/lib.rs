//! Weft: trampolined, cancel-correct effect runtime for Rust.
//!
//! # Overview
//!
//! Weft describes computations as immutable effect trees and runs them on
//! cooperatively-scheduled, cancellable fibers. The interpreter is a
//! trampoline: no native recursion, so hundred-thousand-deep `flat_map`
//! chains run in constant stack space. Cancellation is a first-class
//! protocol — request, unwind, finalize — never a silent drop, and
//! supervisors guarantee child fibers do not outlive their scope.
//!
//! # Core Guarantees
//!
//! - **Laziness**: combinators allocate tree nodes; user code runs only
//!   under interpretation
//! - **Stack safety**: interpretation and drop of arbitrarily deep trees
//!   never recurse
//! - **Cancel-correctness**: cancellation is checked at defined points,
//!   deferred under masks, and runs `on_cancel` finalizers in LIFO order
//! - **Structured concurrency**: closing a supervisor scope cancels and
//!   awaits every registered child
//! - **No silent failures**: unobserved errors, finalizer errors, and
//!   errors displaced by cancellation are reported to the scheduler binding
//! - **Fairness**: fibers yield voluntarily after a bounded step budget
//!
//! # Module Structure
//!
//! - [`types`]: Core types (identifiers, outcomes, logical time)
//! - [`effect`]: The effect tree and its constructor surface
//! - [`runtime`]: Fibers, the interpreter loop, and the runtime context
//! - [`scheduler`]: The scheduler binding and the shipped drivers
//! - [`supervisor`]: Structured-concurrency scopes
//! - [`sync`]: Fiber-level primitives ([`Ref`])
//! - [`time`]: Time sources for the drivers
//! - [`trace`](mod@trace): Bounded diagnostic ring buffer
//! - [`error`](mod@error): Runtime failure types
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use weft::{Effect, LabScheduler, Outcome, Runtime};
//!
//! let sched = LabScheduler::new();
//! let runtime = Runtime::new(Rc::new(sched.clone()));
//!
//! let effect: weft::Effect<u32, String> =
//!     Effect::pure(40).map(|n| n + 2);
//! let handle = runtime.spawn(effect);
//! sched.run_until_idle();
//! assert_eq!(handle.try_outcome(), Some(Outcome::Succeeded(42)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod effect;
pub mod error;
pub mod runtime;
pub mod scheduler;
pub mod supervisor;
pub mod sync;
pub mod time;
pub mod trace;
mod tracing_compat;
pub mod types;

pub use effect::{AsyncCallback, Effect, Unmask};
pub use error::{RuntimeFailure, SuperviseError};
pub use runtime::{FiberHandle, RunResult, Runtime, RuntimeBuilder};
pub use scheduler::{BlockingScheduler, LabScheduler, Scheduler};
pub use supervisor::{Supervisor, supervised};
pub use sync::Ref;
pub use trace::{TraceBuffer, TraceEvent, TraceEventKind};
pub use types::{FiberId, Outcome, OutcomeError, OutcomeKind, Time};

/// The weft prelude: the types most programs need.
///
/// ```
/// use weft::prelude::*;
/// ```
pub mod prelude {
    pub use crate::effect::{AsyncCallback, Effect, Unmask};
    pub use crate::runtime::{FiberHandle, RunResult, Runtime};
    pub use crate::scheduler::{BlockingScheduler, LabScheduler, Scheduler};
    pub use crate::supervisor::{Supervisor, supervised};
    pub use crate::sync::Ref;
    pub use crate::types::{FiberId, Outcome, OutcomeKind};
}
