//! Fiber-level synchronization primitives.
//!
//! Everything here leans on the runtime's scheduling model: the interpreter
//! never interleaves synchronous steps of different fibers, so these
//! primitives need no locks.

pub mod cell;

pub use cell::Ref;
