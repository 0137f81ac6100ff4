//! A mutable cell with atomic effectful operations.
//!
//! [`Ref`] operations are `delay` leaves of the effect tree. They are
//! atomic relative to every other effect on the same runtime because the
//! interpreter never interleaves two synchronous steps of different fibers
//! within one host turn; there is no lock and nothing to contend on.

use crate::effect::Effect;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A mutable cell usable from any fiber on the same runtime.
///
/// Cheap to clone; clones share the same state.
pub struct Ref<A> {
    inner: Rc<RefCell<A>>,
}

impl<A: 'static> Ref<A> {
    /// Creates a cell directly, outside the effect tree.
    #[must_use]
    pub fn new(value: A) -> Self {
        Self {
            inner: Rc::new(RefCell::new(value)),
        }
    }

    /// Allocates a cell as an effect.
    pub fn of<E: 'static>(value: A) -> Effect<Self, E> {
        Effect::delay(move || Self::new(value))
    }

    /// Reads the current value.
    pub fn get<E: 'static>(&self) -> Effect<A, E>
    where
        A: Clone,
    {
        let inner = Rc::clone(&self.inner);
        Effect::delay(move || inner.borrow().clone())
    }

    /// Replaces the value.
    pub fn set<E: 'static>(&self, value: A) -> Effect<(), E> {
        let inner = Rc::clone(&self.inner);
        Effect::delay(move || {
            *inner.borrow_mut() = value;
        })
    }

    /// Replaces the value, yielding the previous one.
    pub fn get_and_set<E: 'static>(&self, value: A) -> Effect<A, E> {
        let inner = Rc::clone(&self.inner);
        Effect::delay(move || std::mem::replace(&mut *inner.borrow_mut(), value))
    }

    /// Mutates the value in place.
    pub fn update<E, F>(&self, f: F) -> Effect<(), E>
    where
        E: 'static,
        F: FnOnce(&mut A) + 'static,
    {
        let inner = Rc::clone(&self.inner);
        Effect::delay(move || f(&mut inner.borrow_mut()))
    }

    /// Mutates the value in place and yields the updated value.
    pub fn update_and_get<E, F>(&self, f: F) -> Effect<A, E>
    where
        A: Clone,
        E: 'static,
        F: FnOnce(&mut A) + 'static,
    {
        let inner = Rc::clone(&self.inner);
        Effect::delay(move || {
            let mut value = inner.borrow_mut();
            f(&mut value);
            value.clone()
        })
    }

    /// Mutates the value and computes a result, atomically.
    pub fn modify<B, E, F>(&self, f: F) -> Effect<B, E>
    where
        B: 'static,
        E: 'static,
        F: FnOnce(&mut A) -> B + 'static,
    {
        let inner = Rc::clone(&self.inner);
        Effect::delay(move || f(&mut inner.borrow_mut()))
    }
}

impl<A> Clone for Ref<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<A: fmt::Debug> fmt::Debug for Ref<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({:?})", self.inner.borrow())
    }
}
