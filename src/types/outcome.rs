//! Tri-state terminal outcome of a fiber.
//!
//! An [`Outcome`] is produced exactly once, when a fiber completes, and is
//! never recomputed. Cancellation is a distinct variant, not an error value:
//! error handlers never observe it, and `join` delivers it as data.

use core::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The terminal result of running a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome<A, E> {
    /// The fiber ran to completion with a value.
    Succeeded(A),
    /// The fiber terminated with an unhandled domain error.
    Failed(E),
    /// The fiber was canceled before producing a value.
    Canceled,
}

impl<A, E> Outcome<A, E> {
    /// Returns true if this outcome is `Succeeded`.
    #[must_use]
    pub const fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    /// Returns true if this outcome is `Failed`.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns true if this outcome is `Canceled`.
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Returns the discriminant of this outcome.
    #[must_use]
    pub const fn kind(&self) -> OutcomeKind {
        match self {
            Self::Succeeded(_) => OutcomeKind::Succeeded,
            Self::Failed(_) => OutcomeKind::Failed,
            Self::Canceled => OutcomeKind::Canceled,
        }
    }

    /// Returns the success value, if any.
    pub fn succeeded(self) -> Option<A> {
        match self {
            Self::Succeeded(a) => Some(a),
            _ => None,
        }
    }

    /// Returns the failure value, if any.
    pub fn failed(self) -> Option<E> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Maps the success value.
    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> Outcome<B, E> {
        match self {
            Self::Succeeded(a) => Outcome::Succeeded(f(a)),
            Self::Failed(e) => Outcome::Failed(e),
            Self::Canceled => Outcome::Canceled,
        }
    }

    /// Maps the failure value.
    pub fn map_err<E2>(self, f: impl FnOnce(E) -> E2) -> Outcome<A, E2> {
        match self {
            Self::Succeeded(a) => Outcome::Succeeded(a),
            Self::Failed(e) => Outcome::Failed(f(e)),
            Self::Canceled => Outcome::Canceled,
        }
    }

    /// Converts the outcome into a `Result`, folding failure and
    /// cancellation into [`OutcomeError`].
    pub fn into_result(self) -> Result<A, OutcomeError<E>> {
        match self {
            Self::Succeeded(a) => Ok(a),
            Self::Failed(e) => Err(OutcomeError::Failed(e)),
            Self::Canceled => Err(OutcomeError::Canceled),
        }
    }
}

/// Error form of a non-successful [`Outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OutcomeError<E> {
    /// The fiber terminated with an unhandled domain error.
    #[error("fiber failed: {0:?}")]
    Failed(E),
    /// The fiber was canceled.
    #[error("fiber was canceled")]
    Canceled,
}

/// Discriminant of an [`Outcome`], independent of its payload types.
///
/// Used by trace events, which must not capture fiber payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeKind {
    /// Completed with a value.
    Succeeded,
    /// Completed with an unhandled error.
    Failed,
    /// Completed by cancellation.
    Canceled,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_match_variant() {
        let ok: Outcome<i32, &str> = Outcome::Succeeded(1);
        let err: Outcome<i32, &str> = Outcome::Failed("boom");
        let cancel: Outcome<i32, &str> = Outcome::Canceled;

        assert!(ok.is_succeeded());
        assert!(err.is_failed());
        assert!(cancel.is_canceled());
        assert_eq!(ok.kind(), OutcomeKind::Succeeded);
        assert_eq!(err.kind(), OutcomeKind::Failed);
        assert_eq!(cancel.kind(), OutcomeKind::Canceled);
    }

    #[test]
    fn map_touches_only_success() {
        let ok: Outcome<i32, &str> = Outcome::Succeeded(20);
        assert_eq!(ok.map(|n| n + 1), Outcome::Succeeded(21));

        let err: Outcome<i32, &str> = Outcome::Failed("boom");
        assert_eq!(err.map(|n| n + 1), Outcome::Failed("boom"));

        let cancel: Outcome<i32, &str> = Outcome::Canceled;
        assert_eq!(cancel.map(|n| n + 1), Outcome::Canceled);
    }

    #[test]
    fn into_result_folds_non_success() {
        let ok: Outcome<i32, &str> = Outcome::Succeeded(5);
        assert_eq!(ok.into_result(), Ok(5));

        let err: Outcome<i32, &str> = Outcome::Failed("boom");
        assert_eq!(err.into_result(), Err(OutcomeError::Failed("boom")));

        let cancel: Outcome<i32, &str> = Outcome::Canceled;
        assert_eq!(cancel.into_result(), Err(OutcomeError::Canceled));
    }

    #[test]
    fn equality_is_structural() {
        let a: Outcome<i32, &str> = Outcome::Succeeded(1);
        let b: Outcome<i32, &str> = Outcome::Succeeded(1);
        assert_eq!(a, b);
        assert_ne!(a, Outcome::Succeeded(2));
        assert_ne!(a, Outcome::Canceled);
    }

    #[test]
    fn outcome_kind_display() {
        assert_eq!(OutcomeKind::Succeeded.to_string(), "succeeded");
        assert_eq!(OutcomeKind::Canceled.to_string(), "canceled");
    }
}
