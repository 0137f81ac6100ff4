//! Bounded diagnostic tracing for the interpreter.
//!
//! The runtime records one [`TraceEvent`] per interesting interpreter
//! transition into a fixed-capacity ring buffer. Recording is O(1), never
//! allocates after construction, and overwrites the oldest entry once full;
//! it stays off the cancellation and error critical paths.
//!
//! Buffers are scoped to one runtime context. There is no process-wide
//! trace state.

use crate::types::{FiberId, OutcomeKind};
use serde::{Deserialize, Serialize};

/// What happened at one interpreter transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceEventKind {
    /// A fiber was created and scheduled for its first run.
    Spawned,
    /// A fiber suspended awaiting an async completion.
    Suspended,
    /// A suspended fiber was resumed by its async callback.
    Resumed,
    /// A fiber voluntarily yielded after exhausting its step budget.
    Yielded,
    /// Cancellation was requested for a fiber.
    CancelRequested,
    /// A cancellation finalizer started running during an unwind.
    FinalizerRan,
    /// A fiber reached its terminal outcome.
    Completed(OutcomeKind),
}

/// One recorded interpreter transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Monotonic sequence number within the owning buffer.
    pub seq: u64,
    /// The fiber the event belongs to.
    pub fiber: FiberId,
    /// What happened.
    pub kind: TraceEventKind,
}

/// Fixed-capacity ring buffer of the most recent trace events.
///
/// [`invalidate`](Self::invalidate) releases the backing storage; any later
/// [`push`](Self::push) or [`snapshot`](Self::snapshot) is a programming
/// error and panics.
#[derive(Debug)]
pub struct TraceBuffer {
    slots: Option<Box<[Option<TraceEvent>]>>,
    capacity: usize,
    cursor: u64,
}

impl TraceBuffer {
    /// Creates a buffer holding the `capacity` most recent events.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "trace buffer capacity must be nonzero");
        Self {
            slots: Some(vec![None; capacity].into_boxed_slice()),
            capacity,
            cursor: 0,
        }
    }

    /// Returns the fixed capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of events currently retrievable.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::try_from(self.cursor).map_or(self.capacity, |c| c.min(self.capacity))
    }

    /// Returns true if no events have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    /// Records an event, assigning it the next sequence number and
    /// overwriting the oldest entry once the buffer is full.
    ///
    /// # Panics
    ///
    /// Panics if the buffer has been invalidated.
    pub fn push(&mut self, fiber: FiberId, kind: TraceEventKind) -> TraceEvent {
        let slots = self
            .slots
            .as_mut()
            .expect("trace buffer used after invalidate");
        let event = TraceEvent {
            seq: self.cursor,
            fiber,
            kind,
        };
        let idx = usize::try_from(self.cursor % self.capacity as u64)
            .expect("ring index fits in usize");
        slots[idx] = Some(event);
        self.cursor += 1;
        event
    }

    /// Materializes the retained events, newest first.
    ///
    /// # Panics
    ///
    /// Panics if the buffer has been invalidated.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TraceEvent> {
        let slots = self
            .slots
            .as_ref()
            .expect("trace buffer used after invalidate");
        let len = self.len() as u64;
        let mut out = Vec::with_capacity(self.len());
        for back in 1..=len {
            let seq = self.cursor - back;
            let idx = usize::try_from(seq % self.capacity as u64)
                .expect("ring index fits in usize");
            if let Some(event) = slots[idx] {
                out.push(event);
            }
        }
        out
    }

    /// Renders the retained events, newest first, as a JSON array.
    ///
    /// # Panics
    ///
    /// Panics if the buffer has been invalidated.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).expect("trace events serialize")
    }

    /// Releases the backing storage. Terminal: the buffer is unusable
    /// afterwards. Idempotent.
    pub fn invalidate(&mut self) {
        self.slots = None;
    }

    /// Returns true if the buffer has been invalidated.
    #[must_use]
    pub const fn is_invalidated(&self) -> bool {
        self.slots.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fiber(n: u64) -> FiberId {
        FiberId::new_for_test(n)
    }

    #[test]
    fn empty_buffer_snapshot() {
        let buf = TraceBuffer::new(4);
        assert!(buf.is_empty());
        assert_eq!(buf.snapshot(), vec![]);
    }

    #[test]
    fn push_assigns_monotonic_seq() {
        let mut buf = TraceBuffer::new(4);
        let a = buf.push(fiber(1), TraceEventKind::Spawned);
        let b = buf.push(fiber(1), TraceEventKind::Suspended);
        assert_eq!(a.seq, 0);
        assert_eq!(b.seq, 1);
    }

    #[test]
    fn overflow_keeps_last_capacity_events_newest_first() {
        let mut buf = TraceBuffer::new(3);
        for n in 0..5 {
            buf.push(fiber(n), TraceEventKind::Spawned);
        }
        let events = buf.snapshot();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].seq, 4);
        assert_eq!(events[1].seq, 3);
        assert_eq!(events[2].seq, 2);
        assert_eq!(events[0].fiber, fiber(4));
    }

    #[test]
    fn exact_capacity_retains_everything() {
        let mut buf = TraceBuffer::new(2);
        buf.push(fiber(0), TraceEventKind::Spawned);
        buf.push(fiber(1), TraceEventKind::Spawned);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.snapshot().len(), 2);
    }

    #[test]
    fn invalidate_is_terminal() {
        let mut buf = TraceBuffer::new(2);
        buf.push(fiber(0), TraceEventKind::Spawned);
        buf.invalidate();
        assert!(buf.is_invalidated());
        buf.invalidate(); // idempotent
    }

    #[test]
    #[should_panic(expected = "trace buffer used after invalidate")]
    fn push_after_invalidate_panics() {
        let mut buf = TraceBuffer::new(2);
        buf.invalidate();
        buf.push(fiber(0), TraceEventKind::Spawned);
    }

    #[test]
    #[should_panic(expected = "trace buffer used after invalidate")]
    fn snapshot_after_invalidate_panics() {
        let mut buf = TraceBuffer::new(2);
        buf.invalidate();
        let _ = buf.snapshot();
    }

    #[test]
    #[should_panic(expected = "capacity must be nonzero")]
    fn zero_capacity_rejected() {
        let _ = TraceBuffer::new(0);
    }

    #[test]
    fn events_serde_roundtrip() {
        let event = TraceEvent {
            seq: 3,
            fiber: fiber(9),
            kind: TraceEventKind::Completed(crate::types::OutcomeKind::Canceled),
        };
        let json = serde_json::to_string(&event).expect("serialize");
        let back: TraceEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(event, back);
    }

    #[test]
    fn to_json_renders_array() {
        let mut buf = TraceBuffer::new(2);
        buf.push(fiber(1), TraceEventKind::Spawned);
        let json = buf.to_json();
        assert!(json.starts_with('['), "{json}");
        assert!(json.contains("Spawned"), "{json}");
    }
}
