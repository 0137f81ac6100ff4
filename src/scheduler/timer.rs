//! Deadline-ordered queue of deferred thunks.
//!
//! A small min-heap of `(deadline, thunk)` pairs shared by both scheduler
//! drivers. Insertion order breaks deadline ties so that two thunks
//! scheduled for the same instant fire in the order they were scheduled.

use super::Thunk;
use crate::types::Time;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct TimerEntry {
    deadline: Time,
    seq: u64,
    thunk: Thunk,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of thunks ordered by deadline.
#[derive(Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Adds a thunk firing at `deadline`.
    pub(crate) fn insert(&mut self, deadline: Time, thunk: Thunk) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimerEntry {
            deadline,
            seq,
            thunk,
        });
    }

    /// Returns the earliest deadline, if any.
    pub(crate) fn peek_deadline(&self) -> Option<Time> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pops every thunk whose deadline is `<= now`, in firing order.
    pub(crate) fn pop_due(&mut self, now: Time) -> Vec<Thunk> {
        let mut due = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline <= now {
                if let Some(entry) = self.heap.pop() {
                    due.push(entry.thunk);
                } else {
                    break;
                }
            } else {
                break;
            }
        }
        due
    }
}

impl std::fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerQueue")
            .field("len", &self.heap.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn empty_queue_has_no_deadline() {
        let queue = TimerQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.peek_deadline(), None);
    }

    #[test]
    fn orders_by_deadline() {
        let mut queue = TimerQueue::new();
        queue.insert(Time::from_millis(200), Box::new(|| {}));
        queue.insert(Time::from_millis(100), Box::new(|| {}));
        queue.insert(Time::from_millis(150), Box::new(|| {}));
        assert_eq!(queue.peek_deadline(), Some(Time::from_millis(100)));
    }

    #[test]
    fn pop_due_fires_in_deadline_then_insertion_order() {
        let fired = Rc::new(RefCell::new(Vec::new()));
        let mut queue = TimerQueue::new();
        for (label, ms) in [("a", 100u64), ("b", 50), ("c", 100)] {
            let fired = fired.clone();
            queue.insert(
                Time::from_millis(ms),
                Box::new(move || fired.borrow_mut().push(label)),
            );
        }

        for thunk in queue.pop_due(Time::from_millis(100)) {
            thunk();
        }
        assert_eq!(*fired.borrow(), vec!["b", "a", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_due_leaves_future_timers() {
        let mut queue = TimerQueue::new();
        queue.insert(Time::from_millis(50), Box::new(|| {}));
        queue.insert(Time::from_millis(200), Box::new(|| {}));

        let due = queue.pop_due(Time::from_millis(125));
        assert_eq!(due.len(), 1);
        assert_eq!(queue.peek_deadline(), Some(Time::from_millis(200)));
    }
}
