use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Instant;
use std::{error::Error, fmt};

/// The pending wait was aborted by `cancel`, a rearm, or handle release
/// before its deadline was reached.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct WaitCanceled;

impl fmt::Display for WaitCanceled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deadline wait canceled")
    }
}

impl Error for WaitCanceled {}

/// Outcome delivered to a deadline-wait callback.
pub type WaitResult = Result<(), WaitCanceled>;

pub(crate) type WaitCallback = Box<dyn FnOnce(WaitResult) + Send>;

/// Completion slot shared between the timer queue and the timer handle.
///
/// Whichever side takes the callback first decides the outcome: the
/// dispatch loop fires it with `Ok(())`, a cancel takes it and posts it
/// with `Err(WaitCanceled)`. The loser finds the slot empty and does
/// nothing, so completion is exactly-once.
pub(crate) type WaitSlot = Arc<Mutex<Option<WaitCallback>>>;

pub(crate) struct TimerEntry {
    pub(crate) deadline: Instant,
    /// Tie-break so equal deadlines fire in arm order.
    pub(crate) seq: u64,
    pub(crate) slot: WaitSlot,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Ord for TimerEntry {
    /// Reversed so a `BinaryHeap<TimerEntry>` behaves as a min-heap,
    /// popping the earliest deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimerQueue {
    pub(crate) fn push(&mut self, deadline: Instant, slot: WaitSlot) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimerEntry {
            deadline,
            seq,
            slot,
        });
    }

    /// Pop the earliest entry if its deadline has passed.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<TimerEntry> {
        match self.heap.peek() {
            Some(entry) if entry.deadline <= now => self.heap.pop(),
            _ => None,
        }
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|entry| entry.deadline)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
