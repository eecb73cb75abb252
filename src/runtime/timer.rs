//! Deadline heap for the run loop's timers.
//!
//! Entries are never removed on cancellation. Each timer carries a
//! generation that is bumped whenever its deadline changes or its waits are
//! cancelled; popped entries whose generation no longer matches are stale
//! and ignored by the caller.

use crate::types::Time;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A scheduled expiry of one timer at one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerEntry {
    pub(crate) deadline: Time,
    pub(crate) timer: u64,
    pub(crate) generation: u64,
    seq: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first, then FIFO).
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

/// A min-heap of timer expiries ordered by deadline.
#[derive(Debug, Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimerHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    /// Schedules `timer` at `generation` to expire at `deadline`.
    pub(crate) fn insert(&mut self, timer: u64, generation: u64, deadline: Time) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimerEntry {
            deadline,
            timer,
            generation,
            seq,
        });
    }

    /// Returns the earliest deadline, if any.
    pub(crate) fn peek_deadline(&self) -> Option<Time> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pops all entries that have expired (deadline <= now).
    pub(crate) fn pop_expired(&mut self, now: Time) -> Vec<TimerEntry> {
        let mut expired = Vec::new();
        while self.heap.peek().is_some_and(|entry| entry.deadline <= now) {
            if let Some(entry) = self.heap.pop() {
                expired.push(entry);
            }
        }
        expired
    }

    /// Drops entries rejected by `is_live`.
    pub(crate) fn retain(&mut self, mut is_live: impl FnMut(&TimerEntry) -> bool) {
        self.heap.retain(|entry| is_live(entry));
    }
}
