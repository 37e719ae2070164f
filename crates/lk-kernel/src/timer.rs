//! One-shot kernel timers keyed by absolute tick.

use crate::types::ThreadId;
use std::collections::BTreeMap;

/// Identifies an armed timer; ties on the same deadline fire in arming
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerKey {
    deadline: u64,
    seq: u64,
}

impl TimerKey {
    pub fn deadline(&self) -> u64 {
        self.deadline
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// Pull a blocked thread off its wait queue with `TimedOut`.
    WaitTimeout(ThreadId),
    /// End a `thread_sleep`.
    Sleep(ThreadId),
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    armed: BTreeMap<TimerKey, TimerAction>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, deadline: u64, action: TimerAction) -> TimerKey {
        let key = TimerKey {
            deadline,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.armed.insert(key, action);
        key
    }

    /// False if the timer already fired or was cancelled.
    pub fn cancel(&mut self, key: TimerKey) -> bool {
        self.armed.remove(&key).is_some()
    }

    /// Removes and returns every timer due at or before `now`.
    pub fn expire(&mut self, now: u64) -> Vec<(TimerKey, TimerAction)> {
        let mut fired = Vec::new();
        while let Some(entry) = self.armed.first_entry() {
            if entry.key().deadline > now {
                break;
            }
            fired.push(entry.remove_entry());
        }
        fired
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.armed.keys().next().map(|k| k.deadline)
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}
