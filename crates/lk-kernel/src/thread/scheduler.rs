use crate::types::{CpuNum, Priority, ThreadId, NUM_PRIORITIES};
use std::collections::VecDeque;

/// Ready-thread storage.
pub trait Scheduler: Send {
    /// Queue `thread` ahead of everything else at its priority.
    fn enqueue_head(&mut self, thread: ThreadId, priority: Priority, pinned: Option<CpuNum>);

    /// Queue `thread` behind everything else at its priority.
    fn enqueue_tail(&mut self, thread: ThreadId, priority: Priority, pinned: Option<CpuNum>);

    /// Remove `thread` from the queue for `priority`.
    fn dequeue(&mut self, thread: ThreadId, priority: Priority) -> bool;

    /// Take the next thread `cpu` may run.
    fn schedule(&mut self, cpu: CpuNum) -> Option<ThreadId>;

    /// Priority `schedule(cpu)` would pick from, without taking anything.
    fn peek(&self, cpu: CpuNum) -> Option<Priority>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    thread: ThreadId,
    pinned: Option<CpuNum>,
}

impl Entry {
    fn runs_on(&self, cpu: CpuNum) -> bool {
        self.pinned.map_or(true, |p| p == cpu)
    }
}

/// One FIFO per priority plus a bitmap of the non-empty ones, shared by
/// every CPU.
pub struct PriorityScheduler {
    queues: [VecDeque<Entry>; NUM_PRIORITIES],
    bitmap: u32,
    len: usize,
}

impl Default for PriorityScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityScheduler {
    pub fn new() -> Self {
        Self {
            queues: std::array::from_fn(|_| VecDeque::new()),
            bitmap: 0,
            len: 0,
        }
    }

    pub fn bitmap(&self) -> u32 {
        self.bitmap
    }

    /// Threads queued at `priority`, head first.
    pub fn queued(&self, priority: Priority) -> impl Iterator<Item = ThreadId> + '_ {
        self.queues[priority.val()].iter().map(|e| e.thread)
    }

    fn mark(&mut self, priority: Priority) {
        self.bitmap |= 1 << priority.val();
        self.len += 1;
    }

    fn unmark_if_empty(&mut self, level: usize) {
        if self.queues[level].is_empty() {
            self.bitmap &= !(1 << level);
        }
    }

    /// Non-empty levels, highest first.
    fn levels(&self) -> impl Iterator<Item = usize> {
        let mut bits = self.bitmap;
        core::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let level = 31 - bits.leading_zeros() as usize;
            bits &= !(1 << level);
            Some(level)
        })
    }
}

impl Scheduler for PriorityScheduler {
    fn enqueue_head(&mut self, thread: ThreadId, priority: Priority, pinned: Option<CpuNum>) {
        self.queues[priority.val()].push_front(Entry { thread, pinned });
        self.mark(priority);
    }

    fn enqueue_tail(&mut self, thread: ThreadId, priority: Priority, pinned: Option<CpuNum>) {
        self.queues[priority.val()].push_back(Entry { thread, pinned });
        self.mark(priority);
    }

    fn dequeue(&mut self, thread: ThreadId, priority: Priority) -> bool {
        let level = priority.val();
        let Some(pos) = self.queues[level].iter().position(|e| e.thread == thread) else {
            return false;
        };
        self.queues[level].remove(pos);
        self.len -= 1;
        self.unmark_if_empty(level);
        true
    }

    fn schedule(&mut self, cpu: CpuNum) -> Option<ThreadId> {
        for level in self.levels() {
            if let Some(pos) = self.queues[level].iter().position(|e| e.runs_on(cpu)) {
                let entry = self.queues[level].remove(pos)?;
                self.len -= 1;
                self.unmark_if_empty(level);
                return Some(entry.thread);
            }
        }
        None
    }

    fn peek(&self, cpu: CpuNum) -> Option<Priority> {
        self.levels()
            .find(|&level| self.queues[level].iter().any(|e| e.runs_on(cpu)))
            .and_then(|level| Priority::new(level as u8))
    }

    fn len(&self) -> usize {
        self.len
    }
}
