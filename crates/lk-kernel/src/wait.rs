//! Wait queues: FIFO lists of blocked threads, the building block under
//! every blocking primitive.

use crate::arch::ArchCpu;
use crate::error::{KResult, KernelError};
use crate::thread::dispatch::Position;
use crate::thread::tcb::{Link, ThreadState};
use crate::timer::TimerAction;
use crate::types::{CpuNum, EventId, MutexId, SemaphoreId, ThreadId, Timeout, Wait, WaitQueueId};
use crate::Kernel;
use log::trace;
use std::collections::VecDeque;

pub const WAIT_QUEUE_MAGIC: u32 = u32::from_be_bytes(*b"wait");

/// What a wait queue belongs to, so that pulling a waiter out early can
/// undo the bookkeeping its owner did when the waiter blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitQueueOwner {
    Standalone,
    Mutex(MutexId),
    Semaphore(SemaphoreId),
    Event(EventId),
    /// Retcode queue of a thread, for joiners.
    Join(ThreadId),
}

#[derive(Debug)]
pub struct WaitQueue {
    pub(crate) magic: u32,
    pub(crate) waiters: VecDeque<ThreadId>,
    pub(crate) owner: WaitQueueOwner,
}

impl WaitQueue {
    pub fn count(&self) -> usize {
        self.waiters.len()
    }

    pub fn owner(&self) -> WaitQueueOwner {
        self.owner
    }

    /// Waiters in wake order.
    pub fn waiters(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.waiters.iter().copied()
    }
}

impl<C: ArchCpu> Kernel<C> {
    pub fn wait_queue_create(&mut self) -> KResult<WaitQueueId> {
        self.wait_queue_alloc(WaitQueueOwner::Standalone)
    }

    pub(crate) fn wait_queue_alloc(&mut self, owner: WaitQueueOwner) -> KResult<WaitQueueId> {
        self.wait_queues
            .insert(WaitQueue {
                magic: WAIT_QUEUE_MAGIC,
                waiters: VecDeque::new(),
                owner,
            })
            .map(WaitQueueId)
            .map_err(|_| KernelError::NoMemory)
    }

    pub fn wait_queue(&self, id: WaitQueueId) -> Option<&WaitQueue> {
        self.wait_queues
            .get(id.0)
            .filter(|wq| wq.magic == WAIT_QUEUE_MAGIC)
    }

    pub(crate) fn wq(&self, id: WaitQueueId) -> &WaitQueue {
        match self.wait_queues.get(id.0) {
            Some(wq) => {
                assert_eq!(wq.magic, WAIT_QUEUE_MAGIC, "wait queue {:?}: bad magic", id);
                wq
            }
            None => panic!("wait queue {:?}: stale or destroyed handle", id),
        }
    }

    pub(crate) fn wq_mut(&mut self, id: WaitQueueId) -> &mut WaitQueue {
        match self.wait_queues.get_mut(id.0) {
            Some(wq) => {
                assert_eq!(wq.magic, WAIT_QUEUE_MAGIC, "wait queue {:?}: bad magic", id);
                wq
            }
            None => panic!("wait queue {:?}: stale or destroyed handle", id),
        }
    }

    /// Blocks the current thread on `wq` until it is woken or `timeout`
    /// ticks pass.
    ///
    /// An immediate timeout fails with `TimedOut` without queueing.
    /// Otherwise the caller is switched out and `Wait::Blocked` is
    /// returned; the wake status is collected with `resume_status`.
    pub fn wait_queue_block(
        &mut self,
        cpu: &mut C,
        wq: WaitQueueId,
        timeout: Timeout,
    ) -> KResult<Wait> {
        self.enter_critical_section(cpu);
        let ret = self.block_locked(cpu, wq, timeout);
        self.exit_critical_section(cpu);
        ret
    }

    pub(crate) fn block_locked(
        &mut self,
        cpu: &mut C,
        wq: WaitQueueId,
        timeout: Timeout,
    ) -> KResult<Wait> {
        let n = cpu.cpu_num();
        assert!(
            !self.percpu[n].in_irq,
            "wait_queue_block: blocking in interrupt context on cpu {}",
            n
        );
        let id = self.current_id(n);
        assert!(!self.thread(id).is_idle(), "wait_queue_block: idle thread cannot block");
        let _ = self.wq(wq);

        if timeout.is_immediate() {
            return Err(KernelError::TimedOut);
        }

        self.wq_mut(wq).waiters.push_back(id);
        let deadline = match timeout {
            Timeout::Ticks(ticks) => Some(self.now + ticks),
            _ => None,
        };
        let timer = deadline.map(|d| self.timers.arm(d, TimerAction::WaitTimeout(id)));
        let t = self.thread_mut(id);
        t.state = ThreadState::Blocked;
        t.link = Link::WaitQueue(wq);
        t.wake_status = None;
        t.timer = timer;
        trace!("{:?} blocks on {:?} ({:?})", id, wq, timeout);

        self.resched(cpu);
        Ok(Wait::Blocked)
    }

    /// Moves a thread that was just taken off its wait queue to the tail of
    /// its run-queue bucket, with `status` as its wake result.
    fn ready_from_wait(&mut self, id: ThreadId, status: KResult<()>, local: CpuNum) {
        let t = self.thread_mut(id);
        debug_assert_eq!(t.state, ThreadState::Blocked);
        t.link = Link::Unlinked;
        t.wake_status = Some(status);
        if let Some(key) = t.timer.take() {
            self.timers.cancel(key);
        }
        trace!("{:?} woken with {:?}", id, status);
        self.make_ready(id, Position::Tail);
        self.kick_cpus_for(id, local);
    }

    /// Parks the current thread at the head of its bucket ahead of a
    /// reschedule, so waking someone doesn't cost it its turn.
    fn requeue_current(&mut self, n: CpuNum) {
        assert!(
            !self.percpu[n].in_irq,
            "wake with reschedule from interrupt context"
        );
        let id = self.current_id(n);
        self.make_ready(id, Position::Head);
    }

    /// Wakes the longest waiter on `wq`. With `reschedule` the caller may
    /// be switched out in favour of the woken thread.
    pub fn wait_queue_wake_one(
        &mut self,
        cpu: &mut C,
        wq: WaitQueueId,
        reschedule: bool,
        status: KResult<()>,
    ) -> Option<ThreadId> {
        self.enter_critical_section(cpu);
        let woken = self.wake_one_locked(cpu, wq, reschedule, status);
        self.exit_critical_section(cpu);
        woken
    }

    pub(crate) fn wake_one_locked(
        &mut self,
        cpu: &mut C,
        wq: WaitQueueId,
        reschedule: bool,
        status: KResult<()>,
    ) -> Option<ThreadId> {
        let n = cpu.cpu_num();
        let id = self.wq_mut(wq).waiters.pop_front()?;
        if reschedule {
            self.requeue_current(n);
        }
        self.ready_from_wait(id, status, n);
        if reschedule {
            self.resched(cpu);
        }
        Some(id)
    }

    /// Wakes every waiter on `wq`, keeping their order. Returns how many.
    pub fn wait_queue_wake_all(
        &mut self,
        cpu: &mut C,
        wq: WaitQueueId,
        reschedule: bool,
        status: KResult<()>,
    ) -> usize {
        self.enter_critical_section(cpu);
        let count = self.wake_all_locked(cpu, wq, reschedule, status);
        self.exit_critical_section(cpu);
        count
    }

    pub(crate) fn wake_all_locked(
        &mut self,
        cpu: &mut C,
        wq: WaitQueueId,
        reschedule: bool,
        status: KResult<()>,
    ) -> usize {
        let n = cpu.cpu_num();
        let waiters = std::mem::take(&mut self.wq_mut(wq).waiters);
        if waiters.is_empty() {
            return 0;
        }
        if reschedule {
            self.requeue_current(n);
        }
        for &id in &waiters {
            self.ready_from_wait(id, status, n);
        }
        if reschedule {
            self.resched(cpu);
        }
        waiters.len()
    }

    /// Wakes everyone with `ObjectDestroyed` and retires the queue.
    pub fn wait_queue_destroy(&mut self, cpu: &mut C, wq: WaitQueueId, reschedule: bool) {
        self.enter_critical_section(cpu);
        self.destroy_wait_queue_locked(cpu, wq, reschedule);
        self.exit_critical_section(cpu);
    }

    pub(crate) fn destroy_wait_queue_locked(
        &mut self,
        cpu: &mut C,
        wq: WaitQueueId,
        reschedule: bool,
    ) {
        let n = cpu.cpu_num();
        let queue = self.wq_mut(wq);
        queue.magic = 0;
        let waiters = std::mem::take(&mut queue.waiters);
        self.wait_queues.remove(wq.0);
        if waiters.is_empty() {
            return;
        }
        if reschedule {
            self.requeue_current(n);
        }
        for &id in &waiters {
            self.ready_from_wait(id, Err(KernelError::ObjectDestroyed), n);
        }
        if reschedule {
            self.resched(cpu);
        }
    }

    /// Pulls `id` out of whatever wait queue it is blocked on and readies it
    /// with `status`. Does not reschedule.
    pub fn thread_unblock_from_wait_queue(
        &mut self,
        cpu: &mut C,
        id: ThreadId,
        status: KResult<()>,
    ) -> KResult<()> {
        self.enter_critical_section(cpu);
        let ret = if self.thread(id).state == ThreadState::Blocked {
            self.unblock_locked(id, status, cpu.cpu_num());
            Ok(())
        } else {
            Err(KernelError::NotBlocked)
        };
        self.exit_critical_section(cpu);
        ret
    }

    pub(crate) fn unblock_locked(&mut self, id: ThreadId, status: KResult<()>, local: CpuNum) {
        let wq = match self.thread(id).link {
            Link::WaitQueue(wq) => wq,
            other => panic!("unblock: thread {:?} is not on a wait queue ({:?})", id, other),
        };
        let queue = self.wq_mut(wq);
        let Some(pos) = queue.waiters.iter().position(|&w| w == id) else {
            panic!("unblock: thread {:?} missing from {:?}", id, wq);
        };
        queue.waiters.remove(pos);
        let owner = queue.owner;
        self.undo_wait_accounting(owner);
        self.ready_from_wait(id, status, local);
    }

    /// A waiter left without being granted the object.
    fn undo_wait_accounting(&mut self, owner: WaitQueueOwner) {
        match owner {
            WaitQueueOwner::Semaphore(s) => self.sem_mut(s).count += 1,
            WaitQueueOwner::Mutex(m) => self.mutex_mut(m).count -= 1,
            WaitQueueOwner::Standalone | WaitQueueOwner::Event(_) | WaitQueueOwner::Join(_) => {}
        }
    }
}
