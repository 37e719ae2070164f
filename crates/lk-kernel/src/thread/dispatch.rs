//! Picking and switching threads: the paths every block, wake, yield and
//! timer tick funnel through.

use super::tcb::{Link, ThreadState};
use crate::arch::ArchCpu;
use crate::error::KernelError;
use crate::timer::{TimerAction, TimerKey};
use crate::types::{CpuNum, HandlerReturn, ThreadId};
use crate::Kernel;
use log::trace;

/// Where a thread goes in its run-queue bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Position {
    Head,
    Tail,
}

impl<C: ArchCpu> Kernel<C> {
    /// Puts a thread on the run queue. Idle threads are never queued; they
    /// are what a CPU runs when the queue has nothing for it.
    pub(crate) fn make_ready(&mut self, id: ThreadId, pos: Position) {
        let t = self.thread_mut(id);
        assert_eq!(t.link, Link::Unlinked, "thread {:?} is already on a list", id);
        t.state = ThreadState::Ready;
        if t.is_idle() {
            return;
        }
        let (prio, pin) = (t.priority, t.pinned_cpu);
        t.link = Link::RunQueue(prio);
        match pos {
            Position::Head => self.scheduler.enqueue_head(id, prio, pin),
            Position::Tail => self.scheduler.enqueue_tail(id, prio, pin),
        }
    }

    /// Takes a ready thread back off the run queue.
    pub(crate) fn unready(&mut self, id: ThreadId) {
        let t = self.thread_mut(id);
        if let Link::RunQueue(prio) = t.link {
            t.link = Link::Unlinked;
            let removed = self.scheduler.dequeue(id, prio);
            assert!(removed, "thread {:?} missing from run queue {}", id, prio);
        }
    }

    /// Switches `cpu` to the best thread it may run.
    ///
    /// The current thread must already have left `Running` and be on
    /// whatever list it belongs to. Runs at critical-section depth one with
    /// interrupts masked; the thread switched in inherits the section and
    /// releases it on the way out of the kernel.
    pub(crate) fn resched(&mut self, cpu: &mut C) {
        let n = cpu.cpu_num();
        assert!(cpu.ints_disabled(), "resched: interrupts enabled on cpu {}", n);
        assert_eq!(
            self.percpu[n].cs.count(),
            1,
            "resched: cpu {} at critical section depth {}",
            n,
            self.percpu[n].cs.count()
        );
        let old_id = self.current_id(n);
        assert_ne!(
            self.thread(old_id).state,
            ThreadState::Running,
            "resched: current thread {:?} still running",
            old_id
        );
        self.percpu[n].stats.reschedules += 1;

        let new_id = match self.scheduler.schedule(n) {
            Some(id) => id,
            None => self.idle_id(n),
        };
        let quantum = self.config.quantum_ticks;
        let new = self.thread_mut(new_id);
        new.state = ThreadState::Running;
        new.link = Link::Unlinked;
        if new.remaining_quantum <= 0 {
            new.remaining_quantum = quantum;
        }
        if new_id == old_id {
            return;
        }
        new.curr_cpu = Some(n);
        new.stats.schedules += 1;

        let old = self.thread_mut(old_id);
        old.curr_cpu = None;
        if let Some(stack) = &old.stack {
            assert!(
                stack.padding_intact(),
                "stack overrun in thread {:?} '{}'",
                old_id,
                old.name
            );
        }

        self.percpu[n].current = Some(new_id);
        self.percpu[n].stats.context_switches += 1;
        trace!("cpu {}: switch {:?} -> {:?}", n, old_id, new_id);

        let (old, new) = match self.threads.get2_mut(old_id.0, new_id.0) {
            (Some(old), Some(new)) => (old, new),
            _ => panic!("resched: lost thread {:?} or {:?}", old_id, new_id),
        };
        old.saved_cs = self.percpu[n].cs;
        self.percpu[n].cs = new.saved_cs;
        cpu.context_switch(&mut old.arch, &mut new.arch);
    }

    pub(crate) fn preempt_locked(&mut self, cpu: &mut C) {
        let n = cpu.cpu_num();
        let id = self.current_id(n);
        if !self.thread(id).is_idle() {
            self.percpu[n].stats.preempts += 1;
        }
        self.make_ready(id, Position::Tail);
        self.resched(cpu);
    }

    /// Gives the CPU away involuntarily. The current thread goes to the
    /// back of its bucket; whatever quantum it has left is kept for its
    /// next turn.
    pub fn thread_preempt(&mut self, cpu: &mut C) {
        self.enter_critical_section(cpu);
        self.preempt_locked(cpu);
        self.exit_critical_section(cpu);
    }

    /// Gives the CPU to the next thread of equal or higher priority; the
    /// caller goes to the back of its bucket with its quantum spent.
    pub fn thread_yield(&mut self, cpu: &mut C) {
        self.enter_critical_section(cpu);
        self.yield_locked(cpu);
        self.exit_critical_section(cpu);
    }

    pub(crate) fn yield_locked(&mut self, cpu: &mut C) {
        let n = cpu.cpu_num();
        let id = self.current_id(n);
        self.percpu[n].stats.yields += 1;
        self.thread_mut(id).remaining_quantum = 0;
        self.make_ready(id, Position::Tail);
        self.resched(cpu);
    }

    /// True if a ready thread should displace the one running on `n`.
    pub(crate) fn preempt_due(&self, n: CpuNum) -> bool {
        let Some(top) = self.scheduler.peek(n) else {
            return false;
        };
        let cur = self.thread(self.current_id(n));
        cur.is_idle()
            || top > cur.priority
            || (top == cur.priority && cur.remaining_quantum <= 0 && !cur.exempt_from_quantum())
    }

    /// Switches away from the current thread if a higher-priority thread is
    /// ready, or an equal-priority one and the current quantum is spent.
    /// Returns whether a preemption happened.
    pub fn reschedule(&mut self, cpu: &mut C) -> bool {
        assert!(
            !self.in_interrupt(cpu),
            "reschedule from interrupt context; return HandlerReturn::Reschedule instead"
        );
        self.enter_critical_section(cpu);
        let due = self.preempt_due(cpu.cpu_num());
        if due {
            self.preempt_locked(cpu);
        }
        self.exit_critical_section(cpu);
        due
    }

    /// Handler for a reschedule IPI from another CPU.
    pub fn reschedule_ipi(&mut self, cpu: &mut C) -> HandlerReturn {
        let n = cpu.cpu_num();
        self.percpu[n].stats.reschedule_ipis += 1;
        if self.preempt_due(n) {
            HandlerReturn::Reschedule
        } else {
            HandlerReturn::NoReschedule
        }
    }

    /// Periodic timer interrupt. Advances time on the boot CPU, fires
    /// expired timeouts and sleeps, and charges the running thread a tick
    /// of its quantum.
    pub fn timer_tick(&mut self, cpu: &mut C) -> HandlerReturn {
        let n = cpu.cpu_num();
        assert!(self.percpu[n].in_irq, "timer_tick outside interrupt context");
        self.enter_critical_section(cpu);
        self.percpu[n].stats.timer_ints += 1;

        let mut ret = HandlerReturn::NoReschedule;
        if n == 0 {
            self.now += 1;
            for (key, action) in self.timers.expire(self.now) {
                self.fire_timer(key, action, n);
            }
        }

        let id = self.current_id(n);
        let t = self.thread_mut(id);
        t.stats.ticks += 1;
        if t.is_idle() {
            self.percpu[n].stats.idle_ticks += 1;
        } else if !t.exempt_from_quantum() {
            t.remaining_quantum -= 1;
            if t.remaining_quantum <= 0 {
                ret = HandlerReturn::Reschedule;
            }
        }
        if self.preempt_due(n) {
            ret = HandlerReturn::Reschedule;
        }

        self.exit_critical_section(cpu);
        ret
    }

    /// Readies the thread a timer was armed for. Whether that displaces the
    /// running thread is left to the `preempt_due` check in `timer_tick`.
    fn fire_timer(&mut self, key: TimerKey, action: TimerAction, local: CpuNum) {
        let (id, expected) = match action {
            TimerAction::WaitTimeout(id) => (id, ThreadState::Blocked),
            TimerAction::Sleep(id) => (id, ThreadState::Sleeping),
        };
        // A stale token means the thread was woken some other way.
        match self.threads.get(id.0) {
            Some(t) if t.timer == Some(key) && t.state == expected => {}
            _ => return,
        }
        self.percpu[local].stats.timers_fired += 1;
        self.thread_mut(id).timer = None;
        match action {
            TimerAction::WaitTimeout(_) => {
                trace!("{:?} timed out", id);
                self.unblock_locked(id, Err(KernelError::TimedOut), local);
            }
            TimerAction::Sleep(_) => {
                trace!("{:?} woke from sleep", id);
                self.thread_mut(id).wake_status = Some(Ok(()));
                self.make_ready(id, Position::Tail);
                self.kick_cpus_for(id, local);
            }
        }
    }

    /// Collects the status the current thread was woken with, once.
    ///
    /// After a blocking call returned [`Wait::Blocked`](crate::Wait), this
    /// is how the thread learns why it resumed once it is running again.
    pub fn resume_status(&mut self, cpu: &C) -> Option<crate::KResult<()>> {
        let id = self.current_thread(cpu);
        self.thread_mut(id).wake_status.take()
    }
}
