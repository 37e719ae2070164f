//! Thread lifecycle: creation, resume and suspend, exit, join and detach.

pub mod dispatch;
pub mod scheduler;
pub mod stack;
pub mod tcb;

use crate::arch::{ArchContext, ArchCpu, EntryPoint};
use crate::error::{KResult, KernelError};
use crate::sync::spinlock::CriticalSection;
use crate::timer::TimerAction;
use crate::types::{CpuNum, JoinHandle, Priority, ThreadId, Timeout, Wait, WaitQueueId};
use crate::wait::WaitQueueOwner;
use crate::Kernel;
use dispatch::Position;
use log::{debug, info, warn};
use tcb::{Link, Thread, ThreadFlags, ThreadRunStats, ThreadState, MAX_THREAD_NAME_LEN, THREAD_MAGIC};

/// Result of a join attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Join {
    /// The thread had exited and has been reclaimed.
    Exited(i32),
    /// The caller was switched out waiting for the thread to exit. Once it
    /// resumes with a successful status it joins again to collect the code.
    Blocked(JoinHandle),
    /// The thread is still running and the timeout was immediate.
    TimedOut(JoinHandle),
}

impl<C: ArchCpu> Kernel<C> {
    /// Brings up the boot CPU: creates an idle thread for every CPU and
    /// turns the code already running on CPU 0 into the detached
    /// `bootstrap` thread. Interrupts are enabled on return.
    pub fn boot(&mut self, cpu: &mut C) -> KResult<ThreadId> {
        let n = cpu.cpu_num();
        assert_eq!(n, 0, "boot: must run on cpu 0, not {}", n);
        assert!(self.percpu[0].current.is_none(), "boot: kernel already booted");
        cpu.disable_ints();

        let (idle_entry, stack_size) = (self.config.idle_entry, self.config.default_stack_size);
        for idle_cpu in 0..self.percpu.len() {
            let name = format!("idle {}", idle_cpu);
            let id = self.create_thread(
                &name,
                idle_entry,
                idle_cpu as u32,
                Priority::IDLE,
                stack_size,
                ThreadFlags::IDLE,
                Some(idle_cpu),
            )?;
            self.thread_mut(id).state = ThreadState::Ready;
            self.percpu[idle_cpu].idle = Some(id);
        }

        let quantum = self.config.quantum_ticks;
        let retcode = self.wait_queue_alloc(WaitQueueOwner::Standalone)?;
        let index = self
            .threads
            .insert_with(|index| {
                let mut t = Self::blank_thread(
                    ThreadId(index),
                    "bootstrap",
                    Priority::DEFAULT,
                    ThreadFlags::DETACHED,
                    None,
                    retcode,
                );
                t.state = ThreadState::Running;
                t.curr_cpu = Some(0);
                t.remaining_quantum = quantum;
                t
            })
            .ok_or(KernelError::NoMemory)?;
        let bootstrap = ThreadId(index);
        self.wq_mut(retcode).owner = WaitQueueOwner::Join(bootstrap);

        self.percpu[0].current = Some(bootstrap);
        self.percpu[0].online = true;
        info!(
            "boot: {} cpu(s), quantum {} ticks, bootstrap {:?}",
            self.percpu.len(),
            quantum,
            bootstrap
        );
        cpu.enable_ints();
        Ok(bootstrap)
    }

    /// Starts a secondary CPU in its idle thread. The CPU resumes in the
    /// idle thread's first-run frame.
    pub fn secondary_cpu_entry(&mut self, cpu: &mut C) {
        let n = cpu.cpu_num();
        assert!(
            n != 0 && n < self.percpu.len(),
            "secondary_cpu_entry: bad cpu {}",
            n
        );
        assert!(self.percpu[0].online, "secondary_cpu_entry: boot cpu not up");
        assert!(!self.percpu[n].online, "secondary_cpu_entry: cpu {} already up", n);
        cpu.disable_ints();
        self.enter_critical_section(cpu);

        let idle = self.idle_id(n);
        let mut boot_context = C::Context::default();
        let t = self.thread_mut(idle);
        t.state = ThreadState::Running;
        t.curr_cpu = Some(n);
        t.stats.schedules += 1;
        let cs = core::mem::replace(&mut t.saved_cs, CriticalSection::default());
        cpu.context_switch(&mut boot_context, &mut t.arch);

        self.percpu[n].cs = cs;
        self.percpu[n].current = Some(idle);
        self.percpu[n].online = true;
        info!("cpu {} online", n);
        self.exit_critical_section(cpu);
    }

    /// First kernel entry of every new thread, from the trampoline.
    pub fn thread_start(&mut self, cpu: &mut C) {
        let n = cpu.cpu_num();
        assert_eq!(
            self.percpu[n].cs.count(),
            0,
            "thread_start: critical section still held on cpu {}",
            n
        );
        debug!("cpu {}: {:?} started", n, self.current_id(n));
        cpu.enable_ints();
    }

    fn blank_thread(
        id: ThreadId,
        name: &str,
        priority: Priority,
        flags: ThreadFlags,
        pinned_cpu: Option<CpuNum>,
        retcode_wait_queue: WaitQueueId,
    ) -> Thread<C::Context> {
        let name: String = name.chars().take(MAX_THREAD_NAME_LEN).collect();
        Thread {
            magic: THREAD_MAGIC,
            id,
            name,
            state: ThreadState::Initial,
            priority,
            flags,
            remaining_quantum: 0,
            curr_cpu: None,
            pinned_cpu,
            link: Link::Unlinked,
            wake_status: None,
            timer: None,
            arch: C::Context::default(),
            saved_cs: CriticalSection::initial(),
            stack: None,
            entry: 0,
            arg: 0,
            retcode: 0,
            retcode_wait_queue,
            stats: ThreadRunStats::default(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create_thread(
        &mut self,
        name: &str,
        entry: EntryPoint,
        arg: u32,
        priority: Priority,
        stack_size: usize,
        mut flags: ThreadFlags,
        pinned_cpu: Option<CpuNum>,
    ) -> KResult<ThreadId> {
        if self.config.stack_bounds_check {
            flags |= ThreadFlags::DEBUG_STACK_BOUNDS_CHECK;
        }
        let stack = self.stacks.alloc(stack_size, self.config.stack_bounds_check)?;
        let retcode = match self.wait_queue_alloc(WaitQueueOwner::Standalone) {
            Ok(wq) => wq,
            Err(e) => {
                self.stacks.free(stack);
                return Err(e);
            }
        };
        let trampoline = self.config.trampoline_entry;
        let index = self.threads.insert_with(|index| {
            let mut t =
                Self::blank_thread(ThreadId(index), name, priority, flags, pinned_cpu, retcode);
            t.arch.initialize(stack.top(), trampoline, entry, arg);
            t.entry = entry;
            t.arg = arg;
            t
        });
        let Some(index) = index else {
            self.stacks.free(stack);
            self.wait_queues.remove(retcode.0);
            return Err(KernelError::NoMemory);
        };
        let id = ThreadId(index);
        self.wq_mut(retcode).owner = WaitQueueOwner::Join(id);
        self.thread_mut(id).stack = Some(stack);
        debug!(
            "created thread {:?} '{}' entry {:#x} arg {:#x} priority {}",
            id, name, entry, arg, priority
        );
        Ok(id)
    }

    /// Creates a suspended thread with the default stack size.
    pub fn thread_create(
        &mut self,
        name: &str,
        entry: EntryPoint,
        arg: u32,
        priority: Priority,
    ) -> KResult<JoinHandle> {
        self.thread_create_etc(name, entry, arg, priority, self.config.default_stack_size)
    }

    pub fn thread_create_etc(
        &mut self,
        name: &str,
        entry: EntryPoint,
        arg: u32,
        priority: Priority,
        stack_size: usize,
    ) -> KResult<JoinHandle> {
        self.create_thread(
            name,
            entry,
            arg,
            priority,
            stack_size,
            ThreadFlags::empty(),
            None,
        )
        .map(JoinHandle::new)
    }

    /// Makes a newly created or suspended thread runnable, then yields so
    /// that it runs right away if it is at least as urgent as the caller.
    pub fn thread_resume(&mut self, cpu: &mut C, id: ThreadId) -> KResult<()> {
        let may_yield = !self.in_interrupt(cpu) && self.critical_section_depth(cpu) == 0;
        self.enter_critical_section(cpu);
        let ret = match self.thread(id).state {
            ThreadState::Initial | ThreadState::Suspended => {
                self.make_ready(id, Position::Tail);
                self.kick_cpus_for(id, cpu.cpu_num());
                if may_yield {
                    self.yield_locked(cpu);
                }
                Ok(())
            }
            ThreadState::Death => Err(KernelError::InvalidState),
            state => {
                warn!("thread_resume: {:?} is {:?}, not suspended", id, state);
                Err(KernelError::NotSuspended)
            }
        };
        self.exit_critical_section(cpu);
        ret
    }

    /// Suspends a ready thread, or the caller itself.
    pub fn thread_suspend(&mut self, cpu: &mut C, id: ThreadId) -> KResult<Wait> {
        let n = cpu.cpu_num();
        self.enter_critical_section(cpu);
        let t = self.thread(id);
        let ret = if t.is_idle() {
            Err(KernelError::InvalidArgs)
        } else {
            match t.state {
                ThreadState::Ready => {
                    self.unready(id);
                    self.thread_mut(id).state = ThreadState::Suspended;
                    Ok(Wait::Done)
                }
                ThreadState::Running if t.curr_cpu == Some(n) => {
                    assert!(
                        !self.percpu[n].in_irq,
                        "thread_suspend: suspending current thread in interrupt context"
                    );
                    self.thread_mut(id).state = ThreadState::Suspended;
                    self.resched(cpu);
                    Ok(Wait::Blocked)
                }
                _ => Err(KernelError::InvalidState),
            }
        };
        self.exit_critical_section(cpu);
        ret
    }

    /// Ends the calling thread with `retcode`.
    ///
    /// A detached thread is reclaimed on the spot; otherwise it lingers in
    /// `Death` until joined and anyone already joining is woken.
    pub fn thread_exit(&mut self, cpu: &mut C, retcode: i32) {
        let n = cpu.cpu_num();
        assert!(
            !self.percpu[n].in_irq,
            "thread_exit: called from interrupt context"
        );
        self.enter_critical_section(cpu);
        let id = self.current_id(n);
        let t = self.thread_mut(id);
        assert!(!t.is_idle(), "thread_exit: idle thread {:?} cannot exit", id);
        t.state = ThreadState::Death;
        t.retcode = retcode;
        let detached = t.is_detached();
        let retcode_wq = t.retcode_wait_queue;
        debug!("{:?} '{}' exited with {}", id, t.name, retcode);

        if detached {
            self.resched(cpu);
            self.reclaim(id);
        } else {
            self.wake_all_locked(cpu, retcode_wq, false, Ok(()));
            self.resched(cpu);
        }
        self.exit_critical_section(cpu);
    }

    fn reclaim(&mut self, id: ThreadId) {
        let t = self.thread_mut(id);
        assert_eq!(t.state, ThreadState::Death, "reclaim: {:?} is still alive", id);
        assert_eq!(t.link, Link::Unlinked);
        t.magic = 0;
        let Some(t) = self.threads.remove(id.0) else {
            unreachable!("reclaim: {:?} vanished", id);
        };
        if let Some(stack) = t.stack {
            self.stacks.free(stack);
        }
        if let Some(wq) = self.wait_queues.get_mut(t.retcode_wait_queue.0) {
            assert!(wq.waiters.is_empty(), "reclaim: {:?} still has joiners", id);
            wq.magic = 0;
        }
        self.wait_queues.remove(t.retcode_wait_queue.0);
        debug!("reclaimed {:?} '{}'", id, t.name);
    }

    /// Waits for the thread to exit and reclaims it.
    pub fn thread_join(
        &mut self,
        cpu: &mut C,
        handle: JoinHandle,
        timeout: Timeout,
    ) -> KResult<Join> {
        self.enter_critical_section(cpu);
        let ret = self.join_locked(cpu, handle, timeout);
        self.exit_critical_section(cpu);
        ret
    }

    fn join_locked(&mut self, cpu: &mut C, handle: JoinHandle, timeout: Timeout) -> KResult<Join> {
        let id = handle.id();
        assert_ne!(
            id,
            self.current_id(cpu.cpu_num()),
            "thread_join: a thread cannot join itself"
        );
        let t = self.thread(id);
        if t.is_detached() {
            return Err(KernelError::ThreadDetached);
        }
        if t.state != ThreadState::Death {
            if timeout.is_immediate() {
                return Ok(Join::TimedOut(handle));
            }
            let wq = t.retcode_wait_queue;
            self.block_locked(cpu, wq, timeout)?;
            return Ok(Join::Blocked(handle));
        }
        let retcode = t.retcode;
        self.reclaim(id);
        Ok(Join::Exited(retcode))
    }

    /// Gives up the right to join: the thread is reclaimed as soon as it
    /// exits, or now if it already has. Anyone blocked joining it wakes
    /// with `ThreadDetached`.
    pub fn thread_detach(&mut self, cpu: &mut C, handle: JoinHandle) -> KResult<()> {
        self.enter_critical_section(cpu);
        let id = handle.id();
        let t = self.thread_mut(id);
        t.flags |= ThreadFlags::DETACHED;
        let (dead, wq) = (t.state == ThreadState::Death, t.retcode_wait_queue);
        self.wake_all_locked(cpu, wq, false, Err(KernelError::ThreadDetached));
        if dead {
            self.reclaim(id);
        }
        debug!("detached {:?}", id);
        self.exit_critical_section(cpu);
        Ok(())
    }

    pub fn thread_detach_and_resume(&mut self, cpu: &mut C, handle: JoinHandle) -> KResult<()> {
        let id = handle.id();
        self.thread_detach(cpu, handle)?;
        if self.thread_info(id).is_none() {
            return Ok(());
        }
        self.thread_resume(cpu, id)
    }

    /// Puts the caller to sleep for `ticks` timer ticks. Only the timer
    /// wakes it; it then joins the back of its bucket.
    pub fn thread_sleep(&mut self, cpu: &mut C, ticks: u64) -> Wait {
        let n = cpu.cpu_num();
        assert!(!self.percpu[n].in_irq, "thread_sleep: called from interrupt context");
        self.enter_critical_section(cpu);
        let id = self.current_id(n);
        assert!(!self.thread(id).is_idle(), "thread_sleep: idle thread cannot sleep");
        let key = self.timers.arm(self.now + ticks, TimerAction::Sleep(id));
        let t = self.thread_mut(id);
        t.state = ThreadState::Sleeping;
        t.wake_status = None;
        t.timer = Some(key);
        self.resched(cpu);
        self.exit_critical_section(cpu);
        Wait::Blocked
    }

    /// Changes the caller's priority, clamped above idle, and reschedules.
    pub fn thread_set_priority(&mut self, cpu: &mut C, priority: Priority) {
        let priority = Priority::clamped(priority.val().max(Priority::IDLE.val() + 1) as i64);
        self.enter_critical_section(cpu);
        let id = self.current_id(cpu.cpu_num());
        assert!(!self.thread(id).is_idle(), "thread_set_priority: idle thread");
        self.thread_mut(id).priority = priority;
        self.make_ready(id, Position::Head);
        self.resched(cpu);
        self.exit_critical_section(cpu);
    }

    /// Exempts a thread from quantum expiry while it runs above default
    /// priority.
    pub fn thread_set_real_time(&mut self, id: ThreadId, real_time: bool) {
        let t = self.thread_mut(id);
        t.flags.set(ThreadFlags::REAL_TIME, real_time);
    }

    /// Restricts a thread to one CPU, or lifts the restriction.
    pub fn thread_set_pinned_cpu(&mut self, cpu: &mut C, id: ThreadId, pin: Option<CpuNum>) {
        if let Some(p) = pin {
            assert!(p < self.percpu.len(), "thread_set_pinned_cpu: no cpu {}", p);
        }
        self.enter_critical_section(cpu);
        let ready = self.thread(id).state == ThreadState::Ready && !self.thread(id).is_idle();
        if ready {
            self.unready(id);
        }
        self.thread_mut(id).pinned_cpu = pin;
        if ready {
            self.make_ready(id, Position::Tail);
            self.kick_cpus_for(id, cpu.cpu_num());
        }
        self.exit_critical_section(cpu);
    }

    pub fn threads(&self) -> impl Iterator<Item = &Thread<C::Context>> {
        self.threads.iter().map(|(_, t)| t)
    }

    pub fn dump_thread(&self, id: ThreadId) -> String {
        match self.thread_info(id) {
            Some(t) => t.to_string(),
            None => format!("thread {:?}: no such thread", id),
        }
    }

    pub fn dump_all_threads(&self) -> String {
        let mut out = String::new();
        for t in self.threads() {
            out.push_str(&t.to_string());
            out.push('\n');
        }
        out
    }
}
