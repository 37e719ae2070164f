//! Scheduler core of an LK-style kernel.
//!
//! The kernel is event driven: every entry point runs to completion on the
//! calling CPU inside the scheduler critical section, and a call that has
//! to block switches the CPU to another thread before returning. When the
//! kernel is driven by [`lk_vm`], each trap is one such entry.

pub mod arch;
pub mod arena;
pub mod error;
pub mod sync;
pub mod syscall;
pub mod thread;
pub mod timer;
pub mod types;
pub mod wait;

use crate::arch::{ArchCpu, EntryPoint};
use crate::arena::Arena;
use crate::sync::event::Event;
use crate::sync::mutex::Mutex;
use crate::sync::semaphore::Semaphore;
use crate::sync::spinlock::{CriticalSection, SpinLock};
use crate::thread::scheduler::{PriorityScheduler, Scheduler};
use crate::thread::stack::StackAllocator;
use crate::thread::tcb::{Thread, THREAD_MAGIC};
use crate::timer::TimerQueue;
use crate::types::{CpuNum, SMP_MAX_CPUS};
use crate::wait::WaitQueue;
use lk_vm::{Cpu, Memory, TrapCause, TrapError, TrapHandler, VirtAddr};
use log::{debug, error, info};

pub use crate::error::{KResult, KernelError, SyscallError};
pub use crate::sync::event::EventFlags;
pub use crate::thread::tcb::{ThreadFlags, ThreadState};
pub use crate::thread::Join;
pub use crate::types::{
    EventId, HandlerReturn, JoinHandle, MutexId, Priority, SemaphoreId, ThreadId, Timeout, Wait,
    WaitQueueId,
};

#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub num_cpus: usize,
    /// Timer ticks a thread runs before an equal-priority peer gets a turn.
    pub quantum_ticks: i32,
    pub default_stack_size: usize,
    /// Total bytes the stack allocator may hand out.
    pub stack_pool_bytes: usize,
    pub max_threads: usize,
    /// Limit per kind of wait queue, mutex, semaphore and event.
    pub max_objects: usize,
    /// Pad each stack with a guard pattern checked on every switch-out.
    pub stack_bounds_check: bool,
    pub trampoline_entry: EntryPoint,
    pub idle_entry: EntryPoint,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            num_cpus: 1,
            quantum_ticks: 5,
            default_stack_size: 4096,
            stack_pool_bytes: 1 << 20,
            max_threads: 64,
            max_objects: 256,
            stack_bounds_check: true,
            trampoline_entry: 0,
            idle_entry: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuStats {
    pub reschedules: u64,
    pub context_switches: u64,
    pub preempts: u64,
    pub yields: u64,
    pub timer_ints: u64,
    pub interrupts: u64,
    pub reschedule_ipis: u64,
    pub timers_fired: u64,
    pub idle_ticks: u64,
}

#[derive(Debug, Default)]
pub(crate) struct PerCpu {
    pub(crate) current: Option<ThreadId>,
    pub(crate) idle: Option<ThreadId>,
    pub(crate) cs: CriticalSection,
    pub(crate) in_irq: bool,
    pub(crate) online: bool,
    pub(crate) stats: CpuStats,
}

pub struct Kernel<C: ArchCpu> {
    pub(crate) config: KernelConfig,
    pub(crate) threads: Arena<Thread<C::Context>>,
    pub(crate) scheduler: Box<dyn Scheduler>,
    pub(crate) wait_queues: Arena<WaitQueue>,
    pub(crate) mutexes: Arena<Mutex>,
    pub(crate) semaphores: Arena<Semaphore>,
    pub(crate) events: Arena<Event>,
    pub(crate) timers: TimerQueue,
    pub(crate) stacks: StackAllocator,
    pub(crate) percpu: Vec<PerCpu>,
    pub(crate) thread_lock: SpinLock,
    pub(crate) now: u64,
    pub(crate) pending_ipis: u32,
}

impl<C: ArchCpu> Kernel<C> {
    pub fn new(config: KernelConfig) -> Result<Self, KernelError> {
        if config.num_cpus == 0 || config.num_cpus > SMP_MAX_CPUS || config.quantum_ticks <= 0 {
            return Err(KernelError::InvalidArgs);
        }
        // Idle threads come out of the same budget.
        let max_threads = config.max_threads + config.num_cpus;
        Ok(Self {
            threads: Arena::with_limit(max_threads),
            scheduler: Box::new(PriorityScheduler::new()),
            // Every thread owns a retcode queue on top of the object limit.
            wait_queues: Arena::with_limit(config.max_objects + max_threads),
            mutexes: Arena::with_limit(config.max_objects),
            semaphores: Arena::with_limit(config.max_objects),
            events: Arena::with_limit(config.max_objects),
            timers: TimerQueue::new(),
            stacks: StackAllocator::new(config.stack_pool_bytes),
            percpu: (0..config.num_cpus).map(|_| PerCpu::default()).collect(),
            thread_lock: SpinLock::new(),
            now: 0,
            pending_ipis: 0,
            config,
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Ticks counted by the boot CPU since `boot`.
    pub fn current_time(&self) -> u64 {
        self.now
    }

    pub fn cpu_stats(&self, cpu: CpuNum) -> CpuStats {
        self.percpu[cpu].stats
    }

    /// Threads that have not exited, not counting idle threads.
    pub fn live_threads(&self) -> usize {
        self.threads
            .iter()
            .filter(|(_, t)| !t.is_idle() && t.state() != ThreadState::Death)
            .count()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn free_stack_bytes(&self) -> usize {
        self.stacks.remaining()
    }

    /// Drains the set of CPUs that need a reschedule interrupt.
    pub fn take_reschedule_ipis(&mut self) -> u32 {
        core::mem::take(&mut self.pending_ipis)
    }

    pub fn in_interrupt(&self, cpu: &C) -> bool {
        self.percpu[cpu.cpu_num()].in_irq
    }

    pub fn enter_critical_section(&mut self, cpu: &mut C) {
        let n = cpu.cpu_num();
        self.percpu[n].cs.enter(&self.thread_lock, cpu);
    }

    pub fn exit_critical_section(&mut self, cpu: &mut C) {
        let n = cpu.cpu_num();
        self.percpu[n].cs.exit(&self.thread_lock, cpu);
    }

    pub fn critical_section_depth(&self, cpu: &C) -> u32 {
        self.percpu[cpu.cpu_num()].cs.count()
    }

    /// The thread running on `cpu`.
    pub fn current_thread(&self, cpu: &C) -> ThreadId {
        self.current_id(cpu.cpu_num())
    }

    pub(crate) fn current_id(&self, n: CpuNum) -> ThreadId {
        match self.percpu.get(n).and_then(|p| p.current) {
            Some(id) => id,
            None => panic!("cpu {} has no current thread; kernel not booted there", n),
        }
    }

    pub(crate) fn idle_id(&self, n: CpuNum) -> ThreadId {
        match self.percpu[n].idle {
            Some(id) => id,
            None => panic!("cpu {} has no idle thread", n),
        }
    }

    /// Looks a thread up without panicking on a stale handle.
    pub fn thread_info(&self, id: ThreadId) -> Option<&Thread<C::Context>> {
        self.threads.get(id.0).filter(|t| t.magic == THREAD_MAGIC)
    }

    pub(crate) fn thread(&self, id: ThreadId) -> &Thread<C::Context> {
        match self.threads.get(id.0) {
            Some(t) => {
                assert_eq!(t.magic, THREAD_MAGIC, "thread {:?}: bad magic", id);
                t
            }
            None => panic!("thread {:?}: stale or destroyed handle", id),
        }
    }

    pub(crate) fn thread_mut(&mut self, id: ThreadId) -> &mut Thread<C::Context> {
        match self.threads.get_mut(id.0) {
            Some(t) => {
                assert_eq!(t.magic, THREAD_MAGIC, "thread {:?}: bad magic", id);
                t
            }
            None => panic!("thread {:?}: stale or destroyed handle", id),
        }
    }

    /// Marks every CPU that could run `id` as needing a reschedule.
    pub(crate) fn kick_cpus_for(&mut self, id: ThreadId, local: CpuNum) {
        if self.percpu.len() < 2 {
            return;
        }
        let mask = match self.thread(id).pinned_cpu {
            Some(pin) => 1 << pin,
            None => self
                .percpu
                .iter()
                .enumerate()
                .filter(|(_, p)| p.online)
                .fold(0u32, |m, (n, _)| m | (1 << n)),
        };
        self.pending_ipis |= mask & !(1 << local);
    }

    /// Interrupt entry glue: the CPU is in interrupt context until
    /// `irq_exit`, and must not block.
    pub fn irq_enter(&mut self, cpu: &mut C) {
        let p = &mut self.percpu[cpu.cpu_num()];
        assert!(!p.in_irq, "irq_enter: cpu {} already in interrupt context", cpu.cpu_num());
        p.in_irq = true;
        p.stats.interrupts += 1;
    }

    /// Interrupt exit glue: performs the reschedule the handler asked for.
    pub fn irq_exit(&mut self, cpu: &mut C, ret: HandlerReturn) {
        let p = &mut self.percpu[cpu.cpu_num()];
        assert!(p.in_irq, "irq_exit: cpu {} not in interrupt context", cpu.cpu_num());
        p.in_irq = false;
        if ret == HandlerReturn::Reschedule {
            self.thread_preempt(cpu);
        }
    }
}

impl Kernel<Cpu> {
    /// Status for the thread now current on `cpu`, if it just came back
    /// from blocking. Written into `a0` on the way back to the thread.
    fn deliver_wake_status(&mut self, cpu: &mut Cpu) {
        if let Some(status) = self.resume_status(cpu) {
            cpu.write_reg(lk_vm::Register::A0, error::status_code(status) as u32);
        }
    }
}

impl TrapHandler for Kernel<Cpu> {
    fn handle_trap(
        &mut self,
        cause: TrapCause,
        cpu: &mut Cpu,
        _memory: &mut Memory,
    ) -> Result<VirtAddr, TrapError> {
        match cause {
            TrapCause::EnvironmentCall => {
                cpu.pc += 4;
                self.handle_syscall(cpu)?;
            }
            TrapCause::TimerInterrupt => {
                self.irq_enter(cpu);
                let ret = self.timer_tick(cpu);
                self.irq_exit(cpu, ret);
            }
            TrapCause::SoftwareInterrupt => {
                self.irq_enter(cpu);
                let ret = self.reschedule_ipi(cpu);
                self.irq_exit(cpu, ret);
            }
            TrapCause::FpuDisabled => {
                let id = self.current_thread(cpu);
                debug!("cpu {}: first FPU use by {:?}", cpu.hart_id, id);
                let ctx = &mut self.thread_mut(id).arch;
                cpu.restore_extended_state(ctx);
            }
            other => {
                error!(
                    "cpu {}: fatal trap {:?} in {}",
                    cpu.hart_id,
                    other,
                    self.dump_thread(self.current_thread(cpu))
                );
                return Err(TrapError::Unhandled(other));
            }
        }

        self.deliver_wake_status(cpu);
        if self.live_threads() == 0 {
            info!("no threads left to run, halting");
            return Err(TrapError::Halt);
        }
        Ok(VirtAddr::new(cpu.pc))
    }

    fn take_ipis(&mut self) -> u32 {
        self.take_reschedule_ipis()
    }
}
