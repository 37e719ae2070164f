use super::stack::ThreadStack;
use crate::arch::{ArchContext, EntryPoint};
use crate::error::KResult;
use crate::sync::spinlock::CriticalSection;
use crate::timer::TimerKey;
use crate::types::{CpuNum, Priority, ThreadId, WaitQueueId};
use bitflags::bitflags;
use core::fmt;

pub const THREAD_MAGIC: u32 = u32::from_be_bytes(*b"thrd");
pub const MAX_THREAD_NAME_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Created, never resumed.
    Initial,
    Suspended,
    Ready,
    Running,
    Blocked,
    Sleeping,
    /// Exited; waiting to be joined or reclaimed.
    Death,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadFlags: u32 {
        const DETACHED = 1 << 0;
        /// Exempt from quantum expiry.
        const REAL_TIME = 1 << 1;
        const IDLE = 1 << 2;
        const DEBUG_STACK_BOUNDS_CHECK = 1 << 3;
    }
}

/// The one list a thread may be on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Unlinked,
    RunQueue(Priority),
    WaitQueue(WaitQueueId),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadRunStats {
    /// Times the thread was switched in.
    pub schedules: u64,
    /// Timer ticks taken while it was running.
    pub ticks: u64,
}

/// Thread control block.
pub struct Thread<X> {
    pub(crate) magic: u32,
    pub(crate) id: ThreadId,
    pub(crate) name: String,
    pub(crate) state: ThreadState,
    pub(crate) priority: Priority,
    pub(crate) flags: ThreadFlags,
    pub(crate) remaining_quantum: i32,
    pub(crate) curr_cpu: Option<CpuNum>,
    pub(crate) pinned_cpu: Option<CpuNum>,
    pub(crate) link: Link,
    /// Status handed over by whoever woke the thread, not yet collected.
    pub(crate) wake_status: Option<KResult<()>>,
    pub(crate) timer: Option<TimerKey>,
    pub(crate) arch: X,
    pub(crate) saved_cs: CriticalSection,
    pub(crate) stack: Option<ThreadStack>,
    pub(crate) entry: EntryPoint,
    pub(crate) arg: u32,
    pub(crate) retcode: i32,
    pub(crate) retcode_wait_queue: WaitQueueId,
    pub(crate) stats: ThreadRunStats,
}

impl<X: ArchContext> Thread<X> {
    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn flags(&self) -> ThreadFlags {
        self.flags
    }

    pub fn link(&self) -> Link {
        self.link
    }

    pub fn remaining_quantum(&self) -> i32 {
        self.remaining_quantum
    }

    pub fn curr_cpu(&self) -> Option<CpuNum> {
        self.curr_cpu
    }

    pub fn pinned_cpu(&self) -> Option<CpuNum> {
        self.pinned_cpu
    }

    pub fn blocking_wait_queue(&self) -> Option<WaitQueueId> {
        match self.link {
            Link::WaitQueue(wq) => Some(wq),
            _ => None,
        }
    }

    pub fn context(&self) -> &X {
        &self.arch
    }

    pub fn context_mut(&mut self) -> &mut X {
        &mut self.arch
    }

    pub fn stack(&self) -> Option<&ThreadStack> {
        self.stack.as_ref()
    }

    pub fn stats(&self) -> ThreadRunStats {
        self.stats
    }

    pub fn is_idle(&self) -> bool {
        self.flags.contains(ThreadFlags::IDLE)
    }

    pub fn is_detached(&self) -> bool {
        self.flags.contains(ThreadFlags::DETACHED)
    }

    /// Idle threads, and real-time threads above default priority, are
    /// never preempted for running out of quantum.
    pub(crate) fn exempt_from_quantum(&self) -> bool {
        self.is_idle()
            || (self.flags.contains(ThreadFlags::REAL_TIME) && self.priority > Priority::DEFAULT)
    }
}

impl<X: ArchContext> fmt::Display for Thread<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "thread {:?} '{}': state {:?} priority {} quantum {} flags {:?}",
            self.id, self.name, self.state, self.priority, self.remaining_quantum, self.flags
        )?;
        write!(f, "    curr_cpu {:?} pinned {:?}", self.curr_cpu, self.pinned_cpu)?;
        if let Some(wq) = self.blocking_wait_queue() {
            write!(f, " blocked on {:?}", wq)?;
        }
        if let Some(stack) = &self.stack {
            write!(
                f,
                "\n    stack [{:#x}, {:#x}) size {} used {}",
                stack.base(),
                stack.top(),
                stack.size(),
                stack.high_water()
            )?;
        }
        write!(
            f,
            "\n    entry {:#x} arg {:#x} retcode {} schedules {} ticks {} fpu {}",
            self.entry,
            self.arg,
            self.retcode,
            self.stats.schedules,
            self.stats.ticks,
            self.arch.uses_extended_state()
        )
    }
}
