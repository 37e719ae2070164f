use crate::arch::ArchCpu;
use crate::error::{KResult, KernelError};
use crate::types::{MutexId, ThreadId, Timeout, Wait, WaitQueueId};
use crate::wait::WaitQueueOwner;
use crate::Kernel;
use log::trace;

pub const MUTEX_MAGIC: u32 = u32::from_be_bytes(*b"mutx");

/// Non-recursive sleeping lock with direct hand-off: a release passes
/// ownership straight to the longest waiter.
#[derive(Debug)]
pub struct Mutex {
    pub(crate) magic: u32,
    /// Holder plus waiters.
    pub(crate) count: u32,
    pub(crate) holder: Option<ThreadId>,
    pub(crate) wait: WaitQueueId,
}

impl Mutex {
    pub fn holder(&self) -> Option<ThreadId> {
        self.holder
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

impl<C: ArchCpu> Kernel<C> {
    pub fn mutex_create(&mut self) -> KResult<MutexId> {
        let wait = self.wait_queue_alloc(WaitQueueOwner::Standalone)?;
        let mutex = Mutex {
            magic: MUTEX_MAGIC,
            count: 0,
            holder: None,
            wait,
        };
        match self.mutexes.insert(mutex) {
            Ok(index) => {
                let id = MutexId(index);
                self.wq_mut(wait).owner = WaitQueueOwner::Mutex(id);
                Ok(id)
            }
            Err(_) => {
                self.wait_queues.remove(wait.0);
                Err(KernelError::NoMemory)
            }
        }
    }

    pub fn mutex(&self, id: MutexId) -> Option<&Mutex> {
        self.mutexes.get(id.0).filter(|m| m.magic == MUTEX_MAGIC)
    }

    pub(crate) fn mutex_mut(&mut self, id: MutexId) -> &mut Mutex {
        match self.mutexes.get_mut(id.0) {
            Some(m) => {
                assert_eq!(m.magic, MUTEX_MAGIC, "mutex {:?}: bad magic", id);
                m
            }
            None => panic!("mutex {:?}: stale or destroyed handle", id),
        }
    }

    /// Wakes any waiters with `ObjectDestroyed` and retires the mutex.
    /// Destroying a mutex another thread holds is a bug.
    pub fn mutex_destroy(&mut self, cpu: &mut C, id: MutexId) {
        self.enter_critical_section(cpu);
        let current = self.current_id(cpu.cpu_num());
        let m = self.mutex_mut(id);
        if let Some(holder) = m.holder {
            assert_eq!(
                holder, current,
                "mutex_destroy: mutex {:?} is held by {:?}",
                id, holder
            );
        }
        m.magic = 0;
        let wait = m.wait;
        self.mutexes.remove(id.0);
        self.destroy_wait_queue_locked(cpu, wait, true);
        self.exit_critical_section(cpu);
    }

    /// Takes the mutex, blocking up to `timeout` if another thread holds it.
    ///
    /// When the call returns `Wait::Blocked`, the caller owns the mutex once
    /// it resumes with a successful status.
    pub fn mutex_acquire(&mut self, cpu: &mut C, id: MutexId, timeout: Timeout) -> KResult<Wait> {
        assert!(
            !self.in_interrupt(cpu),
            "mutex_acquire: called from interrupt context"
        );
        self.enter_critical_section(cpu);
        let current = self.current_id(cpu.cpu_num());
        let m = self.mutex_mut(id);
        if m.holder == Some(current) {
            panic!(
                "mutex_acquire: thread {:?} tried to acquire mutex {:?} it already owns",
                current, id
            );
        }
        let ret = if m.holder.is_none() {
            m.holder = Some(current);
            m.count = 1;
            Ok(Wait::Done)
        } else if timeout.is_immediate() {
            Err(KernelError::TimedOut)
        } else {
            m.count += 1;
            let wait = m.wait;
            trace!("{:?} contends for {:?}", current, id);
            self.block_locked(cpu, wait, timeout)
        };
        self.exit_critical_section(cpu);
        ret
    }

    /// Releases the mutex, handing it to the next waiter if there is one.
    pub fn mutex_release(&mut self, cpu: &mut C, id: MutexId) {
        assert!(
            !self.in_interrupt(cpu),
            "mutex_release: called from interrupt context"
        );
        self.enter_critical_section(cpu);
        let current = self.current_id(cpu.cpu_num());
        let m = self.mutex_mut(id);
        if m.holder != Some(current) {
            panic!(
                "mutex_release: thread {:?} tried to release mutex {:?} it doesn't own (holder {:?})",
                current, id, m.holder
            );
        }
        m.count -= 1;
        if m.count == 0 {
            m.holder = None;
        } else {
            let wait = m.wait;
            let next = self.wq(wait).waiters.front().copied();
            self.mutex_mut(id).holder = next;
            trace!("{:?} hands {:?} to {:?}", current, id, next);
            self.wake_one_locked(cpu, wait, true, Ok(()));
        }
        self.exit_critical_section(cpu);
    }

    pub fn mutex_holder(&self, id: MutexId) -> Option<ThreadId> {
        self.mutex(id).and_then(|m| m.holder)
    }

    /// Whether the thread running on `cpu` holds the mutex.
    pub fn mutex_is_held(&self, cpu: &C, id: MutexId) -> bool {
        self.mutex_holder(id) == Some(self.current_thread(cpu))
    }
}
