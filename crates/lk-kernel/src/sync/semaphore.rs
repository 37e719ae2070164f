use crate::arch::ArchCpu;
use crate::error::{KResult, KernelError};
use crate::types::{SemaphoreId, Timeout, Wait, WaitQueueId};
use crate::wait::WaitQueueOwner;
use crate::Kernel;

pub const SEMAPHORE_MAGIC: u32 = u32::from_be_bytes(*b"sema");

/// Counting semaphore.
///
/// Whenever no operation is in flight, a negative `count` is exactly minus
/// the number of waiters, and a non-negative one means nobody waits.
#[derive(Debug)]
pub struct Semaphore {
    pub(crate) magic: u32,
    pub(crate) count: i64,
    pub(crate) wait: WaitQueueId,
}

impl Semaphore {
    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn wait_queue(&self) -> WaitQueueId {
        self.wait
    }
}

impl<C: ArchCpu> Kernel<C> {
    pub fn sem_create(&mut self, value: u32) -> KResult<SemaphoreId> {
        let wait = self.wait_queue_alloc(WaitQueueOwner::Standalone)?;
        let sem = Semaphore {
            magic: SEMAPHORE_MAGIC,
            count: i64::from(value),
            wait,
        };
        match self.semaphores.insert(sem) {
            Ok(index) => {
                let id = SemaphoreId(index);
                self.wq_mut(wait).owner = WaitQueueOwner::Semaphore(id);
                Ok(id)
            }
            Err(_) => {
                self.wait_queues.remove(wait.0);
                Err(KernelError::NoMemory)
            }
        }
    }

    pub fn semaphore(&self, id: SemaphoreId) -> Option<&Semaphore> {
        self.semaphores
            .get(id.0)
            .filter(|s| s.magic == SEMAPHORE_MAGIC)
    }

    pub(crate) fn sem_mut(&mut self, id: SemaphoreId) -> &mut Semaphore {
        match self.semaphores.get_mut(id.0) {
            Some(s) => {
                assert_eq!(s.magic, SEMAPHORE_MAGIC, "semaphore {:?}: bad magic", id);
                s
            }
            None => panic!("semaphore {:?}: stale or destroyed handle", id),
        }
    }

    pub fn sem_destroy(&mut self, cpu: &mut C, id: SemaphoreId) {
        self.enter_critical_section(cpu);
        let sem = self.sem_mut(id);
        sem.magic = 0;
        sem.count = 0;
        let wait = sem.wait;
        self.semaphores.remove(id.0);
        self.destroy_wait_queue_locked(cpu, wait, true);
        self.exit_critical_section(cpu);
    }

    /// Adds one to the count, waking the longest waiter if there is one.
    /// Returns the number of threads woken.
    pub fn sem_post(&mut self, cpu: &mut C, id: SemaphoreId, reschedule: bool) -> usize {
        assert!(
            !(reschedule && self.in_interrupt(cpu)),
            "sem_post: reschedule from interrupt context"
        );
        self.enter_critical_section(cpu);
        let sem = self.sem_mut(id);
        sem.count += 1;
        let woken = if sem.count <= 0 {
            let wait = sem.wait;
            usize::from(self.wake_one_locked(cpu, wait, reschedule, Ok(())).is_some())
        } else {
            0
        };
        self.exit_critical_section(cpu);
        woken
    }

    /// Takes one from the count, blocking while it is exhausted.
    pub fn sem_wait(&mut self, cpu: &mut C, id: SemaphoreId) -> KResult<Wait> {
        self.sem_timedwait(cpu, id, Timeout::Infinite)
    }

    /// `sem_wait` that gives up after `timeout`. A waiter that times out
    /// returns its decrement.
    pub fn sem_timedwait(&mut self, cpu: &mut C, id: SemaphoreId, timeout: Timeout) -> KResult<Wait> {
        assert!(
            !self.in_interrupt(cpu),
            "sem_wait: called from interrupt context"
        );
        self.enter_critical_section(cpu);
        let sem = self.sem_mut(id);
        let ret = if sem.count > 0 {
            sem.count -= 1;
            Ok(Wait::Done)
        } else if timeout.is_immediate() {
            Err(KernelError::TimedOut)
        } else {
            sem.count -= 1;
            let wait = sem.wait;
            self.block_locked(cpu, wait, timeout)
        };
        self.exit_critical_section(cpu);
        ret
    }

    /// Non-blocking decrement.
    pub fn sem_trywait(&mut self, cpu: &mut C, id: SemaphoreId) -> KResult<()> {
        self.enter_critical_section(cpu);
        let sem = self.sem_mut(id);
        let ret = if sem.count > 0 {
            sem.count -= 1;
            Ok(())
        } else {
            Err(KernelError::NotReady)
        };
        self.exit_critical_section(cpu);
        ret
    }

    pub fn sem_count(&self, id: SemaphoreId) -> Option<i64> {
        self.semaphore(id).map(|s| s.count)
    }
}
