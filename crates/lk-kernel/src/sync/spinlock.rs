use crate::arch::ArchCpu;
use crate::types::CpuNum;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const NO_OWNER: usize = usize::MAX;

/// Bare test-and-set lock that remembers which CPU holds it.
///
/// Holding it across a context switch is expected: the CPU, not the
/// thread, owns the lock, and the thread switched in releases it.
#[derive(Debug)]
pub struct SpinLock {
    locked: AtomicBool,
    owner: AtomicUsize,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            owner: AtomicUsize::new(NO_OWNER),
        }
    }

    pub fn lock(&self, cpu: CpuNum) {
        assert_ne!(
            self.owner.load(Ordering::Relaxed),
            cpu,
            "spin_lock: cpu {} already holds the lock",
            cpu
        );
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        self.owner.store(cpu, Ordering::Relaxed);
    }

    pub fn unlock(&self, cpu: CpuNum) {
        assert_eq!(
            self.owner.load(Ordering::Relaxed),
            cpu,
            "spin_unlock: cpu {} does not hold the lock",
            cpu
        );
        self.owner.store(NO_OWNER, Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
    }

    pub fn held_by(&self, cpu: CpuNum) -> bool {
        self.locked.load(Ordering::Relaxed) && self.owner.load(Ordering::Relaxed) == cpu
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Nesting depth of the scheduler critical section on one CPU.
///
/// The outermost entry masks interrupts and takes the scheduler lock; the
/// matching exit drops the lock and puts the interrupt state back. The
/// whole record is swapped with the thread's copy on a context switch, so
/// each thread resumes with the depth and saved interrupt state it left
/// with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CriticalSection {
    count: u32,
    ints_were_enabled: bool,
}

impl CriticalSection {
    /// State a freshly created thread starts in: one level deep with
    /// interrupts masked, released by the first exit after it is switched
    /// in.
    pub const fn initial() -> Self {
        Self {
            count: 1,
            ints_were_enabled: false,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn enter<C: ArchCpu>(&mut self, lock: &SpinLock, cpu: &mut C) {
        if self.count == 0 {
            self.ints_were_enabled = !cpu.ints_disabled();
            cpu.disable_ints();
            lock.lock(cpu.cpu_num());
        }
        self.count += 1;
    }

    pub fn exit<C: ArchCpu>(&mut self, lock: &SpinLock, cpu: &mut C) {
        assert!(
            self.count > 0,
            "exit_critical_section: underflow on cpu {}",
            cpu.cpu_num()
        );
        self.count -= 1;
        if self.count == 0 {
            lock.unlock(cpu.cpu_num());
            if self.ints_were_enabled {
                cpu.enable_ints();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lk_vm::Cpu;

    #[test]
    fn nested_sections_restore_interrupts_once() {
        let lock = SpinLock::new();
        let mut cpu = Cpu::new(0, 0);
        cpu.ints_enabled = true;
        let mut cs = CriticalSection::default();

        cs.enter(&lock, &mut cpu);
        cs.enter(&lock, &mut cpu);
        assert_eq!(cs.count(), 2);
        assert!(!cpu.ints_enabled);
        assert!(lock.held_by(0));

        cs.exit(&lock, &mut cpu);
        assert!(!cpu.ints_enabled);
        assert!(lock.is_locked());

        cs.exit(&lock, &mut cpu);
        assert!(cpu.ints_enabled);
        assert!(!lock.is_locked());
    }

    #[test]
    fn masked_entry_stays_masked() {
        let lock = SpinLock::new();
        let mut cpu = Cpu::new(0, 0);
        let mut cs = CriticalSection::default();
        cs.enter(&lock, &mut cpu);
        cs.exit(&lock, &mut cpu);
        assert!(!cpu.ints_enabled);
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn exit_without_enter_panics() {
        let lock = SpinLock::new();
        let mut cpu = Cpu::new(0, 0);
        CriticalSection::default().exit(&lock, &mut cpu);
    }

    #[test]
    #[should_panic(expected = "already holds")]
    fn recursive_lock_panics() {
        let lock = SpinLock::new();
        lock.lock(1);
        lock.lock(1);
    }
}
