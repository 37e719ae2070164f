//! System call ABI of the simulated hart.
//!
//! `a7` holds the number and `a0..a3` the arguments. `a0` comes back as a
//! status (0 or a negative [`KernelError`] code) or a value; handles are
//! always positive. A call that blocked gets its status in `a0` when the
//! thread next runs.

use crate::error::{KResult, KernelError, SyscallError};
use crate::sync::event::EventFlags;
use crate::thread::Join;
use crate::types::{EventId, JoinHandle, MutexId, Priority, SemaphoreId, ThreadId, Timeout, Wait};
use crate::Kernel;
use lk_vm::{Cpu, Register};
use log::{debug, warn};

pub mod nr {
    pub const THREAD_START: u32 = 1;
    pub const EXIT: u32 = 2;
    pub const YIELD: u32 = 3;
    pub const SLEEP: u32 = 4;
    pub const THREAD_CREATE: u32 = 5;
    pub const THREAD_RESUME: u32 = 6;
    pub const THREAD_JOIN: u32 = 7;
    pub const THREAD_DETACH: u32 = 8;
    pub const SET_PRIORITY: u32 = 9;
    pub const CURRENT_TIME: u32 = 10;
    pub const MUTEX_CREATE: u32 = 20;
    pub const MUTEX_ACQUIRE: u32 = 21;
    pub const MUTEX_RELEASE: u32 = 22;
    pub const MUTEX_DESTROY: u32 = 23;
    pub const SEM_CREATE: u32 = 30;
    pub const SEM_WAIT: u32 = 31;
    pub const SEM_POST: u32 = 32;
    pub const SEM_TRYWAIT: u32 = 33;
    pub const SEM_DESTROY: u32 = 34;
    pub const EVENT_CREATE: u32 = 40;
    pub const EVENT_WAIT: u32 = 41;
    pub const EVENT_SIGNAL: u32 = 42;
    pub const EVENT_UNSIGNAL: u32 = 43;
    pub const EVENT_DESTROY: u32 = 44;
}

/// `a1` after `THREAD_JOIN` when the caller must join again once woken.
pub const JOIN_PENDING: u32 = u32::MAX;

#[derive(Debug, PartialEq, Eq)]
pub enum Syscall {
    ThreadStart,
    Exit { code: i32 },
    Yield,
    Sleep { ticks: u64 },
    ThreadCreate { entry: u32, arg: u32, priority: Priority },
    ThreadResume { thread: ThreadId },
    ThreadJoin { handle: JoinHandle, timeout: Timeout },
    ThreadDetach { handle: JoinHandle },
    SetPriority { priority: Priority },
    CurrentTime,
    MutexCreate,
    MutexAcquire { mutex: MutexId, timeout: Timeout },
    MutexRelease { mutex: MutexId },
    MutexDestroy { mutex: MutexId },
    SemCreate { value: u32 },
    SemWait { sem: SemaphoreId, timeout: Timeout },
    SemPost { sem: SemaphoreId, reschedule: bool },
    SemTrywait { sem: SemaphoreId },
    SemDestroy { sem: SemaphoreId },
    EventCreate { signaled: bool, flags: EventFlags },
    EventWait { event: EventId, timeout: Timeout },
    EventSignal { event: EventId, reschedule: bool },
    EventUnsignal { event: EventId },
    EventDestroy { event: EventId },
}

#[derive(Debug, PartialEq, Eq)]
pub enum SyscallReturn {
    Success,
    Value(u32),
    Handle(u32),
    Error(KernelError),
    /// The caller was switched out; its status arrives when it is woken.
    Blocked,
    Joined(i32),
    /// The caller was switched out and must join again once woken.
    JoinPending,
    /// The caller is gone.
    Exited,
}

impl From<KResult<()>> for SyscallReturn {
    fn from(result: KResult<()>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(e) => Self::Error(e),
        }
    }
}

impl From<KResult<Wait>> for SyscallReturn {
    fn from(result: KResult<Wait>) -> Self {
        match result {
            Ok(Wait::Done) => Self::Success,
            Ok(Wait::Blocked) => Self::Blocked,
            Err(e) => Self::Error(e),
        }
    }
}

impl SyscallReturn {
    /// Values for `a0` and `a1`, where anything is written at all.
    pub fn registers(&self) -> (Option<u32>, Option<u32>) {
        match *self {
            Self::Success => (Some(0), None),
            Self::Value(v) | Self::Handle(v) => (Some(v), None),
            Self::Error(e) => (Some(e.code() as u32), Some(0)),
            Self::Joined(code) => (Some(0), Some(code as u32)),
            Self::JoinPending => (None, Some(JOIN_PENDING)),
            Self::Blocked | Self::Exited => (None, None),
        }
    }
}

fn handle<T>(raw: u32, from_raw: impl FnOnce(u32) -> Option<T>) -> Result<T, SyscallError> {
    from_raw(raw).ok_or(SyscallError::InvalidArgument)
}

impl Syscall {
    pub fn from_registers(cpu: &Cpu) -> Result<Self, SyscallError> {
        let a0 = cpu.read_reg(Register::A0);
        let a1 = cpu.read_reg(Register::A1);
        let a2 = cpu.read_reg(Register::A2);
        let a7 = cpu.read_reg(Register::A7);

        let priority = |raw: u32| {
            u8::try_from(raw)
                .ok()
                .and_then(Priority::new)
                .ok_or(SyscallError::InvalidArgument)
        };

        let syscall = match a7 {
            nr::THREAD_START => Syscall::ThreadStart,
            nr::EXIT => Syscall::Exit { code: a0 as i32 },
            nr::YIELD => Syscall::Yield,
            nr::SLEEP => Syscall::Sleep {
                ticks: u64::from(a0),
            },
            nr::THREAD_CREATE => Syscall::ThreadCreate {
                entry: a0,
                arg: a1,
                priority: priority(a2)?,
            },
            nr::THREAD_RESUME => Syscall::ThreadResume {
                thread: handle(a0, ThreadId::from_raw)?,
            },
            nr::THREAD_JOIN => Syscall::ThreadJoin {
                handle: handle(a0, JoinHandle::from_raw)?,
                timeout: Timeout::from_raw(a1),
            },
            nr::THREAD_DETACH => Syscall::ThreadDetach {
                handle: handle(a0, JoinHandle::from_raw)?,
            },
            nr::SET_PRIORITY => Syscall::SetPriority {
                priority: priority(a0)?,
            },
            nr::CURRENT_TIME => Syscall::CurrentTime,
            nr::MUTEX_CREATE => Syscall::MutexCreate,
            nr::MUTEX_ACQUIRE => Syscall::MutexAcquire {
                mutex: handle(a0, MutexId::from_raw)?,
                timeout: Timeout::from_raw(a1),
            },
            nr::MUTEX_RELEASE => Syscall::MutexRelease {
                mutex: handle(a0, MutexId::from_raw)?,
            },
            nr::MUTEX_DESTROY => Syscall::MutexDestroy {
                mutex: handle(a0, MutexId::from_raw)?,
            },
            nr::SEM_CREATE => Syscall::SemCreate { value: a0 },
            nr::SEM_WAIT => Syscall::SemWait {
                sem: handle(a0, SemaphoreId::from_raw)?,
                timeout: Timeout::from_raw(a1),
            },
            nr::SEM_POST => Syscall::SemPost {
                sem: handle(a0, SemaphoreId::from_raw)?,
                reschedule: a1 != 0,
            },
            nr::SEM_TRYWAIT => Syscall::SemTrywait {
                sem: handle(a0, SemaphoreId::from_raw)?,
            },
            nr::SEM_DESTROY => Syscall::SemDestroy {
                sem: handle(a0, SemaphoreId::from_raw)?,
            },
            nr::EVENT_CREATE => Syscall::EventCreate {
                signaled: a0 != 0,
                flags: EventFlags::from_bits(a1).ok_or(SyscallError::InvalidArgument)?,
            },
            nr::EVENT_WAIT => Syscall::EventWait {
                event: handle(a0, EventId::from_raw)?,
                timeout: Timeout::from_raw(a1),
            },
            nr::EVENT_SIGNAL => Syscall::EventSignal {
                event: handle(a0, EventId::from_raw)?,
                reschedule: a1 != 0,
            },
            nr::EVENT_UNSIGNAL => Syscall::EventUnsignal {
                event: handle(a0, EventId::from_raw)?,
            },
            nr::EVENT_DESTROY => Syscall::EventDestroy {
                event: handle(a0, EventId::from_raw)?,
            },
            _ => return Err(SyscallError::InvalidSyscallNumber(a7)),
        };
        Ok(syscall)
    }
}

fn handle_result(result: KResult<u32>) -> SyscallReturn {
    match result {
        Ok(raw) => SyscallReturn::Handle(raw),
        Err(e) => SyscallReturn::Error(e),
    }
}

impl Kernel<Cpu> {
    /// Decodes and runs the system call in `cpu`'s registers. `cpu.pc` must
    /// already point past the `ecall`.
    pub fn handle_syscall(&mut self, cpu: &mut Cpu) -> Result<(), lk_vm::TrapError> {
        let caller = self.current_thread(cpu);
        let ret = match Syscall::from_registers(cpu) {
            Ok(syscall) => {
                debug!("cpu {}: {:?} syscall {:?}", cpu.hart_id, caller, syscall);
                self.dispatch_syscall(cpu, syscall)
            }
            Err(e) => {
                warn!("cpu {}: {:?} bad syscall: {}", cpu.hart_id, caller, e);
                SyscallReturn::Error(KernelError::InvalidArgs)
            }
        };

        let (a0, a1) = ret.registers();
        let write = |regs: &mut dyn FnMut(Register, u32)| {
            if let Some(v) = a0 {
                regs(Register::A0, v);
            }
            if let Some(v) = a1 {
                regs(Register::A1, v);
            }
        };
        if self.current_thread(cpu) == caller {
            write(&mut |reg, v| cpu.write_reg(reg, v));
        } else if let Some(t) = self.threads.get_mut(caller.0) {
            // The call switched the caller out; its result waits in the
            // saved frame.
            write(&mut |reg, v| t.arch.write_reg(reg, v));
        }
        Ok(())
    }

    fn dispatch_syscall(&mut self, cpu: &mut Cpu, syscall: Syscall) -> SyscallReturn {
        match syscall {
            Syscall::ThreadStart => {
                self.thread_start(cpu);
                SyscallReturn::Success
            }
            Syscall::Exit { code } => {
                self.thread_exit(cpu, code);
                SyscallReturn::Exited
            }
            Syscall::Yield => {
                self.thread_yield(cpu);
                SyscallReturn::Success
            }
            Syscall::Sleep { ticks } => {
                let _ = self.thread_sleep(cpu, ticks);
                SyscallReturn::Blocked
            }
            Syscall::ThreadCreate {
                entry,
                arg,
                priority,
            } => {
                let name = format!("thread@{:#x}", entry);
                handle_result(
                    self.thread_create(&name, entry, arg, priority)
                        .map(JoinHandle::into_raw),
                )
            }
            Syscall::ThreadResume { thread } => self.thread_resume(cpu, thread).into(),
            Syscall::ThreadJoin { handle, timeout } => match self.thread_join(cpu, handle, timeout) {
                Ok(Join::Exited(code)) => SyscallReturn::Joined(code),
                Ok(Join::Blocked(_)) => SyscallReturn::JoinPending,
                Ok(Join::TimedOut(_)) => SyscallReturn::Error(KernelError::TimedOut),
                Err(e) => SyscallReturn::Error(e),
            },
            Syscall::ThreadDetach { handle } => self.thread_detach(cpu, handle).into(),
            Syscall::SetPriority { priority } => {
                self.thread_set_priority(cpu, priority);
                SyscallReturn::Success
            }
            Syscall::CurrentTime => SyscallReturn::Value(self.current_time() as u32),
            Syscall::MutexCreate => handle_result(self.mutex_create().map(|m| m.to_raw())),
            Syscall::MutexAcquire { mutex, timeout } => {
                self.mutex_acquire(cpu, mutex, timeout).into()
            }
            Syscall::MutexRelease { mutex } => {
                self.mutex_release(cpu, mutex);
                SyscallReturn::Success
            }
            Syscall::MutexDestroy { mutex } => {
                self.mutex_destroy(cpu, mutex);
                SyscallReturn::Success
            }
            Syscall::SemCreate { value } => handle_result(self.sem_create(value).map(|s| s.to_raw())),
            Syscall::SemWait { sem, timeout } => self.sem_timedwait(cpu, sem, timeout).into(),
            Syscall::SemPost { sem, reschedule } => {
                SyscallReturn::Value(self.sem_post(cpu, sem, reschedule) as u32)
            }
            Syscall::SemTrywait { sem } => self.sem_trywait(cpu, sem).into(),
            Syscall::SemDestroy { sem } => {
                self.sem_destroy(cpu, sem);
                SyscallReturn::Success
            }
            Syscall::EventCreate { signaled, flags } => {
                handle_result(self.event_create(signaled, flags).map(|e| e.to_raw()))
            }
            Syscall::EventWait { event, timeout } => self.event_wait(cpu, event, timeout).into(),
            Syscall::EventSignal { event, reschedule } => {
                self.event_signal(cpu, event, reschedule);
                SyscallReturn::Success
            }
            Syscall::EventUnsignal { event } => {
                self.event_unsignal(cpu, event);
                SyscallReturn::Success
            }
            Syscall::EventDestroy { event } => {
                self.event_destroy(cpu, event);
                SyscallReturn::Success
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regs(a7: u32, a0: u32, a1: u32, a2: u32) -> Cpu {
        let mut cpu = Cpu::new(0, 0);
        cpu.write_reg(Register::A7, a7);
        cpu.write_reg(Register::A0, a0);
        cpu.write_reg(Register::A1, a1);
        cpu.write_reg(Register::A2, a2);
        cpu
    }

    #[test]
    fn decodes_arguments() {
        assert_eq!(
            Syscall::from_registers(&regs(nr::THREAD_CREATE, 0x40, 3, 24)).unwrap(),
            Syscall::ThreadCreate {
                entry: 0x40,
                arg: 3,
                priority: Priority::HIGH
            }
        );
        assert_eq!(
            Syscall::from_registers(&regs(nr::SEM_WAIT, 0x0001_0003, u32::MAX, 0)).unwrap(),
            Syscall::SemWait {
                sem: SemaphoreId::from_raw(0x0001_0003).unwrap(),
                timeout: Timeout::Infinite
            }
        );
        assert_eq!(
            Syscall::from_registers(&regs(nr::EXIT, -3i32 as u32, 0, 0)).unwrap(),
            Syscall::Exit { code: -3 }
        );
    }

    #[test]
    fn rejects_bad_numbers_and_handles() {
        assert!(matches!(
            Syscall::from_registers(&regs(999, 0, 0, 0)),
            Err(SyscallError::InvalidSyscallNumber(999))
        ));
        assert!(matches!(
            Syscall::from_registers(&regs(nr::MUTEX_RELEASE, 0, 0, 0)),
            Err(SyscallError::InvalidArgument)
        ));
        assert!(matches!(
            Syscall::from_registers(&regs(nr::THREAD_CREATE, 0x40, 0, 32)),
            Err(SyscallError::InvalidArgument)
        ));
    }

    #[test]
    fn return_registers() {
        assert_eq!(SyscallReturn::Success.registers(), (Some(0), None));
        assert_eq!(
            SyscallReturn::Error(KernelError::TimedOut).registers(),
            (Some(-13i32 as u32), Some(0))
        );
        assert_eq!(SyscallReturn::Joined(7).registers(), (Some(0), Some(7)));
        assert_eq!(SyscallReturn::JoinPending.registers(), (None, Some(JOIN_PENDING)));
        assert_eq!(SyscallReturn::Blocked.registers(), (None, None));
    }
}
