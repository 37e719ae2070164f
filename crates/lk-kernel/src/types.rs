use crate::arena::Index;
use core::fmt;

pub type CpuNum = usize;

/// Upper bound on CPUs; CPU sets are `u32` masks.
pub const SMP_MAX_CPUS: usize = 32;

pub const NUM_PRIORITIES: usize = 32;

/// Thread priority, 0 (idle) through 31. Higher runs first.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Priority(u8);

impl Priority {
    pub const LOWEST: Self = Self(0);
    pub const IDLE: Self = Self(0);
    pub const LOW: Self = Self(NUM_PRIORITIES as u8 / 4);
    pub const DEFAULT: Self = Self(NUM_PRIORITIES as u8 / 2);
    pub const HIGH: Self = Self(NUM_PRIORITIES as u8 / 4 * 3);
    pub const DPC: Self = Self(NUM_PRIORITIES as u8 - 2);
    pub const HIGHEST: Self = Self(NUM_PRIORITIES as u8 - 1);

    pub fn new(level: u8) -> Option<Self> {
        (usize::from(level) < NUM_PRIORITIES).then_some(Self(level))
    }

    /// Clamps `level` into the valid range.
    pub fn clamped(level: i64) -> Self {
        Self(level.clamp(0, NUM_PRIORITIES as i64 - 1) as u8)
    }

    pub fn val(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How long a blocking call may wait, in timer ticks.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Timeout {
    /// Fail with `TimedOut` instead of blocking when the wait can't be
    /// satisfied right away.
    Immediate,
    Ticks(u64),
    Infinite,
}

impl Timeout {
    /// Syscall encoding: 0 is immediate, `u32::MAX` is forever.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Immediate,
            u32::MAX => Self::Infinite,
            n => Self::Ticks(u64::from(n)),
        }
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::Immediate | Self::Ticks(0))
    }
}

/// Outcome of a call that may have put the caller to sleep.
///
/// `Blocked` means the calling thread was switched out; the status it
/// eventually wakes with is collected through `Kernel::resume_status`
/// once it is current again.
#[must_use]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Wait {
    Done,
    Blocked,
}

/// Whether an interrupt handler wants a reschedule on the way out.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HandlerReturn {
    NoReschedule,
    Reschedule,
}

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
        pub struct $name(pub(crate) Index);

        impl $name {
            /// Packed form passed through syscall registers.
            pub fn to_raw(&self) -> u32 {
                self.0.to_raw()
            }

            pub fn from_raw(raw: u32) -> Option<Self> {
                Index::from_raw(raw).map(Self)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(
                    f,
                    concat!(stringify!($name), "({}v{})"),
                    self.0.slot(),
                    self.0.generation()
                )
            }
        }
    };
}

handle!(
    /// Names a thread without owning it.
    ThreadId
);
handle!(WaitQueueId);
handle!(MutexId);
handle!(SemaphoreId);
handle!(EventId);

/// The right to join (or detach) a thread.
///
/// Returned once by `thread_create` and consumed by `thread_join` or
/// `thread_detach`, so a thread can be reaped at most once.
#[derive(Debug, Eq, PartialEq)]
pub struct JoinHandle(ThreadId);

impl JoinHandle {
    pub(crate) fn new(id: ThreadId) -> Self {
        Self(id)
    }

    pub fn id(&self) -> ThreadId {
        self.0
    }

    /// Rebuilds a handle from its syscall encoding. The caller vouches that
    /// no other `JoinHandle` for the thread is live.
    pub fn from_raw(raw: u32) -> Option<Self> {
        ThreadId::from_raw(raw).map(Self)
    }

    pub fn into_raw(self) -> u32 {
        self.0.to_raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_levels() {
        assert_eq!(Priority::LOW.val(), 8);
        assert_eq!(Priority::DEFAULT.val(), 16);
        assert_eq!(Priority::HIGH.val(), 24);
        assert_eq!(Priority::DPC.val(), 30);
        assert_eq!(Priority::HIGHEST.val(), 31);
        assert_eq!(Priority::new(32), None);
        assert_eq!(Priority::clamped(99), Priority::HIGHEST);
        assert_eq!(Priority::clamped(-4), Priority::LOWEST);
    }

    #[test]
    fn raw_timeouts() {
        assert_eq!(Timeout::from_raw(0), Timeout::Immediate);
        assert_eq!(Timeout::from_raw(7), Timeout::Ticks(7));
        assert_eq!(Timeout::from_raw(u32::MAX), Timeout::Infinite);
        assert!(Timeout::Ticks(0).is_immediate());
    }
}
