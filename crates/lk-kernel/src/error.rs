use thiserror::Error;

/// Run-time outcomes a caller is expected to handle.
///
/// Programming errors (recursive mutex acquire, stale handles, blocking in
/// interrupt context, ...) are not represented here; they panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("not found")]
    NotFound,

    #[error("not ready")]
    NotReady,

    #[error("out of memory")]
    NoMemory,

    #[error("operation not valid in the current state")]
    InvalidState,

    #[error("invalid arguments")]
    InvalidArgs,

    #[error("thread is not suspended")]
    NotSuspended,

    #[error("object destroyed while waiting")]
    ObjectDestroyed,

    #[error("thread is not blocked")]
    NotBlocked,

    #[error("timed out")]
    TimedOut,

    #[error("thread is detached")]
    ThreadDetached,
}

impl KernelError {
    /// Negative status code carried through the syscall return register.
    pub fn code(self) -> i32 {
        match self {
            Self::NotFound => -2,
            Self::NotReady => -3,
            Self::NoMemory => -5,
            Self::InvalidState => -7,
            Self::InvalidArgs => -8,
            Self::NotSuspended => -10,
            Self::ObjectDestroyed => -11,
            Self::NotBlocked => -12,
            Self::TimedOut => -13,
            Self::ThreadDetached => -22,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let err = match code {
            -2 => Self::NotFound,
            -3 => Self::NotReady,
            -5 => Self::NoMemory,
            -7 => Self::InvalidState,
            -8 => Self::InvalidArgs,
            -10 => Self::NotSuspended,
            -11 => Self::ObjectDestroyed,
            -12 => Self::NotBlocked,
            -13 => Self::TimedOut,
            -22 => Self::ThreadDetached,
            _ => return None,
        };
        Some(err)
    }
}

pub type KResult<T> = Result<T, KernelError>;

/// Status code for a kernel result: 0 on success.
pub fn status_code(result: KResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}

#[derive(Debug, Error)]
pub enum SyscallError {
    #[error("invalid syscall number: {0}")]
    InvalidSyscallNumber(u32),

    #[error("invalid argument")]
    InvalidArgument,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for err in [
            KernelError::NotFound,
            KernelError::NotReady,
            KernelError::NoMemory,
            KernelError::InvalidState,
            KernelError::InvalidArgs,
            KernelError::NotSuspended,
            KernelError::ObjectDestroyed,
            KernelError::NotBlocked,
            KernelError::TimedOut,
            KernelError::ThreadDetached,
        ] {
            assert!(err.code() < 0);
            assert_eq!(KernelError::from_code(err.code()), Some(err));
        }
        assert_eq!(KernelError::from_code(0), None);
        assert_eq!(status_code(Ok(())), 0);
        assert_eq!(status_code(Err(KernelError::TimedOut)), -13);
    }
}
