use lk_kernel::KernelError;
use lk_vm::VmError;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("vm error: {0}")]
    Vm(#[from] VmError),

    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("duplicate label: {0}")]
    DuplicateLabel(String),

    #[error("undefined label: {0}")]
    UndefinedLabel(String),

    #[error("unknown workload: {0}")]
    UnknownWorkload(String),

    #[error("invalid workload parameters: {0}")]
    InvalidParameters(String),

    #[error("program image needs {needed} data words, machine has {available}")]
    DataOverflow { needed: usize, available: usize },

    #[error("no halt within {0} instructions")]
    Deadline(u64),

    #[error("stopped at breakpoint after {0} instructions")]
    Breakpoint(u64),

    #[error("check failed: {what}: expected {expected}, found {found}")]
    CheckFailed {
        what: String,
        expected: u32,
        found: u32,
    },
}
