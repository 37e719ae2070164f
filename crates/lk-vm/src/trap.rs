use crate::cpu::Cpu;
use crate::memory::{Memory, VirtAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCause {
    // Exceptions
    InstructionAccessFault { addr: VirtAddr },
    Breakpoint,
    LoadAccessFault { addr: VirtAddr },
    StoreAccessFault { addr: VirtAddr },
    /// FP instruction executed while the hart's FPU is switched off.
    FpuDisabled,

    // System calls
    EnvironmentCall,

    // Interrupts
    TimerInterrupt,
    /// Inter-processor interrupt.
    SoftwareInterrupt,
}

/// Trait that the kernel implements to handle traps
pub trait TrapHandler {
    /// Handle a trap. Returns the address to resume execution.
    ///
    /// For exceptions and system calls `cpu.pc` holds the address of the
    /// trapping instruction; for interrupts it holds the next instruction.
    fn handle_trap(
        &mut self,
        cause: TrapCause,
        cpu: &mut Cpu,
        memory: &mut Memory,
    ) -> Result<VirtAddr, TrapError>;

    /// Harts the handler wants poked with a software interrupt.
    fn take_ipis(&mut self) -> u32 {
        0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrapError {
    #[error("unhandled trap: {0:?}")]
    Unhandled(TrapCause),

    #[error("halt requested")]
    Halt,
}
