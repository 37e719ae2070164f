//! What the scheduler needs from a CPU architecture.

pub mod vm;

use crate::types::CpuNum;
use core::fmt::Debug;

/// Address of code in the program image.
pub type EntryPoint = u32;

/// Per-CPU operations the kernel core calls into.
pub trait ArchCpu {
    type Context: ArchContext;

    fn cpu_num(&self) -> CpuNum;

    fn ints_disabled(&self) -> bool;

    fn disable_ints(&mut self);

    fn enable_ints(&mut self);

    /// Saves the running state into `old` and resumes `new` in its place.
    ///
    /// Called with interrupts disabled and the scheduler lock held. When
    /// the kernel later switches back to `old`, execution continues as if
    /// this call had returned.
    fn context_switch(&mut self, old: &mut Self::Context, new: &mut Self::Context);

    /// Lazily brings `current`'s extended state back onto the CPU after it
    /// trapped on first use. Architectures without lazy state switching
    /// never see the trap.
    fn restore_extended_state(&mut self, current: &mut Self::Context) {
        let _ = current;
    }
}

/// Saved register state of a thread that is not running.
pub trait ArchContext: Default + Debug {
    /// Builds the first-run frame: the thread starts in `trampoline` on the
    /// given stack with `entry` and `arg` in the first two argument
    /// registers, interrupts masked.
    fn initialize(&mut self, stack_top: u32, trampoline: EntryPoint, entry: EntryPoint, arg: u32);

    /// Whether the thread has ever touched extended (FPU) state.
    fn uses_extended_state(&self) -> bool {
        false
    }
}
