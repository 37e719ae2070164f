use super::{ArchContext, ArchCpu, EntryPoint};
use crate::types::CpuNum;
use lk_vm::{Cpu, FpuRegisters, Register};

/// Register file of a switched-out thread on the simulated hart.
#[derive(Debug, Clone, Default)]
pub struct VmContext {
    pub pc: u32,
    pub regs: [u32; 32],
    pub ints_enabled: bool,
    /// FP registers as of the last slice in which the thread used them.
    pub fpu: Option<Box<FpuRegisters>>,
}

impl VmContext {
    pub fn read_reg(&self, reg: Register) -> u32 {
        self.regs[reg.val()]
    }

    pub fn write_reg(&mut self, reg: Register, val: u32) {
        if reg != Register::ZERO {
            self.regs[reg.val()] = val;
        }
    }
}

impl ArchContext for VmContext {
    fn initialize(&mut self, stack_top: u32, trampoline: EntryPoint, entry: EntryPoint, arg: u32) {
        *self = Self::default();
        self.pc = trampoline;
        self.regs[Register::SP.val()] = stack_top & !0xf;
        self.regs[Register::A0.val()] = entry;
        self.regs[Register::A1.val()] = arg;
    }

    fn uses_extended_state(&self) -> bool {
        self.fpu.is_some()
    }
}

impl ArchCpu for Cpu {
    type Context = VmContext;

    fn cpu_num(&self) -> CpuNum {
        self.hart_id
    }

    fn ints_disabled(&self) -> bool {
        !self.ints_enabled
    }

    fn disable_ints(&mut self) {
        self.ints_enabled = false;
    }

    fn enable_ints(&mut self) {
        self.ints_enabled = true;
    }

    fn context_switch(&mut self, old: &mut VmContext, new: &mut VmContext) {
        old.pc = self.pc;
        old.regs = self.regs;
        old.ints_enabled = self.ints_enabled;
        if self.fpu_enabled {
            **old.fpu.get_or_insert_with(|| Box::new([0.0; 32])) = self.fregs;
        }
        // Next FP instruction traps and pulls in the new thread's registers.
        self.fpu_enabled = false;

        self.pc = new.pc;
        self.regs = new.regs;
        self.ints_enabled = new.ints_enabled;
    }

    fn restore_extended_state(&mut self, current: &mut VmContext) {
        self.fregs = match &current.fpu {
            Some(saved) => **saved,
            None => [0.0; 32],
        };
        current.fpu.get_or_insert_with(|| Box::new([0.0; 32]));
        self.fpu_enabled = true;
    }
}
