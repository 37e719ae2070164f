#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Register(u8);

impl Register {
    pub const ZERO: Register = Register(0); // x0
    pub const RA: Register = Register(1); // x1 (return address)
    pub const SP: Register = Register(2); // x2 (stack pointer)
    pub const GP: Register = Register(3);
    pub const TP: Register = Register(4);
    pub const T0: Register = Register(5);
    pub const T1: Register = Register(6);
    pub const T2: Register = Register(7);
    pub const S0: Register = Register(8);
    pub const S1: Register = Register(9);
    pub const A0: Register = Register(10);
    pub const A1: Register = Register(11);
    pub const A2: Register = Register(12);
    pub const A3: Register = Register(13);
    pub const A4: Register = Register(14);
    pub const A5: Register = Register(15);
    pub const A6: Register = Register(16);
    pub const A7: Register = Register(17);
    pub const S2: Register = Register(18);
    pub const S3: Register = Register(19);
    pub const S4: Register = Register(20);
    pub const S5: Register = Register(21);
    pub const T3: Register = Register(28);
    pub const T4: Register = Register(29);

    pub fn new(num: u8) -> Result<Self, crate::error::DecodeError> {
        if num < 32 {
            Ok(Register(num))
        } else {
            Err(crate::error::DecodeError::InvalidRegister(num))
        }
    }

    pub fn val(&self) -> usize {
        self.0 as usize
    }
}

/// Floating point register `f0..f31`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct FRegister(u8);

impl FRegister {
    pub fn new(num: u8) -> Result<Self, crate::error::DecodeError> {
        if num < 32 {
            Ok(FRegister(num))
        } else {
            Err(crate::error::DecodeError::InvalidRegister(num))
        }
    }

    pub fn val(&self) -> usize {
        self.0 as usize
    }
}

pub type FpuRegisters = [f64; 32];

/// One hardware thread.
///
/// `ints_enabled` plays the role of `mstatus.MIE`; `fpu_enabled` is the
/// `mstatus.FS != Off` bit a lazy-FPU kernel clears on every switch so the
/// first FP instruction of the next slice traps.
#[derive(Debug, Clone)]
pub struct Cpu {
    pub hart_id: usize,
    pub pc: u32,
    pub regs: [u32; 32],
    pub fregs: FpuRegisters,
    pub ints_enabled: bool,
    pub fpu_enabled: bool,
    pub timer_pending: bool,
    pub soft_pending: bool,
}

impl Cpu {
    pub fn new(hart_id: usize, entry_point: u32) -> Self {
        Self {
            hart_id,
            pc: entry_point,
            regs: [0; 32],
            fregs: [0.0; 32],
            ints_enabled: false,
            fpu_enabled: false,
            timer_pending: false,
            soft_pending: false,
        }
    }

    pub fn read_reg(&self, reg: Register) -> u32 {
        if reg == Register::ZERO {
            0
        } else {
            self.regs[reg.val()]
        }
    }

    pub fn write_reg(&mut self, reg: Register, val: u32) {
        if reg != Register::ZERO {
            self.regs[reg.val()] = val;
        }
    }

    pub fn read_freg(&self, reg: FRegister) -> f64 {
        self.fregs[reg.val()]
    }

    pub fn write_freg(&mut self, reg: FRegister, val: f64) {
        self.fregs[reg.val()] = val;
    }

    /// True if an enabled interrupt is waiting to be taken.
    pub fn interrupt_pending(&self) -> bool {
        self.ints_enabled && (self.timer_pending || self.soft_pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_register_is_hardwired() {
        let mut cpu = Cpu::new(0, 0);
        cpu.write_reg(Register::ZERO, 42);
        assert_eq!(cpu.read_reg(Register::ZERO), 0);
        cpu.write_reg(Register::A0, 42);
        assert_eq!(cpu.read_reg(Register::A0), 42);
    }

    #[test]
    fn masked_interrupts_are_not_pending() {
        let mut cpu = Cpu::new(1, 0);
        cpu.timer_pending = true;
        assert!(!cpu.interrupt_pending());
        cpu.ints_enabled = true;
        assert!(cpu.interrupt_pending());
    }

    #[test]
    fn register_numbers_are_checked() {
        assert!(Register::new(31).is_ok());
        assert!(Register::new(32).is_err());
        assert!(FRegister::new(40).is_err());
    }
}
