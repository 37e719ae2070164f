//! A small multi-hart RISC-V flavoured machine.
//!
//! The machine has no privilege levels and no MMU: everything runs as
//! "kernel" code, and all policy lives behind [`TrapHandler`]. Each hart
//! gets a timer interrupt every `timer_interval` retired instructions and
//! can be poked with a software interrupt the handler requests through
//! [`TrapHandler::take_ipis`].

pub mod cpu;
pub mod error;
pub mod instruction;
pub mod memory;
pub mod trap;

pub use cpu::*;
pub use error::*;
pub use instruction::*;
pub use memory::*;
pub use trap::*;

use log::trace;

pub struct VmConfig {
    pub harts: usize,
    pub memory_words: usize,
    /// Instructions between timer interrupts on each hart.
    pub timer_interval: Option<u64>,
    /// Give up after this many instructions across all harts.
    pub max_instructions: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            harts: 1,
            memory_words: 1024,
            timer_interval: Some(100),
            max_instructions: None,
        }
    }
}

pub struct VirtualMachine {
    pub harts: Vec<Cpu>,
    pub text: Vec<Instruction>,
    pub memory: Memory,
    pub trap_handler: Box<dyn TrapHandler>,
    pub config: VmConfig,
    pub instruction_count: u64,
    hart_instructions: Vec<u64>,
    next_timer_interrupt: Vec<u64>,
}

#[derive(Debug, PartialEq)]
pub enum ExitReason {
    Halt,
    Breakpoint,
    /// `max_instructions` ran out before the handler asked to halt.
    Deadline,
}

#[derive(Debug)]
pub enum StepResult {
    Continue,
    Trap(TrapCause),
    Exit(ExitReason),
}

impl VirtualMachine {
    pub fn new(
        config: VmConfig,
        text: Vec<Instruction>,
        trap_handler: Box<dyn TrapHandler>,
    ) -> Result<Self, VmError> {
        if config.harts == 0 {
            return Err(VmError::NoHarts);
        }
        let first_timer = config.timer_interval.unwrap_or(u64::MAX);
        Ok(Self {
            harts: (0..config.harts).map(|id| Cpu::new(id, 0)).collect(),
            text,
            memory: Memory::new(config.memory_words),
            trap_handler,
            instruction_count: 0,
            hart_instructions: vec![0; config.harts],
            next_timer_interrupt: vec![first_timer; config.harts],
            config,
        })
    }

    /// Runs every hart in lock step, one instruction each per round.
    pub fn run(&mut self) -> Result<ExitReason, VmError> {
        loop {
            for hart in 0..self.harts.len() {
                if let Some(limit) = self.config.max_instructions {
                    if self.instruction_count >= limit {
                        return Ok(ExitReason::Deadline);
                    }
                }
                if let Some(reason) = self.step_hart(hart)? {
                    return Ok(reason);
                }
            }
        }
    }

    /// Takes a pending interrupt or retires one instruction on `hart`.
    pub fn step_hart(&mut self, hart: usize) -> Result<Option<ExitReason>, VmError> {
        if self.harts[hart].interrupt_pending() {
            let cause = if self.harts[hart].timer_pending {
                self.harts[hart].timer_pending = false;
                TrapCause::TimerInterrupt
            } else {
                self.harts[hart].soft_pending = false;
                TrapCause::SoftwareInterrupt
            };
            return self.dispatch_trap(hart, cause);
        }

        let step_result = self.step(hart);
        self.instruction_count += 1;
        self.hart_instructions[hart] += 1;

        if self.hart_instructions[hart] >= self.next_timer_interrupt[hart] {
            if let Some(interval) = self.config.timer_interval {
                self.next_timer_interrupt[hart] += interval;
                self.harts[hart].timer_pending = true;
            }
        }

        match step_result? {
            StepResult::Continue => Ok(None),
            StepResult::Exit(reason) => Ok(Some(reason)),
            StepResult::Trap(cause) => self.dispatch_trap(hart, cause),
        }
    }

    fn dispatch_trap(
        &mut self,
        hart: usize,
        cause: TrapCause,
    ) -> Result<Option<ExitReason>, VmError> {
        trace!("hart {}: trap {:?} at {:#x}", hart, cause, self.harts[hart].pc);
        let result =
            self.trap_handler
                .handle_trap(cause, &mut self.harts[hart], &mut self.memory);
        match result {
            Ok(resume_addr) => self.harts[hart].pc = resume_addr.val(),
            Err(TrapError::Halt) => return Ok(Some(ExitReason::Halt)),
            Err(e) => return Err(VmError::Trap(e)),
        }

        let ipis = self.trap_handler.take_ipis();
        if ipis != 0 {
            for (id, cpu) in self.harts.iter_mut().enumerate() {
                if ipis & (1 << id) != 0 {
                    cpu.soft_pending = true;
                }
            }
        }
        Ok(None)
    }

    pub fn step(&mut self, hart: usize) -> Result<StepResult, VmError> {
        let cpu = &mut self.harts[hart];
        let pc = cpu.pc;
        let instruction = match self.text.get((pc / 4) as usize) {
            Some(ins) if pc % 4 == 0 => *ins,
            _ => {
                return Ok(StepResult::Trap(TrapCause::InstructionAccessFault {
                    addr: VirtAddr::new(pc),
                }))
            }
        };

        if instruction.uses_fpu() && !cpu.fpu_enabled {
            return Ok(StepResult::Trap(TrapCause::FpuDisabled));
        }

        let mut next_pc = pc.wrapping_add(4);

        match instruction {
            Instruction::Li { rd, imm } => cpu.write_reg(rd, imm as u32),
            Instruction::Addi { rd, rs1, imm } => {
                let v = cpu.read_reg(rs1).wrapping_add(imm as u32);
                cpu.write_reg(rd, v);
            }
            Instruction::Add { rd, rs1, rs2 } => {
                let v = cpu.read_reg(rs1).wrapping_add(cpu.read_reg(rs2));
                cpu.write_reg(rd, v);
            }
            Instruction::Sub { rd, rs1, rs2 } => {
                let v = cpu.read_reg(rs1).wrapping_sub(cpu.read_reg(rs2));
                cpu.write_reg(rd, v);
            }
            Instruction::Lw { rd, rs1, offset } => {
                let addr = cpu.read_reg(rs1).wrapping_add(offset as u32);
                match self.memory.read_word(addr) {
                    Ok(v) => cpu.write_reg(rd, v),
                    Err(_) => {
                        return Ok(StepResult::Trap(TrapCause::LoadAccessFault {
                            addr: VirtAddr::new(addr),
                        }))
                    }
                }
            }
            Instruction::Sw { rs2, rs1, offset } => {
                let addr = cpu.read_reg(rs1).wrapping_add(offset as u32);
                if self.memory.write_word(addr, cpu.read_reg(rs2)).is_err() {
                    return Ok(StepResult::Trap(TrapCause::StoreAccessFault {
                        addr: VirtAddr::new(addr),
                    }));
                }
            }
            Instruction::Beq { rs1, rs2, offset } => {
                if cpu.read_reg(rs1) == cpu.read_reg(rs2) {
                    next_pc = pc.wrapping_add(offset as u32);
                }
            }
            Instruction::Bne { rs1, rs2, offset } => {
                if cpu.read_reg(rs1) != cpu.read_reg(rs2) {
                    next_pc = pc.wrapping_add(offset as u32);
                }
            }
            Instruction::Blt { rs1, rs2, offset } => {
                if (cpu.read_reg(rs1) as i32) < (cpu.read_reg(rs2) as i32) {
                    next_pc = pc.wrapping_add(offset as u32);
                }
            }
            Instruction::Bge { rs1, rs2, offset } => {
                if (cpu.read_reg(rs1) as i32) >= (cpu.read_reg(rs2) as i32) {
                    next_pc = pc.wrapping_add(offset as u32);
                }
            }
            Instruction::Jal { rd, offset } => {
                cpu.write_reg(rd, pc.wrapping_add(4));
                next_pc = pc.wrapping_add(offset as u32);
            }
            Instruction::Jalr { rd, rs1, offset } => {
                let target = cpu.read_reg(rs1).wrapping_add(offset as u32) & !1;
                cpu.write_reg(rd, pc.wrapping_add(4));
                next_pc = target;
            }
            Instruction::FcvtDW { fd, rs1 } => {
                let v = cpu.read_reg(rs1) as i32 as f64;
                cpu.write_freg(fd, v);
            }
            Instruction::FcvtWD { rd, fs1 } => {
                let v = cpu.read_freg(fs1) as i32;
                cpu.write_reg(rd, v as u32);
            }
            Instruction::FaddD { fd, fs1, fs2 } => {
                let v = cpu.read_freg(fs1) + cpu.read_freg(fs2);
                cpu.write_freg(fd, v);
            }
            Instruction::FmulD { fd, fs1, fs2 } => {
                let v = cpu.read_freg(fs1) * cpu.read_freg(fs2);
                cpu.write_freg(fd, v);
            }
            Instruction::Ecall => return Ok(StepResult::Trap(TrapCause::EnvironmentCall)),
            Instruction::Ebreak => return Ok(StepResult::Exit(ExitReason::Breakpoint)),
            Instruction::Wfi | Instruction::Nop => {}
        }

        cpu.pc = next_pc;
        Ok(StepResult::Continue)
    }
}
