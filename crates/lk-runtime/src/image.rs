//! Program image layout: the first-run trampoline, the idle loop, the
//! bootstrap `main` that spawns and joins a workload's threads, and the
//! data words the run is checked against afterwards.

use crate::asm::{Assembler, Program};
use crate::error::RuntimeError;
use lk_kernel::syscall::{nr, JOIN_PENDING};
use lk_kernel::Priority;
use lk_vm::{Instruction, Register, DATA_BASE};

pub const TRAMPOLINE: &str = "trampoline";
pub const IDLE: &str = "idle";
pub const MAIN: &str = "main";
const MAIN_FAIL: &str = "main_fail";

/// Value `main` leaves in the status word after joining everything.
pub const MAIN_DONE: u32 = 1;

/// A data word with the value it must hold once the machine halts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub what: String,
    pub addr: u32,
    pub expected: u32,
}

/// A thread `main` creates, resumes and joins.
#[derive(Debug, Clone)]
pub struct ThreadPlan {
    pub name: String,
    pub entry: &'static str,
    pub arg: u32,
    pub priority: Priority,
    pub expected_exit: u32,
}

#[derive(Debug, Clone)]
pub struct ProgramImage {
    pub program: Program,
    pub main: u32,
    pub trampoline: u32,
    pub idle: u32,
    pub status_addr: u32,
    pub data_words: usize,
    pub checks: Vec<Check>,
}

pub struct ImageBuilder {
    pub asm: Assembler,
    next_data: u32,
    status_addr: u32,
    checks: Vec<Check>,
}

impl ImageBuilder {
    /// Starts an image with the trampoline at address 0 followed by the
    /// idle loop.
    pub fn new() -> Result<Self, RuntimeError> {
        let mut asm = Assembler::new();

        // a0 = entry, a1 = arg. Interrupts stay off until THREAD_START.
        asm.define_label(TRAMPOLINE)?;
        asm.mv(Register::S0, Register::A0);
        asm.mv(Register::S1, Register::A1);
        asm.syscall(nr::THREAD_START);
        asm.mv(Register::A0, Register::S1);
        asm.jalr(Register::RA, Register::S0, 0);
        asm.syscall(nr::EXIT);

        asm.define_label(IDLE)?;
        asm.emit(Instruction::Wfi);
        asm.j(IDLE);

        let mut builder = Self {
            asm,
            next_data: DATA_BASE,
            status_addr: 0,
            checks: Vec::new(),
        };
        builder.status_addr = builder.data(1);
        Ok(builder)
    }

    /// Reserves `words` zeroed data words and returns the first address.
    pub fn data(&mut self, words: usize) -> u32 {
        let addr = self.next_data;
        self.next_data += (words * 4) as u32;
        addr
    }

    pub fn check(&mut self, what: impl Into<String>, addr: u32, expected: u32) {
        self.checks.push(Check {
            what: what.into(),
            addr,
            expected,
        });
    }

    pub fn begin_main(&mut self) -> Result<(), RuntimeError> {
        self.asm.define_label(MAIN)?;
        Ok(())
    }

    /// `a0 = nr(a0, a1)`; stores the handle at `store` or bails out of main
    /// on an error code.
    pub fn create_object(&mut self, syscall: u32, a0: i32, a1: i32, store: u32) {
        let asm = &mut self.asm;
        asm.li(Register::A0, a0);
        asm.li(Register::A1, a1);
        asm.syscall(syscall);
        asm.blt(Register::A0, Register::ZERO, MAIN_FAIL);
        asm.store_abs(Register::A0, store, Register::T0);
    }

    /// Creates and resumes every thread in order, then joins them in order,
    /// recording each exit code for checking.
    pub fn spawn_and_join(&mut self, threads: &[ThreadPlan]) -> Result<(), RuntimeError> {
        let handles = self.data(threads.len());
        let results = self.data(threads.len());

        for (i, t) in threads.iter().enumerate() {
            let handle = handles + 4 * i as u32;
            let asm = &mut self.asm;
            asm.la(Register::A0, t.entry);
            asm.li(Register::A1, t.arg as i32);
            asm.li(Register::A2, t.priority.val() as i32);
            asm.syscall(nr::THREAD_CREATE);
            asm.blt(Register::A0, Register::ZERO, MAIN_FAIL);
            asm.store_abs(Register::A0, handle, Register::T0);
            asm.syscall(nr::THREAD_RESUME);
            asm.bne(Register::A0, Register::ZERO, MAIN_FAIL);
        }

        for (i, t) in threads.iter().enumerate() {
            let (handle, result) = (handles + 4 * i as u32, results + 4 * i as u32);
            let again = format!("join_{}", i);
            let asm = &mut self.asm;
            asm.define_label(&again)?;
            asm.load_abs(Register::A0, handle);
            asm.li(Register::A1, -1);
            asm.syscall(nr::THREAD_JOIN);
            asm.bne(Register::A0, Register::ZERO, MAIN_FAIL);
            // Woken after blocking: join again to collect the code.
            asm.li(Register::T1, JOIN_PENDING as i32);
            asm.beq(Register::A1, Register::T1, &again);
            asm.store_abs(Register::A1, result, Register::T0);
            self.check(format!("exit code of {}", t.name), result, t.expected_exit);
        }
        Ok(())
    }

    /// Marks success and exits; a failure path stores the error instead.
    pub fn end_main(&mut self) -> Result<(), RuntimeError> {
        let status = self.status_addr;
        let asm = &mut self.asm;
        asm.li(Register::T1, MAIN_DONE as i32);
        asm.store_abs(Register::T1, status, Register::T0);
        asm.li(Register::A0, 0);
        asm.syscall(nr::EXIT);

        asm.define_label(MAIN_FAIL)?;
        asm.store_abs(Register::A0, status, Register::T0);
        asm.syscall(nr::EXIT);
        Ok(())
    }

    pub fn finish(self) -> Result<ProgramImage, RuntimeError> {
        let program = self.asm.finalize()?;
        Ok(ProgramImage {
            main: program.address(MAIN)?,
            trampoline: program.address(TRAMPOLINE)?,
            idle: program.address(IDLE)?,
            program,
            status_addr: self.status_addr,
            data_words: ((self.next_data - DATA_BASE) / 4) as usize,
            checks: self.checks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trampoline_sits_at_address_zero() {
        let mut b = ImageBuilder::new().unwrap();
        b.begin_main().unwrap();
        b.end_main().unwrap();
        let image = b.finish().unwrap();
        assert_eq!(image.trampoline, 0);
        assert!(image.idle > image.trampoline);
        assert!(image.main > image.idle);
        assert_eq!(image.status_addr, DATA_BASE);
        assert_eq!(image.data_words, 1);
    }

    #[test]
    fn join_results_are_checked() {
        let mut b = ImageBuilder::new().unwrap();
        b.begin_main().unwrap();
        b.spawn_and_join(&[ThreadPlan {
            name: "t".into(),
            entry: IDLE,
            arg: 0,
            priority: Priority::DEFAULT,
            expected_exit: 3,
        }])
        .unwrap();
        b.end_main().unwrap();
        let image = b.finish().unwrap();
        assert_eq!(image.data_words, 3);
        assert_eq!(image.checks.len(), 1);
        assert_eq!(image.checks[0].expected, 3);
    }
}
