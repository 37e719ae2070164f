//! A tiny assembler for the simulated hart with forward label resolution.
//!
//! Branches, jumps and address loads name a label; every reference is
//! recorded as a fixup and patched once all labels are known.
//!
//! ```
//! use lk_runtime::asm::Assembler;
//! use lk_vm::Register;
//!
//! let mut asm = Assembler::new();
//! asm.li(Register::T0, 3);
//! asm.define_label("loop")?;
//! asm.addi(Register::T0, Register::T0, -1);
//! asm.bne(Register::T0, Register::ZERO, "loop");
//! let program = asm.finalize()?;
//! assert_eq!(program.address("loop")?, 4);
//! # Ok::<(), lk_runtime::RuntimeError>(())
//! ```

use crate::error::RuntimeError;
use lk_vm::{FRegister, Instruction, Register, VmError};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchKind {
    Beq,
    Bne,
    Blt,
    Bge,
}

/// A label reference waiting to be patched.
#[derive(Debug, Clone)]
struct LabelFixup {
    label: String,
    /// Index of the placeholder instruction.
    index: usize,
    kind: FixupKind,
}

#[derive(Debug, Clone, Copy)]
enum FixupKind {
    Branch {
        kind: BranchKind,
        rs1: Register,
        rs2: Register,
    },
    Jal {
        rd: Register,
    },
    /// `li rd, <address of label>`.
    Address {
        rd: Register,
    },
}

#[derive(Debug, Default)]
pub struct Assembler {
    text: Vec<Instruction>,
    labels: HashMap<String, u32>,
    fixups: Vec<LabelFixup>,
}

/// Assembled text plus its symbol table.
#[derive(Debug, Clone)]
pub struct Program {
    pub text: Vec<Instruction>,
    labels: HashMap<String, u32>,
}

impl Program {
    pub fn address(&self, label: &str) -> Result<u32, RuntimeError> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| RuntimeError::UndefinedLabel(label.to_string()))
    }
}

/// FP register by number.
pub fn freg(num: u8) -> Result<FRegister, RuntimeError> {
    FRegister::new(num).map_err(|e| RuntimeError::Vm(VmError::from(e)))
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address of the next instruction.
    pub fn current_position(&self) -> u32 {
        (self.text.len() * 4) as u32
    }

    pub fn define_label(&mut self, name: &str) -> Result<u32, RuntimeError> {
        if self.labels.contains_key(name) {
            return Err(RuntimeError::DuplicateLabel(name.to_string()));
        }
        let addr = self.current_position();
        self.labels.insert(name.to_string(), addr);
        Ok(addr)
    }

    pub fn emit(&mut self, instruction: Instruction) {
        self.text.push(instruction);
    }

    fn emit_fixup(&mut self, label: &str, kind: FixupKind) {
        self.fixups.push(LabelFixup {
            label: label.to_string(),
            index: self.text.len(),
            kind,
        });
        self.text.push(Instruction::Nop);
    }

    pub fn li(&mut self, rd: Register, imm: i32) {
        self.emit(Instruction::Li { rd, imm });
    }

    pub fn addi(&mut self, rd: Register, rs1: Register, imm: i32) {
        self.emit(Instruction::Addi { rd, rs1, imm });
    }

    pub fn add(&mut self, rd: Register, rs1: Register, rs2: Register) {
        self.emit(Instruction::Add { rd, rs1, rs2 });
    }

    pub fn mv(&mut self, rd: Register, rs: Register) {
        self.addi(rd, rs, 0);
    }

    pub fn lw(&mut self, rd: Register, rs1: Register, offset: i32) {
        self.emit(Instruction::Lw { rd, rs1, offset });
    }

    pub fn sw(&mut self, rs2: Register, rs1: Register, offset: i32) {
        self.emit(Instruction::Sw { rs2, rs1, offset });
    }

    /// Loads the word at an absolute data address, clobbering `rd` only.
    pub fn load_abs(&mut self, rd: Register, addr: u32) {
        self.li(rd, addr as i32);
        self.lw(rd, rd, 0);
    }

    /// Stores `rs` to an absolute data address through `scratch`.
    pub fn store_abs(&mut self, rs: Register, addr: u32, scratch: Register) {
        self.li(scratch, addr as i32);
        self.sw(rs, scratch, 0);
    }

    pub fn beq(&mut self, rs1: Register, rs2: Register, label: &str) {
        self.branch(BranchKind::Beq, rs1, rs2, label);
    }

    pub fn bne(&mut self, rs1: Register, rs2: Register, label: &str) {
        self.branch(BranchKind::Bne, rs1, rs2, label);
    }

    pub fn blt(&mut self, rs1: Register, rs2: Register, label: &str) {
        self.branch(BranchKind::Blt, rs1, rs2, label);
    }

    pub fn bge(&mut self, rs1: Register, rs2: Register, label: &str) {
        self.branch(BranchKind::Bge, rs1, rs2, label);
    }

    fn branch(&mut self, kind: BranchKind, rs1: Register, rs2: Register, label: &str) {
        self.emit_fixup(label, FixupKind::Branch { kind, rs1, rs2 });
    }

    pub fn jal(&mut self, rd: Register, label: &str) {
        self.emit_fixup(label, FixupKind::Jal { rd });
    }

    pub fn j(&mut self, label: &str) {
        self.jal(Register::ZERO, label);
    }

    /// `li rd, label`.
    pub fn la(&mut self, rd: Register, label: &str) {
        self.emit_fixup(label, FixupKind::Address { rd });
    }

    pub fn jalr(&mut self, rd: Register, rs1: Register, offset: i32) {
        self.emit(Instruction::Jalr { rd, rs1, offset });
    }

    pub fn ret(&mut self) {
        self.jalr(Register::ZERO, Register::RA, 0);
    }

    pub fn syscall(&mut self, nr: u32) {
        self.li(Register::A7, nr as i32);
        self.emit(Instruction::Ecall);
    }

    /// Resolves every label reference.
    pub fn finalize(mut self) -> Result<Program, RuntimeError> {
        for fixup in &self.fixups {
            let target = *self
                .labels
                .get(&fixup.label)
                .ok_or_else(|| RuntimeError::UndefinedLabel(fixup.label.clone()))?;
            let pc = (fixup.index * 4) as i32;
            let offset = target as i32 - pc;
            self.text[fixup.index] = match fixup.kind {
                FixupKind::Branch { kind, rs1, rs2 } => match kind {
                    BranchKind::Beq => Instruction::Beq { rs1, rs2, offset },
                    BranchKind::Bne => Instruction::Bne { rs1, rs2, offset },
                    BranchKind::Blt => Instruction::Blt { rs1, rs2, offset },
                    BranchKind::Bge => Instruction::Bge { rs1, rs2, offset },
                },
                FixupKind::Jal { rd } => Instruction::Jal { rd, offset },
                FixupKind::Address { rd } => Instruction::Li {
                    rd,
                    imm: target as i32,
                },
            };
        }
        Ok(Program {
            text: self.text,
            labels: self.labels,
        })
    }
}
