use crate::cpu::{FRegister, Register};

/// The subset of RV32IMD the simulator understands.
///
/// Branch and jump offsets are in bytes, relative to the instruction's own
/// address, exactly like the real encoding. Instructions are stored
/// pre-decoded, one per 4-byte slot starting at address 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    // ------------------------------------------------------------------------
    // Integer computational
    // ------------------------------------------------------------------------
    /// Load immediate (pseudo): rd = imm
    Li { rd: Register, imm: i32 },

    /// Add immediate: rd = rs1 + imm
    Addi {
        rd: Register,
        rs1: Register,
        imm: i32,
    },

    /// Add: rd = rs1 + rs2
    Add {
        rd: Register,
        rs1: Register,
        rs2: Register,
    },

    /// Subtract: rd = rs1 - rs2
    Sub {
        rd: Register,
        rs1: Register,
        rs2: Register,
    },

    // ------------------------------------------------------------------------
    // Loads and stores
    // ------------------------------------------------------------------------
    /// Load word: rd = mem[rs1 + offset]
    Lw {
        rd: Register,
        rs1: Register,
        offset: i32,
    },

    /// Store word: mem[rs1 + offset] = rs2
    Sw {
        rs2: Register,
        rs1: Register,
        offset: i32,
    },

    // ------------------------------------------------------------------------
    // Control transfer
    // ------------------------------------------------------------------------
    Beq {
        rs1: Register,
        rs2: Register,
        offset: i32,
    },
    Bne {
        rs1: Register,
        rs2: Register,
        offset: i32,
    },
    /// Branch if less than (signed)
    Blt {
        rs1: Register,
        rs2: Register,
        offset: i32,
    },
    /// Branch if greater or equal (signed)
    Bge {
        rs1: Register,
        rs2: Register,
        offset: i32,
    },
    /// Jump and link: rd = pc + 4; pc += offset
    Jal { rd: Register, offset: i32 },
    /// Jump and link register: rd = pc + 4; pc = (rs1 + offset) & !1
    Jalr {
        rd: Register,
        rs1: Register,
        offset: i32,
    },

    // ------------------------------------------------------------------------
    // Floating point (double)
    // ------------------------------------------------------------------------
    /// Convert signed word to double: fd = rs1 as f64
    FcvtDW { fd: FRegister, rs1: Register },
    /// Convert double to signed word (truncating): rd = fs1 as i32
    FcvtWD { rd: Register, fs1: FRegister },
    FaddD {
        fd: FRegister,
        fs1: FRegister,
        fs2: FRegister,
    },
    FmulD {
        fd: FRegister,
        fs1: FRegister,
        fs2: FRegister,
    },

    // ------------------------------------------------------------------------
    // System
    // ------------------------------------------------------------------------
    Ecall,
    Ebreak,
    /// Wait for interrupt; treated as a hint.
    Wfi,
    Nop,
}

impl Instruction {
    pub fn uses_fpu(&self) -> bool {
        matches!(
            self,
            Self::FcvtDW { .. } | Self::FcvtWD { .. } | Self::FaddD { .. } | Self::FmulD { .. }
        )
    }
}
