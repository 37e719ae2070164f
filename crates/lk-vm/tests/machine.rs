use lk_vm::{
    Cpu, ExitReason, FRegister, Instruction, Memory, Register, TrapCause, TrapError, TrapHandler,
    VirtAddr, VirtualMachine, VmConfig, DATA_BASE,
};
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct Log {
    traps: Vec<(usize, TrapCause)>,
}

/// Records traps; halts on the first ecall, enables the FPU on demand and
/// asks for an IPI to hart 1 on every timer interrupt of hart 0.
struct Recorder {
    log: Arc<Mutex<Log>>,
    ipis: u32,
}

impl TrapHandler for Recorder {
    fn handle_trap(
        &mut self,
        cause: TrapCause,
        cpu: &mut Cpu,
        _memory: &mut Memory,
    ) -> Result<VirtAddr, TrapError> {
        self.log.lock().unwrap().traps.push((cpu.hart_id, cause));
        match cause {
            TrapCause::EnvironmentCall => Err(TrapError::Halt),
            TrapCause::FpuDisabled => {
                cpu.fpu_enabled = true;
                Ok(VirtAddr::new(cpu.pc))
            }
            TrapCause::TimerInterrupt => {
                if cpu.hart_id == 0 {
                    self.ipis |= 1 << 1;
                }
                Ok(VirtAddr::new(cpu.pc))
            }
            TrapCause::SoftwareInterrupt => Ok(VirtAddr::new(cpu.pc)),
            other => Err(TrapError::Unhandled(other)),
        }
    }

    fn take_ipis(&mut self) -> u32 {
        std::mem::take(&mut self.ipis)
    }
}

fn machine(config: VmConfig, text: Vec<Instruction>) -> (VirtualMachine, Arc<Mutex<Log>>) {
    init_logging();
    let log = Arc::new(Mutex::new(Log::default()));
    let handler = Recorder {
        log: Arc::clone(&log),
        ipis: 0,
    };
    let vm = VirtualMachine::new(config, text, Box::new(handler)).unwrap();
    (vm, log)
}

#[test]
fn counts_down_and_stores_to_memory() {
    // t0 = 5; loop: t1 += t0; t0 -= 1; bne t0, zero, loop; sw t1; ecall
    let text = vec![
        Instruction::Li { rd: Register::T0, imm: 5 },
        Instruction::Li { rd: Register::T1, imm: 0 },
        Instruction::Add { rd: Register::T1, rs1: Register::T1, rs2: Register::T0 },
        Instruction::Addi { rd: Register::T0, rs1: Register::T0, imm: -1 },
        Instruction::Bne { rs1: Register::T0, rs2: Register::ZERO, offset: -8 },
        Instruction::Li { rd: Register::A0, imm: DATA_BASE as i32 },
        Instruction::Sw { rs2: Register::T1, rs1: Register::A0, offset: 4 },
        Instruction::Ecall,
    ];
    let config = VmConfig {
        timer_interval: None,
        ..VmConfig::default()
    };
    let (mut vm, _) = machine(config, text);
    assert_eq!(vm.run().unwrap(), ExitReason::Halt);
    assert_eq!(vm.memory.read_word(DATA_BASE + 4).unwrap(), 15);
}

#[test]
fn timer_interrupts_only_arrive_when_enabled() {
    let text = vec![
        Instruction::Nop,
        Instruction::Nop,
        Instruction::Nop,
        Instruction::Nop,
        Instruction::Ecall,
    ];
    let config = VmConfig {
        timer_interval: Some(2),
        ..VmConfig::default()
    };
    let (mut vm, log) = machine(config, text.clone());
    assert_eq!(vm.run().unwrap(), ExitReason::Halt);
    assert!(log
        .lock()
        .unwrap()
        .traps
        .iter()
        .all(|(_, c)| *c == TrapCause::EnvironmentCall));

    let config = VmConfig {
        timer_interval: Some(2),
        ..VmConfig::default()
    };
    let (mut vm, log) = machine(config, text);
    vm.harts[0].ints_enabled = true;
    assert_eq!(vm.run().unwrap(), ExitReason::Halt);
    let timers = log
        .lock()
        .unwrap()
        .traps
        .iter()
        .filter(|(_, c)| *c == TrapCause::TimerInterrupt)
        .count();
    assert_eq!(timers, 2);
}

#[test]
fn first_fp_instruction_traps_then_executes() {
    let f0 = FRegister::new(0).unwrap();
    let text = vec![
        Instruction::Li { rd: Register::T0, imm: 21 },
        Instruction::FcvtDW { fd: f0, rs1: Register::T0 },
        Instruction::FaddD { fd: f0, fs1: f0, fs2: f0 },
        Instruction::FcvtWD { rd: Register::A0, fs1: f0 },
        Instruction::Ecall,
    ];
    let config = VmConfig {
        timer_interval: None,
        ..VmConfig::default()
    };
    let (mut vm, log) = machine(config, text);
    assert_eq!(vm.run().unwrap(), ExitReason::Halt);
    assert_eq!(vm.harts[0].read_reg(Register::A0), 42);
    let fpu_traps = log
        .lock()
        .unwrap()
        .traps
        .iter()
        .filter(|(_, c)| *c == TrapCause::FpuDisabled)
        .count();
    assert_eq!(fpu_traps, 1);
}

#[test]
fn requested_ipis_reach_the_other_hart() {
    // Both harts spin; hart 0's timer asks for an IPI on hart 1.
    let text = vec![Instruction::Jal { rd: Register::ZERO, offset: 0 }];
    let config = VmConfig {
        harts: 2,
        timer_interval: Some(10),
        max_instructions: Some(200),
        ..VmConfig::default()
    };
    let (mut vm, log) = machine(config, text);
    for cpu in &mut vm.harts {
        cpu.ints_enabled = true;
    }
    assert_eq!(vm.run().unwrap(), ExitReason::Deadline);
    assert!(log
        .lock()
        .unwrap()
        .traps
        .iter()
        .any(|(hart, c)| *hart == 1 && *c == TrapCause::SoftwareInterrupt));
}

#[test]
fn jumping_outside_text_faults() {
    let text = vec![Instruction::Jal { rd: Register::ZERO, offset: 400 }];
    let config = VmConfig {
        timer_interval: None,
        ..VmConfig::default()
    };
    let (mut vm, _) = machine(config, text);
    assert!(vm.run().is_err());
}

/// Integer ALU results plus the outcome of a signed `blt` and a `beq`.
fn arithmetic_program(a: i32, b: i32) -> Vec<Instruction> {
    vec![
        Instruction::Li { rd: Register::T0, imm: a },
        Instruction::Li { rd: Register::T1, imm: b },
        Instruction::Add { rd: Register::T2, rs1: Register::T0, rs2: Register::T1 },
        Instruction::Sub { rd: Register::T3, rs1: Register::T0, rs2: Register::T1 },
        Instruction::Li { rd: Register::T4, imm: 0 },
        Instruction::Blt { rs1: Register::T0, rs2: Register::T1, offset: 8 },
        Instruction::Jal { rd: Register::ZERO, offset: 8 },
        Instruction::Li { rd: Register::T4, imm: 1 },
        Instruction::Li { rd: Register::A1, imm: 0 },
        Instruction::Beq { rs1: Register::T0, rs2: Register::T1, offset: 8 },
        Instruction::Jal { rd: Register::ZERO, offset: 8 },
        Instruction::Li { rd: Register::A1, imm: 1 },
        Instruction::Ecall,
    ]
}

proptest! {
    #[test]
    fn alu_and_branches_match_wrapping_signed_semantics(
        a in any::<i32>(),
        b in any::<i32>(),
        same in any::<bool>(),
    ) {
        let b = if same { a } else { b };
        let config = VmConfig {
            timer_interval: None,
            max_instructions: Some(100),
            ..VmConfig::default()
        };
        let (mut vm, _) = machine(config, arithmetic_program(a, b));
        prop_assert_eq!(vm.run().unwrap(), ExitReason::Halt);
        let hart = &vm.harts[0];
        prop_assert_eq!(hart.read_reg(Register::T2), a.wrapping_add(b) as u32);
        prop_assert_eq!(hart.read_reg(Register::T3), a.wrapping_sub(b) as u32);
        prop_assert_eq!(hart.read_reg(Register::T4), u32::from(a < b));
        prop_assert_eq!(hart.read_reg(Register::A1), u32::from(a == b));
    }
}
