//! Board glue: boots the kernel on every hart of the simulated machine,
//! runs a workload image to completion and checks what it left in memory.

pub mod asm;
pub mod error;
pub mod image;
pub mod workload;

pub use error::RuntimeError;
pub use workload::{Workload, WorkloadParams};

use image::{ProgramImage, MAIN_DONE};
use lk_kernel::{CpuStats, Kernel, KernelConfig};
use lk_vm::{
    Cpu, ExitReason, Memory, TrapCause, TrapError, TrapHandler, VirtAddr, VirtualMachine,
    VmConfig, VmError,
};
use log::{info, warn};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub harts: usize,
    /// Instructions between timer interrupts on each hart.
    pub timer_interval: Option<u64>,
    /// Instructions across all harts before the run counts as hung.
    pub max_instructions: u64,
    pub memory_words: usize,
    pub quantum_ticks: i32,
    pub workload: Workload,
    pub params: WorkloadParams,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            harts: 1,
            timer_interval: Some(50),
            max_instructions: 5_000_000,
            memory_words: 1024,
            quantum_ticks: 5,
            workload: Workload::SemPingpong,
            params: WorkloadParams::default(),
        }
    }
}

/// The kernel as the machine's trap handler, still reachable by the
/// runtime for inspection.
#[derive(Clone)]
pub struct SharedKernel(Arc<Mutex<Kernel<Cpu>>>);

impl SharedKernel {
    pub fn new(kernel: Kernel<Cpu>) -> Self {
        Self(Arc::new(Mutex::new(kernel)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Kernel<Cpu>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TrapHandler for SharedKernel {
    fn handle_trap(
        &mut self,
        cause: TrapCause,
        cpu: &mut Cpu,
        memory: &mut Memory,
    ) -> Result<VirtAddr, TrapError> {
        self.lock().handle_trap(cause, cpu, memory)
    }

    fn take_ipis(&mut self) -> u32 {
        self.lock().take_reschedule_ipis()
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub workload: Workload,
    pub instructions: u64,
    pub ticks: u64,
    pub cpu_stats: Vec<CpuStats>,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} instructions, {} ticks",
            self.workload, self.instructions, self.ticks
        )?;
        for (n, s) in self.cpu_stats.iter().enumerate() {
            writeln!(
                f,
                "  cpu {}: {} switches, {} reschedules, {} preempts, {} yields, {} timer ints, {} ipis, {} idle ticks",
                n,
                s.context_switches,
                s.reschedules,
                s.preempts,
                s.yields,
                s.timer_ints,
                s.reschedule_ipis,
                s.idle_ticks
            )?;
        }
        Ok(())
    }
}

pub struct Runtime {
    vm: VirtualMachine,
    kernel: SharedKernel,
    image: ProgramImage,
    workload: Workload,
}

impl Runtime {
    /// Builds the workload image, boots the kernel on hart 0 and starts
    /// every other hart in its idle thread.
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let image = config.workload.build(&config.params)?;
        if image.data_words > config.memory_words {
            return Err(RuntimeError::DataOverflow {
                needed: image.data_words,
                available: config.memory_words,
            });
        }

        let kernel = Kernel::new(KernelConfig {
            num_cpus: config.harts,
            quantum_ticks: config.quantum_ticks,
            trampoline_entry: image.trampoline,
            idle_entry: image.idle,
            ..KernelConfig::default()
        })?;
        let kernel = SharedKernel::new(kernel);

        let vm_config = VmConfig {
            harts: config.harts,
            memory_words: config.memory_words,
            timer_interval: config.timer_interval,
            max_instructions: Some(config.max_instructions),
        };
        let mut vm = VirtualMachine::new(
            vm_config,
            image.program.text.clone(),
            Box::new(kernel.clone()),
        )?;

        {
            let mut k = kernel.lock();
            let (boot, secondaries) = vm.harts.split_at_mut(1);
            boot[0].pc = image.main;
            k.boot(&mut boot[0])?;
            for hart in secondaries {
                k.secondary_cpu_entry(hart);
            }
        }
        info!(
            "{} on {} hart(s): {} instructions of text, timer every {:?}",
            config.workload,
            config.harts,
            image.program.text.len(),
            config.timer_interval
        );

        Ok(Self {
            vm,
            kernel,
            image,
            workload: config.workload,
        })
    }

    pub fn kernel(&self) -> &SharedKernel {
        &self.kernel
    }

    pub fn memory(&self) -> &Memory {
        &self.vm.memory
    }

    /// Runs until every thread has exited, then checks the results.
    pub fn run(&mut self) -> Result<RunReport, RuntimeError> {
        match self.vm.run()? {
            ExitReason::Halt => {}
            ExitReason::Deadline => {
                warn!(
                    "deadline reached, threads:\n{}",
                    self.kernel.lock().dump_all_threads()
                );
                return Err(RuntimeError::Deadline(self.vm.instruction_count));
            }
            ExitReason::Breakpoint => {
                return Err(RuntimeError::Breakpoint(self.vm.instruction_count));
            }
        }
        self.verify()?;

        let k = self.kernel.lock();
        let report = RunReport {
            workload: self.workload,
            instructions: self.vm.instruction_count,
            ticks: k.current_time(),
            cpu_stats: (0..k.config().num_cpus).map(|n| k.cpu_stats(n)).collect(),
        };
        info!("{}", report);
        Ok(report)
    }

    fn read(&self, addr: u32) -> Result<u32, RuntimeError> {
        self.vm
            .memory
            .read_word(addr)
            .map_err(|e| RuntimeError::Vm(VmError::from(e)))
    }

    fn verify(&self) -> Result<(), RuntimeError> {
        let status = self.read(self.image.status_addr)?;
        if status != MAIN_DONE {
            return Err(RuntimeError::CheckFailed {
                what: "main status".into(),
                expected: MAIN_DONE,
                found: status,
            });
        }
        for check in &self.image.checks {
            let found = self.read(check.addr)?;
            if found != check.expected {
                return Err(RuntimeError::CheckFailed {
                    what: check.what.clone(),
                    expected: check.expected,
                    found,
                });
            }
        }
        Ok(())
    }
}
