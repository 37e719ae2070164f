//! Built-in workloads. Each builds a program image whose `main` spawns
//! the workload's threads, joins them, and leaves results in data memory.

use crate::asm::{freg, Assembler};
use crate::error::RuntimeError;
use crate::image::{ImageBuilder, ProgramImage, ThreadPlan};
use lk_kernel::syscall::nr;
use lk_kernel::{EventFlags, Priority};
use lk_vm::{Instruction, Register};
use std::fmt;
use std::str::FromStr;

/// Flag value the event signaller publishes before signaling.
const BROADCAST_FLAG: u32 = 42;
/// Ticks the signaller sleeps so that waiters block first.
const SIGNALLER_DELAY: i32 = 2;
const MAX_THREADS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    /// Producer/consumer pairs handing values over two semaphores.
    SemPingpong,
    /// Threads incrementing a shared word under a mutex.
    MutexCounter,
    /// Waiters on a manual-reset event released by one signaller.
    EventBroadcast,
    /// Threads accumulating in FP registers across switches.
    FpuMix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadParams {
    /// Threads (pairs for `sem-pingpong`).
    pub threads: usize,
    pub iterations: u32,
}

impl Default for WorkloadParams {
    fn default() -> Self {
        Self {
            threads: 2,
            iterations: 10,
        }
    }
}

impl Workload {
    pub const ALL: [Workload; 4] = [
        Workload::SemPingpong,
        Workload::MutexCounter,
        Workload::EventBroadcast,
        Workload::FpuMix,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Workload::SemPingpong => "sem-pingpong",
            Workload::MutexCounter => "mutex-counter",
            Workload::EventBroadcast => "event-broadcast",
            Workload::FpuMix => "fpu-mix",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Workload::SemPingpong => "producer/consumer pairs over two semaphores",
            Workload::MutexCounter => "threads increment a shared word under a mutex",
            Workload::EventBroadcast => "waiters released together by a manual-reset event",
            Workload::FpuMix => "FP accumulation interleaved with yields and preemption",
        }
    }

    pub fn build(&self, params: &WorkloadParams) -> Result<ProgramImage, RuntimeError> {
        validate(*self, params)?;
        let mut b = ImageBuilder::new()?;
        match self {
            Workload::SemPingpong => sem_pingpong(&mut b, params)?,
            Workload::MutexCounter => mutex_counter(&mut b, params)?,
            Workload::EventBroadcast => event_broadcast(&mut b, params)?,
            Workload::FpuMix => fpu_mix(&mut b, params)?,
        }
        b.finish()
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Workload {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Workload::ALL
            .into_iter()
            .find(|w| w.name() == s)
            .ok_or_else(|| RuntimeError::UnknownWorkload(s.to_string()))
    }
}

fn validate(workload: Workload, params: &WorkloadParams) -> Result<(), RuntimeError> {
    let threads = match workload {
        Workload::SemPingpong => params.threads * 2,
        Workload::EventBroadcast => params.threads + 1,
        _ => params.threads,
    };
    if params.threads == 0 || threads > MAX_THREADS {
        return Err(RuntimeError::InvalidParameters(format!(
            "{} needs 1..={} threads, got {}",
            workload, MAX_THREADS, threads
        )));
    }
    if params.iterations == 0 || params.iterations > 0xffff {
        return Err(RuntimeError::InvalidParameters(format!(
            "iterations must be in 1..=65535, got {}",
            params.iterations
        )));
    }
    Ok(())
}

/// Counted loop over `body`: `s3` runs from 0 to `iterations`.
fn counted_loop(
    asm: &mut Assembler,
    label: &str,
    iterations: u32,
    body: impl FnOnce(&mut Assembler),
) -> Result<(), RuntimeError> {
    asm.li(Register::S3, 0);
    asm.li(Register::S4, iterations as i32);
    asm.define_label(label)?;
    body(asm);
    asm.addi(Register::S3, Register::S3, 1);
    asm.blt(Register::S3, Register::S4, label);
    Ok(())
}

/// Returns from a thread entry with the error in `a0` if it is non-zero.
fn bail_on_error(asm: &mut Assembler, fail: &str) {
    asm.bne(Register::A0, Register::ZERO, fail);
}

// Pair block: [empty sem, full sem, slot, sum].
fn sem_pingpong(b: &mut ImageBuilder, params: &WorkloadParams) -> Result<(), RuntimeError> {
    let m = params.iterations;
    let blocks: Vec<u32> = (0..params.threads).map(|_| b.data(4)).collect();

    b.begin_main()?;
    let mut threads = Vec::new();
    for (p, &block) in blocks.iter().enumerate() {
        b.create_object(nr::SEM_CREATE, 1, 0, block);
        b.create_object(nr::SEM_CREATE, 0, 0, block + 4);
        threads.push(ThreadPlan {
            name: format!("producer {}", p),
            entry: "producer",
            arg: block,
            priority: Priority::DEFAULT,
            expected_exit: 0,
        });
        threads.push(ThreadPlan {
            name: format!("consumer {}", p),
            entry: "consumer",
            arg: block,
            priority: Priority::clamped(Priority::DEFAULT.val() as i64 + 1),
            expected_exit: 0,
        });
        b.check(format!("sum of pair {}", p), block + 12, m * (m + 1) / 2);
    }
    b.spawn_and_join(&threads)?;
    b.end_main()?;

    let asm = &mut b.asm;
    asm.define_label("producer")?;
    asm.mv(Register::S2, Register::A0);
    asm.li(Register::S5, 1);
    counted_loop(asm, "producer_loop", m, |asm| {
        asm.lw(Register::A0, Register::S2, 0);
        asm.li(Register::A1, -1);
        asm.syscall(nr::SEM_WAIT);
        bail_on_error(asm, "pingpong_fail");
        asm.sw(Register::S5, Register::S2, 8);
        asm.addi(Register::S5, Register::S5, 1);
        asm.lw(Register::A0, Register::S2, 4);
        asm.li(Register::A1, 1);
        asm.syscall(nr::SEM_POST);
    })?;
    asm.li(Register::A0, 0);
    asm.ret();

    asm.define_label("consumer")?;
    asm.mv(Register::S2, Register::A0);
    counted_loop(asm, "consumer_loop", m, |asm| {
        asm.lw(Register::A0, Register::S2, 4);
        asm.li(Register::A1, -1);
        asm.syscall(nr::SEM_WAIT);
        bail_on_error(asm, "pingpong_fail");
        asm.lw(Register::T0, Register::S2, 8);
        asm.lw(Register::T1, Register::S2, 12);
        asm.add(Register::T1, Register::T1, Register::T0);
        asm.sw(Register::T1, Register::S2, 12);
        asm.lw(Register::A0, Register::S2, 0);
        asm.li(Register::A1, 0);
        asm.syscall(nr::SEM_POST);
    })?;
    asm.li(Register::A0, 0);
    asm.ret();

    asm.define_label("pingpong_fail")?;
    asm.ret();
    Ok(())
}

// Block: [mutex, counter].
fn mutex_counter(b: &mut ImageBuilder, params: &WorkloadParams) -> Result<(), RuntimeError> {
    let block = b.data(2);
    b.begin_main()?;
    b.create_object(nr::MUTEX_CREATE, 0, 0, block);
    let threads: Vec<ThreadPlan> = (0..params.threads)
        .map(|i| ThreadPlan {
            name: format!("counter {}", i),
            entry: "counter",
            arg: block,
            priority: Priority::DEFAULT,
            expected_exit: 0,
        })
        .collect();
    b.spawn_and_join(&threads)?;
    b.end_main()?;
    b.check(
        "shared counter",
        block + 4,
        params.threads as u32 * params.iterations,
    );

    let asm = &mut b.asm;
    asm.define_label("counter")?;
    asm.mv(Register::S2, Register::A0);
    counted_loop(asm, "counter_loop", params.iterations, |asm| {
        asm.lw(Register::A0, Register::S2, 0);
        asm.li(Register::A1, -1);
        asm.syscall(nr::MUTEX_ACQUIRE);
        bail_on_error(asm, "counter_fail");
        // Read-modify-write with a yield in the middle: only the mutex
        // keeps increments from being lost.
        asm.lw(Register::S5, Register::S2, 4);
        asm.syscall(nr::YIELD);
        asm.addi(Register::S5, Register::S5, 1);
        asm.sw(Register::S5, Register::S2, 4);
        asm.lw(Register::A0, Register::S2, 0);
        asm.syscall(nr::MUTEX_RELEASE);
    })?;
    asm.li(Register::A0, 0);
    asm.ret();

    asm.define_label("counter_fail")?;
    asm.ret();
    Ok(())
}

// Block: [event, flag].
fn event_broadcast(b: &mut ImageBuilder, params: &WorkloadParams) -> Result<(), RuntimeError> {
    let block = b.data(2);
    b.begin_main()?;
    b.create_object(nr::EVENT_CREATE, 0, EventFlags::empty().bits() as i32, block);
    let mut threads: Vec<ThreadPlan> = (0..params.threads)
        .map(|i| ThreadPlan {
            name: format!("waiter {}", i),
            entry: "waiter",
            arg: block,
            priority: Priority::HIGH,
            expected_exit: BROADCAST_FLAG,
        })
        .collect();
    threads.push(ThreadPlan {
        name: "signaller".into(),
        entry: "signaller",
        arg: block,
        priority: Priority::LOW,
        expected_exit: 0,
    });
    b.spawn_and_join(&threads)?;
    b.end_main()?;
    b.check("broadcast flag", block + 4, BROADCAST_FLAG);

    let asm = &mut b.asm;
    asm.define_label("waiter")?;
    asm.mv(Register::S2, Register::A0);
    asm.lw(Register::A0, Register::S2, 0);
    asm.li(Register::A1, -1);
    asm.syscall(nr::EVENT_WAIT);
    asm.bne(Register::A0, Register::ZERO, "waiter_fail");
    asm.lw(Register::A0, Register::S2, 4);
    asm.define_label("waiter_fail")?;
    asm.ret();

    asm.define_label("signaller")?;
    asm.mv(Register::S2, Register::A0);
    asm.li(Register::A0, SIGNALLER_DELAY);
    asm.syscall(nr::SLEEP);
    asm.li(Register::T0, BROADCAST_FLAG as i32);
    asm.sw(Register::T0, Register::S2, 4);
    asm.lw(Register::A0, Register::S2, 0);
    asm.li(Register::A1, 1);
    asm.syscall(nr::EVENT_SIGNAL);
    asm.ret();
    Ok(())
}

// Thread k adds k to an FP accumulator `iterations` times, yielding after
// each step, and exits with twice the sum.
fn fpu_mix(b: &mut ImageBuilder, params: &WorkloadParams) -> Result<(), RuntimeError> {
    let m = params.iterations;
    b.begin_main()?;
    let threads: Vec<ThreadPlan> = (1..=params.threads as u32)
        .map(|k| ThreadPlan {
            name: format!("fpu {}", k),
            entry: "fpu_worker",
            arg: k,
            priority: Priority::DEFAULT,
            expected_exit: 2 * k * m,
        })
        .collect();
    b.spawn_and_join(&threads)?;
    b.end_main()?;

    let (step, sum, two) = (freg(1)?, freg(2)?, freg(3)?);
    let asm = &mut b.asm;
    asm.define_label("fpu_worker")?;
    asm.emit(Instruction::FcvtDW {
        fd: step,
        rs1: Register::A0,
    });
    asm.emit(Instruction::FcvtDW {
        fd: sum,
        rs1: Register::ZERO,
    });
    counted_loop(asm, "fpu_loop", m, |asm| {
        asm.emit(Instruction::FaddD {
            fd: sum,
            fs1: sum,
            fs2: step,
        });
        asm.syscall(nr::YIELD);
    })?;
    asm.li(Register::T0, 2);
    asm.emit(Instruction::FcvtDW {
        fd: two,
        rs1: Register::T0,
    });
    asm.emit(Instruction::FmulD {
        fd: sum,
        fs1: sum,
        fs2: two,
    });
    asm.emit(Instruction::FcvtWD {
        rd: Register::A0,
        fs1: sum,
    });
    asm.ret();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for w in Workload::ALL {
            assert_eq!(w.name().parse::<Workload>().unwrap(), w);
        }
        assert!(matches!(
            "nope".parse::<Workload>(),
            Err(RuntimeError::UnknownWorkload(_))
        ));
    }

    #[test]
    fn every_workload_builds() {
        let params = WorkloadParams::default();
        for w in Workload::ALL {
            let image = w.build(&params).unwrap();
            assert_eq!(image.trampoline, 0);
            assert!(!image.checks.is_empty(), "{} checks nothing", w);
        }
    }

    #[test]
    fn rejects_degenerate_parameters() {
        let zero = WorkloadParams {
            threads: 0,
            iterations: 1,
        };
        assert!(matches!(
            Workload::MutexCounter.build(&zero),
            Err(RuntimeError::InvalidParameters(_))
        ));
        let too_many = WorkloadParams {
            threads: 20,
            iterations: 1,
        };
        assert!(Workload::SemPingpong.build(&too_many).is_err());
        assert!(Workload::MutexCounter.build(&too_many).is_ok());
    }
}
