#![allow(dead_code)]

use lk_kernel::{Kernel, KernelConfig, Priority, ThreadId};
use lk_vm::Cpu;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn boot_with(config: KernelConfig) -> (Kernel<Cpu>, Cpu, ThreadId) {
    init_logging();
    let mut kernel = Kernel::new(config).unwrap();
    let mut cpu = Cpu::new(0, 0);
    let main = kernel.boot(&mut cpu).unwrap();
    (kernel, cpu, main)
}

pub fn boot() -> (Kernel<Cpu>, Cpu, ThreadId) {
    boot_with(KernelConfig::default())
}

/// One timer interrupt, bracketed the way the trap path does it.
pub fn tick(k: &mut Kernel<Cpu>, cpu: &mut Cpu) {
    k.irq_enter(cpu);
    let ret = k.timer_tick(cpu);
    k.irq_exit(cpu, ret);
}

/// Creates a detached thread and resumes it. A thread at least as urgent
/// as the caller is running when this returns.
pub fn spawn(k: &mut Kernel<Cpu>, cpu: &mut Cpu, name: &str, priority: Priority) -> ThreadId {
    let handle = k.thread_create(name, 0x100, 0, priority).unwrap();
    let id = handle.id();
    k.thread_detach(cpu, handle).unwrap();
    k.thread_resume(cpu, id).unwrap();
    id
}

/// Creates a detached thread and makes it ready without giving it the CPU.
pub fn spawn_ready(k: &mut Kernel<Cpu>, cpu: &mut Cpu, name: &str, priority: Priority) -> ThreadId {
    let handle = k.thread_create(name, 0x100, 0, priority).unwrap();
    let id = handle.id();
    k.thread_detach(cpu, handle).unwrap();
    k.enter_critical_section(cpu);
    k.thread_resume(cpu, id).unwrap();
    k.exit_critical_section(cpu);
    id
}
