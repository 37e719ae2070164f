mod common;

use common::{boot, boot_with, spawn, spawn_ready, tick};
use lk_kernel::{
    HandlerReturn, Join, JoinHandle, Kernel, KernelConfig, KernelError, Priority, ThreadState,
    Timeout, Wait,
};
use lk_vm::Cpu;

#[test]
fn higher_priority_thread_runs_on_resume() {
    let (mut k, mut cpu, main) = boot();
    let handle = k.thread_create("hi", 0x100, 1, Priority::HIGH).unwrap();
    let hi = handle.id();
    assert_eq!(k.thread_info(hi).unwrap().state(), ThreadState::Initial);

    k.thread_resume(&mut cpu, hi).unwrap();
    assert_eq!(k.current_thread(&cpu), hi);
    assert_eq!(k.thread_info(main).unwrap().state(), ThreadState::Ready);

    k.thread_exit(&mut cpu, 5);
    assert_eq!(k.current_thread(&cpu), main);
    assert_eq!(
        k.thread_join(&mut cpu, handle, Timeout::Infinite),
        Ok(Join::Exited(5))
    );
    assert!(k.thread_info(hi).is_none());
}

#[test]
fn lower_priority_thread_waits_for_the_cpu() {
    let (mut k, mut cpu, main) = boot();
    let lo = spawn(&mut k, &mut cpu, "lo", Priority::LOW);
    assert_eq!(k.current_thread(&cpu), main);
    assert_eq!(k.thread_info(lo).unwrap().state(), ThreadState::Ready);
    for _ in 0..20 {
        tick(&mut k, &mut cpu);
        assert_eq!(k.current_thread(&cpu), main);
    }
}

#[test]
fn equal_priority_threads_round_robin_on_quantum_expiry() {
    let (mut k, mut cpu, main) = boot_with(KernelConfig {
        quantum_ticks: 2,
        ..KernelConfig::default()
    });
    let a = spawn_ready(&mut k, &mut cpu, "a", Priority::DEFAULT);
    let b = spawn_ready(&mut k, &mut cpu, "b", Priority::DEFAULT);

    let mut order = Vec::new();
    for _ in 0..6 {
        tick(&mut k, &mut cpu);
        tick(&mut k, &mut cpu);
        order.push(k.current_thread(&cpu));
    }
    assert_eq!(order, vec![a, b, main, a, b, main]);
    assert!(k.cpu_stats(0).preempts >= 6);
}

#[test]
fn priority_selection_then_arrival_order() {
    let (mut k, mut cpu, main) = boot();
    k.thread_set_priority(&mut cpu, Priority::new(10).unwrap());
    assert_eq!(k.current_thread(&cpu), main);

    let p1 = spawn_ready(&mut k, &mut cpu, "p1", Priority::new(1).unwrap());
    let p5a = spawn_ready(&mut k, &mut cpu, "p5a", Priority::new(5).unwrap());
    let p3 = spawn_ready(&mut k, &mut cpu, "p3", Priority::new(3).unwrap());
    let p5b = spawn_ready(&mut k, &mut cpu, "p5b", Priority::new(5).unwrap());

    let mut order = Vec::new();
    k.thread_exit(&mut cpu, 0);
    while k.thread_count() > 1 + 1 {
        order.push(k.current_thread(&cpu));
        k.thread_exit(&mut cpu, 0);
    }
    order.push(k.current_thread(&cpu));
    assert_eq!(order, vec![p5a, p5b, p3, p1]);
}

#[test]
fn yield_goes_to_the_back_of_the_bucket() {
    let (mut k, mut cpu, main) = boot();
    let a = spawn_ready(&mut k, &mut cpu, "a", Priority::DEFAULT);
    k.thread_yield(&mut cpu);
    assert_eq!(k.current_thread(&cpu), a);
    k.thread_yield(&mut cpu);
    assert_eq!(k.current_thread(&cpu), main);
    assert_eq!(k.cpu_stats(0).yields, 2);
}

#[test]
fn yield_alone_keeps_running() {
    let (mut k, mut cpu, main) = boot();
    let switches = k.cpu_stats(0).context_switches;
    k.thread_yield(&mut cpu);
    assert_eq!(k.current_thread(&cpu), main);
    assert_eq!(k.cpu_stats(0).context_switches, switches);
}

#[test]
fn wake_of_higher_priority_thread_preempts_at_next_tick() {
    let (mut k, mut cpu, main) = boot();
    let sem = k.sem_create(0).unwrap();
    let hi = spawn(&mut k, &mut cpu, "hi", Priority::HIGH);
    assert_eq!(k.sem_wait(&mut cpu, sem), Ok(Wait::Blocked));
    assert_eq!(k.current_thread(&cpu), main);

    assert_eq!(k.sem_post(&mut cpu, sem, false), 1);
    assert_eq!(k.current_thread(&cpu), main);
    tick(&mut k, &mut cpu);
    assert_eq!(k.current_thread(&cpu), hi);
    assert_eq!(k.resume_status(&cpu), Some(Ok(())));
}

#[test]
fn reschedule_switches_only_when_due() {
    let (mut k, mut cpu, main) = boot();
    spawn_ready(&mut k, &mut cpu, "peer", Priority::DEFAULT);
    assert!(!k.reschedule(&mut cpu));
    assert_eq!(k.current_thread(&cpu), main);

    let hi = spawn_ready(&mut k, &mut cpu, "hi", Priority::HIGH);
    assert!(k.reschedule(&mut cpu));
    assert_eq!(k.current_thread(&cpu), hi);
}

#[test]
fn preempted_thread_goes_to_the_back_of_its_bucket() {
    let (mut k, mut cpu, main) = boot();
    let peer = spawn_ready(&mut k, &mut cpu, "peer", Priority::DEFAULT);
    let hi = spawn_ready(&mut k, &mut cpu, "hi", Priority::HIGH);
    tick(&mut k, &mut cpu);
    assert_eq!(k.current_thread(&cpu), hi);
    assert!(k.thread_info(main).unwrap().remaining_quantum() > 0);
    k.thread_exit(&mut cpu, 0);
    // peer was ready before main was preempted, so it goes first.
    assert_eq!(k.current_thread(&cpu), peer);
    k.thread_yield(&mut cpu);
    assert_eq!(k.current_thread(&cpu), main);
}

#[test]
fn equal_priority_threads_run_in_the_order_they_became_ready() {
    let (mut k, mut cpu, main) = boot();
    let wq = k.wait_queue_create().unwrap();
    let b = spawn(&mut k, &mut cpu, "b", Priority::HIGH);
    assert_eq!(
        k.wait_queue_block(&mut cpu, wq, Timeout::Infinite),
        Ok(Wait::Blocked)
    );
    assert_eq!(k.current_thread(&cpu), main);
    k.thread_set_priority(&mut cpu, Priority::HIGHEST);

    let a = spawn(&mut k, &mut cpu, "a", Priority::HIGH);
    assert_eq!(k.current_thread(&cpu), main);
    assert_eq!(k.wait_queue_wake_one(&mut cpu, wq, false, Ok(())), Some(b));

    assert_eq!(k.thread_sleep(&mut cpu, 1), Wait::Blocked);
    assert_eq!(k.current_thread(&cpu), a);
    k.thread_exit(&mut cpu, 0);
    assert_eq!(k.current_thread(&cpu), b);
    assert_eq!(k.resume_status(&cpu), Some(Ok(())));
}

#[test]
fn woken_sleeper_queues_behind_ready_peers() {
    let (mut k, mut cpu, main) = boot();
    let sleeper = spawn(&mut k, &mut cpu, "sleeper", Priority::HIGH);
    assert_eq!(k.thread_sleep(&mut cpu, 1), Wait::Blocked);
    assert_eq!(k.current_thread(&cpu), main);
    let peer = spawn_ready(&mut k, &mut cpu, "peer", Priority::HIGH);
    assert_eq!(k.current_thread(&cpu), main);

    tick(&mut k, &mut cpu);
    assert_eq!(k.current_thread(&cpu), peer);
    assert_eq!(k.thread_info(sleeper).unwrap().state(), ThreadState::Ready);
    k.thread_exit(&mut cpu, 0);
    assert_eq!(k.current_thread(&cpu), sleeper);
    assert_eq!(k.resume_status(&cpu), Some(Ok(())));
}

#[test]
fn real_time_thread_is_not_rotated_out() {
    let (mut k, mut cpu, main) = boot_with(KernelConfig {
        quantum_ticks: 2,
        ..KernelConfig::default()
    });
    k.thread_set_real_time(main, true);
    k.thread_set_priority(&mut cpu, Priority::HIGH);
    spawn_ready(&mut k, &mut cpu, "peer", Priority::HIGH);
    for _ in 0..10 {
        tick(&mut k, &mut cpu);
        assert_eq!(k.current_thread(&cpu), main);
    }
}

#[test]
fn idle_runs_when_nothing_else_can() {
    let (mut k, mut cpu, main) = boot();
    assert_eq!(k.thread_sleep(&mut cpu, 3), Wait::Blocked);
    let idle = k.current_thread(&cpu);
    assert_ne!(idle, main);
    assert!(k.thread_info(idle).unwrap().is_idle());
    assert_eq!(k.thread_info(main).unwrap().state(), ThreadState::Sleeping);

    tick(&mut k, &mut cpu);
    tick(&mut k, &mut cpu);
    assert_eq!(k.current_thread(&cpu), idle);
    tick(&mut k, &mut cpu);
    assert_eq!(k.current_thread(&cpu), main);
    assert_eq!(k.resume_status(&cpu), Some(Ok(())));
    assert_eq!(k.current_time(), 3);
    assert!(k.cpu_stats(0).idle_ticks >= 2);
}

#[test]
fn suspend_and_resume() {
    let (mut k, mut cpu, main) = boot();
    let t = spawn_ready(&mut k, &mut cpu, "t", Priority::DEFAULT);
    assert_eq!(k.thread_suspend(&mut cpu, t), Ok(Wait::Done));
    assert_eq!(k.thread_info(t).unwrap().state(), ThreadState::Suspended);
    k.thread_yield(&mut cpu);
    assert_eq!(k.current_thread(&cpu), main);

    k.thread_resume(&mut cpu, t).unwrap();
    assert_eq!(k.current_thread(&cpu), t);
    // Self-suspend hands the CPU back.
    assert_eq!(k.thread_suspend(&mut cpu, t), Ok(Wait::Blocked));
    assert_eq!(k.current_thread(&cpu), main);
    assert_eq!(
        k.thread_resume(&mut cpu, main),
        Err(KernelError::NotSuspended)
    );
}

#[test]
fn suspending_a_blocked_thread_is_invalid() {
    let (mut k, mut cpu, _main) = boot();
    let sem = k.sem_create(0).unwrap();
    let t = spawn(&mut k, &mut cpu, "t", Priority::HIGH);
    assert_eq!(k.sem_wait(&mut cpu, sem), Ok(Wait::Blocked));
    assert_eq!(k.thread_suspend(&mut cpu, t), Err(KernelError::InvalidState));
    assert_eq!(
        k.thread_unblock_from_wait_queue(&mut cpu, t, Err(KernelError::InvalidState)),
        Ok(())
    );
    assert_eq!(k.sem_count(sem), Some(0));
    assert_eq!(
        k.thread_unblock_from_wait_queue(&mut cpu, t, Ok(())),
        Err(KernelError::NotBlocked)
    );
}

#[test]
fn join_blocks_until_exit() {
    let (mut k, mut cpu, main) = boot();
    let handle = k.thread_create("worker", 0x100, 0, Priority::LOW).unwrap();
    let worker = handle.id();
    k.thread_resume(&mut cpu, worker).unwrap();
    assert_eq!(k.current_thread(&cpu), main);

    let handle = match k.thread_join(&mut cpu, handle, Timeout::Infinite) {
        Ok(Join::Blocked(handle)) => handle,
        other => panic!("expected join to block, got {:?}", other),
    };
    assert_eq!(k.current_thread(&cpu), worker);
    k.thread_exit(&mut cpu, 7);
    assert_eq!(k.current_thread(&cpu), main);
    assert_eq!(k.resume_status(&cpu), Some(Ok(())));
    assert_eq!(
        k.thread_join(&mut cpu, handle, Timeout::Infinite),
        Ok(Join::Exited(7))
    );
}

#[test]
fn join_with_immediate_timeout_returns_the_handle() {
    let (mut k, mut cpu, _main) = boot();
    let handle = k.thread_create("worker", 0x100, 0, Priority::LOW).unwrap();
    let id = handle.id();
    match k.thread_join(&mut cpu, handle, Timeout::Immediate) {
        Ok(Join::TimedOut(handle)) => assert_eq!(handle.id(), id),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn detach_wakes_joiner_and_reclaims_on_exit() {
    let (mut k, mut cpu, main) = boot();
    let stack_bytes = k.free_stack_bytes();
    let handle = k.thread_create("worker", 0x100, 0, Priority::LOW).unwrap();
    let worker = handle.id();
    let joiner = spawn(&mut k, &mut cpu, "joiner", Priority::HIGH);
    assert_eq!(k.current_thread(&cpu), joiner);

    let handle = match k.thread_join(&mut cpu, handle, Timeout::Infinite) {
        Ok(Join::Blocked(handle)) => handle,
        other => panic!("expected join to block, got {:?}", other),
    };
    assert_eq!(k.current_thread(&cpu), main);

    k.thread_detach(&mut cpu, handle).unwrap();
    assert!(k.reschedule(&mut cpu));
    assert_eq!(k.current_thread(&cpu), joiner);
    assert_eq!(k.resume_status(&cpu), Some(Err(KernelError::ThreadDetached)));
    k.thread_exit(&mut cpu, 0);

    k.thread_resume(&mut cpu, worker).unwrap();
    k.thread_sleep(&mut cpu, 1);
    assert_eq!(k.current_thread(&cpu), worker);
    k.thread_exit(&mut cpu, 0);
    assert!(k.thread_info(worker).is_none());
    assert_eq!(k.free_stack_bytes(), stack_bytes);
}

#[test]
fn joining_a_detached_thread_fails() {
    let (mut k, mut cpu, main) = boot();
    let t = spawn_ready(&mut k, &mut cpu, "t", Priority::LOW);
    let forged = JoinHandle::from_raw(t.to_raw()).unwrap();
    assert_eq!(
        k.thread_join(&mut cpu, forged, Timeout::Infinite),
        Err(KernelError::ThreadDetached)
    );
    assert_eq!(k.current_thread(&cpu), main);
}

#[test]
fn stale_thread_handle_after_reclaim_is_not_found() {
    let (mut k, mut cpu, _main) = boot();
    let t = spawn(&mut k, &mut cpu, "t", Priority::HIGH);
    k.thread_exit(&mut cpu, 0);
    assert!(k.thread_info(t).is_none());
    assert!(k.dump_thread(t).contains("no such thread"));
    // The slot is reused under a new generation.
    let u = k.thread_create("u", 0x100, 0, Priority::LOW).unwrap();
    assert_ne!(u.id(), t);
}

#[test]
fn stack_pool_exhaustion_is_no_memory() {
    let (mut k, _cpu, _main) = boot_with(KernelConfig {
        stack_pool_bytes: 3 * 1024,
        default_stack_size: 1024,
        ..KernelConfig::default()
    });
    // The idle thread took one stack.
    let _a = k.thread_create("a", 0x100, 0, Priority::LOW).unwrap();
    let _b = k.thread_create("b", 0x100, 0, Priority::LOW).unwrap();
    assert_eq!(
        k.thread_create("c", 0x100, 0, Priority::LOW).unwrap_err(),
        KernelError::NoMemory
    );
}

#[test]
fn thread_table_exhaustion_is_no_memory() {
    let (mut k, _cpu, _main) = boot_with(KernelConfig {
        max_threads: 2,
        ..KernelConfig::default()
    });
    // bootstrap holds one slot.
    let _a = k.thread_create("a", 0x100, 0, Priority::LOW).unwrap();
    assert_eq!(
        k.thread_create("b", 0x100, 0, Priority::LOW).unwrap_err(),
        KernelError::NoMemory
    );
}

#[test]
fn pinned_thread_runs_on_its_cpu_after_ipi() {
    common::init_logging();
    let mut k: Kernel<Cpu> = Kernel::new(KernelConfig {
        num_cpus: 2,
        ..KernelConfig::default()
    })
    .unwrap();
    let mut cpu0 = Cpu::new(0, 0);
    let mut cpu1 = Cpu::new(1, 0);
    let main = k.boot(&mut cpu0).unwrap();
    k.secondary_cpu_entry(&mut cpu1);
    let idle1 = k.current_thread(&cpu1);
    assert!(k.thread_info(idle1).unwrap().is_idle());

    let handle = k.thread_create("pinned", 0x100, 0, Priority::HIGH).unwrap();
    let t = handle.id();
    k.thread_set_pinned_cpu(&mut cpu0, t, Some(1));
    k.thread_resume(&mut cpu0, t).unwrap();
    assert_eq!(k.current_thread(&cpu0), main);
    assert_eq!(k.take_reschedule_ipis(), 0b10);

    k.irq_enter(&mut cpu1);
    let ret = k.reschedule_ipi(&mut cpu1);
    assert_eq!(ret, HandlerReturn::Reschedule);
    k.irq_exit(&mut cpu1, ret);
    assert_eq!(k.current_thread(&cpu1), t);
    assert_eq!(k.thread_info(t).unwrap().curr_cpu(), Some(1));
    assert_eq!(k.cpu_stats(1).reschedule_ipis, 1);
}

#[test]
fn dump_reports_every_thread() {
    let (mut k, mut cpu, main) = boot();
    spawn_ready(&mut k, &mut cpu, "worker", Priority::LOW);
    let dump = k.dump_all_threads();
    assert!(dump.contains("'bootstrap'"));
    assert!(dump.contains("'worker'"));
    assert!(dump.contains("'idle 0'"));
    assert!(k.dump_thread(main).contains("Running"));
}

#[test]
#[should_panic(expected = "underflow")]
fn unbalanced_critical_section_exit_panics() {
    let (mut k, mut cpu, _main) = boot();
    k.exit_critical_section(&mut cpu);
}

#[test]
#[should_panic(expected = "interrupt context")]
fn blocking_in_interrupt_context_panics() {
    let (mut k, mut cpu, _main) = boot();
    let sem = k.sem_create(0).unwrap();
    k.irq_enter(&mut cpu);
    let _ = k.sem_wait(&mut cpu, sem);
}

#[test]
#[should_panic(expected = "cannot exit")]
fn idle_thread_cannot_exit() {
    let (mut k, mut cpu, _main) = boot();
    let _ = k.thread_sleep(&mut cpu, 5);
    k.thread_exit(&mut cpu, 0);
}
