//! Weighted round-robin scheduling
use std::{cell::RefCell, collections::BTreeSet};

use edurtos_kernel::{Semaphore, TaskId, TaskStatus, INFINITE};
use edurtos_port_std::{boot, set_interrupt_handler, set_task_script, tick};

use crate::{create_task, leak, new_kernel, System, TestKernel, NUM_SLOTS};

/// Record the running task after each of `count` ticks.
fn trace(kernel: &TestKernel, count: usize) -> Vec<usize> {
    (0..count)
        .map(|_| {
            tick();
            kernel.running_task_id()
        })
        .collect()
}

#[test]
fn quantum_equals_priority() {
    let kernel = new_kernel();
    let high = create_task(kernel, 3);
    let low = create_task(kernel, 1);
    boot(kernel);

    assert_eq!(
        trace(kernel, 8),
        [high, high, low, high, high, high, low, high]
    );
    assert_eq!(kernel.tick_count(), 8);
}

#[test]
fn slices_consumed_is_reset_at_expiry() {
    let kernel = new_kernel();
    let high = create_task(kernel, 3);
    let low = create_task(kernel, 1);
    boot(kernel);

    tick();
    assert_eq!(kernel.task_info(high).unwrap().slices_consumed, 1);
    tick();
    assert_eq!(kernel.task_info(high).unwrap().slices_consumed, 2);
    tick();
    assert_eq!(kernel.task_info(high).unwrap().slices_consumed, 0);
    assert_eq!(kernel.task_info(high).unwrap().status, TaskStatus::Ready);
    assert_eq!(kernel.running_task_id(), low);
}

#[test]
fn scan_order_ignores_priority() {
    let kernel = new_kernel();
    let top = create_task(kernel, 4);
    let bottom = create_task(kernel, 1);
    let middle = create_task(kernel, 2);
    boot(kernel);

    // After slot 0 comes slot 2, not the slot of the next priority level
    assert_eq!(
        trace(kernel, 7),
        [top, top, top, middle, middle, bottom, top]
    );
}

#[test]
fn sole_task_yields_to_idle_at_expiry() {
    let kernel = new_kernel();
    let task = create_task(kernel, 2);
    boot(kernel);
    let idle = TestKernel::IDLE_TASK_ID;

    // The outgoing task is never picked again, so the idle task takes one
    // tick after each quantum
    assert_eq!(trace(kernel, 6), [task, idle, task, task, idle, task]);
    assert_eq!(kernel.task_info(task).unwrap().status, TaskStatus::Running);
    assert_eq!(kernel.task_info(idle).unwrap().status, TaskStatus::Ready);
}

#[test]
fn saved_stack_pointer_survives_a_round_trip() {
    let kernel = new_kernel();
    let first = create_task(kernel, 2);
    let second = create_task(kernel, 1);
    let initial_sp = kernel.task_info(second).unwrap().stack_pointer;
    boot(kernel);

    tick();
    tick();
    assert_eq!(kernel.running_task_id(), second);

    // The switched-out task's stack pointer is what the port handed in,
    // which the simulator keeps equal to the one it was last resumed with
    let info = kernel.task_info(first).unwrap();
    assert_eq!(info.stack_pointer, info.stack_top - edurtos_kernel::StackFrame::SIZE);

    tick();
    assert_eq!(kernel.running_task_id(), first);
    assert_eq!(kernel.task_info(second).unwrap().stack_pointer, initial_sp);
}

/// Check that the running task is the only task in the Running state.
fn assert_sole_running_task(kernel: &TestKernel) {
    let running: Vec<TaskId> = (0..=NUM_SLOTS)
        .filter(|&id| {
            kernel
                .task_info(id)
                .map_or(false, |info| info.status == TaskStatus::Running)
        })
        .collect();
    assert_eq!(running, [kernel.running_task_id()]);
}

#[test]
fn exactly_one_task_is_running() {
    let kernel = new_kernel();
    let sleeper = create_task(kernel, 4);
    let taker = create_task(kernel, 3);
    let spinner = create_task(kernel, 2);
    boot(kernel);
    assert_eq!(kernel.running_task_id(), sleeper);

    let s: &'static Semaphore<System> = leak(Semaphore::new(0));
    set_task_script(taker, move || s.take(kernel, INFINITE).unwrap());

    // Runs on every tick, including those spent inside blocking calls
    let seen = leak(RefCell::new(BTreeSet::new()));
    set_interrupt_handler(move || {
        assert_sole_running_task(kernel);
        seen.borrow_mut().insert(kernel.running_task_id());
        if kernel.tick_count() % 3 == 0 {
            s.give(kernel, 0).unwrap();
        }
    });

    // `sleeper` is played by the test body. `taker` blocks on the semaphore,
    // and `spinner` runs until its quantum is used up.
    while kernel.tick_count() < 200 {
        kernel.delay(2).unwrap();
        assert_eq!(kernel.running_task_id(), sleeper);
        assert_sole_running_task(kernel);
    }

    // `sleeper` never spends a tick, so it's checked after each delay only
    for task in [taker, spinner] {
        assert!(seen.borrow().contains(&task), "task {task} never ran");
    }
}
