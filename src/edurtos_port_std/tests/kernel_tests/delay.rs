//! `Kernel::delay` and the tick handler's deadline processing
use std::{cell::RefCell, thread};

use edurtos_kernel::{ms_to_ticks, DelayError, TaskInfo, TaskStatus, WaitReason, INFINITE};
use edurtos_port_std::{boot, in_interrupt, set_task_script, with_cpu_lock};
use quickcheck_macros::quickcheck;

use crate::{create_task, leak, new_kernel, tick_until, System};

#[test]
fn delay_lasts_the_given_number_of_ticks() {
    let kernel = new_kernel();
    let task = create_task(kernel, 1);
    boot(kernel);

    kernel.delay(5).unwrap();
    assert_eq!(kernel.tick_count(), 5);
    assert_eq!(kernel.running_task_id(), task);

    // Zero ticks lasts until the next tick
    kernel.delay(0).unwrap();
    assert_eq!(kernel.tick_count(), 6);

    kernel.delay(ms_to_ticks::<System>(25)).unwrap();
    assert_eq!(kernel.tick_count(), 9);
}

#[quickcheck]
fn delay_returns_at_its_deadline(ticks: u8) -> bool {
    // Every kernel needs a thread of its own
    thread::spawn(move || {
        let kernel = new_kernel();
        create_task(kernel, 1);
        boot(kernel);

        kernel.delay(ticks as u32).unwrap();
        kernel.tick_count() == (ticks as u32).max(1)
    })
    .join()
    .unwrap()
}

#[test]
fn higher_priority_task_preempts_on_wakeup() {
    let kernel = new_kernel();
    let high = create_task(kernel, 3);
    let low = create_task(kernel, 1);
    boot(kernel);

    kernel.delay(2).unwrap();
    assert_eq!(kernel.tick_count(), 2);
    assert_eq!(kernel.running_task_id(), high);
    assert_eq!(kernel.task_info(low).unwrap().status, TaskStatus::Ready);
}

#[test]
fn lower_priority_task_waits_for_its_turn() {
    let kernel = new_kernel();
    let high = create_task(kernel, 3);
    let low = create_task(kernel, 1);
    boot(kernel);

    tick_until(kernel, low);
    assert_eq!(kernel.tick_count(), 3);

    // The deadline passes at tick 4, but `high` keeps its quantum
    kernel.delay(1).unwrap();
    assert_eq!(kernel.tick_count(), 6);
    assert_eq!(kernel.running_task_id(), low);
    assert_eq!(kernel.task_info(high).unwrap().status, TaskStatus::Ready);
}

#[test]
fn blocked_task_reports_its_wait() {
    let kernel = new_kernel();
    let high = create_task(kernel, 3);
    let low = create_task(kernel, 1);
    boot(kernel);

    let observed: &'static RefCell<Option<TaskInfo>> = leak(RefCell::new(None));
    set_task_script(low, move || {
        observed
            .borrow_mut()
            .get_or_insert_with(|| kernel.task_info(high).unwrap());
    });

    kernel.delay(3).unwrap();

    let info = observed.borrow().unwrap();
    assert_eq!(info.status, TaskStatus::Blocked);
    assert_eq!(info.wait_reason, Some(WaitReason::Tick));

    let info = kernel.task_info(high).unwrap();
    assert_eq!(info.status, TaskStatus::Running);
    assert_eq!(info.wait_reason, None);
}

#[test]
fn delay_requires_a_waitable_context() {
    let kernel = new_kernel();
    create_task(kernel, 1);

    assert_eq!(kernel.delay(1), Err(DelayError::BadContext));

    boot(kernel);
    assert_eq!(in_interrupt(|| kernel.delay(1)), Err(DelayError::BadContext));
    assert_eq!(with_cpu_lock(|| kernel.delay(1)), Err(DelayError::BadContext));
    assert_eq!(kernel.tick_count(), 0);
}

#[test]
#[should_panic(expected = "deadlock")]
fn infinite_delay_never_returns() {
    let kernel = new_kernel();
    create_task(kernel, 1);
    boot(kernel);

    let _ = kernel.delay(INFINITE);
}
