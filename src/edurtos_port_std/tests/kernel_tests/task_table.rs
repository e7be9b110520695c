//! Task creation and the task table
use edurtos_kernel::{
    CreateTaskError, GetTaskInfoError, InitError, Kernel, KernelCfg, StackFrame, TaskParams,
    TaskStatus,
};
use edurtos_port_std::boot;

use crate::{create_task, init_logger, leak, new_kernel, task_body, System, TestKernel, NUM_SLOTS};

edurtos_port_std::use_port!(unsafe struct SmallSystem);

unsafe impl KernelCfg for SmallSystem {
    const STACK_REGION_TOP: usize = 0x2000_0000;
    const STACK_REGION_SIZE: usize = 3 * 1024;
}

#[test]
fn slot_is_determined_by_priority() {
    let kernel = new_kernel();

    assert_eq!(create_task(kernel, 4), 0);
    assert_eq!(create_task(kernel, 1), 3);
    assert_eq!(create_task(kernel, 2), 2);
    assert_eq!(kernel.num_created_tasks(), 3);

    let info = kernel.task_info(3).unwrap();
    assert_eq!(info.id, 3);
    assert_eq!(info.priority, 1);
    assert_eq!(info.entry_point, task_body as usize);
    assert_eq!(info.status, TaskStatus::Ready);
    assert_eq!(info.wait_reason, None);
    assert_eq!(info.slices_consumed, 0);

    assert_eq!(kernel.task_info(1), Err(GetTaskInfoError::BadId));
    assert_eq!(kernel.task_info(NUM_SLOTS + 1), Err(GetTaskInfoError::BadId));
}

#[test]
fn stacks_are_carved_from_the_top() {
    let kernel = new_kernel();
    let params = TaskParams([1, 2, 3, 4]);

    let first = create_task(kernel, 4);
    let second = kernel.create_task(task_body, 3, 2001, params).unwrap();

    let info = kernel.task_info(first).unwrap();
    assert_eq!(info.stack_top, 0x1000_0000);
    assert_eq!(info.stack_size, 1024);
    assert_eq!(info.stack_pointer, 0x1000_0000 - StackFrame::SIZE);

    // The size is rounded up to the stack alignment
    let info = kernel.task_info(second).unwrap();
    assert_eq!(info.stack_top, 0x1000_0000 - 1024);
    assert_eq!(info.stack_size, 2008);
    assert_eq!(
        kernel.remaining_stack_region(),
        Ok(16 * 1024 - 1024 - 2008)
    );

    let frame = edurtos_port_std::initial_frame(info.stack_top).unwrap();
    assert_eq!(frame, StackFrame::initial(task_body, &params));
    assert_eq!([frame.r0, frame.r1, frame.r2, frame.r3], [1, 2, 3, 4]);
    assert_eq!(frame.pc, task_body as usize);
    assert_eq!(frame.lr, 0);
    assert_eq!(frame.xpsr, StackFrame::XPSR_THUMB);
}

#[test]
fn invalid_parameters_are_rejected() {
    let kernel = new_kernel();
    let params = TaskParams::default();
    let min_stack_size = <System as KernelCfg>::TASK_MIN_STACK_SIZE;

    assert_eq!(
        kernel.create_task(task_body, 0, 1024, params),
        Err(CreateTaskError::BadParam)
    );
    assert_eq!(
        kernel.create_task(task_body, NUM_SLOTS + 1, 1024, params),
        Err(CreateTaskError::BadParam)
    );
    assert_eq!(
        kernel.create_task(task_body, 1, min_stack_size - 1, params),
        Err(CreateTaskError::BadParam)
    );

    assert_eq!(kernel.num_created_tasks(), 0);
    assert_eq!(kernel.remaining_stack_region(), Ok(16 * 1024));
}

#[test]
fn priority_levels_hold_one_task_each() {
    let kernel = new_kernel();

    create_task(kernel, 2);
    assert_eq!(
        kernel.create_task(task_body, 2, 1024, TaskParams::default()),
        Err(CreateTaskError::BadObjectState)
    );
    assert_eq!(kernel.num_created_tasks(), 1);
}

#[test]
fn stack_region_exhaustion() {
    init_logger();
    let kernel: &'static Kernel<SmallSystem, 4> = leak(Kernel::new());
    let params = TaskParams::default();

    assert_eq!(kernel.create_task(task_body, 4, 2048, params), Ok(0));
    assert_eq!(
        kernel.create_task(task_body, 3, 2048, params),
        Err(CreateTaskError::NoMemory)
    );
    assert_eq!(kernel.num_created_tasks(), 1);
    assert_eq!(kernel.remaining_stack_region(), Ok(1024));

    // The idle task takes the rest
    assert_eq!(kernel.init(), Ok(()));
    assert_eq!(kernel.remaining_stack_region(), Ok(0));
    assert_eq!(kernel.init(), Err(InitError::BadObjectState));

    assert_eq!(
        kernel.create_task(task_body, 3, 1024, params),
        Err(CreateTaskError::NoMemory)
    );
}

#[test]
#[should_panic(expected = "halted")]
fn boot_halts_without_room_for_the_idle_task() {
    init_logger();
    let kernel: &'static Kernel<SmallSystem, 4> = leak(Kernel::new());

    kernel
        .create_task(task_body, 4, 3 * 1024, TaskParams::default())
        .unwrap();
    boot(kernel);
}

#[test]
fn tasks_cannot_be_created_after_boot() {
    let kernel = new_kernel();
    create_task(kernel, 1);
    assert!(!kernel.has_started());

    boot(kernel);
    assert!(kernel.has_started());

    assert_eq!(
        kernel.create_task(task_body, 2, 1024, TaskParams::default()),
        Err(CreateTaskError::BadContext)
    );
    assert_eq!(kernel.init(), Err(InitError::BadContext));
    assert_eq!(kernel.num_created_tasks(), 1);
}

#[test]
fn boot_runs_the_lowest_occupied_slot_first() {
    let kernel = new_kernel();
    let low = create_task(kernel, 1);
    let high = create_task(kernel, 3);

    boot(kernel);

    assert_eq!(kernel.running_task_id(), high);
    assert_eq!(kernel.task_info(high).unwrap().status, TaskStatus::Running);
    assert_eq!(kernel.task_info(low).unwrap().status, TaskStatus::Ready);
    assert_eq!(edurtos_port_std::tick_period_ms(), Some(10));
    assert_eq!(kernel.tick_count(), 0);

    let idle = kernel.task_info(TestKernel::IDLE_TASK_ID).unwrap();
    assert_eq!(idle.priority, 0);
    assert_eq!(idle.status, TaskStatus::Ready);
    assert_eq!(idle.stack_size, <System as KernelCfg>::TASK_MIN_STACK_SIZE);
}

#[test]
fn idle_task_runs_when_there_are_no_tasks() {
    let kernel = new_kernel();
    boot(kernel);

    assert_eq!(kernel.running_task_id(), TestKernel::IDLE_TASK_ID);

    edurtos_port_std::ticks(3);
    assert_eq!(kernel.running_task_id(), TestKernel::IDLE_TASK_ID);
    assert_eq!(kernel.tick_count(), 3);
}
