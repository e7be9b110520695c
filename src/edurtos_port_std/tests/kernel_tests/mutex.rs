//! Mutexes
use std::cell::Cell;

use edurtos_kernel::{
    LockMutexError, Mutex, MutexStatus, TaskStatus, UnlockMutexError, INFINITE,
};
use edurtos_port_std::{boot, fail_store_exclusive, in_interrupt, set_task_script, with_cpu_lock};

use crate::{create_task, leak, new_kernel, tick_until, System};

#[test]
fn lock_and_unlock() {
    let kernel = new_kernel();
    let task = create_task(kernel, 1);
    boot(kernel);

    let m = Mutex::<System>::new();
    assert_eq!(m.status(), MutexStatus::Unlocked);
    assert_eq!(m.owner(), None);

    assert_eq!(m.lock(kernel, 0), Ok(()));
    assert_eq!(m.status(), MutexStatus::Locked);
    assert_eq!(m.owner(), Some(task));

    assert_eq!(m.unlock(kernel, 0), Ok(()));
    assert_eq!(m.status(), MutexStatus::Unlocked);

    // Unlocking an unlocked mutex is not an error
    assert_eq!(m.unlock(kernel, 0), Ok(()));
}

#[test]
fn contended_lock_times_out() {
    let kernel = new_kernel();
    let owner = create_task(kernel, 2);
    let waiter = create_task(kernel, 1);
    boot(kernel);

    let m = Mutex::<System>::new();
    m.lock(kernel, INFINITE).unwrap();

    tick_until(kernel, waiter);
    let start = kernel.tick_count();

    assert_eq!(m.lock(kernel, 5), Err(LockMutexError::Timeout));
    assert!(kernel.tick_count() - start >= 5);
    assert_eq!(kernel.running_task_id(), waiter);
    assert_eq!(m.owner(), Some(owner));
}

#[test]
fn waiter_acquires_after_owner_unlocks() {
    let kernel = new_kernel();
    let owner = create_task(kernel, 2);
    let waiter = create_task(kernel, 1);
    boot(kernel);

    let m: &'static Mutex<System> = leak(Mutex::new());
    m.lock(kernel, INFINITE).unwrap();

    let released = leak(Cell::new(false));
    set_task_script(owner, move || {
        if !released.get() {
            m.unlock(kernel, 0).unwrap();
            released.set(true);
        }
    });

    tick_until(kernel, waiter);
    assert_eq!(m.lock(kernel, INFINITE), Ok(()));
    assert!(released.get());
    assert_eq!(m.owner(), Some(waiter));
}

#[test]
fn higher_priority_waiter_preempts_on_unlock() {
    let kernel = new_kernel();
    let high = create_task(kernel, 3);
    let low = create_task(kernel, 1);
    boot(kernel);

    let m: &'static Mutex<System> = leak(Mutex::new());
    let phase = leak(Cell::new(0));
    set_task_script(low, move || match phase.get() {
        0 => {
            m.lock(kernel, 0).unwrap();
            phase.set(1);
        }
        1 => {
            m.unlock(kernel, 0).unwrap();
            phase.set(2);
        }
        _ => {}
    });

    // Let `low` take the mutex
    kernel.delay(1).unwrap();
    assert_eq!(m.owner(), Some(low));

    assert_eq!(m.lock(kernel, INFINITE), Ok(()));
    assert_eq!(m.owner(), Some(high));
    assert_eq!(phase.get(), 2);
}

#[test]
fn relocking_by_owner_blocks() {
    let kernel = new_kernel();
    let task = create_task(kernel, 1);
    boot(kernel);

    let m = Mutex::<System>::new();
    m.lock(kernel, 0).unwrap();

    assert_eq!(m.lock(kernel, 3), Err(LockMutexError::Timeout));
    assert_eq!(kernel.tick_count(), 3);
    assert_eq!(m.owner(), Some(task));
}

#[test]
fn unlock_by_non_owner_waits_for_release() {
    let kernel = new_kernel();
    let owner = create_task(kernel, 2);
    let other = create_task(kernel, 1);
    boot(kernel);

    let m: &'static Mutex<System> = leak(Mutex::new());
    m.lock(kernel, INFINITE).unwrap();
    tick_until(kernel, other);

    let start = kernel.tick_count();
    assert_eq!(m.unlock(kernel, 3), Err(UnlockMutexError::Timeout));
    assert!(kernel.tick_count() - start >= 3);
    assert_eq!(m.owner(), Some(owner));

    set_task_script(owner, move || {
        let _ = m.unlock(kernel, 0);
    });

    assert_eq!(m.unlock(kernel, INFINITE), Ok(()));
    assert_eq!(m.status(), MutexStatus::Unlocked);
}

#[test]
fn timed_out_waiter_passes_on_its_wake_up() {
    let kernel = new_kernel();
    let first = create_task(kernel, 3);
    let second = create_task(kernel, 2);
    let owner = create_task(kernel, 1);
    boot(kernel);

    let m: &'static Mutex<System> = leak(Mutex::new());
    tick_until(kernel, owner);
    m.lock(kernel, 0).unwrap();
    tick_until(kernel, second);

    let is_blocked = move |task| kernel.task_info(task).unwrap().status == TaskStatus::Blocked;

    // `first` gives up two ticks after it starts waiting
    let outcome = leak(Cell::new(None));
    set_task_script(first, move || {
        if outcome.get().is_none() {
            let result = m.lock(kernel, 2);
            let second_status = kernel.task_info(second).unwrap().status;
            outcome.set(Some((result, second_status)));
        }
    });

    // `first` is woken up first, but it doesn't get to run before its
    // deadline, and its first attempt after that fails
    let released = leak(Cell::new(false));
    set_task_script(owner, move || {
        if !released.get() && is_blocked(first) && is_blocked(second) {
            m.unlock(kernel, 0).unwrap();
            fail_store_exclusive(1);
            released.set(true);
        }
    });

    assert_eq!(m.lock(kernel, INFINITE), Ok(()));
    assert_eq!(
        outcome.get(),
        Some((Err(LockMutexError::Timeout), TaskStatus::Ready))
    );
    assert_eq!(m.owner(), Some(second));
}

#[test]
fn mutex_requires_a_waitable_context() {
    let kernel = new_kernel();
    create_task(kernel, 1);
    boot(kernel);

    let m = Mutex::<System>::new();
    assert_eq!(
        in_interrupt(|| m.lock(kernel, 0)),
        Err(LockMutexError::BadContext)
    );
    assert_eq!(
        with_cpu_lock(|| m.lock(kernel, 0)),
        Err(LockMutexError::BadContext)
    );
    assert_eq!(
        in_interrupt(|| m.unlock(kernel, 0)),
        Err(UnlockMutexError::BadContext)
    );
    assert_eq!(m.status(), MutexStatus::Unlocked);
}

#[test]
fn failed_exclusive_store_is_retried() {
    let kernel = new_kernel();
    let task = create_task(kernel, 1);
    boot(kernel);

    let m = Mutex::<System>::new();

    // A single attempt doesn't retry
    fail_store_exclusive(1);
    assert_eq!(m.lock(kernel, 0), Err(LockMutexError::Timeout));
    assert_eq!(m.status(), MutexStatus::Unlocked);

    fail_store_exclusive(3);
    assert_eq!(m.lock(kernel, INFINITE), Ok(()));
    assert_eq!(m.owner(), Some(task));
}
