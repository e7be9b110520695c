//! The simulated processor
//!
//! Simulated time only passes in [`step`]. A task that is waiting inside a
//! blocking kernel call keeps its host stack frame, and [`run_until_resumed`]
//! keeps stepping until the kernel schedules it again. Tasks whose code
//! isn't on the host stack are represented by their scripts.
use edurtos_kernel::{Kernel, KernelTraits, StackFrame, TaskId};
use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
};

use crate::{ThreadRole, MAX_STEPS};

/// The kernel entry points used by the simulator, erased over the kernel
/// trait type and the task table size.
pub(crate) trait SimKernel {
    unsafe fn switch_context(&self, saved_sp: usize) -> usize;
    unsafe fn timer_tick(&self);
    fn running_task_id(&self) -> TaskId;
    fn idle_task_id(&self) -> TaskId;
}

impl<Traits: KernelTraits, const MAX_TASKS: usize> SimKernel for Kernel<Traits, MAX_TASKS> {
    unsafe fn switch_context(&self, saved_sp: usize) -> usize {
        // Safety: Upheld by the caller
        unsafe { self.port_switch_context(saved_sp) }
    }

    unsafe fn timer_tick(&self) {
        // Safety: Upheld by the caller
        unsafe { self.port_timer_tick() }
    }

    fn running_task_id(&self) -> TaskId {
        Kernel::running_task_id(self)
    }

    fn idle_task_id(&self) -> TaskId {
        Self::IDLE_TASK_ID
    }
}

pub(crate) type Script = Box<dyn FnMut()>;

pub(crate) struct Sched {
    pub(crate) kernel: Cell<Option<&'static dyn SimKernel>>,
    pub(crate) cpu_lock: Cell<bool>,
    pub(crate) dispatch_pending: Cell<bool>,
    /// The stack pointer handed to the kernel when the running task is
    /// switched out.
    pub(crate) running_sp: Cell<usize>,
    pub(crate) tick_period_ms: Cell<Option<u32>>,
    /// The address tagged by the last `load_exclusive`.
    pub(crate) reservation: Cell<Option<usize>>,
    /// The number of upcoming `store_exclusive` calls to fail.
    pub(crate) failing_stores: Cell<u32>,
    /// The tasks whose code is currently on the host stack, innermost last.
    pub(crate) active_tasks: RefCell<Vec<TaskId>>,
    pub(crate) scripts: RefCell<HashMap<TaskId, Script>>,
    pub(crate) interrupt_handler: RefCell<Option<Script>>,
    /// Initial frames recorded by `initialize_task_state`, keyed by stack top.
    pub(crate) frames: RefCell<Vec<(usize, StackFrame)>>,
}

impl Sched {
    fn new() -> Self {
        Self {
            kernel: Cell::new(None),
            cpu_lock: Cell::new(false),
            dispatch_pending: Cell::new(false),
            running_sp: Cell::new(0),
            tick_period_ms: Cell::new(None),
            reservation: Cell::new(None),
            failing_stores: Cell::new(0),
            active_tasks: RefCell::new(Vec::new()),
            scripts: RefCell::new(HashMap::new()),
            interrupt_handler: RefCell::new(None),
            frames: RefCell::new(Vec::new()),
        }
    }
}

thread_local! {
    static THREAD_ROLE: Cell<ThreadRole> = Cell::new(ThreadRole::Boot);
    static SCHED: Sched = Sched::new();
}

/// Access the current thread's simulator state. `f` must not call into the
/// kernel.
pub(crate) fn with<R>(f: impl FnOnce(&Sched) -> R) -> R {
    SCHED.with(f)
}

pub(crate) fn role() -> ThreadRole {
    THREAD_ROLE.with(Cell::get)
}

pub(crate) fn set_role(role: ThreadRole) -> ThreadRole {
    THREAD_ROLE.with(|cell| cell.replace(role))
}

pub(crate) fn attach_kernel(kernel: &'static dyn SimKernel) {
    with(|s| {
        assert!(
            s.kernel.get().is_none(),
            "a kernel is already attached to this thread"
        );
        s.kernel.set(Some(kernel));
    });
}

pub(crate) fn kernel() -> &'static dyn SimKernel {
    match with(|s| s.kernel.get()) {
        Some(kernel) => kernel,
        None => panic!("no kernel has been booted on this thread"),
    }
}

fn is_active(task: TaskId) -> bool {
    with(|s| s.active_tasks.borrow().contains(&task))
}

/// Run `f` with `task` marked as being on the host stack.
fn as_active<R>(task: TaskId, f: impl FnOnce() -> R) -> R {
    with(|s| s.active_tasks.borrow_mut().push(task));
    let result = f();
    with(|s| s.active_tasks.borrow_mut().pop());
    result
}

/// Run the context switch handler if it's pending.
pub(crate) fn dispatch_if_pending() {
    if !with(|s| s.dispatch_pending.replace(false)) {
        return;
    }

    let kernel = kernel();

    let saved_sp = with(|s| {
        assert!(!s.cpu_lock.replace(true));
        s.reservation.set(None);
        s.running_sp.get()
    });

    // Safety: CPU Lock active, the kernel has booted
    let sp = unsafe { kernel.switch_context(saved_sp) };

    with(|s| {
        s.running_sp.set(sp);
        s.cpu_lock.set(false);
    });

    log::trace!("dispatched task {}", kernel.running_task_id());
}

/// Run `f` as an interrupt handler. Exception entry and return clear the
/// exclusive monitor, and a pending context switch is taken on return to a
/// task.
pub(crate) fn in_interrupt<R>(f: impl FnOnce() -> R) -> R {
    assert!(
        !with(|s| s.cpu_lock.get()),
        "interrupts are masked by CPU Lock"
    );

    let interrupted = set_role(ThreadRole::Interrupt);
    with(|s| s.reservation.set(None));

    let result = f();

    set_role(interrupted);
    with(|s| s.reservation.set(None));

    if interrupted == ThreadRole::Task {
        dispatch_if_pending();
    }

    result
}

/// Advance the simulation by one tick.
///
/// The running task's script runs first, unless the task's code is already
/// on the host stack. The interrupt handler and the tick handler follow.
pub(crate) fn step(kernel: &'static dyn SimKernel) {
    let running = kernel.running_task_id();

    if running != kernel.idle_task_id() && !is_active(running) {
        if let Some(mut script) = with(|s| s.scripts.borrow_mut().remove(&running)) {
            log::trace!("running the script of task {}", running);
            as_active(running, &mut script);

            // Put it back unless the script replaced itself
            with(|s| {
                s.scripts.borrow_mut().entry(running).or_insert(script);
            });
        }
    }

    if let Some(mut handler) = with(|s| s.interrupt_handler.borrow_mut().take()) {
        in_interrupt(&mut handler);
        with(|s| {
            let mut slot = s.interrupt_handler.borrow_mut();
            if slot.is_none() {
                *slot = Some(handler);
            }
        });
    }

    // Safety: CPU Lock inactive, interrupt context
    in_interrupt(|| unsafe { kernel.timer_tick() });
}

/// Keep stepping until `me` is the running task again.
pub(crate) fn run_until_resumed(kernel: &'static dyn SimKernel, me: TaskId) {
    as_active(me, || {
        let mut steps = 0;
        while kernel.running_task_id() != me {
            if steps == MAX_STEPS {
                panic!("deadlock: task {me} wasn't rescheduled within {MAX_STEPS} ticks");
            }
            step(kernel);
            steps += 1;
        }
    });
}

/// Spend one tick in the running task (`me`), returning when `me` runs
/// again.
pub(crate) fn spend_tick(kernel: &'static dyn SimKernel, me: TaskId) {
    as_active(me, || step(kernel));
    run_until_resumed(kernel, me);
}

/// Spend one tick in the running task, returning with whichever task the
/// kernel chose afterwards.
pub(crate) fn tick(kernel: &'static dyn SimKernel) {
    let me = kernel.running_task_id();
    as_active(me, || step(kernel));
}
