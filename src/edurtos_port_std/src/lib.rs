//! Simulation environment for running [`edurtos_kernel`] on a hosted
//! environment.
//!
//! The simulator runs the kernel on the calling thread and lets the calling
//! code play the part of the running task. Nothing is executed
//! concurrently, and no task entry point is ever called. Instead:
//!
//!  - After [`boot`], the calling thread *is* the running task. Kernel calls
//!    made by it are made on behalf of that task.
//!  - Simulated time passes one tick at a time. [`tick`] spends a tick in
//!    the running task, after which the kernel may have picked another task
//!    to run.
//!  - When a kernel call blocks (or its caller is preempted), the call
//!    doesn't return until the kernel reschedules the calling task. Ticks
//!    pass in the meantime, and the scripts of whichever tasks the kernel
//!    runs are executed once per tick (see [`set_task_script`]).
//!
//! A wait that is never satisfied is reported as a deadlock after
//! [`MAX_STEPS`] ticks.
//!
//! Simulator state is thread-local, so every test (which runs on its own
//! thread) gets a fresh processor.
//!
//! # Usage
//!
//! ```rust
//! use edurtos_kernel::{Kernel, KernelCfg, Semaphore, TaskParams};
//!
//! edurtos_port_std::use_port!(unsafe struct System);
//!
//! unsafe impl KernelCfg for System {
//!     // The stack region is never dereferenced by the simulator
//!     const STACK_REGION_TOP: usize = 0x1000_0000;
//!     const STACK_REGION_SIZE: usize = 0x4000;
//! }
//!
//! extern "C" fn task_body(_: usize, _: usize, _: usize, _: usize) -> ! {
//!     unreachable!()
//! }
//!
//! fn main() {
//!     let kernel: &'static Kernel<System, 4> = Box::leak(Box::new(Kernel::new()));
//!     let sem = Semaphore::<System>::new(0);
//!
//!     kernel.create_task(task_body, 1, 1024, TaskParams::default()).unwrap();
//!     edurtos_port_std::boot(kernel);
//!
//!     edurtos_port_std::in_interrupt(|| sem.give(kernel, 0)).unwrap();
//!     sem.take(kernel, 0).unwrap();
//! }
//! ```
#![deny(unsafe_op_in_unsafe_fn)]
use edurtos_kernel::{Kernel, KernelTraits, StackFrame, TaskId};

mod sched;

/// Used by `use_port!`
#[doc(hidden)]
pub extern crate edurtos_kernel;
/// Used by tests
#[doc(hidden)]
pub extern crate env_logger;

/// The number of ticks a waiting task may go without being rescheduled
/// before the simulator reports a deadlock.
pub const MAX_STEPS: usize = 100_000;

/// The kind of code the simulated processor is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadRole {
    /// The startup context, before [`boot`]
    Boot,
    /// A task context
    Task,
    /// An interrupt handler
    Interrupt,
}

/// Get the kind of code being executed.
pub fn role() -> ThreadRole {
    sched::role()
}

/// Boot `kernel` and make the calling thread its first running task.
///
/// # Panics
///
/// Panics if a kernel has already been booted on the calling thread, or if
/// the kernel halts during booting.
pub fn boot<Traits: KernelTraits, const MAX_TASKS: usize>(
    kernel: &'static Kernel<Traits, MAX_TASKS>,
) {
    assert_eq!(role(), ThreadRole::Boot, "the kernel has already been booted");
    sched::attach_kernel(kernel);

    // Safety: Called once from the startup context, CPU Lock inactive
    let sp = unsafe { kernel.port_boot() };

    // Do what `dispatch_first_task` would do
    sched::with(|s| {
        s.running_sp.set(sp);
        s.dispatch_pending.set(false);
        s.cpu_lock.set(false);
    });
    sched::set_role(ThreadRole::Task);

    log::debug!("task {} is now running", kernel.running_task_id());
}

/// Spend one tick in the running task. The calling thread then continues
/// as whichever task the kernel picked.
pub fn tick() {
    assert_eq!(role(), ThreadRole::Task, "`tick` must be called by a task");
    sched::tick(sched::kernel());
}

/// Call [`tick`] `count` times.
pub fn ticks(count: usize) {
    for _ in 0..count {
        tick();
    }
}

/// Run `f` as an interrupt handler. A context switch requested by `f` takes
/// place when it returns.
pub fn in_interrupt<R>(f: impl FnOnce() -> R) -> R {
    sched::in_interrupt(f)
}

/// Run `f` with CPU Lock active.
pub fn with_cpu_lock<R>(f: impl FnOnce() -> R) -> R {
    // Safety: These are what the kernel would call
    unsafe { imp::enter_cpu_lock() };
    let result = f();
    unsafe { imp::leave_cpu_lock() };
    result
}

/// Register `script` as the code of task `task`. The script is run once per
/// tick spent in `task` while the task's code isn't on the host stack
/// otherwise. It acts on behalf of `task` and may call blocking kernel
/// functions.
///
/// A script replaces the previous one registered for the same task.
pub fn set_task_script(task: TaskId, script: impl FnMut() + 'static) {
    sched::with(|s| s.scripts.borrow_mut().insert(task, Box::new(script)));
}

/// Unregister the script of task `task`.
pub fn clear_task_script(task: TaskId) {
    sched::with(|s| s.scripts.borrow_mut().remove(&task));
}

/// Register `handler` as an interrupt handler that runs once per tick,
/// right before the tick handler.
pub fn set_interrupt_handler(handler: impl FnMut() + 'static) {
    sched::with(|s| *s.interrupt_handler.borrow_mut() = Some(Box::new(handler)));
}

/// Unregister the interrupt handler.
pub fn clear_interrupt_handler() {
    sched::with(|s| *s.interrupt_handler.borrow_mut() = None);
}

/// Get the initial frame the kernel placed below `stack_top`.
pub fn initial_frame(stack_top: usize) -> Option<StackFrame> {
    sched::with(|s| {
        s.frames
            .borrow()
            .iter()
            .rev()
            .find(|(top, _)| *top == stack_top)
            .map(|(_, frame)| *frame)
    })
}

/// Make the next `count` exclusive stores fail as if another context had
/// touched the word in between.
pub fn fail_store_exclusive(count: u32) {
    sched::with(|s| s.failing_stores.set(count));
}

/// Get the tick period the kernel configured, or `None` if the tick timer
/// hasn't been started.
pub fn tick_period_ms() -> Option<u32> {
    sched::with(|s| s.tick_period_ms.get())
}

/// Instantiate the port.
///
/// This macro defines a kernel trait type `$Traits` and implements
/// [`PortThreading`], [`PortTimer`], and [`PortExclusive`] on it. The
/// application should implement [`KernelCfg`] on it.
///
/// [`PortThreading`]: edurtos_kernel::PortThreading
/// [`PortTimer`]: edurtos_kernel::PortTimer
/// [`PortExclusive`]: edurtos_kernel::PortExclusive
/// [`KernelCfg`]: edurtos_kernel::KernelCfg
///
/// # Safety
///
/// The kernels using `$Traits` must be booted by [`boot`].
#[macro_export]
macro_rules! use_port {
    (unsafe $vis:vis struct $Traits:ident) => {
        $vis struct $Traits;

        mod port_std_impl {
            use super::$Traits;
            use $crate::edurtos_kernel::{PortExclusive, PortThreading, PortTimer, StackFrame};
            use $crate::imp;

            unsafe impl PortThreading for $Traits {
                unsafe fn dispatch_first_task(sp: usize) -> ! {
                    imp::dispatch_first_task(sp)
                }

                unsafe fn request_dispatch() {
                    imp::request_dispatch()
                }

                unsafe fn enter_cpu_lock() {
                    unsafe { imp::enter_cpu_lock() }
                }

                unsafe fn leave_cpu_lock() {
                    unsafe { imp::leave_cpu_lock() }
                }

                unsafe fn initialize_task_state(stack_top: usize, frame: &StackFrame) -> usize {
                    imp::initialize_task_state(stack_top, frame)
                }

                fn is_cpu_lock_active() -> bool {
                    imp::is_cpu_lock_active()
                }

                fn is_task_context() -> bool {
                    imp::is_task_context()
                }

                fn relax() {
                    imp::relax()
                }

                fn halt() -> ! {
                    imp::halt()
                }
            }

            unsafe impl PortTimer for $Traits {
                unsafe fn start_tick_timer(period_ms: u32) {
                    imp::start_tick_timer(period_ms)
                }
            }

            unsafe impl PortExclusive for $Traits {
                unsafe fn load_exclusive(word: *const u32) -> u32 {
                    unsafe { imp::load_exclusive(word) }
                }

                unsafe fn store_exclusive(word: *mut u32, value: u32) -> bool {
                    unsafe { imp::store_exclusive(word, value) }
                }

                fn clear_exclusive() {
                    imp::clear_exclusive()
                }

                fn data_memory_barrier() {
                    imp::data_memory_barrier()
                }
            }
        }
    };
}

/// The port functions called through `use_port!`.
#[doc(hidden)]
pub mod imp {
    use edurtos_kernel::StackFrame;
    use std::sync::atomic;

    use crate::{sched, ThreadRole};

    pub fn dispatch_first_task(_sp: usize) -> ! {
        panic!("the simulated kernel must be started by `edurtos_port_std::boot`");
    }

    pub fn request_dispatch() {
        log::trace!("request_dispatch");
        sched::with(|s| s.dispatch_pending.set(true));
    }

    /// # Safety
    ///
    /// CPU Lock inactive
    pub unsafe fn enter_cpu_lock() {
        log::trace!("enter_cpu_lock");
        let was_active = sched::with(|s| s.cpu_lock.replace(true));
        assert!(!was_active, "CPU Lock is already active");
    }

    /// Deactivate CPU Lock. A pending context switch is taken here if the
    /// caller is a task, in which case this function returns only after the
    /// caller is rescheduled.
    ///
    /// # Safety
    ///
    /// CPU Lock active
    pub unsafe fn leave_cpu_lock() {
        log::trace!("leave_cpu_lock");
        let was_active = sched::with(|s| s.cpu_lock.replace(false));
        assert!(was_active, "CPU Lock is already inactive");

        if sched::role() != ThreadRole::Task || !sched::with(|s| s.dispatch_pending.get()) {
            return;
        }

        let kernel = sched::kernel();
        let me = kernel.running_task_id();
        sched::dispatch_if_pending();
        sched::run_until_resumed(kernel, me);
    }

    /// Record `frame` and return the stack pointer a real port would have
    /// produced. The stack memory isn't touched.
    pub fn initialize_task_state(stack_top: usize, frame: &StackFrame) -> usize {
        log::trace!("initialize_task_state {stack_top:#x}");
        sched::with(|s| s.frames.borrow_mut().push((stack_top, *frame)));
        stack_top - StackFrame::SIZE
    }

    pub fn is_cpu_lock_active() -> bool {
        sched::with(|s| s.cpu_lock.get())
    }

    pub fn is_task_context() -> bool {
        sched::role() == ThreadRole::Task
    }

    /// Busy-waiting consumes simulated time.
    pub fn relax() {
        if sched::role() != ThreadRole::Task || is_cpu_lock_active() {
            std::hint::spin_loop();
            return;
        }

        let kernel = sched::kernel();
        sched::spend_tick(kernel, kernel.running_task_id());
    }

    pub fn halt() -> ! {
        panic!("the kernel halted the system");
    }

    pub fn start_tick_timer(period_ms: u32) {
        log::trace!("start_tick_timer({period_ms})");
        sched::with(|s| s.tick_period_ms.set(Some(period_ms)));
    }

    /// # Safety
    ///
    /// `word` must be valid for reads.
    pub unsafe fn load_exclusive(word: *const u32) -> u32 {
        sched::with(|s| s.reservation.set(Some(word as usize)));
        // Safety: Upheld by the caller
        unsafe { word.read_volatile() }
    }

    /// # Safety
    ///
    /// `word` must be valid for writes.
    pub unsafe fn store_exclusive(word: *mut u32, value: u32) -> bool {
        let reserved = sched::with(|s| s.reservation.take()) == Some(word as usize);
        if !reserved {
            return false;
        }

        let fail = sched::with(|s| {
            let failing_stores = s.failing_stores.get();
            s.failing_stores.set(failing_stores.saturating_sub(1));
            failing_stores > 0
        });
        if fail {
            log::trace!("failing the exclusive store to {word:p}");
            return false;
        }

        // Safety: Upheld by the caller
        unsafe { word.write_volatile(value) };
        true
    }

    pub fn clear_exclusive() {
        sched::with(|s| s.reservation.set(None));
    }

    pub fn data_memory_barrier() {
        atomic::fence(atomic::Ordering::SeqCst);
    }
}
