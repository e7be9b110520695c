//! A fixed-memory real-time kernel for single-core microcontrollers.
//!
//! The kernel consists of a weighted round-robin scheduler, a static task
//! table, and three synchronization primitives ([`Mutex`], [`Semaphore`],
//! and [`Mailbox`]) sharing a single blocking/wake-up protocol.
//!
//! # Scheduling
//!
//! Ready tasks are picked by a circular scan of the task table, not by
//! priority. A task's priority determines two things only:
//!
//!  - The length of its time quantum, measured in ticks. A task with
//!    priority `p` runs for `p` ticks before being forced back to the Ready
//!    state.
//!  - Whether waking it up preempts the running task. This happens only if
//!    its priority is strictly higher than that of the running task.
//!
//! # Ports
//!
//! The kernel doesn't touch the hardware by itself. Everything
//! architecture-specific is supplied by a *port* through the [`PortThreading`],
//! [`PortTimer`], and [`PortExclusive`] traits, which a port implements on a
//! *kernel trait type* (usually a unit struct named `System`). The
//! application adds its configuration by implementing [`KernelCfg`] on the
//! same type.
//!
//! ```rust,ignore
//! edurtos_port_arm_m::use_port!(unsafe struct System; kernel = KERNEL);
//!
//! unsafe impl edurtos_kernel::KernelCfg for System {
//!     const STACK_REGION_TOP: usize = 0x2000_ec00;
//!     const STACK_REGION_SIZE: usize = 0x3000;
//! }
//!
//! static KERNEL: edurtos_kernel::Kernel<System, 10> = edurtos_kernel::Kernel::new();
//! ```
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]

mod error;
#[cfg(any(feature = "mutex", feature = "semaphore"))]
mod exclusive;
mod klock;
mod state;
mod task;
mod timeout;
mod timer;
mod utils;
mod wait;

#[cfg(feature = "mailbox")]
mod mailbox;
#[cfg(feature = "mutex")]
mod mutex;
#[cfg(feature = "semaphore")]
mod semaphore;

pub use self::{
    error::*,
    state::Kernel,
    task::{StackFrame, TaskFn, TaskId, TaskInfo, TaskParams, TaskPriority, TaskStatus},
    timeout::{ms_to_ticks, ticks_to_ms, Deadline, Ticks, INFINITE},
    utils::Init,
    wait::{WaitObject, WaitReason},
};

#[cfg(feature = "mailbox")]
pub use self::mailbox::Mailbox;
#[cfg(feature = "mutex")]
pub use self::mutex::{Mutex, MutexStatus};
#[cfg(feature = "semaphore")]
pub use self::semaphore::Semaphore;

/// Implemented by a port. Provides the context switching and CPU Lock
/// facilities.
///
/// # Safety
///
/// Implementing a port is inherently unsafe because it's responsible for
/// initializing the execution environment and providing a dispatcher
/// implementation.
///
/// These methods are only meant to be called by the kernel.
pub unsafe trait PortThreading: Sized + 'static {
    /// The alignment requirement for task stack regions.
    const STACK_ALIGN: usize = 8;

    /// Transfer the control to the task whose initial stack pointer is `sp`,
    /// discarding the current (startup) context.
    ///
    /// Precondition: CPU Lock active, the first task was chosen by
    /// [`Kernel::port_boot`]
    unsafe fn dispatch_first_task(sp: usize) -> !;

    /// Pend the context switch handler. The handler must run as soon as
    /// CPU Lock is released and no other interrupt handler is running, and
    /// it must call [`Kernel::port_switch_context`].
    ///
    /// This method may be called with or without CPU Lock.
    unsafe fn request_dispatch();

    /// Disable all kernel-managed interrupts (this state is called *CPU Lock*).
    ///
    /// Precondition: CPU Lock inactive
    unsafe fn enter_cpu_lock();

    /// Re-enable kernel-managed interrupts previously disabled by
    /// `enter_cpu_lock`, thus deactivating the CPU Lock state.
    ///
    /// Precondition: CPU Lock active
    unsafe fn leave_cpu_lock();

    /// Activate CPU Lock. Return `true` iff CPU Lock was inactive before the
    /// call.
    unsafe fn try_enter_cpu_lock() -> bool {
        if Self::is_cpu_lock_active() {
            false
        } else {
            // Safety: CPU Lock inactive
            unsafe { Self::enter_cpu_lock() };
            true
        }
    }

    /// Place `frame` right below `stack_top` so that the task starts
    /// executing [`StackFrame::pc`] when the context switch handler restores
    /// it. Returns the task's initial stack pointer.
    ///
    /// Precondition: CPU Lock active, `stack_top` is the upper end of a
    /// stack region allocated for the task
    unsafe fn initialize_task_state(stack_top: usize, frame: &StackFrame) -> usize;

    /// Return a flag indicating whether a CPU Lock state is active.
    fn is_cpu_lock_active() -> bool;

    /// Return a flag indicating whether the current context is a task
    /// context.
    fn is_task_context() -> bool;

    /// Executed once per iteration of a busy-wait loop.
    fn relax() {
        core::hint::spin_loop();
    }

    /// Executed once per iteration of the idle loop, after
    /// [`KernelCfg::idle_hook`].
    fn wait_for_interrupt() {}

    /// Stop the system permanently. Called with CPU Lock active.
    fn halt() -> !;
}

/// Implemented by a port. Provides the periodic tick interrupt.
///
/// # Safety
///
/// These methods are only meant to be called by the kernel.
pub unsafe trait PortTimer {
    /// Start generating tick interrupts every `period_ms` milliseconds. Each
    /// interrupt must call [`Kernel::port_timer_tick`].
    ///
    /// Precondition: CPU Lock active, called once by [`Kernel::port_boot`]
    unsafe fn start_tick_timer(period_ms: u32);
}

/// Implemented by a port. Provides the single-word exclusive access
/// primitives that the synchronization primitives update their state with.
///
/// # Safety
///
/// `store_exclusive` must fail if the word may have been written since the
/// matching `load_exclusive`.
pub unsafe trait PortExclusive {
    /// Load `*word` and tag its address for a following
    /// [`store_exclusive`](Self::store_exclusive).
    unsafe fn load_exclusive(word: *const u32) -> u32;

    /// Store `value` to `*word` if the tag set by the last `load_exclusive`
    /// is still intact. Returns `true` on success.
    unsafe fn store_exclusive(word: *mut u32, value: u32) -> bool;

    /// Drop the tag set by the last `load_exclusive`.
    fn clear_exclusive();

    /// Complete all explicit memory accesses before continuing.
    fn data_memory_barrier();
}

/// The kernel configuration, implemented by the application on the kernel
/// trait type.
///
/// # Safety
///
/// `STACK_REGION_TOP - STACK_REGION_SIZE .. STACK_REGION_TOP` must be a
/// memory region that is writable and not used for anything else.
pub unsafe trait KernelCfg {
    /// The upper end of the memory region from which task stacks are
    /// carved out.
    const STACK_REGION_TOP: usize;

    /// The size of the stack region, measured in bytes.
    const STACK_REGION_SIZE: usize;

    /// The minimum stack size accepted by [`Kernel::create_task`]. This is
    /// also the idle task's stack size. Defaults to `1024`.
    const TASK_MIN_STACK_SIZE: usize = 1024;

    /// The tick period, measured in milliseconds. Defaults to `10`.
    const TICK_PERIOD_MS: u32 = 10;

    /// Called by the idle task on every iteration of its loop. Does nothing
    /// by default.
    fn idle_hook() {}
}

/// Represents a complete kernel trait type.
pub trait KernelTraits: PortThreading + PortTimer + PortExclusive + KernelCfg {}
impl<T: PortThreading + PortTimer + PortExclusive + KernelCfg> KernelTraits for T {}
