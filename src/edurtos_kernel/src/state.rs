use core::{
    fmt, mem,
    sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
};

use crate::{
    error::BadContextError,
    klock::{self, CpuLockCell},
    task::{StackRegion, TaskCb, TaskId, TaskStatus},
    timeout::Ticks,
    utils::Init,
    KernelTraits, PortThreading,
};

/// The kernel state. An application defines exactly one of these as a
/// `static` and hands it to the port.
///
/// `MAX_TASKS` is the number of regular task slots. The idle task lives in an
/// additional slot identified by `MAX_TASKS`.
pub struct Kernel<Traits, const MAX_TASKS: usize> {
    pub(crate) tasks: [TaskCb<Traits>; MAX_TASKS],

    pub(crate) idle_task: TaskCb<Traits>,

    /// The number of ticks since [`Kernel::start`]. Only written by the tick
    /// handler.
    pub(crate) tick_count: AtomicU32,

    /// The slot of the task in the Running state.
    pub(crate) running_task: AtomicUsize,

    /// The number of created regular tasks.
    pub(crate) num_created_tasks: AtomicUsize,

    pub(crate) stack_region: CpuLockCell<Traits, StackRegion>,

    /// Set by [`Kernel::port_boot`].
    pub(crate) started: AtomicBool,
}

/// If the current context is not waitable, return `Err(BadContext)`.
pub(crate) fn expect_waitable_context<Traits: PortThreading>() -> Result<(), BadContextError> {
    if Traits::is_cpu_lock_active() || !Traits::is_task_context() {
        Err(BadContextError::BadContext)
    } else {
        Ok(())
    }
}

impl<Traits: KernelTraits, const MAX_TASKS: usize> Kernel<Traits, MAX_TASKS> {
    /// Construct an empty kernel state. The stack region is defined by
    /// [`KernelCfg`](crate::KernelCfg).
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            tasks: Init::INIT,
            idle_task: Init::INIT,
            tick_count: Init::INIT,
            running_task: AtomicUsize::new(MAX_TASKS),
            num_created_tasks: Init::INIT,
            stack_region: CpuLockCell::new(StackRegion::new(
                Traits::STACK_REGION_TOP,
                Traits::STACK_REGION_SIZE,
                Traits::STACK_ALIGN,
            )),
            started: Init::INIT,
        }
    }

    /// Get the number of ticks elapsed since the scheduler started.
    #[inline]
    pub fn tick_count(&self) -> Ticks {
        self.tick_count.load(Ordering::Relaxed)
    }

    /// Get the identifier of the running task.
    #[inline]
    pub fn running_task_id(&self) -> TaskId {
        self.running_task.load(Ordering::Relaxed)
    }

    /// Get the number of created tasks, not counting the idle task.
    #[inline]
    pub fn num_created_tasks(&self) -> usize {
        self.num_created_tasks.load(Ordering::Relaxed)
    }

    /// Get a flag indicating whether the scheduler has started.
    #[inline]
    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    /// Get the number of bytes left in the stack region.
    pub fn remaining_stack_region(&self) -> Result<usize, BadContextError> {
        let lock = klock::lock_cpu::<Traits>()?;
        Ok(self.stack_region.read(&*lock).remaining())
    }

    /// Start the scheduler. Never returns.
    ///
    /// The first task to run is the created task in the lowest slot (i.e.,
    /// the one with the highest priority), or the idle task if there are no
    /// created tasks. The system halts if the idle task can't be created.
    pub fn start(&'static self) -> ! {
        // Safety: We are the kernel
        unsafe {
            let sp = self.port_boot();
            Traits::dispatch_first_task(sp)
        }
    }

    /// Boot the kernel. Called by [`Self::start`] or by a port that needs to
    /// do something between booting and dispatching the first task. Returns
    /// the first task's stack pointer.
    ///
    /// Returns with CPU Lock active. The tick timer is running at this
    /// point, but its interrupts are masked by CPU Lock.
    ///
    /// # Safety
    ///
    /// Must be called exactly once, with CPU Lock inactive, from the startup
    /// context.
    pub unsafe fn port_boot(&self) -> usize {
        let Ok(mut lock) = klock::lock_cpu::<Traits>() else {
            Self::halt();
        };

        if self.started.load(Ordering::Relaxed) {
            Self::halt();
        }

        if self.idle_task.attr.read(&*lock).is_none() {
            if let Err(e) = self.init_idle_task(lock.borrow_mut()) {
                log::error!("failed to create the idle task: {:?}", e);
                Self::halt();
            }
        }

        self.started.store(true, Ordering::Relaxed);

        let first = self
            .tasks
            .iter()
            .position(|task_cb| task_cb.is_ready(lock.borrow_mut()))
            .unwrap_or(MAX_TASKS);

        let Some(task_cb) = self.task_cb(first) else {
            Self::halt();
        };
        task_cb.st.replace(&mut *lock, TaskStatus::Running);
        self.running_task.store(first, Ordering::Relaxed);
        let sp = *task_cb.sp.read(&*lock);

        log::debug!(
            "starting with {} task(s), first task = {}",
            self.num_created_tasks(),
            first
        );

        // Safety: CPU Lock active, called only once
        unsafe { Traits::start_tick_timer(Traits::TICK_PERIOD_MS) };

        // `dispatch_first_task` expects CPU Lock to be active
        mem::forget(lock);

        sp
    }

    /// Stop the system permanently with interrupts disabled.
    pub fn halt() -> ! {
        if !Traits::is_cpu_lock_active() {
            // Safety: CPU Lock inactive
            unsafe { Traits::enter_cpu_lock() };
        }
        Traits::halt()
    }
}

impl<Traits: KernelTraits, const MAX_TASKS: usize> fmt::Debug for Kernel<Traits, MAX_TASKS> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("tasks", &self.tasks)
            .field("idle_task", &self.idle_task)
            .field("tick_count", &self.tick_count)
            .field("running_task", &self.running_task)
            .field("num_created_tasks", &self.num_created_tasks)
            .field("stack_region", &self.stack_region)
            .field("started", &self.started)
            .finish()
    }
}
