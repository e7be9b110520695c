//! Tasks
use core::{fmt, mem, sync::atomic::Ordering};

use crate::{
    error::{CreateTaskError, DelayError, GetTaskInfoError, InitError},
    klock::{self, CpuLockCell, CpuLockTokenRefMut},
    state::{self, Kernel},
    timeout::{Deadline, Ticks},
    utils::Init,
    wait::{WaitReason, WaitState},
    KernelTraits,
};

mod round_robin;
mod stack;

pub use self::stack::StackFrame;
pub(crate) use self::stack::StackRegion;

/// Identifies a task by its slot in the task table. Regular tasks occupy
/// `0..MAX_TASKS`; the idle task occupies `MAX_TASKS`.
pub type TaskId = usize;

/// A task priority. Regular tasks have priorities in `1..=MAX_TASKS`; larger
/// values mean higher priorities. The idle task has priority `0`.
pub type TaskPriority = usize;

/// The entry point of a task. Receives the four words of [`TaskParams`] and
/// must never return.
pub type TaskFn = extern "C" fn(usize, usize, usize, usize) -> !;

/// The four machine words passed to a task's entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskParams(pub [usize; 4]);

impl Init for TaskParams {
    const INIT: Self = Self([0; 4]);
}

/// Task state machine
///
/// A task in the `Running` state is the one whose context is currently on
/// the processor. There's exactly one such task once the scheduler has
/// started, except while a context switch is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Ready,
    /// The task is waiting for a tick deadline or a synchronization
    /// primitive.
    Blocked,
    /// Nothing in the kernel moves a task into or out of this state.
    Suspended,
}

impl Init for TaskStatus {
    const INIT: Self = Self::Ready;
}

/// A snapshot of a task's descriptor, returned by [`Kernel::task_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub priority: TaskPriority,
    /// The address of the task's entry point.
    pub entry_point: usize,
    pub status: TaskStatus,
    /// The reason of the current wait. `Some(_)` iff `status` is `Blocked`.
    pub wait_reason: Option<WaitReason>,
    /// The saved stack pointer. Meaningless while the task is running.
    pub stack_pointer: usize,
    /// The upper end of the task's stack.
    pub stack_top: usize,
    /// The size of the task's stack, measured in bytes. This may be larger
    /// than requested because of alignment.
    pub stack_size: usize,
    pub slices_consumed: u32,
}

/// The static properties of a task.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TaskAttr {
    pub(crate) entry: TaskFn,
    pub(crate) priority: TaskPriority,
    pub(crate) stack_top: usize,
    pub(crate) stack_size: usize,
}

/// Time-slice accounting. `total` equals the task's priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimeSlices {
    pub(crate) total: u32,
    pub(crate) consumed: u32,
}

impl Init for TimeSlices {
    const INIT: Self = Self {
        total: 0,
        consumed: 0,
    };
}

/// *Task control block* - the state data of a task.
pub(crate) struct TaskCb<Traits> {
    /// `None` iff the slot doesn't hold a created task.
    pub(crate) attr: CpuLockCell<Traits, Option<TaskAttr>>,

    pub(crate) st: CpuLockCell<Traits, TaskStatus>,

    /// `Some(_)` iff `st` is `Blocked`.
    pub(crate) wait: CpuLockCell<Traits, Option<WaitState>>,

    pub(crate) slices: CpuLockCell<Traits, TimeSlices>,

    /// The saved stack pointer. Valid while the task isn't running.
    pub(crate) sp: CpuLockCell<Traits, usize>,
}

impl<Traits> Init for TaskCb<Traits> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        attr: Init::INIT,
        st: Init::INIT,
        wait: Init::INIT,
        slices: Init::INIT,
        sp: Init::INIT,
    };
}

impl<Traits: KernelTraits> fmt::Debug for TaskCb<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaskCb")
            .field("self", &(self as *const _))
            .field("attr", &self.attr)
            .field("st", &self.st)
            .field("wait", &self.wait)
            .field("slices", &self.slices)
            .field("sp", &self.sp)
            .finish()
    }
}

impl<Traits: KernelTraits> TaskCb<Traits> {
    /// Get the priority of the task, or `None` if the slot is empty.
    #[inline]
    pub(crate) fn priority(&self, lock: CpuLockTokenRefMut<'_, Traits>) -> Option<TaskPriority> {
        self.attr.read(&*lock).as_ref().map(|attr| attr.priority)
    }

    #[inline]
    pub(crate) fn is_ready(&self, lock: CpuLockTokenRefMut<'_, Traits>) -> bool {
        self.attr.read(&*lock).is_some() && *self.st.read(&*lock) == TaskStatus::Ready
    }
}

/// The body of the idle task.
extern "C" fn idle_task_body<Traits: KernelTraits>(_: usize, _: usize, _: usize, _: usize) -> ! {
    loop {
        Traits::idle_hook();
        Traits::wait_for_interrupt();
    }
}

impl<Traits: KernelTraits, const MAX_TASKS: usize> Kernel<Traits, MAX_TASKS> {
    /// The identifier of the idle task.
    pub const IDLE_TASK_ID: TaskId = MAX_TASKS;

    /// Get the [`TaskCb`] for the specified slot. `MAX_TASKS` refers to the
    /// idle task.
    #[inline]
    pub(crate) fn task_cb(&self, id: TaskId) -> Option<&TaskCb<Traits>> {
        if id == MAX_TASKS {
            Some(&self.idle_task)
        } else {
            self.tasks.get(id)
        }
    }

    /// Create the idle task. [`Self::start`] does this by itself if it
    /// hasn't been done yet.
    pub fn init(&self) -> Result<(), InitError> {
        if self.started.load(Ordering::Relaxed) {
            return Err(InitError::BadContext);
        }

        let mut lock = klock::lock_cpu::<Traits>()?;
        self.init_idle_task(lock.borrow_mut())
    }

    pub(crate) fn init_idle_task(
        &self,
        mut lock: CpuLockTokenRefMut<'_, Traits>,
    ) -> Result<(), InitError> {
        match self.create_task_in_slot(
            lock.borrow_mut(),
            MAX_TASKS,
            idle_task_body::<Traits>,
            0,
            Traits::TASK_MIN_STACK_SIZE,
            TaskParams::INIT,
        ) {
            Ok(_) => Ok(()),
            Err(CreateTaskError::NoMemory) => Err(InitError::NoMemory),
            Err(CreateTaskError::BadObjectState) => Err(InitError::BadObjectState),
            Err(CreateTaskError::BadContext | CreateTaskError::BadParam) => {
                Err(InitError::BadContext)
            }
        }
    }

    /// Create a task with the specified entry point, priority, stack size,
    /// and arguments.
    ///
    /// The task is placed in slot `MAX_TASKS - priority`, so there can be at
    /// most one task per priority level. Its stack is carved out of the
    /// stack region from the top down. Returns the new task's identifier.
    ///
    /// Tasks can only be created before [`Self::start`].
    pub fn create_task(
        &self,
        entry: TaskFn,
        priority: TaskPriority,
        stack_size: usize,
        params: TaskParams,
    ) -> Result<TaskId, CreateTaskError> {
        if self.started.load(Ordering::Relaxed) {
            return Err(CreateTaskError::BadContext);
        }

        if priority == 0 || priority > MAX_TASKS || stack_size < Traits::TASK_MIN_STACK_SIZE {
            return Err(CreateTaskError::BadParam);
        }

        let mut lock = klock::lock_cpu::<Traits>()?;
        self.create_task_in_slot(
            lock.borrow_mut(),
            MAX_TASKS - priority,
            entry,
            priority,
            stack_size,
            params,
        )
    }

    fn create_task_in_slot(
        &self,
        mut lock: CpuLockTokenRefMut<'_, Traits>,
        id: TaskId,
        entry: TaskFn,
        priority: TaskPriority,
        stack_size: usize,
        params: TaskParams,
    ) -> Result<TaskId, CreateTaskError> {
        let task_cb = self.task_cb(id).ok_or(CreateTaskError::BadParam)?;

        if task_cb.attr.read(&*lock).is_some() {
            return Err(CreateTaskError::BadObjectState);
        }

        let (stack_top, stack_size) = self
            .stack_region
            .write(&mut *lock)
            .allocate(stack_size, Traits::STACK_ALIGN)
            .ok_or(CreateTaskError::NoMemory)?;

        let frame = StackFrame::initial(entry, &params);

        // Safety: CPU Lock active, `stack_top` is the upper end of a stack
        // region we just allocated for the task
        let sp = unsafe { Traits::initialize_task_state(stack_top, &frame) };

        task_cb.attr.replace(
            &mut *lock,
            Some(TaskAttr {
                entry,
                priority,
                stack_top,
                stack_size,
            }),
        );
        task_cb.st.replace(&mut *lock, TaskStatus::Ready);
        task_cb.wait.replace(&mut *lock, None);
        task_cb.slices.replace(
            &mut *lock,
            TimeSlices {
                total: priority as u32,
                consumed: 0,
            },
        );
        task_cb.sp.replace(&mut *lock, sp);

        if id != MAX_TASKS {
            let count = self.num_created_tasks.load(Ordering::Relaxed);
            self.num_created_tasks.store(count + 1, Ordering::Relaxed);
        }

        log::debug!(
            "created task {} (priority {}, stack {:#x}..{:#x})",
            id,
            priority,
            stack_top - stack_size,
            stack_top,
        );

        Ok(id)
    }

    /// Block the calling task until `ticks` ticks have elapsed.
    ///
    /// `ticks == 0` is a plain yield to the tick handler: the task is
    /// promoted back to Ready on the next tick. [`INFINITE`] blocks the task
    /// forever.
    ///
    /// [`INFINITE`]: crate::INFINITE
    pub fn delay(&self, ticks: Ticks) -> Result<(), DelayError> {
        state::expect_waitable_context::<Traits>()?;
        let deadline = Deadline::after(self.tick_count(), ticks);
        self.block_running_task_if(WaitReason::Tick, deadline, || true)?;
        Ok(())
    }

    /// Get a snapshot of the specified task's descriptor.
    pub fn task_info(&self, id: TaskId) -> Result<TaskInfo, GetTaskInfoError> {
        let task_cb = self.task_cb(id).ok_or(GetTaskInfoError::BadId)?;
        let lock = klock::lock_cpu::<Traits>()?;

        let attr = (*task_cb.attr.read(&*lock)).ok_or(GetTaskInfoError::BadId)?;
        let wait = *task_cb.wait.read(&*lock);

        Ok(TaskInfo {
            id,
            priority: attr.priority,
            entry_point: attr.entry as usize,
            status: *task_cb.st.read(&*lock),
            wait_reason: wait.map(|wait| wait.reason),
            stack_pointer: *task_cb.sp.read(&*lock),
            stack_top: attr.stack_top,
            stack_size: attr.stack_size,
            slices_consumed: task_cb.slices.read(&*lock).consumed,
        })
    }

    /// The context switch handler. Called by a port's context switch
    /// interrupt handler with the outgoing task's stack pointer. Returns the
    /// stack pointer of the task to resume.
    ///
    /// The outgoing task goes back to Ready unless it's Blocked. The next
    /// task is chosen by a circular scan over the other regular slots
    /// starting right after the outgoing task's slot. The idle task runs if
    /// none of them is Ready, even if the outgoing task is.
    ///
    /// # Safety
    ///
    /// Only meant to be called by a port, with CPU Lock active, after
    /// [`Self::port_boot`].
    pub unsafe fn port_switch_context(&self, saved_sp: usize) -> usize {
        // Safety: CPU Lock active
        let mut lock = unsafe { klock::assume_cpu_lock::<Traits>() };

        let current = self.running_task.load(Ordering::Relaxed);
        let Some(outgoing) = self.task_cb(current) else {
            Self::halt();
        };

        outgoing.sp.replace(&mut *lock, saved_sp);
        if *outgoing.st.read(&*lock) == TaskStatus::Running {
            outgoing.st.replace(&mut *lock, TaskStatus::Ready);
        }

        let next = round_robin::next_ready_slot(current, MAX_TASKS, |i| {
            self.tasks[i].is_ready(lock.borrow_mut())
        })
        .unwrap_or(MAX_TASKS);

        let incoming = self.task_cb(next).unwrap_or(&self.idle_task);
        incoming.st.replace(&mut *lock, TaskStatus::Running);
        self.running_task.store(next, Ordering::Relaxed);

        if next != current {
            log::trace!("switching from task {} to task {}", current, next);
        }

        let sp = *incoming.sp.read(&*lock);

        // Keep CPU Lock; the port releases it when returning to the task
        mem::forget(lock);

        sp
    }
}
