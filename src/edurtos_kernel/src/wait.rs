//! The blocking/wake-up protocol shared by [`Kernel::delay`] and the
//! synchronization primitives
//!
//! A task waits by marking itself Blocked, recording what it's waiting for,
//! and requesting a context switch. It's made Ready again either by
//! [`Kernel::wake_one`] (the resource was released) or by the tick handler
//! (the wait's deadline has passed). A woken task doesn't own the resource
//! yet. It retries the acquisition and, if the resource is still
//! unavailable and the deadline hasn't passed, waits again.
use core::sync::atomic::Ordering;

use crate::{
    error::BadContextError,
    klock,
    state::Kernel,
    task::TaskStatus,
    timeout::Deadline,
    KernelTraits,
};

/// Identifies a synchronization primitive instance by its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitObject(usize);

impl WaitObject {
    #[cfg(any(feature = "mutex", feature = "semaphore"))]
    #[inline]
    pub(crate) fn of<T>(object: &T) -> Self {
        Self(object as *const T as usize)
    }
}

/// What a Blocked task is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// The task is waiting for its deadline only ([`Kernel::delay`]).
    Tick,
    /// The task is waiting for a [`Mutex`](crate::Mutex) to be unlocked.
    #[cfg(feature = "mutex")]
    Mutex(WaitObject),
    /// The task is waiting for a [`Semaphore`](crate::Semaphore) permit.
    #[cfg(feature = "semaphore")]
    Semaphore(WaitObject),
}

/// The wait state of a Blocked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WaitState {
    pub(crate) reason: WaitReason,
    pub(crate) deadline: Deadline,
}

impl<Traits: KernelTraits, const MAX_TASKS: usize> Kernel<Traits, MAX_TASKS> {
    /// Block the running task until it's woken up for `reason` or `deadline`
    /// passes, provided that `still_unavailable` returns `true` when
    /// evaluated with CPU Lock active.
    ///
    /// Evaluating the condition with CPU Lock active closes the window
    /// between a failed acquisition attempt and the transition to Blocked,
    /// during which a release (and the accompanying wake-up) could otherwise
    /// be missed. If the condition no longer holds, this method returns
    /// immediately so that the caller can retry.
    ///
    /// Returns after the task is rescheduled.
    pub(crate) fn block_running_task_if(
        &self,
        reason: WaitReason,
        deadline: Deadline,
        still_unavailable: impl FnOnce() -> bool,
    ) -> Result<(), BadContextError> {
        if !Traits::is_task_context() {
            return Err(BadContextError::BadContext);
        }

        let mut lock = klock::lock_cpu::<Traits>()?;

        if !still_unavailable() {
            return Ok(());
        }

        let running = self.running_task.load(Ordering::Relaxed);
        if running == MAX_TASKS {
            // The idle task must never block
            log::error!("the idle task attempted to block on {:?}", reason);
            Self::halt();
        }

        let Some(task_cb) = self.task_cb(running) else {
            Self::halt();
        };

        debug_assert_eq!(*task_cb.st.read(&*lock), TaskStatus::Running);
        task_cb.st.replace(&mut *lock, TaskStatus::Blocked);
        task_cb
            .wait
            .replace(&mut *lock, Some(WaitState { reason, deadline }));

        log::trace!("task {} is waiting for {:?}", running, reason);

        // The switch takes place as soon as CPU Lock is released
        // Safety: We are the kernel
        unsafe { Traits::request_dispatch() };
        drop(lock);

        Ok(())
    }

    /// Wake up the first task (in ascending slot order) that is Blocked for
    /// `reason`. If its priority is higher than the running task's, request
    /// a context switch.
    ///
    /// Returns `true` if a task was woken up.
    #[cfg(any(feature = "mutex", feature = "semaphore"))]
    pub(crate) fn wake_one(&self, reason: WaitReason) -> Result<bool, BadContextError> {
        let mut lock = klock::lock_cpu::<Traits>()?;

        let Some((id, task_cb)) = self.tasks.iter().enumerate().find(|(_, task_cb)| {
            *task_cb.st.read(&*lock) == TaskStatus::Blocked
                && task_cb.wait.read(&*lock).as_ref().map(|wait| wait.reason) == Some(reason)
        }) else {
            return Ok(false);
        };

        task_cb.st.replace(&mut *lock, TaskStatus::Ready);
        task_cb.wait.replace(&mut *lock, None);

        log::trace!("woke up task {} waiting for {:?}", id, reason);

        let running = self.running_task.load(Ordering::Relaxed);
        let running_priority = self
            .task_cb(running)
            .and_then(|running_cb| running_cb.priority(lock.borrow_mut()))
            .unwrap_or(0);
        if task_cb.priority(lock.borrow_mut()).unwrap_or(0) > running_priority {
            // Safety: We are the kernel
            unsafe { Traits::request_dispatch() };
        }

        drop(lock);
        Ok(true)
    }
}
