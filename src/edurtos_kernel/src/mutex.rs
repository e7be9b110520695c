//! Mutexes
use core::fmt;

use crate::{
    error::{BadContextError, LockMutexError, UnlockMutexError},
    exclusive::{ExclusiveWord, UpdateError},
    state::{self, Kernel},
    task::TaskId,
    timeout::{Deadline, Ticks},
    utils::Init,
    wait::{WaitObject, WaitReason},
    KernelTraits, PortExclusive,
};

/// The value of the state word of an unlocked mutex. A locked mutex holds
/// its owner's [`TaskId`] plus one.
const UNLOCKED: u32 = 0;

/// The state of a [`Mutex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexStatus {
    Locked,
    Unlocked,
}

/// A binary lock owned by the task that locked it.
///
/// Contending tasks block until the mutex is unlocked. Unlocking wakes the
/// first waiter in task slot order, which then competes for the mutex again
/// (it's not handed over). There's no priority inheritance, and locking a
/// mutex that the calling task already owns blocks like any other contended
/// lock.
///
/// ```rust,ignore
/// static M: Mutex<System> = Mutex::new();
///
/// M.lock(&KERNEL, INFINITE).unwrap();
/// // critical section
/// M.unlock(&KERNEL, INFINITE).unwrap();
/// ```
pub struct Mutex<Traits> {
    state: ExclusiveWord<Traits>,
}

impl<Traits> Init for Mutex<Traits> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();
}

impl<Traits> Mutex<Traits> {
    /// Construct an unlocked mutex.
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            state: ExclusiveWord::new(UNLOCKED),
        }
    }
}

impl<Traits: KernelTraits> Mutex<Traits> {
    /// Get the current state of the mutex.
    pub fn status(&self) -> MutexStatus {
        if self.state.load() == UNLOCKED {
            MutexStatus::Unlocked
        } else {
            MutexStatus::Locked
        }
    }

    /// Get the task currently owning the mutex.
    pub fn owner(&self) -> Option<TaskId> {
        match self.state.load() {
            UNLOCKED => None,
            st => Some((st - 1) as TaskId),
        }
    }

    #[inline]
    fn wait_reason(&self) -> WaitReason {
        WaitReason::Mutex(WaitObject::of(self))
    }

    /// Acquire the mutex, blocking for at most `ticks` ticks.
    ///
    /// `ticks == 0` makes a single attempt. [`INFINITE`] waits forever.
    ///
    /// [`INFINITE`]: crate::INFINITE
    pub fn lock<const MAX_TASKS: usize>(
        &self,
        kernel: &Kernel<Traits, MAX_TASKS>,
        ticks: Ticks,
    ) -> Result<(), LockMutexError> {
        state::expect_waitable_context::<Traits>()?;

        let deadline = Deadline::after(kernel.tick_count(), ticks);
        let locked_by_me = kernel.running_task_id() as u32 + 1;

        loop {
            let contended =
                match self.state.try_update(|st| (st == UNLOCKED).then_some(locked_by_me)) {
                    Ok(_) => return Ok(()),
                    Err(UpdateError::Rejected(_)) => false,
                    Err(UpdateError::Contended) => true,
                };

            if deadline.has_expired(kernel.tick_count()) {
                // We might have been woken up by the last release. Hand the
                // wake-up over so that it's not lost.
                self.wake_waiter(kernel)?;
                return Err(LockMutexError::Timeout);
            }

            if !contended {
                kernel.block_running_task_if(self.wait_reason(), deadline, || {
                    self.state.load() != UNLOCKED
                })?;
            }
        }
    }

    /// Release the mutex.
    ///
    /// Succeeds immediately if the mutex is already unlocked or is owned by
    /// the calling task. Otherwise, busy-waits for at most `ticks` ticks for
    /// the mutex to become unlocked, and fails with `Timeout` if it doesn't.
    pub fn unlock<const MAX_TASKS: usize>(
        &self,
        kernel: &Kernel<Traits, MAX_TASKS>,
        ticks: Ticks,
    ) -> Result<(), UnlockMutexError> {
        state::expect_waitable_context::<Traits>()?;

        let deadline = Deadline::after(kernel.tick_count(), ticks);
        let locked_by_me = kernel.running_task_id() as u32 + 1;

        loop {
            match self
                .state
                .try_update(|st| (st == locked_by_me).then_some(UNLOCKED))
            {
                Ok(_) | Err(UpdateError::Rejected(UNLOCKED)) => {
                    self.wake_waiter(kernel)?;
                    return Ok(());
                }
                Err(UpdateError::Rejected(_) | UpdateError::Contended) => {}
            }

            if deadline.has_expired(kernel.tick_count()) {
                return Err(UnlockMutexError::Timeout);
            }

            Traits::relax();
        }
    }

    /// Wake up a waiter if the mutex is unlocked.
    fn wake_waiter<const MAX_TASKS: usize>(
        &self,
        kernel: &Kernel<Traits, MAX_TASKS>,
    ) -> Result<(), BadContextError> {
        if self.status() == MutexStatus::Unlocked {
            kernel.wake_one(self.wait_reason())?;
        }
        Ok(())
    }
}

impl<Traits: PortExclusive> fmt::Debug for Mutex<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("self", &(self as *const _))
            .field("state", &self.state)
            .finish()
    }
}
