//! Counting semaphores
use core::fmt;

use crate::{
    error::{SignalSemaphoreError, WaitSemaphoreError},
    exclusive::{ExclusiveWord, UpdateError},
    state::{self, Kernel},
    timeout::{Deadline, Ticks},
    wait::{WaitObject, WaitReason},
    KernelTraits, PortExclusive,
};

/// A counter of permits. [`take`](Self::take) blocks while the count is
/// zero. [`give`](Self::give) increments the count and wakes up the first
/// waiter in task slot order.
///
/// `give` may be called from an interrupt handler.
pub struct Semaphore<Traits> {
    count: ExclusiveWord<Traits>,
}

impl<Traits> Semaphore<Traits> {
    /// Construct a semaphore holding `initial` permits.
    pub const fn new(initial: u32) -> Self {
        Self {
            count: ExclusiveWord::new(initial),
        }
    }
}

impl<Traits: KernelTraits> Semaphore<Traits> {
    /// Get the number of available permits.
    #[inline]
    pub fn count(&self) -> u32 {
        self.count.load()
    }

    #[inline]
    fn wait_reason(&self) -> WaitReason {
        WaitReason::Semaphore(WaitObject::of(self))
    }

    /// Take a permit, blocking for at most `ticks` ticks.
    ///
    /// `ticks == 0` makes a single attempt. [`INFINITE`] waits forever.
    ///
    /// [`INFINITE`]: crate::INFINITE
    pub fn take<const MAX_TASKS: usize>(
        &self,
        kernel: &Kernel<Traits, MAX_TASKS>,
        ticks: Ticks,
    ) -> Result<(), WaitSemaphoreError> {
        state::expect_waitable_context::<Traits>()?;

        let deadline = Deadline::after(kernel.tick_count(), ticks);

        loop {
            let contended = match self.count.try_update(|count| count.checked_sub(1)) {
                Ok(_) => return Ok(()),
                Err(UpdateError::Rejected(_)) => false,
                Err(UpdateError::Contended) => true,
            };

            if deadline.has_expired(kernel.tick_count()) {
                // Pass on a wake-up we might have consumed
                if self.count() > 0 {
                    kernel.wake_one(self.wait_reason())?;
                }
                return Err(WaitSemaphoreError::Timeout);
            }

            if !contended {
                kernel.block_running_task_if(self.wait_reason(), deadline, || self.count() == 0)?;
            }
        }
    }

    /// Return a permit, retrying a contended update for at most `ticks`
    /// ticks.
    pub fn give<const MAX_TASKS: usize>(
        &self,
        kernel: &Kernel<Traits, MAX_TASKS>,
        ticks: Ticks,
    ) -> Result<(), SignalSemaphoreError> {
        if Traits::is_cpu_lock_active() {
            return Err(SignalSemaphoreError::BadContext);
        }

        let deadline = Deadline::after(kernel.tick_count(), ticks);

        loop {
            match self.count.try_update(|count| count.checked_add(1)) {
                Ok(_) => break,
                Err(UpdateError::Rejected(_)) => return Err(SignalSemaphoreError::QueueOverflow),
                Err(UpdateError::Contended) => {}
            }

            if deadline.has_expired(kernel.tick_count()) {
                return Err(SignalSemaphoreError::Timeout);
            }
        }

        kernel.wake_one(self.wait_reason())?;
        Ok(())
    }
}

impl<Traits: PortExclusive> fmt::Debug for Semaphore<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("self", &(self as *const _))
            .field("count", &self.count)
            .finish()
    }
}
