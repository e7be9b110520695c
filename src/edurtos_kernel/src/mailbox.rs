//! Mailboxes
use core::fmt;

use crate::{
    error::{
        BadContextError, InitMailboxError, ReadMailboxError, SignalSemaphoreError,
        WriteMailboxError,
    },
    klock::{self, CpuLockCell},
    semaphore::Semaphore,
    state::Kernel,
    timeout::{Ticks, INFINITE},
    KernelTraits,
};

/// A bounded FIFO queue of messages, backed by a caller-provided buffer.
///
/// Two semaphores account for the free and filled slots. A writer takes a
/// free-slot permit, stores the message, and gives a filled-slot permit; a
/// reader does the opposite. Both block for at most the specified number of
/// ticks waiting for their permit.
///
/// ```rust,ignore
/// let mut buffer = [0u32; 8];
/// let mailbox = Mailbox::<System>::new(&mut buffer).unwrap();
/// mailbox.write(&KERNEL, 42, INFINITE).unwrap();
/// assert_eq!(mailbox.read(&KERNEL, INFINITE), Ok(42));
/// ```
pub struct Mailbox<'a, Traits, T = u32> {
    ring: CpuLockCell<Traits, Ring<'a, T>>,
    capacity: usize,
    free_slots: Semaphore<Traits>,
    filled_slots: Semaphore<Traits>,
}

impl<'a, Traits: KernelTraits, T: Copy + Send> Mailbox<'a, Traits, T> {
    /// Construct an empty mailbox whose capacity is `buffer.len()`.
    pub fn new(buffer: &'a mut [T]) -> Result<Self, InitMailboxError> {
        let capacity = buffer.len();
        if capacity == 0 || capacity > u32::MAX as usize {
            return Err(InitMailboxError::BadParam);
        }

        Ok(Self {
            ring: CpuLockCell::new(Ring::new(buffer)),
            capacity,
            free_slots: Semaphore::new(capacity as u32),
            filled_slots: Semaphore::new(0),
        })
    }

    /// Get the maximum number of stored messages.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of stored messages.
    pub fn len(&self) -> Result<usize, BadContextError> {
        let lock = klock::lock_cpu::<Traits>()?;
        Ok(self.ring.read(&*lock).len)
    }

    /// Get a flag indicating whether the mailbox has no stored messages.
    pub fn is_empty(&self) -> Result<bool, BadContextError> {
        Ok(self.len()? == 0)
    }

    /// Get a flag indicating whether the mailbox has no free slots.
    pub fn is_full(&self) -> Result<bool, BadContextError> {
        let lock = klock::lock_cpu::<Traits>()?;
        Ok(self.ring.read(&*lock).is_full())
    }

    /// Append a message, blocking for at most `ticks` ticks until a slot
    /// becomes free.
    ///
    /// `Full` means the slot permit was obtained but the buffer turned out
    /// to be full. The permit isn't returned in this case.
    pub fn write<const MAX_TASKS: usize>(
        &self,
        kernel: &Kernel<Traits, MAX_TASKS>,
        message: T,
        ticks: Ticks,
    ) -> Result<(), WriteMailboxError> {
        self.free_slots.take(kernel, ticks)?;

        {
            let mut lock = klock::lock_cpu::<Traits>()?;
            if self.ring.write(&mut *lock).push(message).is_err() {
                return Err(WriteMailboxError::Full);
            }
        }

        Self::return_permit(kernel, &self.filled_slots)?;
        Ok(())
    }

    /// Remove the oldest message, blocking for at most `ticks` ticks until
    /// one arrives.
    ///
    /// `Empty` means the message permit was obtained but the buffer turned
    /// out to be empty. The permit isn't returned in this case.
    pub fn read<const MAX_TASKS: usize>(
        &self,
        kernel: &Kernel<Traits, MAX_TASKS>,
        ticks: Ticks,
    ) -> Result<T, ReadMailboxError> {
        self.filled_slots.take(kernel, ticks)?;

        let message = {
            let mut lock = klock::lock_cpu::<Traits>()?;
            self.ring
                .write(&mut *lock)
                .pop()
                .ok_or(ReadMailboxError::Empty)?
        };

        Self::return_permit(kernel, &self.free_slots)?;

        Ok(message)
    }

    /// Give a permit to one of the slot semaphores. The two counts always
    /// add up to at most `capacity`, so the give can't overflow. Anything
    /// but success or `BadContext` means the mailbox state is corrupt.
    fn return_permit<const MAX_TASKS: usize>(
        kernel: &Kernel<Traits, MAX_TASKS>,
        semaphore: &Semaphore<Traits>,
    ) -> Result<(), BadContextError> {
        let result = semaphore.give(kernel, INFINITE);
        permit_give_outcome(result).unwrap_or_else(|| {
            log::error!("mailbox slot accounting is inconsistent: {:?}", result);
            Kernel::<Traits, MAX_TASKS>::halt()
        })
    }
}

/// Classify the result of giving a slot permit. Returns `None` if it
/// indicates a broken slot accounting invariant.
fn permit_give_outcome(
    result: Result<(), SignalSemaphoreError>,
) -> Option<Result<(), BadContextError>> {
    match result {
        Ok(()) => Some(Ok(())),
        Err(SignalSemaphoreError::BadContext) => Some(Err(BadContextError::BadContext)),
        Err(SignalSemaphoreError::QueueOverflow | SignalSemaphoreError::Timeout) => None,
    }
}

impl<Traits: KernelTraits, T> fmt::Debug for Mailbox<'_, Traits, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let len = klock::lock_cpu::<Traits>()
            .ok()
            .map(|lock| self.ring.read(&*lock).len);
        f.debug_struct("Mailbox")
            .field("self", &(self as *const _))
            .field("capacity", &self.capacity)
            .field("len", &len)
            .field("free_slots", &self.free_slots)
            .field("filled_slots", &self.filled_slots)
            .finish()
    }
}

/// The ring buffer part of a mailbox.
///
/// `cursor` is `None` while the ring is empty. Otherwise it holds the
/// indices of the oldest and the newest stored messages.
struct Ring<'a, T> {
    buffer: &'a mut [T],
    cursor: Option<(usize, usize)>,
    len: usize,
}

impl<'a, T: Copy> Ring<'a, T> {
    fn new(buffer: &'a mut [T]) -> Self {
        Self {
            buffer,
            cursor: None,
            len: 0,
        }
    }

    fn is_full(&self) -> bool {
        match self.cursor {
            Some((front, rear)) => (rear + 1) % self.buffer.len() == front,
            None => false,
        }
    }

    fn push(&mut self, x: T) -> Result<(), T> {
        if self.is_full() {
            return Err(x);
        }

        let rear = match self.cursor {
            None => {
                self.cursor = Some((0, 0));
                0
            }
            Some((front, rear)) => {
                let rear = (rear + 1) % self.buffer.len();
                self.cursor = Some((front, rear));
                rear
            }
        };

        self.buffer[rear] = x;
        self.len += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<T> {
        let (front, rear) = self.cursor?;
        let x = self.buffer[front];

        self.cursor = if front == rear {
            None
        } else {
            Some(((front + 1) % self.buffer.len(), rear))
        };

        self.len -= 1;
        Some(x)
    }
}
