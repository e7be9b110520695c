//! Single-word exclusive access
use core::{cell::UnsafeCell, fmt, marker::PhantomData};

use crate::PortExclusive;

/// A 32-bit word that is updated by a load-exclusive/store-exclusive pair
/// instead of a CPU Lock section.
///
/// Each synchronization primitive keeps its whole state in one of these, so
/// an update never leaves a half-written state behind even if the updating
/// task is preempted.
pub(crate) struct ExclusiveWord<Traits> {
    value: UnsafeCell<u32>,
    _phantom: PhantomData<Traits>,
}

// Safety: All accesses go through volatile or exclusive loads and stores
unsafe impl<Traits> Sync for ExclusiveWord<Traits> {}

/// The reason why [`ExclusiveWord::try_update`] didn't store a new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateError {
    /// The update function returned `None` for the observed value.
    Rejected(u32),
    /// The exclusive store failed. The caller may retry.
    Contended,
}

impl<Traits> ExclusiveWord<Traits> {
    pub(crate) const fn new(x: u32) -> Self {
        Self {
            value: UnsafeCell::new(x),
            _phantom: PhantomData,
        }
    }
}

impl<Traits: PortExclusive> ExclusiveWord<Traits> {
    /// Read the current value.
    #[inline]
    pub(crate) fn load(&self) -> u32 {
        // Safety: `value` is always initialized and aligned
        unsafe { self.value.get().read_volatile() }
    }

    /// Make one attempt to replace the value `v` with `f(v)`.
    ///
    /// Returns the previous value on success. Doesn't retry by itself; the
    /// caller decides how long it's willing to retry on
    /// [`UpdateError::Contended`].
    pub(crate) fn try_update(
        &self,
        f: impl FnOnce(u32) -> Option<u32>,
    ) -> Result<u32, UpdateError> {
        // Safety: `value` is always initialized and aligned
        let old = unsafe { Traits::load_exclusive(self.value.get()) };

        let Some(new) = f(old) else {
            Traits::clear_exclusive();
            return Err(UpdateError::Rejected(old));
        };

        // Safety: Ditto
        if unsafe { Traits::store_exclusive(self.value.get(), new) } {
            Traits::data_memory_barrier();
            Ok(old)
        } else {
            Err(UpdateError::Contended)
        }
    }
}

impl<Traits: PortExclusive> fmt::Debug for ExclusiveWord<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("ExclusiveWord").field(&self.load()).finish()
    }
}
