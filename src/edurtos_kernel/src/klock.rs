//! CPU Lock as a token
//!
//! Every piece of mutable kernel state lives in a [`CpuLockCell`]. The only
//! way to open one is to present the token held by a [`CpuLockGuard`], and
//! the only way to get a guard is to activate CPU Lock. There's at most one
//! guard at any time, so holding `&mut` to its token proves exclusive
//! access to the whole kernel state.
use core::{fmt, ops};
use tokenlock::UnsyncTokenLock;

use crate::{error::BadContextError, utils::Init, PortThreading};

pub(crate) struct CpuLockTag<Traits>(Traits);

type CpuLockToken<Traits> = tokenlock::UnsyncSingletonToken<CpuLockTag<Traits>>;

type CpuLockKeyhole<Traits> = tokenlock::SingletonTokenId<CpuLockTag<Traits>>;

/// A kernel state cell, readable and writable only with CPU Lock active.
pub(crate) struct CpuLockCell<Traits, T: ?Sized>(UnsyncTokenLock<T, CpuLockKeyhole<Traits>>);

impl<Traits, T> CpuLockCell<Traits, T> {
    pub(crate) const fn new(x: T) -> Self {
        Self(UnsyncTokenLock::new(CpuLockKeyhole::new(), x))
    }
}

impl<Traits, T: Init> Init for CpuLockCell<Traits, T> {
    const INIT: Self = Self::new(T::INIT);
}

impl<Traits, T> ops::Deref for CpuLockCell<Traits, T> {
    type Target = UnsyncTokenLock<T, CpuLockKeyhole<Traits>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<Traits: PortThreading, T: Clone + fmt::Debug> fmt::Debug for CpuLockCell<Traits, T> {
    /// Prints `< locked >` when called with CPU Lock already active.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let Ok(lock) = lock_cpu::<Traits>() else {
            return f.write_str("CpuLockCell(< locked >)");
        };
        let inner = self.0.read(&*lock).clone();
        drop(lock);

        f.debug_tuple("CpuLockCell").field(&inner).finish()
    }
}

/// Activate CPU Lock. Fails with `BadContext` if it's already active, which
/// also means that someone up the stack owns the token.
pub(crate) fn lock_cpu<Traits: PortThreading>() -> Result<CpuLockGuard<Traits>, BadContextError> {
    // Safety: We are the kernel
    if unsafe { Traits::try_enter_cpu_lock() } {
        // Safety: We activated CPU Lock just now, so no guard exists
        Ok(unsafe { assume_cpu_lock() })
    } else {
        Err(BadContextError::BadContext)
    }
}

/// Get a guard for a CPU Lock state that was activated outside the kernel
/// (e.g., by a context switch handler).
///
/// # Safety
///
/// CPU Lock must be active, and no other `CpuLockGuard` may exist.
pub(crate) unsafe fn assume_cpu_lock<Traits: PortThreading>() -> CpuLockGuard<Traits> {
    debug_assert!(Traits::is_cpu_lock_active());

    CpuLockGuard {
        // Safety: Upheld by the caller
        token: unsafe { CpuLockToken::new_unchecked() },
    }
}

/// Owns the CPU Lock state. Dropping it deactivates CPU Lock; use
/// `mem::forget` to hand the state over to the port instead.
pub(crate) struct CpuLockGuard<Traits: PortThreading> {
    token: CpuLockToken<Traits>,
}

impl<Traits: PortThreading> CpuLockGuard<Traits> {
    /// Lend the token to a callee that doesn't end the CPU Lock state.
    pub(crate) fn borrow_mut(&mut self) -> CpuLockTokenRefMut<'_, Traits> {
        self.token.borrow_mut()
    }
}

impl<Traits: PortThreading> Drop for CpuLockGuard<Traits> {
    fn drop(&mut self) {
        // Safety: CPU Lock is active and owned by this guard
        unsafe { Traits::leave_cpu_lock() };
    }
}

impl<Traits: PortThreading> ops::Deref for CpuLockGuard<Traits> {
    type Target = CpuLockToken<Traits>;

    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl<Traits: PortThreading> ops::DerefMut for CpuLockGuard<Traits> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.token
    }
}

/// A borrowed [`CpuLockGuard`] token.
pub(crate) type CpuLockTokenRefMut<'a, Traits> =
    tokenlock::UnsyncSingletonTokenRefMut<'a, CpuLockTag<Traits>>;
