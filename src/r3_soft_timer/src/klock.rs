//! CPU Lock, the critical section guarding the timer service state
//!
//! The state is kept in [`CpuLockCell`]s, which can only be borrowed through
//! a [`CpuLockGuard`]. There's at most one guard per port type at any point,
//! so the borrow checker enforces exclusive access for us.
use core::fmt;
use tokenlock::{SingletonTokenId, UnsyncSingletonToken, UnsyncTokenLock};

use crate::{error::BadContextError, PortThreading};

/// Distinguishes the token types of different ports.
pub(crate) struct CpuLockTag<Traits>(Traits);

type CpuLockToken<Traits> = UnsyncSingletonToken<CpuLockTag<Traits>>;
type CpuLockKeyhole<Traits> = SingletonTokenId<CpuLockTag<Traits>>;

/// A cell that can only be accessed in a CPU Lock state.
pub(crate) struct CpuLockCell<Traits, T>(UnsyncTokenLock<T, CpuLockKeyhole<Traits>>);

impl<Traits, T> CpuLockCell<Traits, T> {
    pub(crate) const fn new(x: T) -> Self {
        Self(UnsyncTokenLock::new(CpuLockKeyhole::new(), x))
    }
}

impl<Traits: PortThreading, T> CpuLockCell<Traits, T> {
    #[inline]
    pub(crate) fn read<'a>(&'a self, lock: &'a CpuLockGuard<Traits>) -> &'a T {
        self.0.read(&lock.token)
    }

    #[inline]
    pub(crate) fn write<'a>(&'a self, lock: &'a mut CpuLockGuard<Traits>) -> &'a mut T {
        self.0.write(&mut lock.token)
    }
}

impl<Traits: PortThreading, T: fmt::Debug> fmt::Debug for CpuLockCell<Traits, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Can't print the contents if the caller is already holding CPU Lock
        match lock_cpu::<Traits>() {
            Ok(lock) => f.debug_tuple("CpuLockCell").field(self.read(&lock)).finish(),
            Err(_) => f.write_str("CpuLockCell(< locked >)"),
        }
    }
}

/// Enter a CPU Lock state and get an RAII guard.
/// Return `BadContext` if CPU Lock is already active.
pub(crate) fn lock_cpu<Traits: PortThreading>() -> Result<CpuLockGuard<Traits>, BadContextError> {
    // Safety: `try_enter_cpu_lock` is only meant to be called by this crate
    if unsafe { Traits::try_enter_cpu_lock() } {
        // Safety: We just entered CPU Lock, so there's no other guard
        Ok(unsafe { assume_cpu_lock() })
    } else {
        Err(BadContextError::BadContext)
    }
}

/// Get a guard for a CPU Lock state entered by someone else, e.g., a timer
/// callback that returned without leaving CPU Lock.
///
/// # Safety
///
/// CPU Lock must be active, and there must be no other `CpuLockGuard` for
/// `Traits`.
pub(crate) unsafe fn assume_cpu_lock<Traits: PortThreading>() -> CpuLockGuard<Traits> {
    debug_assert!(Traits::is_cpu_lock_active());

    CpuLockGuard {
        // Safety: Upheld by the caller
        token: unsafe { CpuLockToken::new_unchecked() },
    }
}

/// RAII guard for a CPU Lock state. Leaves CPU Lock when dropped.
pub(crate) struct CpuLockGuard<Traits: PortThreading> {
    token: CpuLockToken<Traits>,
}

impl<Traits: PortThreading> Drop for CpuLockGuard<Traits> {
    fn drop(&mut self) {
        // Safety: CPU Lock is active, and this guard is the owner of it
        unsafe { Traits::leave_cpu_lock() };
    }
}
