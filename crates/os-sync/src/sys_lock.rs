use core::{fmt, marker::PhantomData, mem};

use spin::mutex::{SpinMutex, SpinMutexGuard};

static SYS_LOCK: SpinMutex<()> = SpinMutex::new(());

/// The system-wide critical section.
///
/// On the target this is the section in which preemption and interrupts are
/// disabled. Here it is a single process-wide spin lock, which gives the same
/// guarantee to everything that enters it: at most one context is inside at
/// any time.
///
/// The section is not re-entrant. Entering it twice from the same context
/// deadlocks.
#[derive(Debug)]
pub enum SysLock {}

impl SysLock {
    /// Enters the system-locked section.
    pub fn acquire() {
        mem::forget(SYS_LOCK.lock());
    }

    /// Leaves the system-locked section.
    ///
    /// # Safety
    ///
    /// The caller must have entered the section with
    /// [`acquire`](Self::acquire).
    pub unsafe fn release() {
        assert!(Self::is_locked(), "SysLock released without being held");
        unsafe { SYS_LOCK.force_unlock() };
    }

    /// Returns `true` if some context is inside the system-locked section.
    #[must_use]
    pub fn is_locked() -> bool {
        SYS_LOCK.is_locked()
    }

    /// Enters the system-locked section until the returned scope is dropped.
    #[must_use]
    pub fn scope() -> SysLockScope {
        SysLockScope {
            _guard: SYS_LOCK.lock(),
            _not_send: PhantomData,
        }
    }
}

/// RAII scope of the system-locked section, returned by [`SysLock::scope`].
pub struct SysLockScope {
    _guard: SpinMutexGuard<'static, ()>,
    _not_send: PhantomData<*mut ()>,
}

impl fmt::Debug for SysLockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SysLockScope").finish_non_exhaustive()
    }
}
