use core::{fmt, mem};

use spin::mutex::SpinMutex;

use crate::{RawLock, SysLock};

/// A spinning [`RawLock`].
///
/// Both entry paths take the same spin lock. The already-serialized path
/// additionally checks that the caller runs inside a system-locked section,
/// and [`release`](RawLock::release) never needs the system lock, so a
/// normal-context holder can always finish while a system-locked caller waits
/// on it.
pub struct Mutex {
    inner: SpinMutex<()>,
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl Mutex {
    /// Creates a new unlocked mutex.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: SpinMutex::new(()),
        }
    }

    /// Returns `true` if the mutex is currently held.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

unsafe impl RawLock for Mutex {
    fn acquire(&self) {
        mem::forget(self.inner.lock());
    }

    unsafe fn release(&self) {
        assert!(self.is_locked(), "Mutex released without holding the lock");
        unsafe { self.inner.force_unlock() };
    }

    #[track_caller]
    fn acquire_unsafe(&self) {
        assert!(
            SysLock::is_locked(),
            "acquire_unsafe called outside of a system-locked section"
        );
        mem::forget(self.inner.lock());
    }

    unsafe fn release_unsafe(&self) {
        assert!(self.is_locked(), "Mutex released without holding the lock");
        unsafe { self.inner.force_unlock() };
    }
}
