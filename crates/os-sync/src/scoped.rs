use core::fmt;

use crate::{CallingContext, RawLock};

/// Holds a [`RawLock`] for the lifetime of the value.
///
/// The lock is entered through the path selected by the [`CallingContext`]
/// given to [`new`](Self::new), and left through the same path on drop.
#[must_use = "the lock is released as soon as the ScopedLock is dropped"]
pub struct ScopedLock<'l, L>
where
    L: RawLock + ?Sized,
{
    lock: &'l L,
    context: CallingContext,
}

impl<'l, L> ScopedLock<'l, L>
where
    L: RawLock + ?Sized,
{
    /// Acquires `lock` from `context`.
    #[track_caller]
    pub fn new(lock: &'l L, context: CallingContext) -> Self {
        lock.acquire_in(context);
        Self { lock, context }
    }

    /// Returns the context the lock was acquired from.
    pub fn context(&self) -> CallingContext {
        self.context
    }
}

impl<L> Drop for ScopedLock<'_, L>
where
    L: RawLock + ?Sized,
{
    fn drop(&mut self) {
        unsafe { self.lock.release_in(self.context) };
    }
}

impl<L> fmt::Debug for ScopedLock<'_, L>
where
    L: RawLock + ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedLock")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Mutex, SysLock};

    #[test]
    fn test_release_on_drop() {
        let mutex = Mutex::new();
        {
            let lock = ScopedLock::new(&mutex, CallingContext::Normal);
            assert_eq!(lock.context(), CallingContext::Normal);
            assert!(mutex.is_locked());
        }
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_isr_context_uses_serialized_path() {
        let mutex = Mutex::new();
        let _scope = SysLock::scope();
        {
            let _lock = ScopedLock::new(&mutex, CallingContext::Isr);
            assert!(mutex.is_locked());
        }
        assert!(!mutex.is_locked());
    }
}
