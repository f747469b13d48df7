//! Locking primitives shared by the allocator crates.
//!
//! Everything here revolves around one contract, [`RawLock`], which exposes
//! two ways of entering the same critical section:
//!
//! - [`RawLock::acquire`] / [`RawLock::release`] for code running in a
//!   normal (thread) context, where waiting for the lock is allowed;
//! - [`RawLock::acquire_unsafe`] / [`RawLock::release_unsafe`] for code that
//!   already runs inside a system-locked section (see [`SysLock`]), where the
//!   caller has established exclusivity and the lock must not wait on the
//!   scheduler.
//!
//! Which path is taken is decided by the caller through [`CallingContext`],
//! one call at a time. [`ScopedLock`] pairs the acquire and release of the
//! selected path.
//!
//! # Examples
//!
//! ```
//! use os_sync::{CallingContext, Mutex, ScopedLock, SysLock};
//!
//! let mutex = Mutex::new();
//!
//! {
//!     let _lock = ScopedLock::new(&mutex, CallingContext::Normal);
//!     // critical section
//! }
//!
//! let _scope = SysLock::scope();
//! let _lock = ScopedLock::new(&mutex, CallingContext::SysLock);
//! ```

#![no_std]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub use self::{
    mutex::Mutex,
    scoped::ScopedLock,
    sys_lock::{SysLock, SysLockScope},
};

mod mutex;
mod scoped;
mod sys_lock;

/// The context an operation is invoked from.
///
/// The context selects which half of a [`RawLock`] is used.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallingContext {
    /// Normal thread context. The lock may be waited for.
    #[default]
    Normal,
    /// Interrupt service routine, running with the system lock held.
    Isr,
    /// Thread context inside a system-locked section.
    SysLock,
}

impl CallingContext {
    /// Returns `true` if the caller already guarantees exclusivity.
    #[must_use]
    pub const fn is_serialized(self) -> bool {
        matches!(self, Self::Isr | Self::SysLock)
    }
}

/// A lock with a normal and an already-serialized entry path.
///
/// # Safety
///
/// Implementations must provide mutual exclusion: between a successful
/// acquire (through either path) and the matching release, no other acquire
/// on the same lock may return.
pub unsafe trait RawLock {
    /// Acquires the lock from a normal context, waiting if needed.
    fn acquire(&self);

    /// Releases a lock taken with [`acquire`](Self::acquire).
    ///
    /// # Safety
    ///
    /// The caller must hold the lock through [`acquire`](Self::acquire).
    unsafe fn release(&self);

    /// Acquires the lock from a system-locked context.
    fn acquire_unsafe(&self);

    /// Releases a lock taken with [`acquire_unsafe`](Self::acquire_unsafe).
    ///
    /// # Safety
    ///
    /// The caller must hold the lock through
    /// [`acquire_unsafe`](Self::acquire_unsafe).
    unsafe fn release_unsafe(&self);

    /// Acquires the lock through the path matching `context`.
    #[track_caller]
    fn acquire_in(&self, context: CallingContext) {
        if context.is_serialized() {
            self.acquire_unsafe();
        } else {
            self.acquire();
        }
    }

    /// Releases the lock through the path matching `context`.
    ///
    /// # Safety
    ///
    /// The caller must hold the lock through
    /// [`acquire_in`](Self::acquire_in) with the same `context`.
    unsafe fn release_in(&self, context: CallingContext) {
        unsafe {
            if context.is_serialized() {
                self.release_unsafe();
            } else {
                self.release();
            }
        }
    }
}
