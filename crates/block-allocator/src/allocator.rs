//! The block allocator.

use core::{cell::UnsafeCell, fmt, num::NonZeroU8, ptr::NonNull};

use os_sync::{CallingContext, Mutex, RawLock, ScopedLock};
use snafu::ensure;

#[cfg(feature = "stats")]
use crate::stats::Stats;
use crate::{
    Handle,
    arena::Arena,
    error::{AlreadyInitializedSnafu, DoubleFreeSnafu, InitError},
    item::{HEADER_SIZE, Header, ItemState},
};

/// A block allocator over a single fixed arena.
///
/// Blocks are carved from the arena on demand and never returned to it. A
/// released block stays on the allocator's item list and is handed out again
/// to the next request of exactly the same size.
///
/// Every operation runs under `L`. [`lock`](Self::lock) enters it through the
/// path selected by a [`CallingContext`] and returns a guard exposing the
/// operations; the methods on `BlockAllocator` itself are shorthands that
/// enter from [`CallingContext::Normal`] for a single operation.
///
/// # Examples
///
/// ```
/// use block_allocator::BlockAllocator;
///
/// let mut storage = [0_u8; 256];
/// let allocator = BlockAllocator::from_storage(&mut storage).unwrap();
///
/// let handle = allocator.alloc(10).unwrap();
/// assert_eq!(allocator.retain(handle), Some(handle));
/// assert_eq!(allocator.free(handle), Some(handle));
/// assert_eq!(allocator.free(handle), None);
///
/// // The freed block is reused by the next request of the same size.
/// let again = allocator.alloc(10).unwrap();
/// assert_eq!(again.offset(), handle.offset());
/// ```
pub struct BlockAllocator<'a, L = Mutex> {
    lock: L,
    state: UnsafeCell<State<'a>>,
}

unsafe impl<L> Send for BlockAllocator<'_, L> where L: RawLock + Send {}
unsafe impl<L> Sync for BlockAllocator<'_, L> where L: RawLock + Sync {}

struct State<'a> {
    arena: Option<Arena<'a>>,
    root: Option<u32>,
    len: usize,
    #[cfg(feature = "stats")]
    used: usize,
}

impl State<'_> {
    const fn new() -> Self {
        Self {
            arena: None,
            root: None,
            len: 0,
            #[cfg(feature = "stats")]
            used: 0,
        }
    }
}

impl Default for BlockAllocator<'_, Mutex> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> fmt::Debug for BlockAllocator<'_, L>
where
    L: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockAllocator")
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

impl<'a> BlockAllocator<'a, Mutex> {
    /// Creates an allocator with no arena.
    ///
    /// [`initialize`](Self::initialize) must be called before anything can be
    /// allocated.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_lock(Mutex::new())
    }

    /// Creates an allocator carving from `storage`.
    #[track_caller]
    pub fn from_storage(storage: &'a mut [u8]) -> Result<Self, InitError> {
        Self::from_storage_with_lock(storage, Mutex::new())
    }
}

impl<'a, L> BlockAllocator<'a, L>
where
    L: RawLock,
{
    /// Creates an allocator with no arena, guarded by `lock`.
    pub const fn with_lock(lock: L) -> Self {
        Self {
            lock,
            state: UnsafeCell::new(State::new()),
        }
    }

    /// Creates an allocator carving from `storage`, guarded by `lock`.
    #[track_caller]
    pub fn from_storage_with_lock(storage: &'a mut [u8], lock: L) -> Result<Self, InitError> {
        let allocator = Self::with_lock(lock);
        allocator.try_initialize(storage)?;
        Ok(allocator)
    }

    /// Enters the allocator's lock from `context`.
    ///
    /// The returned guard gives access to every operation; the lock is held
    /// until it is dropped.
    #[track_caller]
    pub fn lock(&self, context: CallingContext) -> BlockAllocatorGuard<'_, 'a, L> {
        let lock = ScopedLock::new(&self.lock, context);
        BlockAllocatorGuard {
            state: unsafe { &mut *self.state.get() },
            lock,
        }
    }

    /// Binds `storage` as the arena.
    ///
    /// See [`BlockAllocatorGuard::try_initialize`].
    #[track_caller]
    pub fn try_initialize(&self, storage: &'a mut [u8]) -> Result<(), InitError> {
        self.lock(CallingContext::Normal).try_initialize(storage)
    }

    /// Binds `storage` as the arena.
    ///
    /// See [`BlockAllocatorGuard::initialize`].
    #[track_caller]
    pub fn initialize(&self, storage: &'a mut [u8]) {
        self.lock(CallingContext::Normal).initialize(storage);
    }

    /// Allocates a block of `size` bytes with a reference count of one.
    #[must_use]
    pub fn alloc(&self, size: usize) -> Option<Handle> {
        self.lock(CallingContext::Normal).alloc(size)
    }

    /// Allocates a block of `size` bytes referenced `refcount` times.
    #[must_use]
    pub fn alloc_with_refcount(&self, size: usize, refcount: NonZeroU8) -> Option<Handle> {
        self.lock(CallingContext::Normal)
            .alloc_with_refcount(size, refcount)
    }

    /// Adds a reference to a live block.
    #[must_use]
    pub fn retain(&self, handle: Handle) -> Option<Handle> {
        self.lock(CallingContext::Normal).retain(handle)
    }

    /// Drops a reference to a block.
    #[track_caller]
    pub fn free(&self, handle: Handle) -> Option<Handle> {
        self.lock(CallingContext::Normal).free(handle)
    }

    /// Confirms that a block has been fully released.
    pub fn robust_free(&self, handle: Handle) -> Option<Handle> {
        self.lock(CallingContext::Normal).robust_free(handle)
    }

    /// Reconciles the bookkeeping of every item.
    pub fn clean(&self) -> usize {
        self.lock(CallingContext::Normal).clean()
    }

    /// Runs `f` on the payload of a live block.
    pub fn with_data<R, F>(&self, handle: Handle, f: F) -> Option<R>
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        self.lock(CallingContext::Normal).with_data(handle, f)
    }

    /// Bytes of the arena not yet carved.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.lock(CallingContext::Normal).remaining()
    }

    /// Number of items carved from the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock(CallingContext::Normal).len()
    }

    /// Returns `true` if nothing has been carved from the arena yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock(CallingContext::Normal).is_empty()
    }

    /// Allocation counters.
    #[cfg(feature = "stats")]
    #[must_use]
    pub fn stats(&self) -> Stats {
        self.lock(CallingContext::Normal).stats()
    }
}

/// Exclusive access to a [`BlockAllocator`], returned by
/// [`BlockAllocator::lock`].
pub struct BlockAllocatorGuard<'g, 'a, L>
where
    L: RawLock,
{
    state: &'g mut State<'a>,
    lock: ScopedLock<'g, L>,
}

impl<L> fmt::Debug for BlockAllocatorGuard<'_, '_, L>
where
    L: RawLock,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockAllocatorGuard")
            .field("context", &self.lock.context())
            .field("len", &self.state.len)
            .field("remaining", &self.remaining())
            .finish_non_exhaustive()
    }
}

impl<'a, L> BlockAllocatorGuard<'_, 'a, L>
where
    L: RawLock,
{
    /// Binds `storage` as the arena.
    ///
    /// An allocator can be bound again only as long as nothing was carved
    /// from its current arena; handles into a previous arena are rejected by
    /// every operation afterwards.
    ///
    /// # Errors
    ///
    /// - [`InitError::EmptyArena`] if `storage` is empty.
    /// - [`InitError::ArenaTooLarge`] if `storage` does not fit 32-bit
    ///   offsets.
    /// - [`InitError::AlreadyInitialized`] if items were already carved.
    #[track_caller]
    pub fn try_initialize(&mut self, storage: &'a mut [u8]) -> Result<(), InitError> {
        ensure!(
            self.state.len == 0,
            AlreadyInitializedSnafu {
                items: self.state.len
            }
        );
        self.state.arena = Some(Arena::new(storage)?);
        self.state.root = None;
        Ok(())
    }

    /// Binds `storage` as the arena.
    ///
    /// # Panics
    ///
    /// Panics with a report of the error if
    /// [`try_initialize`](Self::try_initialize) fails.
    #[track_caller]
    pub fn initialize(&mut self, storage: &'a mut [u8]) {
        if let Err(err) = self.try_initialize(storage) {
            snafu_utils::report(err);
        }
    }

    /// Allocates a block of `size` bytes with a reference count of one.
    #[must_use]
    pub fn alloc(&mut self, size: usize) -> Option<Handle> {
        self.alloc_with_refcount(size, NonZeroU8::MIN)
    }

    /// Allocates a block of `size` bytes referenced `refcount` times.
    ///
    /// The item list is scanned from the most recently carved item for a
    /// free item of exactly `size` bytes; the first one found is handed out
    /// again. Otherwise a new item is carved from the arena.
    ///
    /// Returns `None` if no free item matches and the arena has not enough
    /// bytes left, if no arena is bound, or if `size` exceeds
    /// [`MAX_BLOCK_SIZE`](crate::MAX_BLOCK_SIZE).
    #[must_use]
    pub fn alloc_with_refcount(&mut self, size: usize, refcount: NonZeroU8) -> Option<Handle> {
        let size = u16::try_from(size).ok()?;
        let root = self.state.root;
        let arena = self.state.arena.as_mut()?;

        let reusable = arena
            .items(root)
            .find(|(_, header)| header.state().is_free() && header.size() == size);
        if let Some((offset, mut header)) = reusable {
            header.reactivate(refcount);
            arena.write_header(offset, &header);
            #[cfg(feature = "stats")]
            {
                self.state.used += 1;
            }
            return Some(Handle::new(arena.id(), offset, header.generation()));
        }

        let offset = arena.carve(HEADER_SIZE + usize::from(size))?;
        let header = Header::new(offset, size, refcount, root);
        arena.write_header(offset, &header);
        let handle = Handle::new(arena.id(), offset, header.generation());

        self.state.root = Some(offset);
        self.state.len += 1;
        #[cfg(feature = "stats")]
        {
            self.state.used += 1;
        }
        Some(handle)
    }

    /// Header of the block `handle` refers to, if the handle belongs to the
    /// current arena and to the block's current lifetime.
    fn lookup(&self, handle: Handle) -> Option<Header> {
        let arena = self.state.arena.as_ref()?;
        if arena.id() != handle.arena() {
            return None;
        }
        let offset = handle.header_offset();
        let header = arena.try_read_header(offset)?;
        (header.is_valid_at(offset) && header.generation() == handle.generation())
            .then_some(header)
    }

    fn commit(&mut self, handle: Handle, header: &Header) {
        if let Some(arena) = self.state.arena.as_mut() {
            arena.write_header(handle.header_offset(), header);
        }
    }

    /// Adds a reference to a live block.
    ///
    /// Returns `handle` again, or `None` without changing anything if the
    /// handle is stale or foreign, the block is free, or its reference count
    /// is saturated.
    #[must_use]
    pub fn retain(&mut self, handle: Handle) -> Option<Handle> {
        let mut header = self.lookup(handle)?;
        let ItemState::InUse(count) = header.state() else {
            return None;
        };
        header.set_state(ItemState::InUse(count.checked_add(1)?));
        self.commit(handle, &header);
        Some(handle)
    }

    /// Drops a reference to a block.
    ///
    /// Returns `None` once the last reference is gone and the block is free
    /// for reuse, or `handle` while references remain. A stale or foreign
    /// handle is returned unchanged.
    ///
    /// # Panics
    ///
    /// Panics if the block's current lifetime has already been fully
    /// released (double free).
    #[track_caller]
    pub fn free(&mut self, handle: Handle) -> Option<Handle> {
        let Some(mut header) = self.lookup(handle) else {
            return Some(handle);
        };
        let ItemState::InUse(count) = header.state() else {
            snafu_utils::report(DoubleFreeSnafu { handle }.build());
        };

        match NonZeroU8::new(count.get() - 1) {
            Some(count) => {
                header.set_state(ItemState::InUse(count));
                self.commit(handle, &header);
                Some(handle)
            }
            None => {
                header.set_state(ItemState::Free);
                self.commit(handle, &header);
                #[cfg(feature = "stats")]
                {
                    self.state.used -= 1;
                }
                None
            }
        }
    }

    /// Confirms that a block has been fully released.
    ///
    /// Unlike [`free`](Self::free), this never drops a reference and never
    /// faults: it walks the item list for the block `handle` refers to and
    /// returns `None` if that block's lifetime has ended, or `handle`
    /// unchanged otherwise (still referenced, stale, or foreign). It is safe
    /// to call any number of times on a handle that may or may not have been
    /// freed already.
    pub fn robust_free(&mut self, handle: Handle) -> Option<Handle> {
        let Some(arena) = self.state.arena.as_ref() else {
            return Some(handle);
        };
        if arena.id() != handle.arena() {
            return Some(handle);
        }

        let released = arena.items(self.state.root).any(|(offset, header)| {
            offset == handle.header_offset()
                && header.generation() == handle.generation()
                && header.state().is_free()
        });
        (!released).then_some(handle)
    }

    /// Walks every item and reconciles the allocator's bookkeeping with the
    /// item states.
    ///
    /// Returns the number of free items.
    ///
    /// # Panics
    ///
    /// Panics if an item header has been overwritten.
    pub fn clean(&mut self) -> usize {
        let Some(arena) = self.state.arena.as_ref() else {
            return 0;
        };

        let mut free = 0;
        let mut len = 0;
        for (offset, header) in arena.items(self.state.root) {
            assert!(
                header.is_valid_at(offset),
                "corrupted item header at offset {offset}"
            );
            if header.state().is_free() {
                free += 1;
            }
            len += 1;
        }
        assert_eq!(len, self.state.len, "item list length mismatch");

        #[cfg(feature = "stats")]
        {
            self.state.used = len - free;
        }
        free
    }

    /// State of the block `handle` refers to.
    ///
    /// Returns `None` if the handle is stale or foreign.
    #[must_use]
    pub fn state(&self, handle: Handle) -> Option<ItemState> {
        self.lookup(handle).map(|header| header.state())
    }

    /// Reference count of the block `handle` refers to, zero once released.
    ///
    /// Returns `None` if the handle is stale or foreign.
    #[must_use]
    pub fn refcount(&self, handle: Handle) -> Option<usize> {
        self.lookup(handle).map(|header| match header.state() {
            ItemState::Free => 0,
            ItemState::InUse(count) => usize::from(count.get()),
        })
    }

    /// Requested size of the block `handle` refers to.
    #[must_use]
    pub fn size(&self, handle: Handle) -> Option<usize> {
        self.lookup(handle).map(|header| usize::from(header.size()))
    }

    /// Pointer to the payload of a live block.
    ///
    /// The pointer stays valid for as long as the block is referenced.
    /// Accessing it is subject to the usual aliasing rules; prefer
    /// [`with_data`](Self::with_data) where possible.
    #[must_use]
    pub fn data_ptr(&self, handle: Handle) -> Option<NonNull<[u8]>> {
        let header = self.lookup(handle)?;
        if !header.state().is_in_use() {
            return None;
        }
        Some(self.state.arena.as_ref()?.data_ptr(&header))
    }

    /// Runs `f` on the payload of a live block.
    ///
    /// Returns `None` without calling `f` if the handle is stale or foreign
    /// or the block is free. The lock is held while `f` runs, so `f` must
    /// not use the allocator.
    pub fn with_data<R, F>(&mut self, handle: Handle, f: F) -> Option<R>
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let header = self.lookup(handle)?;
        if !header.state().is_in_use() {
            return None;
        }
        let arena = self.state.arena.as_mut()?;
        Some(f(arena.data_mut(&header)))
    }

    /// Total size of the arena in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.arena.as_ref().map_or(0, Arena::size)
    }

    /// Bytes of the arena not yet carved.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.state.arena.as_ref().map_or(0, Arena::free)
    }

    /// Number of items carved from the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.len
    }

    /// Returns `true` if nothing has been carved from the arena yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.len == 0
    }

    /// Allocation counters.
    #[cfg(feature = "stats")]
    #[must_use]
    pub fn stats(&self) -> Stats {
        Stats {
            blocks: self.state.len,
            used: self.state.used,
        }
    }
}
