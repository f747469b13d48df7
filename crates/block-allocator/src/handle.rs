//! Handles to allocated blocks.

use core::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};

use crate::item::{HEADER_SIZE, data_offset};

static NEXT_ARENA_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies one arena binding.
///
/// Every call that binds storage to an allocator draws a fresh id, so handles
/// can be told apart across allocator instances and across re-bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ArenaId(u32);

impl ArenaId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A reference to a block handed out by
/// [`BlockAllocator`](crate::BlockAllocator).
///
/// A handle stands for one lifetime of a block: it is created by an
/// allocation and stays meaningful until the block's reference count drops to
/// zero. Once the block is handed out again, the old handle is stale and every
/// operation on it is rejected.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    arena: ArenaId,
    offset: u32,
    generation: u16,
}

impl Handle {
    pub(crate) fn new(arena: ArenaId, offset: u32, generation: u16) -> Self {
        Self {
            arena,
            offset,
            generation,
        }
    }

    pub(crate) fn arena(self) -> ArenaId {
        self.arena
    }

    pub(crate) fn header_offset(self) -> u32 {
        self.offset
    }

    /// Byte offset of the payload from the start of the arena.
    #[must_use]
    pub fn offset(self) -> usize {
        data_offset(self.offset) as usize
    }

    /// Byte offset of the block, header included, from the start of the
    /// arena.
    #[must_use]
    pub fn block_offset(self) -> usize {
        self.offset() - HEADER_SIZE
    }

    /// How many times the block had been handed out before this lifetime.
    #[must_use]
    pub fn generation(self) -> u16 {
        self.generation
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("arena", &self.arena.0)
            .field("offset", &self.offset())
            .field("generation", &self.generation)
            .finish()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Handle(arena={}, off={}, gen={})",
            self.arena.0,
            self.offset(),
            self.generation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_ids_are_distinct() {
        let a = ArenaId::next();
        let b = ArenaId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_offsets() {
        let handle = Handle::new(ArenaId::next(), 28, 3);
        assert_eq!(handle.block_offset(), 28);
        assert_eq!(handle.offset(), 28 + HEADER_SIZE);
        assert_eq!(handle.generation(), 3);
    }

    #[test]
    fn test_display() {
        let handle = Handle::new(ArenaId(7), 0, 1);
        assert_eq!(handle.to_string(), "Handle(arena=7, off=16, gen=1)");
    }
}
