//! Arena storage and bump carving.

use core::{marker::PhantomData, ptr::NonNull, slice};

use dataview::DataView;
use snafu::ensure;

use crate::{
    error::{ArenaTooLargeSnafu, EmptyArenaSnafu, InitError},
    handle::ArenaId,
    item::{HEADER_SIZE, Header},
};

/// Granularity of every carve.
pub const ALIGN: usize = 4;

/// Rounds `size` up to the next multiple of [`ALIGN`].
///
/// Returns `None` on overflow.
pub(crate) const fn align_up(size: usize) -> Option<usize> {
    match size.checked_add(ALIGN - 1) {
        Some(size) => Some(size & !(ALIGN - 1)),
        None => None,
    }
}

/// The storage region blocks are carved from.
///
/// The region is consumed from the front. The bump cursor only ever moves
/// forward, and bytes behind it are never handed back.
pub(crate) struct Arena<'a> {
    id: ArenaId,
    base: NonNull<u8>,
    size: usize,
    free: usize,
    _storage: PhantomData<&'a mut [u8]>,
}

impl<'a> Arena<'a> {
    #[track_caller]
    pub(crate) fn new(storage: &'a mut [u8]) -> Result<Self, InitError> {
        let size = storage.len();
        ensure!(size > 0, EmptyArenaSnafu);
        ensure!(
            u32::try_from(size).is_ok(),
            ArenaTooLargeSnafu {
                size,
                max: u32::MAX as usize,
            }
        );

        Ok(Self {
            id: ArenaId::next(),
            base: NonNull::from(storage).cast(),
            size,
            free: size,
            _storage: PhantomData,
        })
    }

    pub(crate) fn id(&self) -> ArenaId {
        self.id
    }

    /// Total size of the arena in bytes.
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Bytes not yet carved.
    pub(crate) fn free(&self) -> usize {
        self.free
    }

    /// Offset of the first byte not yet carved.
    pub(crate) fn cursor(&self) -> usize {
        self.size - self.free
    }

    /// Claims `len` bytes, rounded up to [`ALIGN`], from the untouched tail.
    ///
    /// Returns the offset of the claimed region, or `None` without touching
    /// the arena if not enough bytes remain.
    pub(crate) fn carve(&mut self, len: usize) -> Option<u32> {
        let len = align_up(len)?;
        if self.free < len {
            return None;
        }
        let offset = u32::try_from(self.cursor()).ok()?;
        self.free -= len;
        Some(offset)
    }

    fn is_carved_header(&self, offset: u32) -> bool {
        let offset = offset as usize;
        offset.is_multiple_of(ALIGN)
            && offset
                .checked_add(HEADER_SIZE)
                .is_some_and(|end| end <= self.cursor())
    }

    /// Reads the header at `offset`, if `offset` lies in the carved region.
    pub(crate) fn try_read_header(&self, offset: u32) -> Option<Header> {
        if !self.is_carved_header(offset) {
            return None;
        }
        let bytes = unsafe {
            slice::from_raw_parts(self.base.as_ptr().add(offset as usize), HEADER_SIZE)
        };
        Some(DataView::from(bytes).read(0))
    }

    /// Reads the header at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` does not lie in the carved region.
    pub(crate) fn read_header(&self, offset: u32) -> Header {
        self.try_read_header(offset)
            .unwrap_or_else(|| panic!("no header carved at offset {offset}"))
    }

    /// Writes the header at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` does not lie in the carved region.
    pub(crate) fn write_header(&mut self, offset: u32, header: &Header) {
        assert!(
            self.is_carved_header(offset),
            "no header carved at offset {offset}"
        );
        let bytes = unsafe {
            slice::from_raw_parts_mut(self.base.as_ptr().add(offset as usize), HEADER_SIZE)
        };
        DataView::from_mut(bytes).write(0, header);
    }

    /// Pointer to the payload described by `header`.
    pub(crate) fn data_ptr(&self, header: &Header) -> NonNull<[u8]> {
        let data = unsafe { self.base.add(header.data() as usize) };
        NonNull::slice_from_raw_parts(data, usize::from(header.size()))
    }

    /// The payload described by `header`.
    pub(crate) fn data_mut(&mut self, header: &Header) -> &mut [u8] {
        let data = self.data_ptr(header);
        unsafe { &mut *data.as_ptr() }
    }

    /// Walks the item list starting at `head`.
    pub(crate) fn items(&self, head: Option<u32>) -> Items<'_, 'a> {
        Items { arena: self, next: head }
    }
}

/// Iterator over `(offset, header)` pairs of a linked item list.
pub(crate) struct Items<'s, 'a> {
    arena: &'s Arena<'a>,
    next: Option<u32>,
}

impl Iterator for Items<'_, '_> {
    type Item = (u32, Header);

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.next?;
        let header = self.arena.read_header(offset);
        self.next = header.next();
        Some((offset, header))
    }
}

#[cfg(test)]
mod tests {
    use core::num::NonZeroU8;

    use super::*;
    use crate::item::ItemState;

    fn with_test_arena<F>(size: usize, test_fn: F)
    where
        F: FnOnce(&mut Arena<'_>),
    {
        let mut storage = vec![0x11_u8; size];
        let mut arena = Arena::new(&mut storage).unwrap();
        test_fn(&mut arena);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0), Some(0));
        assert_eq!(align_up(1), Some(4));
        assert_eq!(align_up(4), Some(4));
        assert_eq!(align_up(26), Some(28));
        assert_eq!(align_up(usize::MAX), None);
    }

    #[test]
    fn test_empty_storage() {
        let mut storage: [u8; 0] = [];
        assert!(matches!(
            Arena::new(&mut storage),
            Err(InitError::EmptyArena { .. })
        ));
    }

    #[test]
    fn test_carve_advances_cursor() {
        with_test_arena(64, |arena| {
            assert_eq!(arena.carve(26), Some(0));
            assert_eq!(arena.cursor(), 28);
            assert_eq!(arena.carve(36), Some(28));
            assert_eq!(arena.cursor(), 64);
            assert_eq!(arena.free(), 0);
            assert_eq!(arena.size(), 64);
        });
    }

    #[test]
    fn test_carve_exhausted_leaves_arena_untouched() {
        with_test_arena(32, |arena| {
            assert_eq!(arena.carve(20), Some(0));
            assert_eq!(arena.carve(13), None);
            assert_eq!(arena.free(), 12);
            assert_eq!(arena.cursor(), 20);
            assert_eq!(arena.carve(12), Some(20));
            assert_eq!(arena.free(), 0);
        });
    }

    #[test]
    fn test_header_roundtrip_at_unaligned_base() {
        let mut storage = vec![0_u8; 65];
        let mut arena = Arena::new(&mut storage[1..]).unwrap();
        let offset = arena.carve(HEADER_SIZE + 8).unwrap();
        let header = Header::new(offset, 8, NonZeroU8::MIN, None);
        arena.write_header(offset, &header);

        let read = arena.read_header(offset);
        assert!(read.is_valid_at(offset));
        assert_eq!(read.size(), 8);
        assert_eq!(read.state(), ItemState::InUse(NonZeroU8::MIN));
    }

    #[test]
    fn test_uncarved_header_is_rejected() {
        with_test_arena(64, |arena| {
            assert!(arena.try_read_header(0).is_none());
            let offset = arena.carve(HEADER_SIZE).unwrap();
            assert!(arena.try_read_header(offset).is_some());
            assert!(arena.try_read_header(offset + 1).is_none());
            assert!(arena.try_read_header(u32::MAX).is_none());
        });
    }

    #[test]
    fn test_data_does_not_overlap_header() {
        with_test_arena(64, |arena| {
            let offset = arena.carve(HEADER_SIZE + 4).unwrap();
            let header = Header::new(offset, 4, NonZeroU8::MIN, None);
            arena.write_header(offset, &header);

            arena.data_mut(&header).fill(0xff);
            let read = arena.read_header(offset);
            assert!(read.is_valid_at(offset));
            assert_eq!(arena.data_mut(&header), &[0xff; 4]);
        });
    }

    #[test]
    fn test_items_walk_newest_first() {
        with_test_arena(128, |arena| {
            let mut head = None;
            for size in [4_u16, 8, 12] {
                let offset = arena.carve(HEADER_SIZE + usize::from(size)).unwrap();
                arena.write_header(offset, &Header::new(offset, size, NonZeroU8::MIN, head));
                head = Some(offset);
            }

            let sizes: Vec<_> = arena.items(head).map(|(_, h)| h.size()).collect();
            assert_eq!(sizes, [12, 8, 4]);
        });
    }
}
