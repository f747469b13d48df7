//! Item headers.
//!
//! Every block carved from the arena starts with a [`Header`], stored in the
//! arena itself right before the payload:
//!
//! ```text
//! ┌────────────────────────────── Header (16 bytes) ──────────────────────────────┬─────────────┐
//! │ size: u16 │ refcount: u8 │ reserved: u8 │ generation: u16 │ magic: u16 │ next: u32 │ data: u32 │ payload ... │
//! └───────────────────────────────────────────────────────────────────────────────┴─────────────┘
//! ```
//!
//! `next` and `data` are byte offsets from the start of the arena. `next`
//! links to the item carved before this one, so walking the links from the
//! most recent item visits the items newest first.

use core::num::NonZeroU8;

use dataview::Pod;

use crate::arena::ALIGN;

/// Size of the header in front of every payload.
pub const HEADER_SIZE: usize = size_of::<Header>();
const _: () = assert!(HEADER_SIZE % ALIGN == 0);

/// Largest payload a single block can hold.
pub const MAX_BLOCK_SIZE: usize = u16::MAX as usize;

const HEADER_MAGIC: u16 = 0xb10c;
const NO_ITEM: u32 = u32::MAX;

/// Lifecycle state of a carved item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::IsVariant)]
pub enum ItemState {
    /// Not referenced; reusable by a request of the same size.
    Free,
    /// Referenced the given number of times.
    InUse(NonZeroU8),
}

#[derive(Debug, Clone, Copy, Pod)]
#[repr(C)]
pub(crate) struct Header {
    size: u16,
    refcount: u8,
    reserved: u8,
    generation: u16,
    magic: u16,
    next: u32,
    data: u32,
}
const _: () = assert!(size_of::<Header>() == 16);

impl Header {
    pub(crate) fn new(offset: u32, size: u16, refcount: NonZeroU8, next: Option<u32>) -> Self {
        Self {
            size,
            refcount: refcount.get(),
            reserved: 0,
            generation: 0,
            magic: HEADER_MAGIC,
            next: next.unwrap_or(NO_ITEM),
            data: data_offset(offset),
        }
    }

    pub(crate) fn size(&self) -> u16 {
        self.size
    }

    pub(crate) fn generation(&self) -> u16 {
        self.generation
    }

    pub(crate) fn next(&self) -> Option<u32> {
        (self.next != NO_ITEM).then_some(self.next)
    }

    pub(crate) fn data(&self) -> u32 {
        self.data
    }

    pub(crate) fn state(&self) -> ItemState {
        NonZeroU8::new(self.refcount).map_or(ItemState::Free, ItemState::InUse)
    }

    pub(crate) fn set_state(&mut self, state: ItemState) {
        self.refcount = match state {
            ItemState::Free => 0,
            ItemState::InUse(count) => count.get(),
        };
    }

    /// Hands a free item to a new owner.
    ///
    /// The generation moves on so that handles from the previous lifetime no
    /// longer match.
    pub(crate) fn reactivate(&mut self, refcount: NonZeroU8) {
        assert!(self.state().is_free(), "reactivating an item in use");
        self.generation = self.generation.wrapping_add(1);
        self.set_state(ItemState::InUse(refcount));
    }

    /// Returns `true` if this header is the one carved at `offset`.
    pub(crate) fn is_valid_at(&self, offset: u32) -> bool {
        self.magic == HEADER_MAGIC && self.data == data_offset(offset)
    }
}

#[expect(clippy::cast_possible_truncation)]
pub(crate) const fn data_offset(offset: u32) -> u32 {
    offset + HEADER_SIZE as u32
}
