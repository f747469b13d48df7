//! A fixed-arena block allocator for reference-counted objects.
//!
//! [`BlockAllocator`] carves blocks out of one caller-supplied storage region
//! and never allocates anything itself, which makes it usable where there is
//! no heap. Blocks are reference counted; once the last reference is dropped
//! a block is kept on the allocator's item list and handed out again to the
//! next request of exactly the same size.
//!
//! # Algorithm
//!
//! - **Item list**: every carved block starts with a 16-byte header linking
//!   it to the block carved before it. The list only grows.
//! - **Allocation**: the list is scanned from the most recently carved block
//!   for a free block of exactly the requested size. If there is none, a new
//!   block of `HEADER_SIZE + size` bytes, rounded up to a multiple of
//!   [`ALIGN`], is carved from the untouched tail of the arena.
//! - **Release**: dropping the last reference marks the block free. The
//!   bytes are never returned to the arena; there is no splitting,
//!   coalescing or compaction.
//!
//! ```text
//! Arena:
//! ┌────────┬──────────┬────────┬────────────────┬────────┬─────┬──────────────┐
//! │ Header │ data(10) │ Header │    data(20)    │ Header │ ... │  untouched   │
//! └────────┴──────────┴────────┴────────────────┴────────┴─────┴──────────────┘
//!      ▲                  │ ▲                        │          ▲
//!      └──── next ────────┘ └──────── next ──────────┘          bump cursor
//! ```
//!
//! # Usage Examples
//!
//! ```rust
//! use block_allocator::BlockAllocator;
//!
//! let mut storage = [0_u8; 64];
//! let allocator = BlockAllocator::from_storage(&mut storage).unwrap();
//!
//! let first = allocator.alloc(10).unwrap();
//! let second = allocator.alloc(20).unwrap();
//!
//! // dropping the only reference releases the block
//! assert_eq!(allocator.free(first), None);
//!
//! // a request of the same size gets the released block back
//! let again = allocator.alloc(10).unwrap();
//! assert_eq!(again.offset(), first.offset());
//!
//! // the arena is full and no free block has 100 bytes
//! assert_eq!(allocator.alloc(100), None);
//! # let _ = second;
//! ```
//!
//! ## System-locked context
//!
//! Every operation is also available through a guard obtained with
//! [`BlockAllocator::lock`], which takes the [`CallingContext`] the caller
//! runs in:
//!
//! ```rust
//! use block_allocator::{BlockAllocator, CallingContext};
//! use os_sync::SysLock;
//!
//! let mut storage = [0_u8; 64];
//! let allocator = BlockAllocator::from_storage(&mut storage).unwrap();
//!
//! let _scope = SysLock::scope();
//! let mut guard = allocator.lock(CallingContext::SysLock);
//! let handle = guard.alloc(8).unwrap();
//! assert_eq!(guard.free(handle), None);
//! ```
//!
//! # Design Considerations
//!
//! ## Handles
//!
//! Allocations are identified by [`Handle`]s rather than addresses. A handle
//! names the arena binding, the block and the block's lifetime, so handles
//! that are stale (the block was released and handed out again) or foreign
//! (from another allocator) are recognised and rejected. The payload is
//! reached through [`BlockAllocatorGuard::with_data`] or, for callers that
//! need a raw pointer, [`BlockAllocatorGuard::data_ptr`].
//!
//! ## Failure Handling
//!
//! | Condition | Reported as |
//! |-----------|-------------|
//! | Arena exhausted | `alloc` returns `None` |
//! | Stale or foreign handle | `retain` returns `None`, `free`/`robust_free` return the handle |
//! | Double free | panic |
//! | Zero initial reference count | not representable (`NonZeroU8`) |
//!
//! ## Performance Characteristics
//!
//! - Allocation: O(n) in the number of carved blocks when scanning for reuse,
//!   O(1) to carve.
//! - `retain`/`free`: O(1).
//! - `robust_free`/`clean`: O(n).
//! - Memory overhead: [`HEADER_SIZE`] bytes per block plus up to 3 bytes of
//!   padding.
//!
//! # Features
//!
//! - `stats` (default): keeps the counters returned by
//!   [`BlockAllocator::stats`].

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub use os_sync::CallingContext;

#[cfg(feature = "stats")]
pub use self::stats::Stats;
pub use self::{
    allocator::{BlockAllocator, BlockAllocatorGuard},
    arena::ALIGN,
    error::InitError,
    handle::Handle,
    item::{HEADER_SIZE, ItemState, MAX_BLOCK_SIZE},
};

mod allocator;
mod arena;
mod error;
mod handle;
mod item;
#[cfg(feature = "stats")]
mod stats;
