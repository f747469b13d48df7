/// Allocation counters kept by a [`BlockAllocator`](crate::BlockAllocator).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stats {
    /// Items carved from the arena.
    pub blocks: usize,
    /// Items currently referenced.
    pub used: usize,
}

impl Stats {
    /// Items carved and waiting for reuse.
    #[must_use]
    pub fn free(&self) -> usize {
        self.blocks - self.used
    }
}
