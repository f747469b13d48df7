#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]
#![cfg(test)]

use block_allocator::{BlockAllocator, HEADER_SIZE, Handle};
use proptest::prelude::*;

const ARENA_SIZE: usize = 512;

#[derive(Debug, Clone)]
enum Op {
    Alloc(usize),
    Retain(usize),
    Free(usize),
    RobustFree(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0_usize..24).prop_map(Op::Alloc),
        1 => any::<usize>().prop_map(Op::Retain),
        3 => any::<usize>().prop_map(Op::Free),
        1 => any::<usize>().prop_map(Op::RobustFree),
    ]
}

#[derive(Debug)]
struct ModelItem {
    offset: usize,
    size: usize,
    refcount: usize,
    generation: u16,
}

/// Items in carve order, plus the untouched tail of the arena.
#[derive(Debug)]
struct Model {
    items: Vec<ModelItem>,
    remaining: usize,
}

impl Model {
    fn new(size: usize) -> Self {
        Self {
            items: vec![],
            remaining: size,
        }
    }

    fn alloc(&mut self, size: usize) -> Option<usize> {
        if let Some(index) = self
            .items
            .iter()
            .rposition(|item| item.refcount == 0 && item.size == size)
        {
            let item = &mut self.items[index];
            item.refcount = 1;
            item.generation = item.generation.wrapping_add(1);
            return Some(index);
        }

        let need = (HEADER_SIZE + size).next_multiple_of(4);
        if need > self.remaining {
            return None;
        }
        self.items.push(ModelItem {
            offset: ARENA_SIZE - self.remaining,
            size,
            refcount: 1,
            generation: 0,
        });
        self.remaining -= need;
        Some(self.items.len() - 1)
    }

    fn free_count(&self) -> usize {
        self.items.iter().filter(|item| item.refcount == 0).count()
    }
}

proptest! {
    #[test]
    fn matches_reference_model(ops in proptest::collection::vec(arb_op(), 1..200)) {
        let mut storage = vec![0_u8; ARENA_SIZE];
        let allocator = BlockAllocator::from_storage(&mut storage).unwrap();
        let mut model = Model::new(ARENA_SIZE);

        // one entry per outstanding reference
        let mut refs: Vec<(Handle, usize)> = vec![];
        let mut issued: Vec<(Handle, usize)> = vec![];

        for op in ops {
            match op {
                Op::Alloc(size) => {
                    let handle = allocator.alloc(size);
                    let expected = model.alloc(size);
                    prop_assert_eq!(handle.is_some(), expected.is_some());
                    if let (Some(handle), Some(index)) = (handle, expected) {
                        let item = &model.items[index];
                        prop_assert_eq!(handle.block_offset(), item.offset);
                        prop_assert_eq!(handle.generation(), item.generation);
                        refs.push((handle, index));
                        issued.push((handle, index));
                    }
                }
                Op::Retain(pick) => {
                    if refs.is_empty() {
                        continue;
                    }
                    let (handle, index) = refs[pick % refs.len()];
                    prop_assert_eq!(allocator.retain(handle), Some(handle));
                    model.items[index].refcount += 1;
                    refs.push((handle, index));
                }
                Op::Free(pick) => {
                    if refs.is_empty() {
                        continue;
                    }
                    let (handle, index) = refs.swap_remove(pick % refs.len());
                    model.items[index].refcount -= 1;
                    let expected = (model.items[index].refcount > 0).then_some(handle);
                    prop_assert_eq!(allocator.free(handle), expected);
                }
                Op::RobustFree(pick) => {
                    if issued.is_empty() {
                        continue;
                    }
                    let (handle, index) = issued[pick % issued.len()];
                    let item = &model.items[index];
                    let released = item.generation == handle.generation() && item.refcount == 0;
                    prop_assert_eq!(
                        allocator.robust_free(handle),
                        (!released).then_some(handle)
                    );
                }
            }

            prop_assert_eq!(allocator.len(), model.items.len());
            prop_assert_eq!(allocator.remaining(), model.remaining);
        }

        prop_assert_eq!(allocator.clean(), model.free_count());
        #[cfg(feature = "stats")]
        {
            let stats = allocator.stats();
            prop_assert_eq!(stats.blocks, model.items.len());
            prop_assert_eq!(stats.free(), model.free_count());
        }
    }
}
