#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]
#![cfg(test)]

use std::thread;

use block_allocator::{BlockAllocator, BlockAllocatorGuard, CallingContext, HEADER_SIZE, Handle};
use os_sync::{Mutex, SysLock};

const WORKERS: usize = 4;
const DEPTH: usize = 8;
const ROUNDS: usize = 200;

fn worker_size(worker: usize) -> usize {
    8 + 4 * worker
}

fn carved_size(size: usize) -> usize {
    (HEADER_SIZE + size).next_multiple_of(4)
}

fn tag(worker: usize) -> u8 {
    u8::try_from(worker).unwrap() + 1
}

fn fill(guard: &mut BlockAllocatorGuard<'_, '_, Mutex>, handle: Handle, worker: usize) {
    guard
        .with_data(handle, |data| data.fill(tag(worker)))
        .unwrap();
}

fn check(guard: &mut BlockAllocatorGuard<'_, '_, Mutex>, handle: Handle, worker: usize) {
    let intact = guard
        .with_data(handle, |data| data.iter().all(|&b| b == tag(worker)))
        .unwrap();
    assert!(intact, "block {handle} was handed to another worker");
}

/// Each worker keeps up to `DEPTH` blocks of its own size alive at a time.
fn run_worker(allocator: &BlockAllocator<'_>, worker: usize, context: CallingContext) {
    let size = worker_size(worker);
    let mut held = Vec::with_capacity(DEPTH);

    for round in 0..ROUNDS {
        let _scope = context.is_serialized().then(SysLock::scope);
        let mut guard = allocator.lock(context);

        if held.len() < DEPTH && round % 3 != 2 {
            let handle = guard.alloc(size).expect("arena is sized for the workload");
            fill(&mut guard, handle, worker);
            held.push(handle);
        } else if let Some(handle) = held.pop() {
            check(&mut guard, handle, worker);
            assert_eq!(guard.retain(handle), Some(handle));
            assert_eq!(guard.free(handle), Some(handle));
            assert_eq!(guard.free(handle), None);
        }
    }

    for handle in held.drain(..) {
        let mut guard = allocator.lock(CallingContext::Normal);
        check(&mut guard, handle, worker);
        assert_eq!(guard.free(handle), None);
    }
}

fn run_sequential(storage: &mut [u8], workers: usize) -> (usize, usize) {
    let allocator = BlockAllocator::from_storage(storage).unwrap();
    for worker in 0..workers {
        run_worker(&allocator, worker, CallingContext::Normal);
    }
    (allocator.len(), allocator.remaining())
}

#[test]
fn concurrent_matches_sequential() {
    let mut sequential = vec![0_u8; 4096];
    let expected = run_sequential(&mut sequential, WORKERS);

    let mut storage = vec![0_u8; 4096];
    let allocator = BlockAllocator::from_storage(&mut storage).unwrap();
    thread::scope(|s| {
        for worker in 0..WORKERS {
            let allocator = &allocator;
            s.spawn(move || run_worker(allocator, worker, CallingContext::Normal));
        }
    });

    assert_eq!((allocator.len(), allocator.remaining()), expected);
    assert_eq!(allocator.len(), WORKERS * DEPTH);
    let carved: usize = (0..WORKERS)
        .map(|worker| DEPTH * carved_size(worker_size(worker)))
        .sum();
    assert_eq!(allocator.remaining(), 4096 - carved);
    assert_eq!(allocator.clean(), WORKERS * DEPTH);
}

#[test]
fn syslock_and_normal_contexts_interleave() {
    let mut storage = vec![0_u8; 4096];
    let allocator = BlockAllocator::from_storage(&mut storage).unwrap();

    thread::scope(|s| {
        for worker in 0..WORKERS {
            let allocator = &allocator;
            let context = if worker % 2 == 0 {
                CallingContext::Normal
            } else {
                CallingContext::SysLock
            };
            s.spawn(move || run_worker(allocator, worker, context));
        }
    });

    assert_eq!(allocator.len(), WORKERS * DEPTH);
    assert_eq!(allocator.clean(), WORKERS * DEPTH);
}

#[test]
fn exhaustion_under_contention() {
    let per_block = carved_size(8);
    let mut storage = vec![0_u8; per_block * 10];
    let allocator = BlockAllocator::from_storage(&mut storage).unwrap();

    let granted: Vec<Vec<Handle>> = thread::scope(|s| {
        let workers: Vec<_> = (0..WORKERS)
            .map(|_| {
                let allocator = &allocator;
                s.spawn(move || (0..10).map_while(|_| allocator.alloc(8)).collect())
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let total: usize = granted.iter().map(Vec::len).sum();
    assert_eq!(total, 10);
    assert_eq!(allocator.len(), 10);
    assert_eq!(allocator.remaining(), 0);

    let mut offsets: Vec<_> = granted.iter().flatten().map(|h| h.offset()).collect();
    offsets.sort_unstable();
    offsets.dedup();
    assert_eq!(offsets.len(), 10);
}
