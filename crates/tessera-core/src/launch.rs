use std::any::Any;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use rayon::prelude::*;

use crate::dtype::Accum;

// Launch machinery: work items, blocks and block-local memory on the CPU
//
// Kernels are written against two execution shapes:
//
// 1. **Grid**: one logical work item per output element, ids 0..global_size.
//    Items run on the rayon pool in no particular order. An item never
//    writes memory directly; it returns the (offset, value) pairs it would
//    store, and `scatter` applies them once the grid has finished. Every
//    offset is produced by exactly one item, so order does not matter.
//
// 2. **Workgroup**: a block of `local_size` lanes sharing a LocalMemory
//    scratch and a barrier. The lanes are carried by a small fixed group of
//    OS threads; thread `w` runs lanes w, w + workers, w + 2*workers, ...
//    between barriers. Independent blocks run in parallel on rayon.
//
//    lanes:   0 1 2 3 4 5 6 7 ...            (local_size)
//    thread:  0 1 2 3 0 1 2 3 ...            (workers = 4)
//
// Work items past the logical end of a tensor are still launched (the grid
// is rounded up to whole work groups) and are expected to do nothing.

/// Round `n` up to a multiple of `align`.
pub fn align_up(n: usize, align: usize) -> usize {
    if align == 0 {
        return n;
    }
    (n + align - 1) / align * align
}

/// Work-group size and total work-item count of one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchDims {
    pub local_size: usize,
    pub global_size: usize,
}

impl LaunchDims {
    /// `work_items` rounded up to whole groups of `local_size`.
    pub fn new(work_items: usize, local_size: usize) -> Self {
        LaunchDims {
            local_size,
            global_size: align_up(work_items, local_size),
        }
    }

    /// One group of `local_size` lanes per block.
    pub fn blocks(blocks: usize, local_size: usize) -> Self {
        LaunchDims {
            local_size,
            global_size: blocks * local_size,
        }
    }

    /// Number of work groups.
    pub fn groups(&self) -> usize {
        if self.local_size == 0 {
            0
        } else {
            self.global_size / self.local_size
        }
    }
}

/// Data-parallel launch over independent work items.
#[derive(Debug, Clone, Copy)]
pub struct Grid {
    dims: LaunchDims,
}

impl Grid {
    pub fn new(dims: LaunchDims) -> Self {
        Grid { dims }
    }

    pub fn dims(&self) -> LaunchDims {
        self.dims
    }

    /// Run `item` for every work-item id and collect what the items return.
    /// Items returning `None` contribute nothing.
    pub fn map<R, F>(&self, item: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> Option<R> + Sync + Send,
    {
        (0..self.dims.global_size)
            .into_par_iter()
            .filter_map(item)
            .collect()
    }
}

/// Apply `(offset, value)` writes produced by a grid.
pub fn scatter<T: Copy>(dst: &mut [T], writes: impl IntoIterator<Item = (usize, T)>) {
    for (offset, value) in writes {
        dst[offset] = value;
    }
}

/// Block-scoped scratch shared by the lanes of one workgroup.
///
/// Cells hold accumulator bit patterns. Ordering is relaxed: the barrier
/// between reduction rounds provides the happens-before edge.
pub struct LocalMemory<A: Accum> {
    cells: Box<[AtomicU64]>,
    _accum: PhantomData<A>,
}

impl<A: Accum> LocalMemory<A> {
    pub fn new(len: usize, init: A) -> Self {
        let bits = init.to_bits64();
        LocalMemory {
            cells: (0..len).map(|_| AtomicU64::new(bits)).collect(),
            _accum: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    pub fn get(&self, i: usize) -> A {
        A::from_bits64(self.cells[i].load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, i: usize, v: A) {
        self.cells[i].store(v.to_bits64(), Ordering::Relaxed);
    }
}

/// Unwind payload of threads released from a barrier because another
/// thread of their block panicked.
struct BlockPoisoned;

struct BarrierState {
    arrived: usize,
    generation: u64,
    poisoned: bool,
}

/// Reusable barrier that can be poisoned: once a thread of the block
/// panics, every waiter unwinds instead of blocking forever.
struct BlockBarrier {
    threads: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl BlockBarrier {
    fn new(threads: usize) -> Self {
        BlockBarrier {
            threads,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                poisoned: false,
            }),
            cvar: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait(&self) {
        let mut state = self.lock();
        if state.poisoned {
            drop(state);
            panic::resume_unwind(Box::new(BlockPoisoned));
        }
        state.arrived += 1;
        if state.arrived == self.threads {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.cvar.notify_all();
            return;
        }
        let generation = state.generation;
        while state.generation == generation && !state.poisoned {
            state = self.cvar.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        let released = state.generation != generation;
        drop(state);
        if !released {
            panic::resume_unwind(Box::new(BlockPoisoned));
        }
    }

    fn poison(&self) {
        self.lock().poisoned = true;
        self.cvar.notify_all();
    }
}

/// The view one OS thread has of its block.
pub struct Lanes<'a> {
    worker: usize,
    workers: usize,
    local_size: usize,
    barrier: &'a BlockBarrier,
}

impl<'a> Lanes<'a> {
    /// Run `f` for every lane id this thread carries.
    #[inline]
    pub fn for_each(&self, mut f: impl FnMut(usize)) {
        let mut lid = self.worker;
        while lid < self.local_size {
            f(lid);
            lid += self.workers;
        }
    }

    /// Wait until every thread of the block reaches this point.
    pub fn barrier(&self) {
        self.barrier.wait();
    }

    /// The thread carrying lane 0.
    pub fn is_leader(&self) -> bool {
        self.worker == 0
    }

    pub fn local_size(&self) -> usize {
        self.local_size
    }
}

/// A fixed-size group of threads emulating one block of lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workgroup {
    local_size: usize,
    workers: usize,
}

impl Workgroup {
    /// `workers` is clamped to `1..=local_size`.
    pub fn new(local_size: usize, workers: usize) -> Self {
        Workgroup {
            local_size,
            workers: workers.clamp(1, local_size.max(1)),
        }
    }

    pub fn local_size(&self) -> usize {
        self.local_size
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run one block. Every thread executes `body`; the leader's return
    /// value is the block's result.
    ///
    /// A panic on any thread poisons the block barrier, so the other threads
    /// unwind at their next barrier. The first real panic is re-raised on
    /// the calling thread.
    pub fn run<R, F>(&self, body: F) -> R
    where
        R: Send,
        F: Fn(&Lanes<'_>) -> R + Sync,
    {
        let barrier = BlockBarrier::new(self.workers);
        let lanes = |worker| Lanes {
            worker,
            workers: self.workers,
            local_size: self.local_size,
            barrier: &barrier,
        };
        if self.workers == 1 {
            return body(&lanes(0));
        }
        let guarded = |worker| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&lanes(worker))));
            if outcome.is_err() {
                barrier.poison();
            }
            outcome
        };
        std::thread::scope(|s| {
            let handles: Vec<_> = (1..self.workers)
                .map(|w| {
                    let guarded = &guarded;
                    s.spawn(move || guarded(w).map(drop))
                })
                .collect();
            let mut outcome = guarded(0);
            for h in handles {
                let payload = match h.join() {
                    Ok(Ok(())) => continue,
                    Ok(Err(payload)) | Err(payload) => payload,
                };
                outcome = match outcome {
                    Ok(_) => Err(payload),
                    Err(first) if first.is::<BlockPoisoned>() && !payload.is::<BlockPoisoned>() => {
                        Err(payload)
                    }
                    keep => keep,
                };
            }
            outcome.unwrap_or_else(|payload: Box<dyn Any + Send>| panic::resume_unwind(payload))
        })
    }

    /// Run `blocks` independent blocks in parallel, collecting each block's
    /// result in block order. `local` builds the block-shared scratch once
    /// per block; every thread of the block sees the same instance.
    pub fn launch<S, R, I, F>(&self, blocks: usize, local: I, body: F) -> Vec<R>
    where
        S: Sync,
        R: Send,
        I: Fn() -> S + Sync + Send,
        F: Fn(usize, &S, &Lanes<'_>) -> R + Sync + Send,
    {
        (0..blocks)
            .into_par_iter()
            .map(|block| {
                let scratch = local();
                self.run(|lanes| body(block, &scratch, lanes))
            })
            .collect()
    }
}
