use rayon::prelude::*;
use tessera_core::{Accum, KernelConfig, Lanes, LaunchDims, LocalMemory, Result, Workgroup};

// Sum reduction: block trees, two-phase row sums and the iterative loss-sum
//
// Three layers build on each other:
//
// 1. `tree_reduce` folds a block's LocalMemory in place. Each round halves
//    the number of active lanes; a barrier separates rounds so no lane reads
//    a cell another lane is still writing. Lane 0 ends up with the result.
//
//        round 1:  m[i] = op(m[i], m[i + 4])   i < 4
//        round 2:  m[i] = op(m[i], m[i + 2])   i < 2
//        round 3:  m[0] = op(m[0], m[1])
//
// 2. Row sums over a contiguous [output_numel, reduce_size] matrix. When
//    there are few rows but each is long, phase 1 splits every row into P
//    interleaved partial sums so the machine is kept busy, and phase 2 folds
//    the P partials. Otherwise phase 2 runs directly over the row.
//
// 3. `reduce_to_scalar` ("loss-sum") folds a whole vector to one value:
//    each pass reduces blocks of `reduce_local_size` elements to one partial
//    per block, ping-ponging between two scratch regions until one block
//    remains.

/// Fold `mem[0..lanes.local_size()]` with `op`; the result lands in `mem[0]`.
/// `local_size` must be a power of two. Ends with a barrier, so every thread
/// may read `mem.get(0)` afterwards.
pub fn tree_reduce<A: Accum>(lanes: &Lanes<'_>, mem: &LocalMemory<A>, op: impl Fn(A, A) -> A) {
    let mut active = lanes.local_size() >> 1;
    while active > 0 {
        lanes.for_each(|lid| {
            if lid < active {
                mem.set(lid, op(mem.get(lid), mem.get(lid + active)));
            }
        });
        lanes.barrier();
        active >>= 1;
    }
}

/// Work items needed to keep every compute unit busy.
pub fn required_work_items(cfg: &KernelConfig) -> usize {
    cfg.reduce_local_size * cfg.compute_units * 4
}

/// Whether splitting rows into partial sums pays off: the rows alone do not
/// fill the machine but their elements do.
pub fn is_parallelism(reqd_work_items: usize, output_numel: usize, reduce_size: usize) -> bool {
    output_numel <= reqd_work_items && output_numel * reduce_size > reqd_work_items
}

/// Number of partial sums per row: the smallest power of two that fills the
/// machine, capped near `sqrt(reduce_size)`.
pub fn parallelism_size(reqd_work_items: usize, output_numel: usize, reduce_size: usize) -> usize {
    let cap = (reduce_size as f64).sqrt();
    let mut p = 1usize;
    while p * output_numel < reqd_work_items && (p as f64) < cap {
        p *= 2;
    }
    p
}

/// Reduction strategy for a contiguous `[output_numel, reduce_size]` matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SumPlan {
    pub output_numel: usize,
    pub reduce_size: usize,
    /// Partial sums per row, when phase 1 runs.
    pub parallelism: Option<usize>,
}

impl SumPlan {
    pub fn new(cfg: &KernelConfig, output_numel: usize, reduce_size: usize) -> Self {
        let reqd = required_work_items(cfg);
        let parallelism = if is_parallelism(reqd, output_numel, reduce_size) {
            Some(parallelism_size(reqd, output_numel, reduce_size))
        } else {
            None
        };
        SumPlan {
            output_numel,
            reduce_size,
            parallelism,
        }
    }

    /// Scratch elements the plan writes besides its input: the partials when
    /// phase 1 runs, otherwise the row sums themselves.
    pub fn scratch_len(&self) -> usize {
        self.parallelism.unwrap_or(1) * self.output_numel
    }

    /// Launches in execution order.
    pub fn launches(&self, cfg: &KernelConfig) -> Vec<LaunchDims> {
        let ls = cfg.reduce_local_size;
        let mut dims = Vec::with_capacity(2);
        if let Some(p) = self.parallelism {
            dims.push(LaunchDims::new(p * self.output_numel, ls));
        }
        dims.push(LaunchDims::blocks(self.output_numel, ls));
        dims
    }
}

/// Where a plan left its row sums.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SumTarget {
    /// Overwrote the front of the input region.
    Input,
    /// In the front of the scratch region.
    Scratch,
}

/// Phase 1: `y[o * P + p] = Σ x[o * R + r]` for `r ≡ p (mod P)`.
fn sum_partials<A: Accum>(
    cfg: &KernelConfig,
    x: &[A],
    y: &mut [A],
    output_numel: usize,
    reduce_size: usize,
    parallelism: usize,
) {
    let work_items = output_numel * parallelism;
    tracing::debug!(
        kernel = "sum_partials",
        work_items,
        local_size = cfg.reduce_local_size,
        parallelism,
        "launch"
    );
    let partials: Vec<A> = (0..work_items)
        .into_par_iter()
        .map(|gid| {
            let o = gid / parallelism;
            let p = gid % parallelism;
            let row = &x[o * reduce_size..(o + 1) * reduce_size];
            let mut sum = A::zero();
            let mut r = p;
            while r < reduce_size {
                sum = sum + row[r];
                r += parallelism;
            }
            sum
        })
        .collect();
    y[..work_items].copy_from_slice(&partials);
}

/// Phase 2: one block per row, `y[o] = Σ_r x[o * R + r]` via a block tree.
fn sum_rows<A: Accum>(
    cfg: &KernelConfig,
    x: &[A],
    y: &mut [A],
    output_numel: usize,
    reduce_size: usize,
) {
    let ls = cfg.reduce_local_size;
    tracing::debug!(
        kernel = "sum_rows",
        blocks = output_numel,
        local_size = ls,
        reduce_size,
        "launch"
    );
    let wg = Workgroup::new(ls, cfg.workers);
    let sums = wg.launch(
        output_numel,
        || LocalMemory::new(ls, A::zero()),
        |row, mem, lanes| {
            let base = row * reduce_size;
            lanes.for_each(|lid| {
                let mut acc = A::zero();
                let mut r = lid;
                while r < reduce_size {
                    acc = acc + x[base + r];
                    r += ls;
                }
                mem.set(lid, acc);
            });
            lanes.barrier();
            tree_reduce(lanes, mem, |a, b| a + b);
            mem.get(0)
        },
    );
    y[..output_numel].copy_from_slice(&sums);
}

/// Execute `plan` over `data[..output_numel * reduce_size]`. Phase 1, when
/// it runs, writes partials to `scratch` and the row sums back over `data`;
/// otherwise the row sums go straight to `scratch`.
pub fn run_sum_plan<A: Accum>(
    cfg: &KernelConfig,
    plan: &SumPlan,
    data: &mut [A],
    scratch: &mut [A],
) -> Result<SumTarget> {
    cfg.validate()?;
    Ok(match plan.parallelism {
        Some(p) => {
            sum_partials(cfg, data, scratch, plan.output_numel, plan.reduce_size, p);
            sum_rows(cfg, scratch, data, plan.output_numel, p);
            SumTarget::Input
        }
        None => {
            sum_rows(cfg, data, scratch, plan.output_numel, plan.reduce_size);
            SumTarget::Scratch
        }
    })
}

/// One loss-sum pass: block `b` writes `Σ x[b*ls .. (b+1)*ls]` to `y[b]`.
/// Returns the number of partials written.
fn loss_sum_pass<A: Accum>(cfg: &KernelConfig, x: &[A], y: &mut [A]) -> usize {
    let ls = cfg.reduce_local_size;
    let size = x.len();
    let blocks = (size + ls - 1) / ls;
    tracing::debug!(kernel = "loss_sum", size, blocks, local_size = ls, "launch");
    let wg = Workgroup::new(ls, cfg.workers);
    let partials = wg.launch(
        blocks,
        || LocalMemory::new(ls, A::zero()),
        |block, mem, lanes| {
            lanes.for_each(|lid| {
                let gid = block * ls + lid;
                if gid < size {
                    mem.set(lid, x[gid]);
                }
            });
            lanes.barrier();
            tree_reduce(lanes, mem, |a, b| a + b);
            mem.get(0)
        },
    );
    y[..blocks].copy_from_slice(&partials);
    blocks
}

/// Number of loss-sum passes needed to fold `size` elements. Block sizes
/// below 2 never shrink the input and count as one pass.
pub fn loss_sum_passes(size: usize, local_size: usize) -> usize {
    if local_size < 2 {
        return 1;
    }
    let mut passes = 0;
    let mut size = size;
    loop {
        passes += 1;
        size = (size + local_size - 1) / local_size;
        if size <= 1 {
            return passes;
        }
    }
}

/// Fold `src[..size]` to a single value, ping-ponging with `scratch`.
/// `scratch` must hold `ceil(size / reduce_local_size)` elements. Both
/// regions are clobbered.
pub fn reduce_to_scalar<A: Accum>(
    cfg: &KernelConfig,
    src: &mut [A],
    scratch: &mut [A],
    size: usize,
) -> Result<A> {
    cfg.validate()?;
    if size == 0 {
        return Ok(A::zero());
    }
    let mut work_a: &mut [A] = src;
    let mut work_b: &mut [A] = scratch;
    let mut size = size;
    loop {
        let blocks = loss_sum_pass(cfg, &work_a[..size], work_b);
        if blocks == 1 {
            return Ok(work_b[0]);
        }
        std::mem::swap(&mut work_a, &mut work_b);
        size = blocks;
    }
}
