use num_traits::{Float, Zero};
use tessera_core::{Accum, Element, Error, KernelConfig, Lanes, LocalMemory, Result, Tensor, Workgroup};

use crate::problem::{SoftmaxCeBackwardProblem, SoftmaxCeForwardProblem};
use crate::reduce::tree_reduce;

// Softmax cross-entropy with logits over contiguous [batch, num_class] rows
//
// One block per row. The forward computes a stable log-sum-exp with two
// tree reductions (max, then Σ exp(x - max)) and a third tree for the loss,
// and caches `softmax(x) - target` as the backprop term. The backward only
// scales the cached term for the input gradient; the target gradient needs
// the log-sum-exp again.
//
// Lanes stage per-class results in block-local memory; the block leader
// hands them back once the block is done, and they are written afterwards.

struct RowScratch<A: Accum> {
    tree: LocalMemory<A>,
    first: LocalMemory<A>,
    second: LocalMemory<A>,
}

impl<A: Accum> RowScratch<A> {
    fn new(local_size: usize, first: usize, second: usize) -> Self {
        RowScratch {
            tree: LocalMemory::new(local_size, A::zero()),
            first: LocalMemory::new(first, A::zero()),
            second: LocalMemory::new(second, A::zero()),
        }
    }
}

/// Row maximum and `Σ exp(x - max)`, both visible to every thread on return.
fn row_max_sum<T: Element>(
    lanes: &Lanes<'_>,
    tree: &LocalMemory<T::Accum>,
    row: &[T],
) -> (T::Accum, T::Accum) {
    let ls = lanes.local_size();
    lanes.for_each(|lid| {
        let mut m = T::Accum::neg_infinity();
        let mut c = lid;
        while c < row.len() {
            m = m.max(row[c].to_accum());
            c += ls;
        }
        tree.set(lid, m);
    });
    lanes.barrier();
    tree_reduce(lanes, tree, |a, b| a.max(b));
    let max = tree.get(0);
    lanes.barrier();

    lanes.for_each(|lid| {
        let mut s = T::Accum::zero();
        let mut c = lid;
        while c < row.len() {
            s = s + (row[c].to_accum() - max).exp();
            c += ls;
        }
        tree.set(lid, s);
    });
    lanes.barrier();
    tree_reduce(lanes, tree, |a, b| a + b);
    let sum = tree.get(0);
    lanes.barrier();
    (max, sum)
}

fn collect<A: Accum>(mem: &LocalMemory<A>) -> Vec<A> {
    (0..mem.len()).map(|i| mem.get(i)).collect()
}

/// Loss per row into `output` (`[batch]`) and `softmax(input) - target`
/// into `backprop` (`[batch, num_class]`). Every operand must be contiguous.
pub fn forward_contiguous<T: Element>(
    cfg: &KernelConfig,
    input: &Tensor<T>,
    target: &Tensor<T>,
    output: &mut Tensor<T>,
    backprop: &mut Tensor<T>,
) -> Result<()> {
    cfg.validate()?;
    let problem =
        SoftmaxCeForwardProblem::new(input.desc(), target.desc(), output.desc(), backprop.desc())?;
    if let Some(reason) = problem.rejection() {
        tracing::trace!(reason = reason.as_str(), "softmax_ce forward rejected");
        return Err(Error::not_applicable("softmax_ce_forward", reason));
    }
    let (batch, num_class) = (problem.batch(), problem.num_class());
    let dims = problem.launch_dims(cfg);
    tracing::debug!(
        kernel = "softmax_ce_forward_contiguous",
        dtype = %T::DTYPE,
        blocks = batch,
        local_size = dims.local_size,
        num_class,
        "launch"
    );

    let (x, t) = (input.data(), target.data());
    let wg = Workgroup::new(dims.local_size, cfg.workers);
    let rows = wg.launch(
        batch,
        || RowScratch::<T::Accum>::new(dims.local_size, num_class, 0),
        |row, scratch, lanes| {
            let base = row * num_class;
            let xr = &x[base..base + num_class];
            let tr = &t[base..base + num_class];
            let (max, sum) = row_max_sum(lanes, &scratch.tree, xr);
            let log_sum = sum.ln();

            let ls = lanes.local_size();
            lanes.for_each(|lid| {
                let mut loss = T::Accum::zero();
                let mut c = lid;
                while c < num_class {
                    let val = xr[c].to_accum();
                    let label = tr[c].to_accum();
                    loss = loss + label * (log_sum - val + max);
                    scratch.first.set(c, (val - max).exp() / sum - label);
                    c += ls;
                }
                scratch.tree.set(lid, loss);
            });
            lanes.barrier();
            tree_reduce(lanes, &scratch.tree, |a, b| a + b);
            if lanes.is_leader() {
                Some((scratch.tree.get(0), collect(&scratch.first)))
            } else {
                None
            }
        },
    );

    let out = output.data_mut();
    let bp = backprop.data_mut();
    for (row, result) in rows.into_iter().enumerate() {
        if let Some((loss, values)) = result {
            out[row] = T::from_accum(loss);
            for (c, v) in values.into_iter().enumerate() {
                bp[row * num_class + c] = T::from_accum(v);
            }
        }
    }
    Ok(())
}

/// `input_grad = output_grad[row] * backprop` and, when requested,
/// `target_grad = output_grad[row] * (max + log_sum - input)`.
pub fn backward_contiguous<T: Element>(
    cfg: &KernelConfig,
    output_grad: &Tensor<T>,
    backprop: &Tensor<T>,
    input: &Tensor<T>,
    mut input_grad: Option<&mut Tensor<T>>,
    mut target_grad: Option<&mut Tensor<T>>,
) -> Result<()> {
    cfg.validate()?;
    let problem = SoftmaxCeBackwardProblem::new(
        output_grad.desc(),
        backprop.desc(),
        input.desc(),
        input_grad.as_ref().map(|g| g.desc()),
        target_grad.as_ref().map(|g| g.desc()),
    )?;
    if let Some(reason) = problem.rejection() {
        tracing::trace!(reason = reason.as_str(), "softmax_ce backward rejected");
        return Err(Error::not_applicable("softmax_ce_backward", reason));
    }
    let (batch, num_class) = (problem.batch(), problem.num_class());
    let want_ig = input_grad.is_some();
    let want_tg = target_grad.is_some();
    let dims = problem.launch_dims(cfg);
    tracing::debug!(
        kernel = "softmax_ce_backward_contiguous",
        dtype = %T::DTYPE,
        blocks = batch,
        local_size = dims.local_size,
        num_class,
        input_grad = want_ig,
        target_grad = want_tg,
        "launch"
    );

    let (og, bp, x) = (output_grad.data(), backprop.data(), input.data());
    let wg = Workgroup::new(dims.local_size, cfg.workers);
    let rows = wg.launch(
        batch,
        || {
            RowScratch::<T::Accum>::new(
                dims.local_size,
                if want_ig { num_class } else { 0 },
                if want_tg { num_class } else { 0 },
            )
        },
        |row, scratch, lanes| {
            let base = row * num_class;
            let og = og[row].to_accum();
            let ls = lanes.local_size();
            if want_ig {
                lanes.for_each(|lid| {
                    let mut c = lid;
                    while c < num_class {
                        scratch.first.set(c, og * bp[base + c].to_accum());
                        c += ls;
                    }
                });
            }
            if want_tg {
                let xr = &x[base..base + num_class];
                let (max, sum) = row_max_sum(lanes, &scratch.tree, xr);
                let log_sum = sum.ln();
                lanes.for_each(|lid| {
                    let mut c = lid;
                    while c < num_class {
                        scratch.second.set(c, (max + log_sum - xr[c].to_accum()) * og);
                        c += ls;
                    }
                });
            }
            lanes.barrier();
            if lanes.is_leader() {
                Some((collect(&scratch.first), collect(&scratch.second)))
            } else {
                None
            }
        },
    );

    for (row, result) in rows.into_iter().enumerate() {
        let Some((ig, tg)) = result else { continue };
        let base = row * num_class;
        if let Some(g) = input_grad.as_deref_mut() {
            for (c, v) in ig.into_iter().enumerate() {
                g.data_mut()[base + c] = T::from_accum(v);
            }
        }
        if let Some(g) = target_grad.as_deref_mut() {
            for (c, v) in tg.into_iter().enumerate() {
                g.data_mut()[base + c] = T::from_accum(v);
            }
        }
    }
    Ok(())
}
