use num_traits::Zero;
use tessera_core::{
    scatter, Accum, Element, Grid, KernelConfig, LaunchDims, Result, Tensor, TensorLayout,
    TensorView,
};

use crate::problem::cosine_embedding::{LOCAL_SIZE_BWD, LOCAL_SIZE_FWD, LOCAL_SIZE_FWD_UNREDUCED};
use crate::problem::{
    check_workspace, CosineBackwardProblem, CosineForwardProblem, CosineVariant, Reduction,
};
use crate::reduce::{reduce_to_scalar, run_sum_plan, SumPlan, SumTarget};

// Cosine embedding loss over [N, D] row pairs with i32 labels
//
//   cos  = <x1, x2> / (|x1| |x2|)
//   loss = 1 - cos                 label == 1
//        = max(0, cos - margin)    otherwise
//
// Every kernel needs three sums per row: <x1, x2>, |x1|², |x2|². The Sum
// variant materialises them once through the two-phase row sum; the NonSum
// variant has each work item recompute its row's sums.

/// Operands shared by the forward and backward passes.
#[derive(Debug, Clone, Copy)]
pub struct CosineInputs<'a, T: Element> {
    pub input1: &'a Tensor<T>,
    pub input2: &'a Tensor<T>,
    pub target: &'a Tensor<i32>,
    pub margin: f64,
}

struct Views {
    x1: TensorView<2>,
    x2: TensorView<2>,
    target: TensorView<1>,
}

impl Views {
    fn new<T: Element>(inputs: &CosineInputs<'_, T>) -> Result<Self> {
        Ok(Views {
            x1: inputs.input1.view()?,
            x2: inputs.input2.view()?,
            target: inputs.target.view()?,
        })
    }

    fn label(&self, target: &[i32], row: usize) -> i32 {
        target[self.target.offset(&TensorLayout::new([row]))]
    }
}

/// `(cos, |x1|, |x2|)` from the three raw sums of a row.
#[inline]
fn cosine<A: Accum>(dot: A, sq1: A, sq2: A) -> (A, A, A) {
    let n1 = sq1.sqrt();
    let n2 = sq2.sqrt();
    (dot / (n1 * n2), n1, n2)
}

#[inline]
fn row_loss<A: Accum>(cos: A, label: i32, margin: A) -> A {
    if label == 1 {
        A::one() - cos
    } else {
        (cos - margin).max(A::zero())
    }
}

/// `d loss / d x1` and `d loss / d x2` of one element. Dissimilar pairs
/// already inside the margin get zero.
#[inline]
fn element_grads<A: Accum>(cos: A, n1: A, n2: A, i1: A, i2: A, label: i32, margin: A) -> (A, A) {
    let g1 = i2 / (n1 * n2) - cos * i1 / (n1 * n1);
    let g2 = i1 / (n1 * n2) - cos * i2 / (n2 * n2);
    if label == 1 {
        (-g1, -g2)
    } else if cos - margin < A::zero() {
        (A::zero(), A::zero())
    } else {
        (g1, g2)
    }
}

/// The three sums of `row`, read straight from the inputs.
fn direct_sums<T: Element>(
    inputs: &CosineInputs<'_, T>,
    views: &Views,
    row: usize,
) -> (T::Accum, T::Accum, T::Accum) {
    let (x1, x2) = (inputs.input1.data(), inputs.input2.data());
    let mut dot = T::Accum::zero();
    let mut sq1 = T::Accum::zero();
    let mut sq2 = T::Accum::zero();
    for col in 0..views.x1.size[1] {
        let tl = TensorLayout::new([row, col]);
        let a = x1[views.x1.offset(&tl)].to_accum();
        let b = x2[views.x2.offset(&tl)].to_accum();
        dot = dot + a * b;
        sq1 = sq1 + a * a;
        sq2 = sq2 + b * b;
    }
    (dot, sq1, sq2)
}

/// Norm kernel plus two-phase row sum. Returns the `3N` row sums
/// (`[k * N + row]`, k = dot, |x1|², |x2|²) and the workspace left free.
fn sum_path<'w, T: Element>(
    cfg: &KernelConfig,
    inputs: &CosineInputs<'_, T>,
    views: &Views,
    workspace: &'w mut [T::Accum],
) -> Result<(&'w mut [T::Accum], &'w mut [T::Accum])> {
    let (n, d) = (views.x1.size[0], views.x1.size[1]);
    let nd = n * d;
    let dims = LaunchDims::new(nd, cfg.reduce_local_size);
    tracing::debug!(
        kernel = "cosine_embedding_norm",
        dtype = %T::DTYPE,
        global_size = dims.global_size,
        local_size = dims.local_size,
        "launch"
    );
    let (x1, x2) = (inputs.input1.data(), inputs.input2.data());
    let products = Grid::new(dims).map(|gid| {
        let tl = TensorLayout::from_flat(&views.x1, gid);
        if !views.x1.contains(&tl) {
            return None;
        }
        let a = x1[views.x1.offset(&tl)].to_accum();
        let b = x2[views.x2.offset(&tl)].to_accum();
        Some((gid, a * b, a * a, b * b))
    });

    let (data, scratch) = workspace.split_at_mut(3 * nd);
    for (gid, dot, sq1, sq2) in products {
        data[gid] = dot;
        data[nd + gid] = sq1;
        data[2 * nd + gid] = sq2;
    }
    let plan = SumPlan::new(cfg, 3 * n, d);
    Ok(match run_sum_plan(cfg, &plan, data, scratch)? {
        SumTarget::Input => (data, scratch),
        SumTarget::Scratch => (scratch, data),
    })
}

fn sums_at<A: Accum>(sums: &[A], n: usize, row: usize) -> (A, A, A) {
    (sums[row], sums[n + row], sums[2 * n + row])
}

/// Per-row loss into `output` (`[N]`). Always takes the Sum path.
pub fn forward_unreduced<T: Element>(
    cfg: &KernelConfig,
    inputs: CosineInputs<'_, T>,
    output: &mut Tensor<T>,
    workspace: &mut [T::Accum],
) -> Result<()> {
    forward_with_variant(cfg, CosineVariant::Sum, inputs, output, workspace, Reduction::None)
}

/// `Σ loss / divisor` into the one-element `output`, using the preferred
/// variant for the problem's shape.
pub fn forward_reduced<T: Element>(
    cfg: &KernelConfig,
    inputs: CosineInputs<'_, T>,
    output: &mut Tensor<T>,
    workspace: &mut [T::Accum],
    divisor: f64,
) -> Result<()> {
    let reduction = Reduction::Reduced { divisor };
    let problem = forward_problem(&inputs, output, reduction)?;
    let variant = problem.select();
    forward_with_variant(cfg, variant, inputs, output, workspace, reduction)
}

fn forward_problem<T: Element>(
    inputs: &CosineInputs<'_, T>,
    output: &Tensor<T>,
    reduction: Reduction,
) -> Result<CosineForwardProblem> {
    CosineForwardProblem::new(
        inputs.input1.desc(),
        inputs.input2.desc(),
        inputs.target.desc(),
        output.desc(),
        reduction,
    )
}

/// Forward with an explicit variant. Fails with `NotApplicable` when the
/// variant cannot handle the problem.
pub fn forward_with_variant<T: Element>(
    cfg: &KernelConfig,
    variant: CosineVariant,
    inputs: CosineInputs<'_, T>,
    output: &mut Tensor<T>,
    workspace: &mut [T::Accum],
    reduction: Reduction,
) -> Result<()> {
    cfg.validate()?;
    let problem = forward_problem(&inputs, output, reduction)?;
    problem.check_variant(variant)?;
    check_workspace(problem.workspace_len(cfg, variant), workspace.len())?;
    let views = Views::new(&inputs)?;
    let n = problem.n();
    let margin = T::Accum::from_f64(inputs.margin);
    let labels = inputs.target.data();

    let (losses, scratch): (&mut [T::Accum], &mut [T::Accum]) = match variant {
        CosineVariant::Sum => {
            let (sums, free) = sum_path(cfg, &inputs, &views, workspace)?;
            let local = if reduction.is_reduced() {
                LOCAL_SIZE_FWD
            } else {
                LOCAL_SIZE_FWD_UNREDUCED
            };
            let dims = LaunchDims::new(n, local);
            tracing::debug!(
                kernel = "cosine_embedding_forward",
                dtype = %T::DTYPE,
                global_size = dims.global_size,
                local_size = dims.local_size,
                reduced = reduction.is_reduced(),
                "launch"
            );
            let sums = &*sums;
            let values = Grid::new(dims).map(|row| {
                if row >= n {
                    return None;
                }
                let (dot, sq1, sq2) = sums_at(sums, n, row);
                let (cos, _, _) = cosine(dot, sq1, sq2);
                Some((row, row_loss(cos, views.label(labels, row), margin)))
            });
            if reduction == Reduction::None {
                let output_tv = output.view::<1>()?;
                let out = output.data_mut();
                for (row, loss) in values {
                    out[output_tv.offset(&TensorLayout::new([row]))] = T::from_accum(loss);
                }
                return Ok(());
            }
            let (losses, rest) = free.split_at_mut(n);
            for (row, loss) in values {
                losses[row] = loss;
            }
            (losses, rest)
        }
        CosineVariant::NonSum => {
            let dims = LaunchDims::new(n, LOCAL_SIZE_FWD);
            tracing::debug!(
                kernel = "cosine_embedding_forward_non_sum",
                dtype = %T::DTYPE,
                global_size = dims.global_size,
                local_size = dims.local_size,
                "launch"
            );
            let values = Grid::new(dims).map(|row| {
                if row >= n {
                    return None;
                }
                let (dot, sq1, sq2) = direct_sums(&inputs, &views, row);
                let (cos, _, _) = cosine(dot, sq1, sq2);
                Some((row, row_loss(cos, views.label(labels, row), margin)))
            });
            let (losses, rest) = workspace.split_at_mut(n);
            for (row, loss) in values {
                losses[row] = loss;
            }
            (losses, rest)
        }
    };

    let divisor = T::Accum::from_f64(reduction.divisor().unwrap_or(1.0));
    for loss in losses.iter_mut() {
        *loss = *loss / divisor;
    }
    // A single loss-sum block needs one partial, which may not fit the
    // caller's workspace when N is small.
    let mut single = [T::Accum::zero()];
    let scratch = if n <= cfg.reduce_local_size {
        &mut single[..]
    } else {
        scratch
    };
    let total = reduce_to_scalar(cfg, losses, scratch, n)?;
    let output_tv = output.view::<1>()?;
    output.data_mut()[output_tv.offset(&TensorLayout::origin())] = T::from_accum(total);
    Ok(())
}

/// Gradients with a per-row `output_grad` (`[N]`), using the preferred
/// variant. Pass `None` for a gradient that is not wanted.
pub fn backward_unreduced<T: Element>(
    cfg: &KernelConfig,
    inputs: CosineInputs<'_, T>,
    output_grad: &Tensor<T>,
    input1_grad: Option<&mut Tensor<T>>,
    input2_grad: Option<&mut Tensor<T>>,
    workspace: &mut [T::Accum],
) -> Result<()> {
    let reduction = Reduction::None;
    let variant = backward_problem(&inputs, output_grad, &input1_grad, &input2_grad, reduction)?.select();
    backward_with_variant(
        cfg,
        variant,
        inputs,
        output_grad,
        input1_grad,
        input2_grad,
        workspace,
        reduction,
    )
}

/// Gradients of the reduced loss with a scalar `output_grad`.
pub fn backward_reduced<T: Element>(
    cfg: &KernelConfig,
    inputs: CosineInputs<'_, T>,
    output_grad: &Tensor<T>,
    input1_grad: Option<&mut Tensor<T>>,
    input2_grad: Option<&mut Tensor<T>>,
    workspace: &mut [T::Accum],
    divisor: f64,
) -> Result<()> {
    let reduction = Reduction::Reduced { divisor };
    let variant = backward_problem(&inputs, output_grad, &input1_grad, &input2_grad, reduction)?.select();
    backward_with_variant(
        cfg,
        variant,
        inputs,
        output_grad,
        input1_grad,
        input2_grad,
        workspace,
        reduction,
    )
}

fn backward_problem<T: Element>(
    inputs: &CosineInputs<'_, T>,
    output_grad: &Tensor<T>,
    input1_grad: &Option<&mut Tensor<T>>,
    input2_grad: &Option<&mut Tensor<T>>,
    reduction: Reduction,
) -> Result<CosineBackwardProblem> {
    CosineBackwardProblem::new(
        inputs.input1.desc(),
        inputs.input2.desc(),
        inputs.target.desc(),
        output_grad.desc(),
        input1_grad.as_ref().map(|g| g.desc()),
        input2_grad.as_ref().map(|g| g.desc()),
        reduction,
    )
}

/// Backward with an explicit variant. NonSum needs no workspace.
#[allow(clippy::too_many_arguments)]
pub fn backward_with_variant<T: Element>(
    cfg: &KernelConfig,
    variant: CosineVariant,
    inputs: CosineInputs<'_, T>,
    output_grad: &Tensor<T>,
    input1_grad: Option<&mut Tensor<T>>,
    input2_grad: Option<&mut Tensor<T>>,
    workspace: &mut [T::Accum],
    reduction: Reduction,
) -> Result<()> {
    cfg.validate()?;
    let problem = backward_problem(&inputs, output_grad, &input1_grad, &input2_grad, reduction)?;
    problem.check_variant(variant)?;
    check_workspace(problem.workspace_len(cfg, variant), workspace.len())?;
    let views = Views::new(&inputs)?;
    let g1_tv = input1_grad.as_ref().map(|g| g.view::<2>()).transpose()?;
    let g2_tv = input2_grad.as_ref().map(|g| g.view::<2>()).transpose()?;
    let og_tv = output_grad.view::<1>()?;
    let og_data = output_grad.data();
    let og_scalar = match reduction {
        Reduction::Reduced { .. } => Some(og_data[og_tv.offset(&TensorLayout::origin())].to_accum()),
        Reduction::None => None,
    };
    let divisor = reduction.divisor().map(T::Accum::from_f64);
    let margin = T::Accum::from_f64(inputs.margin);
    let (n, d) = (problem.n(), problem.d());
    let labels = inputs.target.data();
    let (x1, x2) = (inputs.input1.data(), inputs.input2.data());

    let sums: Option<&[T::Accum]> = match variant {
        CosineVariant::Sum => {
            let (sums, _) = sum_path(cfg, &inputs, &views, workspace)?;
            Some(sums)
        }
        CosineVariant::NonSum => None,
    };
    let dims = LaunchDims::new(n * d, LOCAL_SIZE_BWD);
    tracing::debug!(
        kernel = "cosine_embedding_backward",
        dtype = %T::DTYPE,
        ?variant,
        global_size = dims.global_size,
        local_size = dims.local_size,
        reduced = reduction.is_reduced(),
        "launch"
    );

    let writes = Grid::new(dims).map(|gid| {
        let tl = TensorLayout::from_flat(&views.x1, gid);
        if !views.x1.contains(&tl) {
            return None;
        }
        let row = tl[0];
        let (dot, sq1, sq2) = match sums {
            Some(s) => sums_at(s, n, row),
            None => direct_sums(&inputs, &views, row),
        };
        let (cos, n1, n2) = cosine(dot, sq1, sq2);
        let og = match og_scalar {
            Some(v) => v,
            None => og_data[og_tv.offset(&TensorLayout::new([row]))].to_accum(),
        };
        let i1 = x1[views.x1.offset(&tl)].to_accum();
        let i2 = x2[views.x2.offset(&tl)].to_accum();
        let (g1, g2) = element_grads(cos, n1, n2, i1, i2, views.label(labels, row), margin);
        let finish = |g: T::Accum| {
            let v = g * og;
            T::from_accum(match divisor {
                Some(d) => v / d,
                None => v,
            })
        };
        Some((
            g1_tv.map(|view| (view.offset(&tl), finish(g1))),
            g2_tv.map(|view| (view.offset(&tl), finish(g2))),
        ))
    });

    let (g1_writes, g2_writes): (Vec<_>, Vec<_>) = writes.into_iter().unzip();
    if let Some(g) = input1_grad {
        scatter(g.data_mut(), g1_writes.into_iter().flatten());
    }
    if let Some(g) = input2_grad {
        scatter(g.data_mut(), g2_writes.into_iter().flatten());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use tessera_core::Error;

    fn cfg() -> KernelConfig {
        KernelConfig::default()
            .reduce_local_size(16)
            .workers(2)
            .compute_units(1)
    }

    fn data(n: usize, d: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n * d).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    fn labels(n: usize) -> Vec<i32> {
        (0..n).map(|i| if i % 3 == 0 { -1 } else { 1 }).collect()
    }

    fn reference_loss(a: &[f64], b: &[f64], label: i32, margin: f64) -> f64 {
        let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let n1 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
        let n2 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
        let cos = dot / (n1 * n2);
        if label == 1 {
            1.0 - cos
        } else {
            (cos - margin).max(0.0)
        }
    }

    #[test]
    fn test_forward_unreduced_matches_rows() {
        let cfg = cfg();
        let (n, d) = (12, 40);
        let (a, b) = (data(n, d, 1), data(n, d, 7));
        let input1 = Tensor::<f64>::from_f64(&a, (n, d)).unwrap();
        let input2 = Tensor::<f64>::from_f64(&b, (n, d)).unwrap();
        let target = Tensor::from_vec(labels(n), n).unwrap();
        let inputs = CosineInputs {
            input1: &input1,
            input2: &input2,
            target: &target,
            margin: 0.0,
        };
        let mut output = Tensor::<f64>::zeros(n);
        let problem = forward_problem(&inputs, &output, Reduction::None).unwrap();
        let mut ws = vec![0.0f64; problem.workspace_len(&cfg, CosineVariant::Sum)];
        forward_unreduced(&cfg, inputs, &mut output, &mut ws).unwrap();
        let lbl = labels(n);
        for (row, loss) in output.to_vec().into_iter().enumerate() {
            let expected = reference_loss(&a[row * d..(row + 1) * d], &b[row * d..(row + 1) * d], lbl[row], 0.0);
            assert!((loss - expected).abs() < 1e-12, "row {}", row);
        }
    }

    #[test]
    fn test_reduced_variants_agree() {
        let cfg = cfg();
        let (n, d) = (40, 24);
        let input1 = Tensor::<f64>::from_f64(&data(n, d, 3), (n, d)).unwrap();
        let input2 = Tensor::<f64>::from_f64(&data(n, d, 11), (n, d)).unwrap();
        let target = Tensor::from_vec(labels(n), n).unwrap();
        let inputs = CosineInputs {
            input1: &input1,
            input2: &input2,
            target: &target,
            margin: 0.25,
        };
        let mut results = Vec::new();
        for variant in [CosineVariant::Sum, CosineVariant::NonSum] {
            let mut output = Tensor::<f64>::zeros(1);
            let reduction = Reduction::mean(n);
            let problem = forward_problem(&inputs, &output, reduction).unwrap();
            let mut ws = vec![0.0f64; problem.workspace_len(&cfg, variant)];
            forward_with_variant(&cfg, variant, inputs, &mut output, &mut ws, reduction).unwrap();
            results.push(output.to_vec()[0]);
        }
        assert!((results[0] - results[1]).abs() < 1e-12);
    }

    #[test]
    fn test_non_sum_forward_needs_reduction() {
        let cfg = cfg();
        let input1 = Tensor::<f32>::zeros((2, 3));
        let input2 = Tensor::<f32>::zeros((2, 3));
        let target = Tensor::from_vec(vec![1, -1], 2).unwrap();
        let inputs = CosineInputs {
            input1: &input1,
            input2: &input2,
            target: &target,
            margin: 0.0,
        };
        let mut output = Tensor::<f32>::zeros(2);
        let err = forward_with_variant(
            &cfg,
            CosineVariant::NonSum,
            inputs,
            &mut output,
            &mut [],
            Reduction::None,
        );
        assert!(matches!(err, Err(Error::NotApplicable { .. })));
    }

    #[test]
    fn test_bad_block_size_rejected() {
        let (n, d) = (40, 24);
        let input1 = Tensor::<f64>::from_f64(&data(n, d, 2), (n, d)).unwrap();
        let input2 = Tensor::<f64>::from_f64(&data(n, d, 4), (n, d)).unwrap();
        let target = Tensor::from_vec(labels(n), n).unwrap();
        let inputs = CosineInputs {
            input1: &input1,
            input2: &input2,
            target: &target,
            margin: 0.1,
        };
        let mut output = Tensor::<f64>::zeros(1);
        let problem = forward_problem(&inputs, &output, Reduction::sum()).unwrap();
        let mut ws = vec![0.0f64; problem.workspace_len(&cfg(), CosineVariant::Sum)];
        for bad in [cfg().reduce_local_size(96), cfg().reduce_local_size(0)] {
            let err = forward_reduced(&bad, inputs, &mut output, &mut ws, 1.0);
            assert!(matches!(err, Err(Error::InvalidConfig(_))));
        }

        let og = Tensor::<f64>::full(n, 1.0);
        let mut g1 = Tensor::<f64>::zeros((n, d));
        let mut ws = vec![0.0f64; ws.len()];
        let err = backward_with_variant(
            &cfg().reduce_local_size(96),
            CosineVariant::Sum,
            inputs,
            &og,
            Some(&mut g1),
            None,
            &mut ws,
            Reduction::None,
        );
        assert!(matches!(err, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rows_without_features_rejected() {
        let input1 = Tensor::<f32>::zeros((3, 0));
        let input2 = Tensor::<f32>::zeros((3, 0));
        let target = Tensor::from_vec(vec![1, -1, 1], 3).unwrap();
        let inputs = CosineInputs {
            input1: &input1,
            input2: &input2,
            target: &target,
            margin: 0.0,
        };
        let mut output = Tensor::<f32>::zeros(1);
        let mut ws = vec![0.0f32; 16];
        assert!(forward_reduced(&cfg(), inputs, &mut output, &mut ws, 1.0).is_err());
        assert_eq!(output.to_vec(), vec![0.0]);
    }

    #[test]
    fn test_dissimilar_inside_margin_has_zero_grad() {
        let cfg = cfg();
        // Orthogonal rows: cos = 0 < margin 0.5.
        let input1 = Tensor::<f64>::from_f64(&[1.0, 0.0], (1, 2)).unwrap();
        let input2 = Tensor::<f64>::from_f64(&[0.0, 1.0], (1, 2)).unwrap();
        let target = Tensor::from_vec(vec![-1], 1).unwrap();
        let inputs = CosineInputs {
            input1: &input1,
            input2: &input2,
            target: &target,
            margin: 0.5,
        };
        let og = Tensor::<f64>::from_f64(&[1.0], 1).unwrap();
        let mut g1 = Tensor::<f64>::full((1, 2), 3.0);
        let mut g2 = Tensor::<f64>::full((1, 2), 3.0);
        backward_unreduced(&cfg, inputs, &og, Some(&mut g1), Some(&mut g2), &mut []).unwrap();
        assert_eq!(g1.to_vec(), vec![0.0, 0.0]);
        assert_eq!(g2.to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_backward_variants_agree_and_reduce() {
        let cfg = cfg();
        let (n, d) = (10, 16);
        let input1 = Tensor::<f64>::from_f64(&data(n, d, 5), (n, d)).unwrap();
        let input2 = Tensor::<f64>::from_f64(&data(n, d, 9), (n, d)).unwrap();
        let target = Tensor::from_vec(labels(n), n).unwrap();
        let inputs = CosineInputs {
            input1: &input1,
            input2: &input2,
            target: &target,
            margin: -0.2,
        };
        let og_rows = Tensor::<f64>::full(n, 1.0);
        let og_scalar = Tensor::<f64>::full(1, 1.0);

        let mut unreduced = Tensor::<f64>::zeros((n, d));
        let problem = backward_problem(&inputs, &og_rows, &None, &None, Reduction::None).unwrap();
        let mut ws = vec![0.0f64; problem.workspace_len(&cfg, CosineVariant::Sum)];
        backward_with_variant(
            &cfg,
            CosineVariant::Sum,
            inputs,
            &og_rows,
            Some(&mut unreduced),
            None,
            &mut ws,
            Reduction::None,
        )
        .unwrap();

        let mut reduced = Tensor::<f64>::zeros((n, d));
        backward_reduced(&cfg, inputs, &og_scalar, Some(&mut reduced), None, &mut [], 4.0).unwrap();

        for (u, r) in unreduced.to_vec().into_iter().zip(reduced.to_vec()) {
            assert!((u / 4.0 - r).abs() < 1e-12);
        }
    }
}
