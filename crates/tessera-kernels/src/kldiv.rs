use num_traits::Zero;
use tessera_core::{
    scatter, Accum, Element, Grid, KernelConfig, Result, Tensor, TensorLayout, MAX_RANK,
};

use crate::problem::{check_workspace, KlDivBackwardProblem, KlDivForwardProblem, Reduction};
use crate::reduce::reduce_to_scalar;

// KL-divergence: elementwise forward and backward over strided operands
//
//   log_target:  y = exp(t) * (t - x)
//   otherwise:   y = t * (log(t) - x)
//
// At t == 0 (non-log) the product is 0 * -inf and comes out NaN; the
// forward writes 0 instead. The backward recomputes y from scratch and
// tests the unclamped value, so a backward-only call needs no forward
// output buffer.

/// Pointwise loss before the NaN clamp.
#[inline]
fn pointwise<A: Accum>(x: A, t: A, log_target: bool) -> A {
    if log_target {
        t.exp() * (t - x)
    } else {
        t * (t.ln() - x)
    }
}

#[inline]
fn clamp_nan<A: Accum>(y: A) -> A {
    if y.is_nan() {
        A::zero()
    } else {
        y
    }
}

/// Gradients of one element, before the output-gradient scaling.
///
/// `None` means "write an exact zero".
#[inline]
fn pointwise_grads<A: Accum>(x: A, t: A, log_target: bool) -> (Option<A>, Option<A>) {
    if log_target {
        let exp_t = t.exp();
        let fwd = exp_t * (t - x);
        let ig = if fwd.is_nan() { None } else { Some(-exp_t) };
        (ig, Some(fwd + exp_t))
    } else {
        let fwd = t * (t.ln() - x);
        let ig = if fwd.is_nan() { None } else { Some(-t) };
        let tg = if t == A::zero() {
            None
        } else {
            Some(A::one() + (t.ln() - x))
        };
        (ig, tg)
    }
}

/// Per-element KL-divergence into `output`, which has the shape of `input`.
pub fn forward_unreduced<T: Element>(
    cfg: &KernelConfig,
    input: &Tensor<T>,
    target: &Tensor<T>,
    output: &mut Tensor<T>,
    log_target: bool,
) -> Result<()> {
    cfg.validate()?;
    let problem = KlDivForwardProblem::new(
        input.desc(),
        target.desc(),
        output.desc(),
        Reduction::None,
        log_target,
    )?;
    let input_tv = input.view::<MAX_RANK>()?;
    let target_tv = target.view::<MAX_RANK>()?;
    let output_tv = output.view::<MAX_RANK>()?;
    let dims = problem.launch_dims(cfg)[0];
    tracing::debug!(
        kernel = "kldiv_forward_unreduced",
        dtype = %T::DTYPE,
        global_size = dims.global_size,
        local_size = dims.local_size,
        log_target,
        "launch"
    );

    let (x, t) = (input.data(), target.data());
    let writes = Grid::new(dims).map(|gid| {
        let tl = TensorLayout::from_flat(&input_tv, gid);
        if !input_tv.contains(&tl) {
            return None;
        }
        let xv = x[input_tv.offset(&tl)].to_accum();
        let tv = t[target_tv.offset(&tl)].to_accum();
        let y = clamp_nan(pointwise(xv, tv, log_target));
        Some((output_tv.offset(&tl), T::from_accum(y)))
    });
    scatter(output.data_mut(), writes);
    Ok(())
}

/// `Σ y / divisor` into the one-element `output`.
///
/// `workspace` must hold [`KlDivForwardProblem::workspace_len`] elements:
/// the per-element losses followed by the loss-sum partials.
pub fn forward_reduced<T: Element>(
    cfg: &KernelConfig,
    input: &Tensor<T>,
    target: &Tensor<T>,
    output: &mut Tensor<T>,
    workspace: &mut [T::Accum],
    divisor: f64,
    log_target: bool,
) -> Result<()> {
    cfg.validate()?;
    let problem = KlDivForwardProblem::new(
        input.desc(),
        target.desc(),
        output.desc(),
        Reduction::Reduced { divisor },
        log_target,
    )?;
    check_workspace(problem.workspace_len(cfg), workspace.len())?;
    let input_tv = input.view::<MAX_RANK>()?;
    let target_tv = target.view::<MAX_RANK>()?;
    let output_tv = output.view::<1>()?;
    let numel = problem.numel();
    let dims = problem.launch_dims(cfg)[0];
    tracing::debug!(
        kernel = "kldiv_forward_reduced",
        dtype = %T::DTYPE,
        global_size = dims.global_size,
        local_size = dims.local_size,
        log_target,
        divisor,
        "launch"
    );

    let d = T::Accum::from_f64(divisor);
    let (x, t) = (input.data(), target.data());
    let losses = Grid::new(dims).map(|gid| {
        let tl = TensorLayout::from_flat(&input_tv, gid);
        if !input_tv.contains(&tl) {
            return None;
        }
        let xv = x[input_tv.offset(&tl)].to_accum();
        let tv = t[target_tv.offset(&tl)].to_accum();
        Some((gid, clamp_nan(pointwise(xv, tv, log_target)) / d))
    });
    let (values, scratch) = workspace.split_at_mut(numel);
    scatter(values, losses);
    let total = reduce_to_scalar(cfg, values, scratch, numel)?;
    output.data_mut()[output_tv.offset(&TensorLayout::origin())] = T::from_accum(total);
    Ok(())
}

/// Gradients of the per-element loss. `output_grad` has the shape of
/// `input`; pass `None` for a gradient that is not wanted.
#[allow(clippy::too_many_arguments)]
pub fn backward_unreduced<T: Element>(
    cfg: &KernelConfig,
    input: &Tensor<T>,
    target: &Tensor<T>,
    output_grad: &Tensor<T>,
    input_grad: Option<&mut Tensor<T>>,
    target_grad: Option<&mut Tensor<T>>,
    log_target: bool,
) -> Result<()> {
    backward(
        cfg,
        input,
        target,
        output_grad,
        input_grad,
        target_grad,
        Reduction::None,
        log_target,
    )
}

/// Gradients of the reduced loss: every contribution is divided by
/// `divisor` and scaled by the scalar `output_grad`.
#[allow(clippy::too_many_arguments)]
pub fn backward_reduced<T: Element>(
    cfg: &KernelConfig,
    input: &Tensor<T>,
    target: &Tensor<T>,
    output_grad: &Tensor<T>,
    input_grad: Option<&mut Tensor<T>>,
    target_grad: Option<&mut Tensor<T>>,
    divisor: f64,
    log_target: bool,
) -> Result<()> {
    backward(
        cfg,
        input,
        target,
        output_grad,
        input_grad,
        target_grad,
        Reduction::Reduced { divisor },
        log_target,
    )
}

#[allow(clippy::too_many_arguments)]
fn backward<T: Element>(
    cfg: &KernelConfig,
    input: &Tensor<T>,
    target: &Tensor<T>,
    output_grad: &Tensor<T>,
    input_grad: Option<&mut Tensor<T>>,
    target_grad: Option<&mut Tensor<T>>,
    reduction: Reduction,
    log_target: bool,
) -> Result<()> {
    cfg.validate()?;
    let problem = KlDivBackwardProblem::new(
        input.desc(),
        target.desc(),
        output_grad.desc(),
        input_grad.as_ref().map(|g| g.desc()),
        target_grad.as_ref().map(|g| g.desc()),
        reduction,
        log_target,
    )?;
    let input_tv = input.view::<MAX_RANK>()?;
    let target_tv = target.view::<MAX_RANK>()?;
    let input_grad_tv = input_grad.as_ref().map(|g| g.view::<MAX_RANK>()).transpose()?;
    let target_grad_tv = target_grad.as_ref().map(|g| g.view::<MAX_RANK>()).transpose()?;

    // Reduced mode reads one broadcast scalar; unreduced reads per element.
    let (og_scalar, og_tv) = match reduction {
        Reduction::Reduced { .. } => {
            let tv = output_grad.view::<1>()?;
            let og = output_grad.data()[tv.offset(&TensorLayout::origin())].to_accum();
            (Some(og), None)
        }
        Reduction::None => (None, Some(output_grad.view::<MAX_RANK>()?)),
    };
    let divisor = reduction.divisor().map(T::Accum::from_f64);

    let dims = problem.launch_dims(cfg);
    tracing::debug!(
        kernel = if reduction.is_reduced() { "kldiv_backward_reduced" } else { "kldiv_backward_unreduced" },
        dtype = %T::DTYPE,
        global_size = dims.global_size,
        local_size = dims.local_size,
        log_target,
        input_grad = input_grad_tv.is_some(),
        target_grad = target_grad_tv.is_some(),
        "launch"
    );

    let (x, t, og_data) = (input.data(), target.data(), output_grad.data());
    let writes = Grid::new(dims).map(|gid| {
        let tl = TensorLayout::from_flat(&input_tv, gid);
        if !input_tv.contains(&tl) {
            return None;
        }
        let xv = x[input_tv.offset(&tl)].to_accum();
        let tv = t[target_tv.offset(&tl)].to_accum();
        let og = match (og_scalar, &og_tv) {
            (Some(v), _) => v,
            (None, Some(view)) => og_data[view.offset(&tl)].to_accum(),
            (None, None) => return None,
        };
        let scale = |g: Option<T::Accum>| -> T {
            let v = match (g, divisor) {
                (None, _) => T::Accum::zero(),
                (Some(g), Some(d)) => g / d * og,
                (Some(g), None) => g * og,
            };
            T::from_accum(v)
        };
        let (ig, tg) = pointwise_grads(xv, tv, log_target);
        let ig = input_grad_tv.map(|view| (view.offset(&tl), scale(ig)));
        let tg = target_grad_tv.map(|view| (view.offset(&tl), scale(tg)));
        Some((ig, tg))
    });

    let (ig_writes, tg_writes): (Vec<_>, Vec<_>) = writes.into_iter().unzip();
    if let Some(g) = input_grad {
        scatter(g.data_mut(), ig_writes.into_iter().flatten());
    }
    if let Some(g) = target_grad {
        scatter(g.data_mut(), tg_writes.into_iter().flatten());
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
        KernelConfig::default().local_size(8).reduce_local_size(4).workers(2)
    }

    #[test]
    fn test_zero_target_forward_is_zero() {
        let input = Tensor::<f32>::from_f64(&[-0.5, -3.0, 2.0], 3).unwrap();
        let target = Tensor::<f32>::from_f64(&[0.0, 0.0, 0.5], 3).unwrap();
        let mut output = Tensor::<f32>::zeros(3);
        forward_unreduced(&cfg(), &input, &target, &mut output, false).unwrap();
        let out = output.to_vec();
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], 0.0);
        let expected = 0.5f32 * (0.5f32.ln() - 2.0);
        assert!((out[2] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_log_target_forward() {
        let input = Tensor::<f64>::from_f64(&[-1.0, -2.0], 2).unwrap();
        let target = Tensor::<f64>::from_f64(&[-0.5, -0.25], 2).unwrap();
        let mut output = Tensor::<f64>::zeros(2);
        forward_unreduced(&cfg(), &input, &target, &mut output, true).unwrap();
        let out = output.to_vec();
        assert_eq!(out[0], (-0.5f64).exp() * 0.5);
        assert_eq!(out[1], (-0.25f64).exp() * 1.75);
    }

    #[test]
    fn test_reduced_forward_matches_sum() {
        let cfg = cfg();
        let n = 37;
        let mut rng = StdRng::seed_from_u64(37);
        let xs: Vec<f64> = (0..n).map(|_| rng.gen_range(-4.0..-0.1)).collect();
        let mut ts: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..1.0)).collect();
        ts[0] = 0.0;
        let input = Tensor::<f64>::from_f64(&xs, n).unwrap();
        let target = Tensor::<f64>::from_f64(&ts, n).unwrap();
        let mut output = Tensor::<f64>::zeros(1);
        let problem = KlDivForwardProblem::new(
            input.desc(),
            target.desc(),
            output.desc(),
            Reduction::mean(n),
            false,
        )
        .unwrap();
        let mut ws = vec![0.0f64; problem.workspace_len(&cfg)];
        forward_reduced(&cfg, &input, &target, &mut output, &mut ws, n as f64, false).unwrap();
        let expected: f64 = xs
            .iter()
            .zip(&ts)
            .map(|(&x, &t)| clamp_nan(t * (t.ln() - x)) / n as f64)
            .sum();
        assert!((output.to_vec()[0] - expected).abs() < 1e-12);

        let mut short = vec![0.0f64; 3];
        assert!(forward_reduced(&cfg, &input, &target, &mut output, &mut short, 1.0, false).is_err());
    }

    #[test]
    fn test_reduced_forward_rejects_bad_block_size() {
        let n = 200;
        let input = Tensor::<f32>::full(n, -1.0);
        let target = Tensor::<f32>::full(n, 0.5);
        let mut output = Tensor::<f32>::zeros(1);
        let problem = KlDivForwardProblem::new(
            input.desc(),
            target.desc(),
            output.desc(),
            Reduction::sum(),
            false,
        )
        .unwrap();
        let mut ws = vec![0.0f32; problem.workspace_len(&cfg())];
        for ls in [0, 1, 96] {
            let bad = cfg().reduce_local_size(ls);
            let err = forward_reduced(&bad, &input, &target, &mut output, &mut ws, 1.0, false);
            assert!(matches!(err, Err(Error::InvalidConfig(_))), "ls {}", ls);
            assert!(problem.workspace_len(&bad) >= n);
        }
        assert_eq!(output.to_vec(), vec![0.0]);

        forward_reduced(&cfg(), &input, &target, &mut output, &mut ws, 1.0, false).unwrap();
        let expected = n as f32 * 0.5 * (0.5f32.ln() + 1.0);
        assert!((output.to_vec()[0] - expected).abs() < 1e-3);
    }

    #[test]
    fn test_backward_rejects_bad_config() {
        let input = Tensor::<f64>::full(4, -1.0);
        let target = Tensor::<f64>::full(4, 0.5);
        let og = Tensor::<f64>::full(4, 1.0);
        let mut ig = Tensor::<f64>::zeros(4);
        let bad = cfg().workers(0);
        let err = backward_unreduced(&bad, &input, &target, &og, Some(&mut ig), None, false);
        assert!(matches!(err, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_target_gradients() {
        let input = Tensor::<f32>::from_f64(&[-0.7, 1.5], 2).unwrap();
        let target = Tensor::<f32>::from_f64(&[0.0, 0.3], 2).unwrap();
        let og = Tensor::<f32>::from_f64(&[5.0, 2.0], 2).unwrap();
        let mut ig = Tensor::<f32>::full(2, 9.0);
        let mut tg = Tensor::<f32>::full(2, 9.0);
        backward_unreduced(&cfg(), &input, &target, &og, Some(&mut ig), Some(&mut tg), false)
            .unwrap();
        let (ig, tg) = (ig.to_vec(), tg.to_vec());
        assert_eq!(tg[0], 0.0);
        // 0 * (log 0 - x) is NaN, so the input gradient is zeroed too.
        assert_eq!(ig[0], 0.0);
        assert!((ig[1] - (-0.3 * 2.0)).abs() < 1e-6);
        let expected = (1.0 + (0.3f32.ln() - 1.5)) * 2.0;
        assert!((tg[1] - expected).abs() < 1e-5);
    }

    #[test]
    fn test_omitted_gradient_is_untouched() {
        let input = Tensor::<f64>::from_f64(&[-0.2, -0.4], 2).unwrap();
        let target = Tensor::<f64>::from_f64(&[0.1, 0.9], 2).unwrap();
        let og = Tensor::<f64>::from_f64(&[1.0], 1).unwrap();
        let mut tg = Tensor::<f64>::full(2, 7.0);
        backward_reduced(&cfg(), &input, &target, &og, None, Some(&mut tg), 2.0, true).unwrap();
        let tg = tg.to_vec();
        let expected = |x: f64, t: f64| (t.exp() * (t - x) + t.exp()) / 2.0;
        assert!((tg[0] - expected(-0.2, 0.1)).abs() < 1e-12);
        assert!((tg[1] - expected(-0.4, 0.9)).abs() < 1e-12);
    }

    #[test]
    fn test_transposed_operand() {
        // target is stored transposed; the kernel must still pair (i, j) with (i, j).
        let xs: Vec<f64> = (0..6).map(|i| -0.1 * i as f64).collect();
        let input = Tensor::<f64>::from_f64(&xs, (2, 3)).unwrap();
        let target = Tensor::<f64>::from_f64(&[0.1, 0.4, 0.2, 0.5, 0.3, 0.6], (3, 2))
            .unwrap()
            .transpose(0, 1)
            .unwrap();
        let mut output = Tensor::<f64>::zeros((2, 3));
        forward_unreduced(&cfg(), &input, &target, &mut output, false).unwrap();
        let t_logical = target.to_vec();
        assert_eq!(t_logical, vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        for (i, y) in output.to_vec().into_iter().enumerate() {
            let t = t_logical[i];
            assert_eq!(y, t * (t.ln() - xs[i]));
        }
    }
}
