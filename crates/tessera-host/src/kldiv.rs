use tessera_core::{Element, Result, Tensor};

use crate::{check_same_shape, read_scalar, reduce, write_logical, write_scalar};

fn loss(x: f64, t: f64, log_target: bool) -> f64 {
    let y = if log_target {
        t.exp() * (t - x)
    } else {
        t * (t.ln() - x)
    };
    if y.is_nan() {
        0.0
    } else {
        y
    }
}

/// Element-wise loss in logical order, already NaN-clamped.
fn losses<T: Element>(input: &Tensor<T>, target: &Tensor<T>, log_target: bool) -> Result<Vec<f64>> {
    check_same_shape(input.shape(), target.shape())?;
    let (x, t) = (input.to_f64_vec(), target.to_f64_vec());
    Ok(x.iter()
        .zip(&t)
        .map(|(&x, &t)| loss(x, t, log_target))
        .collect())
}

pub fn forward_unreduced<T: Element>(
    input: &Tensor<T>,
    target: &Tensor<T>,
    output: &mut Tensor<T>,
    log_target: bool,
) -> Result<()> {
    check_same_shape(input.shape(), output.shape())?;
    tracing::debug!(op = "kldiv_forward", numel = input.elem_count(), log_target, "host");
    write_logical(output, losses(input, target, log_target)?)
}

/// `Σ loss / divisor`, written to element 0 of `output`.
pub fn forward_reduced<T: Element>(
    input: &Tensor<T>,
    target: &Tensor<T>,
    output: &mut Tensor<T>,
    divisor: f64,
    log_target: bool,
) -> Result<()> {
    let scaled: Vec<f64> = losses(input, target, log_target)?
        .into_iter()
        .map(|v| v / divisor)
        .collect();
    write_scalar(output, reduce::sum(&scaled))
}

pub fn backward_unreduced<T: Element>(
    input: &Tensor<T>,
    target: &Tensor<T>,
    output_grad: &Tensor<T>,
    input_grad: Option<&mut Tensor<T>>,
    target_grad: Option<&mut Tensor<T>>,
    log_target: bool,
) -> Result<()> {
    check_same_shape(input.shape(), output_grad.shape())?;
    let og = output_grad.to_f64_vec();
    backward(input, target, |i| og[i], 1.0, input_grad, target_grad, log_target)
}

pub fn backward_reduced<T: Element>(
    input: &Tensor<T>,
    target: &Tensor<T>,
    output_grad: &Tensor<T>,
    input_grad: Option<&mut Tensor<T>>,
    target_grad: Option<&mut Tensor<T>>,
    divisor: f64,
    log_target: bool,
) -> Result<()> {
    let og = read_scalar(output_grad)?;
    backward(input, target, |_| og, divisor, input_grad, target_grad, log_target)
}

fn backward<T: Element>(
    input: &Tensor<T>,
    target: &Tensor<T>,
    og: impl Fn(usize) -> f64,
    divisor: f64,
    input_grad: Option<&mut Tensor<T>>,
    target_grad: Option<&mut Tensor<T>>,
    log_target: bool,
) -> Result<()> {
    check_same_shape(input.shape(), target.shape())?;
    let (x, t) = (input.to_f64_vec(), target.to_f64_vec());
    let grads: Vec<(f64, f64)> = x
        .iter()
        .zip(&t)
        .enumerate()
        .map(|(i, (&x, &t))| {
            let og = og(i);
            if log_target {
                let exp_t = t.exp();
                let fwd = exp_t * (t - x);
                let ig = if fwd.is_nan() { 0.0 } else { -exp_t / divisor * og };
                (ig, (fwd + exp_t) / divisor * og)
            } else {
                let fwd = t * (t.ln() - x);
                let ig = if fwd.is_nan() { 0.0 } else { -t / divisor * og };
                let tg = if t == 0.0 {
                    0.0
                } else {
                    (1.0 + t.ln() - x) / divisor * og
                };
                (ig, tg)
            }
        })
        .collect();

    if let Some(g) = input_grad {
        write_logical(g, grads.iter().map(|p| p.0))?;
    }
    if let Some(g) = target_grad {
        write_logical(g, grads.iter().map(|p| p.1))?;
    }
    Ok(())
}
