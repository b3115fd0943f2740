use tessera_core::{Element, Error, Result, Tensor};

use crate::{check_same_shape, write_logical};

/// `(max, ln Σ exp(x - max))` of one row.
fn log_sum_exp(row: &[f64]) -> (f64, f64) {
    let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let sum: f64 = row.iter().map(|&x| (x - max).exp()).sum();
    (max, sum.ln())
}

fn batch_and_classes(input: &Tensor<impl Element>) -> Result<(usize, usize)> {
    match *input.dims() {
        [batch, num_class] => Ok((batch, num_class)),
        _ => Err(Error::RankMismatch {
            expected: 2,
            got: input.dims().len(),
        }),
    }
}

/// Row losses into `output` (`[batch]`) and `softmax(input) - target` into
/// `backprop`. Operands may have any strides.
pub fn forward<T: Element>(
    input: &Tensor<T>,
    target: &Tensor<T>,
    output: &mut Tensor<T>,
    backprop: &mut Tensor<T>,
) -> Result<()> {
    let (batch, num_class) = batch_and_classes(input)?;
    check_same_shape(input.shape(), target.shape())?;
    check_same_shape(input.shape(), backprop.shape())?;
    check_same_shape(&batch.into(), output.shape())?;
    tracing::debug!(op = "softmax_ce_forward", batch, num_class, "host");

    let (x, t) = (input.to_f64_vec(), target.to_f64_vec());
    let mut losses = Vec::with_capacity(batch);
    let mut bp = Vec::with_capacity(batch * num_class);
    for (xr, tr) in x.chunks(num_class.max(1)).zip(t.chunks(num_class.max(1))) {
        let (max, log_sum) = log_sum_exp(xr);
        let mut loss = 0.0;
        for (&x, &t) in xr.iter().zip(tr) {
            let log_p = x - max - log_sum;
            loss -= t * log_p;
            bp.push(log_p.exp() - t);
        }
        losses.push(loss);
    }
    write_logical(output, losses)?;
    write_logical(backprop, bp)
}

/// `input_grad = output_grad[row] * backprop`,
/// `target_grad = output_grad[row] * (max + log_sum - input)`.
pub fn backward<T: Element>(
    output_grad: &Tensor<T>,
    backprop: &Tensor<T>,
    input: &Tensor<T>,
    input_grad: Option<&mut Tensor<T>>,
    target_grad: Option<&mut Tensor<T>>,
) -> Result<()> {
    let (batch, num_class) = batch_and_classes(input)?;
    check_same_shape(input.shape(), backprop.shape())?;
    check_same_shape(&batch.into(), output_grad.shape())?;
    tracing::debug!(op = "softmax_ce_backward", batch, num_class, "host");

    let og = output_grad.to_f64_vec();
    let width = num_class.max(1);
    if let Some(g) = input_grad {
        check_same_shape(input.shape(), g.shape())?;
        let bp = backprop.to_f64_vec();
        let values: Vec<f64> = bp
            .chunks(width)
            .zip(&og)
            .flat_map(|(row, &og)| row.iter().map(move |&b| og * b))
            .collect();
        write_logical(g, values)?;
    }
    if let Some(g) = target_grad {
        check_same_shape(input.shape(), g.shape())?;
        let x = input.to_f64_vec();
        let values: Vec<f64> = x
            .chunks(width)
            .zip(&og)
            .flat_map(|(row, &og)| {
                let (max, log_sum) = log_sum_exp(row);
                row.iter().map(move |&x| og * (max + log_sum - x))
            })
            .collect();
        write_logical(g, values)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_logits() {
        let input = Tensor::<f64>::from_f64(&[0.0; 8], (2, 4)).unwrap();
        let target = Tensor::<f64>::from_f64(&[1.0, 0.0, 0.0, 0.0, 0.25, 0.25, 0.25, 0.25], (2, 4))
            .unwrap();
        let mut out = Tensor::<f64>::zeros(2);
        let mut bp = Tensor::<f64>::zeros((2, 4));
        forward(&input, &target, &mut out, &mut bp).unwrap();
        let ln4 = 4f64.ln();
        for v in out.to_vec() {
            assert!((v - ln4).abs() < 1e-12);
        }
        let bp = bp.to_vec();
        assert!((bp[0] + 0.75).abs() < 1e-12);
        assert!(bp[4].abs() < 1e-12);
    }

    #[test]
    fn test_shift_invariance() {
        let a = Tensor::<f64>::from_f64(&[1.0, 2.0, 3.0], (1, 3)).unwrap();
        let b = Tensor::<f64>::from_f64(&[101.0, 102.0, 103.0], (1, 3)).unwrap();
        let target = Tensor::<f64>::from_f64(&[0.2, 0.3, 0.5], (1, 3)).unwrap();
        let mut la = Tensor::<f64>::zeros(1);
        let mut lb = Tensor::<f64>::zeros(1);
        let mut bp = Tensor::<f64>::zeros((1, 3));
        forward(&a, &target, &mut la, &mut bp).unwrap();
        forward(&b, &target, &mut lb, &mut bp).unwrap();
        assert!((la.to_vec()[0] - lb.to_vec()[0]).abs() < 1e-9);
    }

    #[test]
    fn test_rank_checked() {
        let input = Tensor::<f64>::zeros(4);
        let mut out = Tensor::<f64>::zeros(1);
        let mut bp = Tensor::<f64>::zeros(4);
        assert!(forward(&input, &input, &mut out, &mut bp).is_err());
    }
}
