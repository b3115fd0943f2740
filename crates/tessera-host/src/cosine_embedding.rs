use tessera_core::{Element, Error, Result, Tensor};

use crate::{check_same_shape, read_scalar, reduce, write_logical, write_scalar};

/// Per-row `(cos, |x1|, |x2|)` of two `[N, D]` operands.
struct Rows {
    d: usize,
    x1: Vec<f64>,
    x2: Vec<f64>,
    labels: Vec<i32>,
    stats: Vec<(f64, f64, f64)>,
}

impl Rows {
    fn new<T: Element>(input1: &Tensor<T>, input2: &Tensor<T>, target: &Tensor<i32>) -> Result<Self> {
        let (n, d) = match *input1.dims() {
            [n, d] => (n, d),
            _ => {
                return Err(Error::RankMismatch {
                    expected: 2,
                    got: input1.dims().len(),
                })
            }
        };
        if d == 0 {
            return Err(Error::msg("cosine embedding needs at least one feature per row"));
        }
        check_same_shape(input1.shape(), input2.shape())?;
        check_same_shape(&n.into(), target.shape())?;
        let (x1, x2) = (input1.to_f64_vec(), input2.to_f64_vec());
        let stats = (0..n)
            .map(|row| {
                let (a, b) = (&x1[row * d..(row + 1) * d], &x2[row * d..(row + 1) * d]);
                let dot: f64 = a.iter().zip(b).map(|(p, q)| p * q).sum();
                let n1 = a.iter().map(|p| p * p).sum::<f64>().sqrt();
                let n2 = b.iter().map(|q| q * q).sum::<f64>().sqrt();
                (dot / (n1 * n2), n1, n2)
            })
            .collect();
        Ok(Rows {
            d,
            x1,
            x2,
            labels: target.to_vec(),
            stats,
        })
    }

    fn losses(&self, margin: f64) -> impl Iterator<Item = f64> + '_ {
        self.stats.iter().zip(&self.labels).map(move |(&(cos, _, _), &label)| {
            if label == 1 {
                1.0 - cos
            } else {
                (cos - margin).max(0.0)
            }
        })
    }

    /// Gradients of both inputs in logical order, with `scale(row)` applied.
    fn grads(&self, margin: f64, scale: impl Fn(usize) -> f64) -> (Vec<f64>, Vec<f64>) {
        let mut g1 = Vec::with_capacity(self.x1.len());
        let mut g2 = Vec::with_capacity(self.x2.len());
        for (row, (&(cos, n1, n2), &label)) in self.stats.iter().zip(&self.labels).enumerate() {
            let s = scale(row);
            for col in 0..self.d {
                let (i1, i2) = (self.x1[row * self.d + col], self.x2[row * self.d + col]);
                let a = i2 / (n1 * n2) - cos * i1 / (n1 * n1);
                let b = i1 / (n1 * n2) - cos * i2 / (n2 * n2);
                let (a, b) = if label == 1 {
                    (-a, -b)
                } else if cos - margin < 0.0 {
                    (0.0, 0.0)
                } else {
                    (a, b)
                };
                g1.push(a * s);
                g2.push(b * s);
            }
        }
        (g1, g2)
    }
}

pub fn forward_unreduced<T: Element>(
    input1: &Tensor<T>,
    input2: &Tensor<T>,
    target: &Tensor<i32>,
    margin: f64,
    output: &mut Tensor<T>,
) -> Result<()> {
    let rows = Rows::new(input1, input2, target)?;
    check_same_shape(target.shape(), output.shape())?;
    tracing::debug!(op = "cosine_embedding_forward", rows = rows.stats.len(), "host");
    write_logical(output, rows.losses(margin))
}

/// `Σ (loss / divisor)` into element 0 of `output`.
pub fn forward_reduced<T: Element>(
    input1: &Tensor<T>,
    input2: &Tensor<T>,
    target: &Tensor<i32>,
    margin: f64,
    output: &mut Tensor<T>,
    divisor: f64,
) -> Result<()> {
    let rows = Rows::new(input1, input2, target)?;
    let scaled: Vec<f64> = rows.losses(margin).map(|l| l / divisor).collect();
    write_scalar(output, reduce::sum(&scaled))
}

pub fn backward_unreduced<T: Element>(
    input1: &Tensor<T>,
    input2: &Tensor<T>,
    target: &Tensor<i32>,
    margin: f64,
    output_grad: &Tensor<T>,
    input1_grad: Option<&mut Tensor<T>>,
    input2_grad: Option<&mut Tensor<T>>,
) -> Result<()> {
    let rows = Rows::new(input1, input2, target)?;
    check_same_shape(target.shape(), output_grad.shape())?;
    let og = output_grad.to_f64_vec();
    let (g1, g2) = rows.grads(margin, |row| og[row]);
    write_grads(g1, g2, input1_grad, input2_grad)
}

#[allow(clippy::too_many_arguments)]
pub fn backward_reduced<T: Element>(
    input1: &Tensor<T>,
    input2: &Tensor<T>,
    target: &Tensor<i32>,
    margin: f64,
    output_grad: &Tensor<T>,
    input1_grad: Option<&mut Tensor<T>>,
    input2_grad: Option<&mut Tensor<T>>,
    divisor: f64,
) -> Result<()> {
    let rows = Rows::new(input1, input2, target)?;
    let og = read_scalar(output_grad)? / divisor;
    let (g1, g2) = rows.grads(margin, |_| og);
    write_grads(g1, g2, input1_grad, input2_grad)
}

fn write_grads<T: Element>(
    g1: Vec<f64>,
    g2: Vec<f64>,
    input1_grad: Option<&mut Tensor<T>>,
    input2_grad: Option<&mut Tensor<T>>,
) -> Result<()> {
    if let Some(g) = input1_grad {
        write_logical(g, g1)?;
    }
    if let Some(g) = input2_grad {
        write_logical(g, g2)?;
    }
    Ok(())
}
