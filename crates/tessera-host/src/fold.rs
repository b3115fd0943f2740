use rayon::prelude::*;
use tessera_core::{Element, Error, Result, Tensor};

use crate::write_logical;

/// Sliding-window parameters, one entry per spatial dimension.
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    pub kernel_size: &'a [usize],
    pub stride: &'a [usize],
    pub padding: &'a [usize],
    pub dilation: &'a [usize],
}

/// Image extent, window positions and the per-(p, l) sample map of one
/// `[N, C, *spatial]` image.
struct Plan {
    planes: usize,
    image_volume: usize,
    p: usize,
    l: usize,
    /// `samples[p * L + l]`: flat spatial index sampled, or `None` in the padding.
    samples: Vec<Option<usize>>,
}

impl Plan {
    fn new(window: &Window<'_>, image_dims: &[usize]) -> Result<Self> {
        let spatial = window.kernel_size.len();
        if image_dims.len() != spatial + 2 {
            return Err(Error::RankMismatch {
                expected: spatial + 2,
                got: image_dims.len(),
            });
        }
        let entries = [window.stride.len(), window.padding.len(), window.dilation.len()];
        if spatial == 0 || entries.iter().any(|&e| e != spatial) {
            return Err(Error::msg("window parameters must all have one entry per spatial dim"));
        }
        if window.kernel_size.iter().chain(window.stride).chain(window.dilation).any(|&v| v == 0) {
            return Err(Error::msg("kernel_size, stride and dilation must be positive"));
        }
        let size = &image_dims[2..];
        let mut blocks = Vec::with_capacity(spatial);
        for d in 0..spatial {
            let span = window.dilation[d] * (window.kernel_size[d] - 1) + 1;
            let padded = size[d] + 2 * window.padding[d];
            if padded < span {
                return Err(Error::msg(format!("window does not fit spatial dim {}", d)));
            }
            blocks.push((padded - span) / window.stride[d] + 1);
        }
        let p: usize = window.kernel_size.iter().product();
        let l: usize = blocks.iter().product();

        let mut samples = Vec::with_capacity(p * l);
        for pi in 0..p {
            let kp = unravel(pi, window.kernel_size);
            for li in 0..l {
                let lp = unravel(li, &blocks);
                let mut flat = Some(0usize);
                for d in 0..spatial {
                    let x = (lp[d] * window.stride[d] + kp[d] * window.dilation[d]) as i64
                        - window.padding[d] as i64;
                    flat = match flat {
                        Some(f) if x >= 0 && (x as usize) < size[d] => Some(f * size[d] + x as usize),
                        _ => None,
                    };
                }
                samples.push(flat);
            }
        }
        Ok(Plan {
            planes: image_dims[0] * image_dims[1],
            image_volume: size.iter().product(),
            p,
            l,
            samples,
        })
    }

    fn check_columns(&self, dims: &[usize], channels: usize, batch: usize) -> Result<()> {
        let expected = [batch, channels * self.p, self.l];
        if dims != expected.as_slice() {
            return Err(Error::ShapeMismatch {
                expected: expected.to_vec().into(),
                got: dims.to_vec().into(),
            });
        }
        Ok(())
    }
}

fn unravel(mut idx: usize, sizes: &[usize]) -> Vec<usize> {
    let mut out = vec![0; sizes.len()];
    for d in (0..sizes.len()).rev() {
        out[d] = idx % sizes[d];
        idx /= sizes[d];
    }
    out
}

/// `columns[n, c*P + p, l] = image[n, c, x(p, l)]`, zero in the padding.
fn gather(plan: &Plan, image: &[f64]) -> Vec<f64> {
    (0..plan.planes)
        .into_par_iter()
        .flat_map_iter(|plane| {
            let base = plane * plan.image_volume;
            plan.samples
                .iter()
                .map(move |s| s.map_or(0.0, |x| image[base + x]))
        })
        .collect()
}

/// `image[n, c, x] = Σ columns[n, c*P + p, l]` over every `(p, l)` sampling `x`.
fn accumulate(plan: &Plan, columns: &[f64]) -> Vec<f64> {
    let per_plane = plan.p * plan.l;
    (0..plan.planes)
        .into_par_iter()
        .flat_map_iter(|plane| {
            let cols = &columns[plane * per_plane..(plane + 1) * per_plane];
            let mut image = vec![0.0; plan.image_volume];
            for (s, &v) in plan.samples.iter().zip(cols) {
                if let Some(x) = s {
                    image[*x] += v;
                }
            }
            image
        })
        .collect()
}

fn image_dims(image: &Tensor<impl Element>) -> (usize, usize) {
    let dims = image.dims();
    (dims.first().copied().unwrap_or(0), dims.get(1).copied().unwrap_or(0))
}

pub fn unfold_forward<T: Element>(window: &Window<'_>, input: &Tensor<T>, output: &mut Tensor<T>) -> Result<()> {
    let plan = Plan::new(window, input.dims())?;
    let (n, c) = image_dims(input);
    plan.check_columns(output.dims(), c, n)?;
    tracing::debug!(op = "unfold_forward", p = plan.p, l = plan.l, "host");
    write_logical(output, gather(&plan, &input.to_f64_vec()))
}

pub fn unfold_backward<T: Element>(
    window: &Window<'_>,
    output_grad: &Tensor<T>,
    input_grad: &mut Tensor<T>,
) -> Result<()> {
    let plan = Plan::new(window, input_grad.dims())?;
    let (n, c) = image_dims(input_grad);
    plan.check_columns(output_grad.dims(), c, n)?;
    tracing::debug!(op = "unfold_backward", p = plan.p, l = plan.l, "host");
    write_logical(input_grad, accumulate(&plan, &output_grad.to_f64_vec()))
}

pub fn fold_forward<T: Element>(window: &Window<'_>, input: &Tensor<T>, output: &mut Tensor<T>) -> Result<()> {
    let plan = Plan::new(window, output.dims())?;
    let (n, c) = image_dims(output);
    plan.check_columns(input.dims(), c, n)?;
    tracing::debug!(op = "fold_forward", p = plan.p, l = plan.l, "host");
    write_logical(output, accumulate(&plan, &input.to_f64_vec()))
}

pub fn fold_backward<T: Element>(
    window: &Window<'_>,
    output_grad: &Tensor<T>,
    input_grad: &mut Tensor<T>,
) -> Result<()> {
    let plan = Plan::new(window, output_grad.dims())?;
    let (n, c) = image_dims(output_grad);
    plan.check_columns(input_grad.dims(), c, n)?;
    tracing::debug!(op = "fold_backward", p = plan.p, l = plan.l, "host");
    write_logical(input_grad, gather(&plan, &output_grad.to_f64_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unfold_2x2_on_3x3() {
        let window = Window {
            kernel_size: &[2, 2],
            stride: &[1, 1],
            padding: &[0, 0],
            dilation: &[1, 1],
        };
        let image = Tensor::<f64>::from_f64(&(1..=9).map(f64::from).collect::<Vec<_>>(), (1, 1, 3, 3))
            .unwrap();
        let mut cols = Tensor::<f64>::zeros((1, 4, 4));
        unfold_forward(&window, &image, &mut cols).unwrap();
        assert_eq!(
            cols.to_vec(),
            vec![
                1.0, 2.0, 4.0, 5.0, //
                2.0, 3.0, 5.0, 6.0, //
                4.0, 5.0, 7.0, 8.0, //
                5.0, 6.0, 8.0, 9.0,
            ]
        );
    }

    #[test]
    fn test_fold_of_ones_counts_windows() {
        let window = Window {
            kernel_size: &[3],
            stride: &[2],
            padding: &[1],
            dilation: &[1],
        };
        // L = (5 + 2 - 3) / 2 + 1 = 3
        let cols = Tensor::<f64>::full((1, 3, 3), 1.0);
        let mut image = Tensor::<f64>::zeros((1, 1, 5));
        fold_forward(&window, &cols, &mut image).unwrap();
        assert_eq!(image.to_vec(), vec![1.0, 2.0, 1.0, 2.0, 1.0]);
    }

    #[test]
    fn test_column_shape_checked() {
        let window = Window {
            kernel_size: &[2],
            stride: &[1],
            padding: &[0],
            dilation: &[1],
        };
        let image = Tensor::<f64>::zeros((1, 2, 4));
        let mut cols = Tensor::<f64>::zeros((1, 2, 3));
        assert!(unfold_forward(&window, &image, &mut cols).is_err());
    }
}
