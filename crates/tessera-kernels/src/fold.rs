use tessera_core::{
    scatter, Element, Grid, KernelConfig, Result, Tensor, TensorLayout, MAX_RANK,
};

use crate::problem::{FoldParams, FoldProblem};

// Unfold ("im2col") and its transpose fold ("col2im")
//
// With P positions inside the window and L window positions, an image
// [N, C, *spatial] corresponds to columns [N, C*P, L]. Window position l
// and kernel position p sample the image at
//
//     x_d = l_d * stride_d - pad_d + p_d * dil_d
//
// Gather (unfold forward, fold backward): one work item per column element
// reads that image element, or 0 in the padding.
//
// Accumulate (unfold backward, fold forward): one work item per image
// element walks every kernel position, inverts the map
//
//     l_d = (x_d + pad_d - p_d * dil_d) / stride_d
//
// keeping only exact divisions that land inside [0, L_d), and sums the
// matching column elements. No two items write the same image element.

const MAX_SPATIAL: usize = MAX_RANK - 2;

/// Window geometry padded to three spatial dims (extra dims are size 1).
#[derive(Debug, Clone, Copy)]
struct Geometry {
    n: usize,
    c: usize,
    p: usize,
    l: usize,
    spatial: usize,
    image: [i64; MAX_SPATIAL],
    kernel: [usize; MAX_SPATIAL],
    blocks: [usize; MAX_SPATIAL],
    stride: [i64; MAX_SPATIAL],
    padding: [i64; MAX_SPATIAL],
    dilation: [i64; MAX_SPATIAL],
}

impl Geometry {
    fn new(problem: &FoldProblem) -> Self {
        let dims = problem.image.dims();
        let params = &problem.params;
        let spatial = params.spatial_dims();
        let mut g = Geometry {
            n: dims[0],
            c: dims[1],
            p: params.kernel_volume(),
            l: problem.blocks(),
            spatial,
            image: [1; MAX_SPATIAL],
            kernel: [1; MAX_SPATIAL],
            blocks: [1; MAX_SPATIAL],
            stride: [1; MAX_SPATIAL],
            padding: [0; MAX_SPATIAL],
            dilation: [1; MAX_SPATIAL],
        };
        for d in 0..spatial {
            g.image[d] = dims[d + 2] as i64;
            g.kernel[d] = params.kernel_size[d];
            g.blocks[d] = problem.block_counts()[d];
            g.stride[d] = params.stride[d] as i64;
            g.padding[d] = params.padding[d] as i64;
            g.dilation[d] = params.dilation[d] as i64;
        }
        g
    }

    /// Row-major decomposition of `idx` over `sizes[..spatial]`.
    #[inline]
    fn split(&self, mut idx: usize, sizes: &[usize; MAX_SPATIAL]) -> [usize; MAX_SPATIAL] {
        let mut out = [0; MAX_SPATIAL];
        for d in (0..self.spatial).rev() {
            out[d] = idx % sizes[d];
            idx /= sizes[d];
        }
        out
    }

    #[inline]
    fn image_coords(&self, n: usize, c: usize, x: &[usize; MAX_SPATIAL]) -> TensorLayout<MAX_RANK> {
        let mut coords = [0; MAX_RANK];
        coords[0] = n;
        coords[1] = c;
        coords[2..2 + self.spatial].copy_from_slice(&x[..self.spatial]);
        TensorLayout::new(coords)
    }
}

/// Gather: `columns[n, c*P + p, l] = image[n, c, x(l, p)]`.
fn gather<T: Element>(
    cfg: &KernelConfig,
    kernel: &'static str,
    problem: &FoldProblem,
    image: &Tensor<T>,
    columns: &mut Tensor<T>,
) -> Result<()> {
    let image_tv = image.view::<MAX_RANK>()?;
    let columns_tv = columns.view::<3>()?;
    let g = Geometry::new(problem);
    let dims = problem.columns_launch(cfg);
    tracing::debug!(
        kernel,
        dtype = %T::DTYPE,
        global_size = dims.global_size,
        local_size = dims.local_size,
        spatial = g.spatial,
        "launch"
    );

    let src = image.data();
    let writes = Grid::new(dims).map(|gid| {
        let (ncp, l) = (gid / g.l, gid % g.l);
        let (nc, p) = (ncp / g.p, ncp % g.p);
        let (n, c) = (nc / g.c, nc % g.c);
        if n >= g.n {
            return None;
        }
        let kp = g.split(p, &g.kernel);
        let lp = g.split(l, &g.blocks);
        let mut x = [0usize; MAX_SPATIAL];
        let mut inside = true;
        for d in 0..g.spatial {
            let xd = lp[d] as i64 * g.stride[d] - g.padding[d] + kp[d] as i64 * g.dilation[d];
            if xd < 0 || xd >= g.image[d] {
                inside = false;
                break;
            }
            x[d] = xd as usize;
        }
        let value = if inside {
            src[image_tv.offset(&g.image_coords(n, c, &x))]
        } else {
            T::zero()
        };
        let dst = columns_tv.offset(&TensorLayout::new([n, c * g.p + p, l]));
        Some((dst, value))
    });
    scatter(columns.data_mut(), writes);
    Ok(())
}

/// Accumulate: `image[n, c, x] = Σ columns[n, c*P + p, l]` over every
/// `(p, l)` whose window samples `x`.
fn accumulate<T: Element>(
    cfg: &KernelConfig,
    kernel: &'static str,
    problem: &FoldProblem,
    columns: &Tensor<T>,
    image: &mut Tensor<T>,
) -> Result<()> {
    let image_tv = image.view::<MAX_RANK>()?;
    let columns_tv = columns.view::<3>()?;
    let g = Geometry::new(problem);
    let dims = problem.image_launch(cfg);
    tracing::debug!(
        kernel,
        dtype = %T::DTYPE,
        global_size = dims.global_size,
        local_size = dims.local_size,
        spatial = g.spatial,
        "launch"
    );

    let src = columns.data();
    let writes = Grid::new(dims).map(|gid| {
        let tl = TensorLayout::from_flat(&image_tv, gid);
        if !image_tv.contains(&tl) {
            return None;
        }
        let (n, c) = (tl[0], tl[1]);
        let mut sum = <T::Accum as num_traits::Zero>::zero();
        'positions: for p in 0..g.p {
            let kp = g.split(p, &g.kernel);
            let mut l = 0usize;
            for d in 0..g.spatial {
                let shifted = tl[d + 2] as i64 + g.padding[d] - kp[d] as i64 * g.dilation[d];
                if shifted % g.stride[d] != 0 {
                    continue 'positions;
                }
                let ld = shifted / g.stride[d];
                if ld < 0 || ld >= g.blocks[d] as i64 {
                    continue 'positions;
                }
                l = l * g.blocks[d] + ld as usize;
            }
            let off = columns_tv.offset(&TensorLayout::new([n, c * g.p + p, l]));
            sum = sum + src[off].to_accum();
        }
        Some((image_tv.offset(&tl), T::from_accum(sum)))
    });
    scatter(image.data_mut(), writes);
    Ok(())
}

/// Extract sliding windows of `input` (`[N, C, *spatial]`) into `output`
/// (`[N, C*P, L]`).
pub fn unfold_forward<T: Element>(
    cfg: &KernelConfig,
    params: &FoldParams,
    input: &Tensor<T>,
    output: &mut Tensor<T>,
) -> Result<()> {
    cfg.validate()?;
    let problem = FoldProblem::new(input.desc(), output.desc(), params.clone())?;
    gather(cfg, "unfold_forward", &problem, input, output)
}

/// Gradient of [`unfold_forward`]: overlapping windows add up.
pub fn unfold_backward<T: Element>(
    cfg: &KernelConfig,
    params: &FoldParams,
    output_grad: &Tensor<T>,
    input_grad: &mut Tensor<T>,
) -> Result<()> {
    cfg.validate()?;
    let problem = FoldProblem::new(input_grad.desc(), output_grad.desc(), params.clone())?;
    accumulate(cfg, "unfold_backward", &problem, output_grad, input_grad)
}

/// Sum columns `input` (`[N, C*P, L]`) back into an image `output`
/// (`[N, C, *output_size]`).
pub fn fold_forward<T: Element>(
    cfg: &KernelConfig,
    params: &FoldParams,
    input: &Tensor<T>,
    output: &mut Tensor<T>,
) -> Result<()> {
    cfg.validate()?;
    let problem = FoldProblem::new(output.desc(), input.desc(), params.clone())?;
    accumulate(cfg, "fold_forward", &problem, input, output)
}

/// Gradient of [`fold_forward`]: each column element reads the image
/// gradient it was summed into.
pub fn fold_backward<T: Element>(
    cfg: &KernelConfig,
    params: &FoldParams,
    output_grad: &Tensor<T>,
    input_grad: &mut Tensor<T>,
) -> Result<()> {
    cfg.validate()?;
    let problem = FoldProblem::new(output_grad.desc(), input_grad.desc(), params.clone())?;
    gather(cfg, "fold_backward", &problem, output_grad, input_grad)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> KernelConfig {
        KernelConfig::default().local_size(32)
    }

    #[test]
    fn test_unfold_2x2_no_padding() {
        // 1x1x3x3 image, 2x2 window -> 4 positions of 4 values.
        let image = Tensor::<f32>::from_f64(&(0..9).map(|v| v as f64).collect::<Vec<_>>(), (1, 1, 3, 3))
            .unwrap();
        let mut cols = Tensor::<f32>::zeros((1, 4, 4));
        unfold_forward(&cfg(), &FoldParams::new([2, 2]), &image, &mut cols).unwrap();
        #[rustfmt::skip]
        let expected = vec![
            0.0, 1.0, 3.0, 4.0,
            1.0, 2.0, 4.0, 5.0,
            3.0, 4.0, 6.0, 7.0,
            4.0, 5.0, 7.0, 8.0,
        ];
        assert_eq!(cols.to_vec(), expected);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let image = Tensor::<f32>::zeros((1, 1, 3, 3));
        let mut cols = Tensor::<f32>::full((1, 4, 4), 2.0);
        let params = FoldParams::new([2, 2]);
        for bad in [cfg().local_size(0), cfg().workers(0)] {
            assert!(unfold_forward(&bad, &params, &image, &mut cols).is_err());
        }
        let mut image = Tensor::<f32>::zeros((1, 1, 3, 3));
        assert!(fold_forward(&cfg().row_local_size(48), &params, &cols, &mut image).is_err());
        assert_eq!(cols.to_vec(), vec![2.0; 16]);
    }

    #[test]
    fn test_padding_reads_zero() {
        let image = Tensor::<f64>::full((1, 1, 2), 5.0);
        let params = FoldParams::new([3]).padding([1]);
        // L = (2 + 2 - 3) / 1 + 1 = 2
        let mut cols = Tensor::<f64>::full((1, 3, 2), -1.0);
        unfold_forward(&cfg(), &params, &image, &mut cols).unwrap();
        // rows are kernel positions, columns window positions
        assert_eq!(cols.to_vec(), vec![0.0, 5.0, 5.0, 5.0, 5.0, 0.0]);
    }

    #[test]
    fn test_backward_counts_overlaps() {
        let params = FoldParams::new([2, 2]);
        let grad = Tensor::<f64>::full((1, 4, 4), 1.0);
        let mut image_grad = Tensor::<f64>::zeros((1, 1, 3, 3));
        unfold_backward(&cfg(), &params, &grad, &mut image_grad).unwrap();
        assert_eq!(
            image_grad.to_vec(),
            vec![1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0]
        );
    }

    #[test]
    fn test_strided_dilated_1d_overlap() {
        // in 7, k 2, stride 2, dilation 3, padding 1:
        // L = (7 + 2 - 3 - 1) / 2 + 1 = 3; windows sample x = {-1, 2}, {1, 4}, {3, 6}.
        let params = FoldParams::new([2]).stride([2]).padding([1]).dilation([3]);
        let grad = Tensor::<f64>::full((1, 2, 3), 1.0);
        let mut image_grad = Tensor::<f64>::zeros((1, 1, 7));
        unfold_backward(&cfg(), &params, &grad, &mut image_grad).unwrap();
        assert_eq!(image_grad.to_vec(), vec![0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_fold_is_transpose_of_unfold() {
        // <unfold(x), y> == <x, fold(y)>
        let params = FoldParams::new([2, 3]).stride([1, 2]).padding([1, 0]);
        let image_shape = (2, 3, 4, 5);
        let numel = 2 * 3 * 4 * 5;
        let x: Vec<f64> = (0..numel).map(|i| ((i * 37) % 11) as f64 - 5.0).collect();
        let blocks = params.block_counts(&[4, 5]).unwrap();
        let cols_shape = (2, 3 * 6, blocks[0] * blocks[1]);
        let cols_numel = 2 * 18 * blocks[0] * blocks[1];
        let y: Vec<f64> = (0..cols_numel).map(|i| ((i * 13) % 7) as f64 - 3.0).collect();

        let x_t = Tensor::<f64>::from_f64(&x, image_shape).unwrap();
        let y_t = Tensor::<f64>::from_f64(&y, cols_shape).unwrap();
        let mut ux = Tensor::<f64>::zeros(cols_shape);
        unfold_forward(&cfg(), &params, &x_t, &mut ux).unwrap();
        let mut fy = Tensor::<f64>::zeros(image_shape);
        fold_forward(&cfg(), &params, &y_t, &mut fy).unwrap();

        let lhs: f64 = ux.to_vec().iter().zip(&y).map(|(a, b)| a * b).sum();
        let rhs: f64 = x.iter().zip(fy.to_vec()).map(|(a, b)| a * b).sum();
        assert_eq!(lhs, rhs);

        let mut fb = Tensor::<f64>::zeros(cols_shape);
        fold_backward(&cfg(), &params, &x_t, &mut fb).unwrap();
        assert_eq!(fb.to_vec(), ux.to_vec());
    }

    #[test]
    fn test_permuted_image() {
        // Same logical image stored channels-last.
        let dense: Vec<f64> = (0..18).map(|v| v as f64).collect();
        let logical = Tensor::<f64>::from_f64(&dense, (1, 2, 3, 3)).unwrap();
        let mut nhwc = vec![0.0f64; 18];
        for c in 0..2 {
            for h in 0..3 {
                for w in 0..3 {
                    nhwc[(h * 3 + w) * 2 + c] = dense[c * 9 + h * 3 + w];
                }
            }
        }
        let permuted = Tensor::from_vec(nhwc, (1, 3, 3, 2))
            .unwrap()
            .permute(&[0, 3, 1, 2])
            .unwrap();
        assert_eq!(permuted.to_vec(), logical.to_vec());

        let params = FoldParams::new([2, 2]);
        let mut a = Tensor::<f64>::zeros((1, 8, 4));
        let mut b = Tensor::<f64>::zeros((1, 8, 4));
        unfold_forward(&cfg(), &params, &logical, &mut a).unwrap();
        unfold_forward(&cfg(), &params, &permuted, &mut b).unwrap();
        assert_eq!(a.to_vec(), b.to_vec());
    }
}
