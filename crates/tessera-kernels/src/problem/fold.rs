use tessera_core::{bail, Error, KernelConfig, LaunchDims, Result, TensorDesc};

use super::check_rank;

/// Sliding-window parameters, one entry per spatial dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldParams {
    pub kernel_size: Vec<usize>,
    pub stride: Vec<usize>,
    pub padding: Vec<usize>,
    pub dilation: Vec<usize>,
}

impl FoldParams {
    /// Window of `kernel_size` with stride 1, no padding, dilation 1.
    pub fn new(kernel_size: impl Into<Vec<usize>>) -> Self {
        let kernel_size = kernel_size.into();
        let spatial = kernel_size.len();
        FoldParams {
            kernel_size,
            stride: vec![1; spatial],
            padding: vec![0; spatial],
            dilation: vec![1; spatial],
        }
    }

    pub fn stride(mut self, s: impl Into<Vec<usize>>) -> Self {
        self.stride = s.into();
        self
    }

    pub fn padding(mut self, p: impl Into<Vec<usize>>) -> Self {
        self.padding = p.into();
        self
    }

    pub fn dilation(mut self, d: impl Into<Vec<usize>>) -> Self {
        self.dilation = d.into();
        self
    }

    pub fn spatial_dims(&self) -> usize {
        self.kernel_size.len()
    }

    /// Positions inside one window (`P`).
    pub fn kernel_volume(&self) -> usize {
        self.kernel_size.iter().product()
    }

    /// Window positions along each spatial dimension (`L_d`):
    /// `(in + 2*pad - dil*(k - 1) - 1) / stride + 1`.
    pub fn block_counts(&self, spatial: &[usize]) -> Result<Vec<usize>> {
        self.validate()?;
        if spatial.len() != self.spatial_dims() {
            return Err(Error::RankMismatch {
                expected: self.spatial_dims(),
                got: spatial.len(),
            });
        }
        spatial
            .iter()
            .enumerate()
            .map(|(d, &size)| {
                let span = self.dilation[d] * (self.kernel_size[d] - 1) + 1;
                let padded = size + 2 * self.padding[d];
                if padded < span {
                    return Err(Error::msg(format!(
                        "window of span {} does not fit padded size {} in spatial dim {}",
                        span, padded, d
                    )));
                }
                Ok((padded - span) / self.stride[d] + 1)
            })
            .collect()
    }

    fn validate(&self) -> Result<()> {
        let spatial = self.spatial_dims();
        if !(1..=3).contains(&spatial) {
            bail!("fold/unfold supports 1 to 3 spatial dims, got {}", spatial);
        }
        for (name, v) in [
            ("stride", &self.stride),
            ("padding", &self.padding),
            ("dilation", &self.dilation),
        ] {
            if v.len() != spatial {
                bail!("{} has {} entries for {} spatial dims", name, v.len(), spatial);
            }
        }
        for (name, v) in [
            ("kernel_size", &self.kernel_size),
            ("stride", &self.stride),
            ("dilation", &self.dilation),
        ] {
            if v.iter().any(|&x| x == 0) {
                bail!("{} entries must be positive", name);
            }
        }
        Ok(())
    }
}

/// A sliding-window problem shared by fold and unfold.
///
/// `image` is the `[N, C, *spatial]` tensor (unfold input, fold output) and
/// `columns` the `[N, C * P, L]` tensor (unfold output, fold input), where
/// `P` is the kernel volume and `L` the number of window positions.
#[derive(Debug, Clone)]
pub struct FoldProblem {
    pub image: TensorDesc,
    pub columns: TensorDesc,
    pub params: FoldParams,
    block_counts: Vec<usize>,
}

impl FoldProblem {
    pub fn new(image: TensorDesc, columns: TensorDesc, params: FoldParams) -> Result<Self> {
        let spatial = params.spatial_dims();
        check_rank(&image, spatial + 2)?;
        check_rank(&columns, 3)?;
        let block_counts = params.block_counts(&image.dims()[2..])?;
        let n = image.dims()[0];
        let c = image.dims()[1];
        let expected = [n, c * params.kernel_volume(), block_counts.iter().product()];
        if columns.dims() != expected {
            return Err(Error::ShapeMismatch {
                expected: tessera_core::Shape::from(expected.to_vec()),
                got: columns.shape().clone(),
            });
        }
        Ok(FoldProblem {
            image,
            columns,
            params,
            block_counts,
        })
    }

    /// Window positions per spatial dimension.
    pub fn block_counts(&self) -> &[usize] {
        &self.block_counts
    }

    /// Total window positions `L`.
    pub fn blocks(&self) -> usize {
        self.block_counts.iter().product()
    }

    /// One work item per column element (unfold forward, fold backward).
    pub fn columns_launch(&self, cfg: &KernelConfig) -> LaunchDims {
        LaunchDims::new(self.columns.elem_count(), cfg.local_size)
    }

    /// One work item per image element (unfold backward, fold forward).
    pub fn image_launch(&self, cfg: &KernelConfig) -> LaunchDims {
        LaunchDims::new(self.image.elem_count(), cfg.local_size)
    }
}
