use tessera_core::{DType, Error, KernelConfig, LaunchDims, Result, TensorDesc};

use super::{check_rank, check_same_shape, check_scalar, Reduction};
use crate::reduce::{loss_sum_passes, SumPlan};

// Cosine embedding loss comes in two families of kernels:
//
//   Sum:     a norm kernel writes x1*x2, x1*x1, x2*x2 for every element into
//            a [3, N, D] workspace, the two-phase row sum folds that to
//            [3, N], and the loss (or gradient) kernel reads three numbers
//            per row.
//   NonSum:  every work item recomputes the three row sums it needs. No
//            workspace for the sums, but O(D) reads per item.
//
// NonSum wins on small problems and loses badly on wide rows; the cut-off
// shapes below are measured thresholds, not correctness bounds.

/// Forward unreduced kernels use this work-group size.
pub const LOCAL_SIZE_FWD_UNREDUCED: usize = 256;
/// Per-row forward kernels in reduced mode.
pub const LOCAL_SIZE_FWD: usize = 1024;
/// Backward kernels.
pub const LOCAL_SIZE_BWD: usize = 1024;

/// Kernel family used for a cosine embedding problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CosineVariant {
    Sum,
    NonSum,
}

fn check_inputs(
    input1: &TensorDesc,
    input2: &TensorDesc,
    target: &TensorDesc,
) -> Result<()> {
    check_rank(input1, 2)?;
    check_same_shape(input1, input2)?;
    check_rank(target, 1)?;
    if input1.dims()[1] == 0 {
        return Err(Error::msg("cosine embedding needs at least one feature per row"));
    }
    if target.dims()[0] != input1.dims()[0] {
        return Err(Error::ShapeMismatch {
            expected: tessera_core::Shape::from(input1.dims()[0]),
            got: target.shape().clone(),
        });
    }
    if target.dtype() != DType::I32 {
        return Err(Error::msg(format!(
            "cosine embedding target must be i32, got {}",
            target.dtype()
        )));
    }
    Ok(())
}

fn check_packed(operands: &[(&'static str, &TensorDesc)]) -> Result<()> {
    for (name, desc) in operands {
        if !desc.layout().is_packed() {
            return Err(Error::msg(format!("{} has overlapping or gapped strides", name)));
        }
    }
    Ok(())
}

/// Sum-path workspace: the [3, N, D] products plus the plan's scratch.
fn sum_workspace_len(cfg: &KernelConfig, n: usize, d: usize) -> usize {
    3 * n * d + SumPlan::new(cfg, 3 * n, d).scratch_len()
}

/// Cosine embedding loss forward.
#[derive(Debug, Clone)]
pub struct CosineForwardProblem {
    pub input1: TensorDesc,
    pub input2: TensorDesc,
    pub target: TensorDesc,
    pub output: TensorDesc,
    pub reduction: Reduction,
}

impl CosineForwardProblem {
    pub fn new(
        input1: TensorDesc,
        input2: TensorDesc,
        target: TensorDesc,
        output: TensorDesc,
        reduction: Reduction,
    ) -> Result<Self> {
        check_inputs(&input1, &input2, &target)?;
        match reduction {
            Reduction::None => {
                check_rank(&output, 1)?;
                check_same_shape(&target, &output)?;
            }
            Reduction::Reduced { .. } => check_scalar(&output)?,
        }
        check_packed(&[
            ("input1", &input1),
            ("input2", &input2),
            ("target", &target),
            ("output", &output),
        ])?;
        Ok(CosineForwardProblem {
            input1,
            input2,
            target,
            output,
            reduction,
        })
    }

    pub fn n(&self) -> usize {
        self.input1.dims()[0]
    }

    pub fn d(&self) -> usize {
        self.input1.dims()[1]
    }

    /// Whether `variant` can run this problem. NonSum only exists for the
    /// reduced forward, and only below the measured width thresholds.
    pub fn is_applicable(&self, variant: CosineVariant) -> bool {
        match variant {
            CosineVariant::Sum => true,
            CosineVariant::NonSum => {
                let (n, d) = (self.n(), self.d());
                self.reduction.is_reduced() && !((n >= 768 && d >= 128) || d >= 2000)
            }
        }
    }

    /// Preferred applicable variant.
    pub fn select(&self) -> CosineVariant {
        let variant = if self.is_applicable(CosineVariant::NonSum) {
            CosineVariant::NonSum
        } else {
            CosineVariant::Sum
        };
        tracing::debug!(op = "cosine_embedding_forward", ?variant, n = self.n(), d = self.d(), "selected");
        variant
    }

    pub fn check_variant(&self, variant: CosineVariant) -> Result<()> {
        if !self.is_applicable(variant) {
            tracing::trace!(?variant, n = self.n(), d = self.d(), "cosine forward variant rejected");
            return Err(Error::not_applicable(
                "cosine_embedding_forward",
                format!("{:?} does not handle [{}, {}]", variant, self.n(), self.d()),
            ));
        }
        Ok(())
    }

    pub fn sum_plan(&self, cfg: &KernelConfig) -> SumPlan {
        SumPlan::new(cfg, 3 * self.n(), self.d())
    }

    /// Accumulator elements of workspace for `variant`.
    pub fn workspace_len(&self, cfg: &KernelConfig, variant: CosineVariant) -> usize {
        match variant {
            CosineVariant::Sum => sum_workspace_len(cfg, self.n(), self.d()),
            CosineVariant::NonSum => {
                let n = self.n();
                let ls = cfg.reduce_local_size.max(1);
                if n <= ls {
                    n
                } else {
                    n + (n + ls - 1) / ls
                }
            }
        }
    }

    pub fn workspace_size_in_bytes(&self, cfg: &KernelConfig, variant: CosineVariant) -> usize {
        self.workspace_len(cfg, variant) * self.output.dtype().size_in_bytes()
    }

    pub fn launch_dims(&self, cfg: &KernelConfig, variant: CosineVariant) -> Vec<LaunchDims> {
        let (n, d) = (self.n(), self.d());
        let ls = cfg.reduce_local_size.max(1);
        let mut dims = Vec::new();
        match variant {
            CosineVariant::Sum => {
                dims.push(LaunchDims::new(n * d, ls));
                dims.extend(self.sum_plan(cfg).launches(cfg));
                let local = if self.reduction.is_reduced() {
                    LOCAL_SIZE_FWD
                } else {
                    LOCAL_SIZE_FWD_UNREDUCED
                };
                dims.push(LaunchDims::new(n, local));
            }
            CosineVariant::NonSum => dims.push(LaunchDims::new(n, LOCAL_SIZE_FWD)),
        }
        if self.reduction.is_reduced() {
            let mut size = n;
            for _ in 0..loss_sum_passes(size, ls) {
                dims.push(LaunchDims::new(size, ls));
                size = (size + ls - 1) / ls;
            }
        }
        dims
    }
}

/// Cosine embedding loss backward. Either gradient may be omitted.
#[derive(Debug, Clone)]
pub struct CosineBackwardProblem {
    pub input1: TensorDesc,
    pub input2: TensorDesc,
    pub target: TensorDesc,
    pub output_grad: TensorDesc,
    pub input1_grad: Option<TensorDesc>,
    pub input2_grad: Option<TensorDesc>,
    pub reduction: Reduction,
}

impl CosineBackwardProblem {
    pub fn new(
        input1: TensorDesc,
        input2: TensorDesc,
        target: TensorDesc,
        output_grad: TensorDesc,
        input1_grad: Option<TensorDesc>,
        input2_grad: Option<TensorDesc>,
        reduction: Reduction,
    ) -> Result<Self> {
        check_inputs(&input1, &input2, &target)?;
        match reduction {
            Reduction::None => {
                check_rank(&output_grad, 1)?;
                check_same_shape(&target, &output_grad)?;
            }
            Reduction::Reduced { .. } => check_scalar(&output_grad)?,
        }
        let mut operands = vec![
            ("input1", &input1),
            ("input2", &input2),
            ("target", &target),
            ("output_grad", &output_grad),
        ];
        if let Some(g) = &input1_grad {
            check_same_shape(&input1, g)?;
            operands.push(("input1_grad", g));
        }
        if let Some(g) = &input2_grad {
            check_same_shape(&input1, g)?;
            operands.push(("input2_grad", g));
        }
        check_packed(&operands)?;
        Ok(CosineBackwardProblem {
            input1,
            input2,
            target,
            output_grad,
            input1_grad,
            input2_grad,
            reduction,
        })
    }

    pub fn n(&self) -> usize {
        self.input1.dims()[0]
    }

    pub fn d(&self) -> usize {
        self.input1.dims()[1]
    }

    /// NonSum backward is only worthwhile while `N < 237 || D < 80` and
    /// `D < 200`.
    pub fn is_applicable(&self, variant: CosineVariant) -> bool {
        match variant {
            CosineVariant::Sum => true,
            CosineVariant::NonSum => {
                let (n, d) = (self.n(), self.d());
                !((n >= 237 && d >= 80) || d >= 200)
            }
        }
    }

    pub fn select(&self) -> CosineVariant {
        let variant = if self.is_applicable(CosineVariant::NonSum) {
            CosineVariant::NonSum
        } else {
            CosineVariant::Sum
        };
        tracing::debug!(op = "cosine_embedding_backward", ?variant, n = self.n(), d = self.d(), "selected");
        variant
    }

    pub fn check_variant(&self, variant: CosineVariant) -> Result<()> {
        if !self.is_applicable(variant) {
            tracing::trace!(?variant, n = self.n(), d = self.d(), "cosine backward variant rejected");
            return Err(Error::not_applicable(
                "cosine_embedding_backward",
                format!("{:?} does not handle [{}, {}]", variant, self.n(), self.d()),
            ));
        }
        Ok(())
    }

    pub fn sum_plan(&self, cfg: &KernelConfig) -> SumPlan {
        SumPlan::new(cfg, 3 * self.n(), self.d())
    }

    pub fn workspace_len(&self, cfg: &KernelConfig, variant: CosineVariant) -> usize {
        match variant {
            CosineVariant::Sum => sum_workspace_len(cfg, self.n(), self.d()),
            CosineVariant::NonSum => 0,
        }
    }

    pub fn workspace_size_in_bytes(&self, cfg: &KernelConfig, variant: CosineVariant) -> usize {
        let dtype = self
            .input1_grad
            .as_ref()
            .or(self.input2_grad.as_ref())
            .unwrap_or(&self.input1)
            .dtype();
        self.workspace_len(cfg, variant) * dtype.size_in_bytes()
    }

    pub fn launch_dims(&self, cfg: &KernelConfig, variant: CosineVariant) -> Vec<LaunchDims> {
        let (n, d) = (self.n(), self.d());
        let mut dims = Vec::new();
        if variant == CosineVariant::Sum {
            dims.push(LaunchDims::new(n * d, cfg.reduce_local_size));
            dims.extend(self.sum_plan(cfg).launches(cfg));
        }
        dims.push(LaunchDims::new(n * d, LOCAL_SIZE_BWD));
        dims
    }
}
