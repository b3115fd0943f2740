use tessera_core::{Error, KernelConfig, LaunchDims, Result, TensorDesc};

use super::{check_rank, check_same_shape};

fn check_batch_vector(desc: &TensorDesc, batch: usize) -> Result<()> {
    check_rank(desc, 1)?;
    if desc.dims()[0] != batch {
        return Err(Error::ShapeMismatch {
            expected: tessera_core::Shape::from(batch),
            got: desc.shape().clone(),
        });
    }
    Ok(())
}

fn contiguity_reason(operands: &[(&'static str, &TensorDesc)]) -> Option<String> {
    operands
        .iter()
        .find(|(_, d)| !d.layout().is_contiguous())
        .map(|(name, _)| format!("{} is not contiguous", name))
}

/// Softmax cross-entropy with logits, forward: `[batch, num_class]` logits
/// and targets produce a `[batch]` loss and a cached `[batch, num_class]`
/// backprop term.
#[derive(Debug, Clone)]
pub struct SoftmaxCeForwardProblem {
    pub input: TensorDesc,
    pub target: TensorDesc,
    pub output: TensorDesc,
    pub backprop: TensorDesc,
}

impl SoftmaxCeForwardProblem {
    pub fn new(
        input: TensorDesc,
        target: TensorDesc,
        output: TensorDesc,
        backprop: TensorDesc,
    ) -> Result<Self> {
        check_rank(&input, 2)?;
        check_same_shape(&input, &target)?;
        check_same_shape(&input, &backprop)?;
        check_batch_vector(&output, input.dims()[0])?;
        Ok(SoftmaxCeForwardProblem {
            input,
            target,
            output,
            backprop,
        })
    }

    pub fn batch(&self) -> usize {
        self.input.dims()[0]
    }

    pub fn num_class(&self) -> usize {
        self.input.dims()[1]
    }

    /// Only dense row-major operands are handled.
    pub fn is_applicable(&self) -> bool {
        self.rejection().is_none()
    }

    pub(crate) fn rejection(&self) -> Option<String> {
        contiguity_reason(&[
            ("input", &self.input),
            ("target", &self.target),
            ("output", &self.output),
            ("backprop", &self.backprop),
        ])
    }

    /// One block of `row_local_size` lanes per batch row.
    pub fn launch_dims(&self, cfg: &KernelConfig) -> LaunchDims {
        LaunchDims::blocks(self.batch(), cfg.row_local_size)
    }
}

/// Softmax cross-entropy with logits, backward. `input` is only read when
/// the target gradient is requested.
#[derive(Debug, Clone)]
pub struct SoftmaxCeBackwardProblem {
    pub output_grad: TensorDesc,
    pub backprop: TensorDesc,
    pub input: TensorDesc,
    pub input_grad: Option<TensorDesc>,
    pub target_grad: Option<TensorDesc>,
}

impl SoftmaxCeBackwardProblem {
    pub fn new(
        output_grad: TensorDesc,
        backprop: TensorDesc,
        input: TensorDesc,
        input_grad: Option<TensorDesc>,
        target_grad: Option<TensorDesc>,
    ) -> Result<Self> {
        check_rank(&input, 2)?;
        check_same_shape(&input, &backprop)?;
        check_batch_vector(&output_grad, input.dims()[0])?;
        for grad in input_grad.iter().chain(target_grad.iter()) {
            check_same_shape(&input, grad)?;
        }
        Ok(SoftmaxCeBackwardProblem {
            output_grad,
            backprop,
            input,
            input_grad,
            target_grad,
        })
    }

    pub fn batch(&self) -> usize {
        self.input.dims()[0]
    }

    pub fn num_class(&self) -> usize {
        self.input.dims()[1]
    }

    pub fn is_applicable(&self) -> bool {
        self.rejection().is_none()
    }

    pub(crate) fn rejection(&self) -> Option<String> {
        let mut operands = vec![
            ("output_grad", &self.output_grad),
            ("backprop", &self.backprop),
            ("input", &self.input),
        ];
        if let Some(d) = &self.input_grad {
            operands.push(("input_grad", d));
        }
        if let Some(d) = &self.target_grad {
            operands.push(("target_grad", d));
        }
        contiguity_reason(&operands)
    }

    pub fn launch_dims(&self, cfg: &KernelConfig) -> LaunchDims {
        LaunchDims::blocks(self.batch(), cfg.row_local_size)
    }
}
