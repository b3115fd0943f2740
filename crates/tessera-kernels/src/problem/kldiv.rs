use tessera_core::{KernelConfig, LaunchDims, Result, TensorDesc};

use super::{check_max_rank, check_same_shape, check_scalar, Reduction};
use crate::reduce::loss_sum_passes;

/// KL-divergence forward: `input` holds log-probabilities, `target`
/// probabilities (or log-probabilities when `log_target`).
#[derive(Debug, Clone)]
pub struct KlDivForwardProblem {
    pub input: TensorDesc,
    pub target: TensorDesc,
    pub output: TensorDesc,
    pub reduction: Reduction,
    pub log_target: bool,
}

impl KlDivForwardProblem {
    pub fn new(
        input: TensorDesc,
        target: TensorDesc,
        output: TensorDesc,
        reduction: Reduction,
        log_target: bool,
    ) -> Result<Self> {
        check_max_rank(&input)?;
        check_same_shape(&input, &target)?;
        match reduction {
            Reduction::None => check_same_shape(&input, &output)?,
            Reduction::Reduced { .. } => check_scalar(&output)?,
        }
        Ok(KlDivForwardProblem {
            input,
            target,
            output,
            reduction,
            log_target,
        })
    }

    pub fn numel(&self) -> usize {
        self.input.elem_count()
    }

    /// Accumulator elements of scratch: the per-element losses plus one
    /// partial per loss-sum block.
    pub fn workspace_len(&self, cfg: &KernelConfig) -> usize {
        match self.reduction {
            Reduction::None => 0,
            Reduction::Reduced { .. } => {
                let n = self.numel();
                let ls = cfg.reduce_local_size.max(1);
                n + (n + ls - 1) / ls
            }
        }
    }

    pub fn workspace_size_in_bytes(&self, cfg: &KernelConfig) -> usize {
        self.workspace_len(cfg) * self.output.dtype().size_in_bytes()
    }

    pub fn launch_dims(&self, cfg: &KernelConfig) -> Vec<LaunchDims> {
        let mut dims = vec![LaunchDims::new(self.numel(), cfg.local_size)];
        if self.reduction.is_reduced() {
            let ls = cfg.reduce_local_size.max(1);
            let mut size = self.numel();
            for _ in 0..loss_sum_passes(size, ls) {
                dims.push(LaunchDims::new(size, ls));
                size = (size + ls - 1) / ls;
            }
        }
        dims
    }
}

/// KL-divergence backward. Either gradient may be omitted.
#[derive(Debug, Clone)]
pub struct KlDivBackwardProblem {
    pub input: TensorDesc,
    pub target: TensorDesc,
    pub output_grad: TensorDesc,
    pub input_grad: Option<TensorDesc>,
    pub target_grad: Option<TensorDesc>,
    pub reduction: Reduction,
    pub log_target: bool,
}

impl KlDivBackwardProblem {
    pub fn new(
        input: TensorDesc,
        target: TensorDesc,
        output_grad: TensorDesc,
        input_grad: Option<TensorDesc>,
        target_grad: Option<TensorDesc>,
        reduction: Reduction,
        log_target: bool,
    ) -> Result<Self> {
        check_max_rank(&input)?;
        check_same_shape(&input, &target)?;
        match reduction {
            Reduction::None => check_same_shape(&input, &output_grad)?,
            Reduction::Reduced { .. } => check_scalar(&output_grad)?,
        }
        for grad in input_grad.iter().chain(target_grad.iter()) {
            check_same_shape(&input, grad)?;
        }
        Ok(KlDivBackwardProblem {
            input,
            target,
            output_grad,
            input_grad,
            target_grad,
            reduction,
            log_target,
        })
    }

    /// One work item per element of the input.
    pub fn launch_dims(&self, cfg: &KernelConfig) -> LaunchDims {
        LaunchDims::new(self.input.elem_count(), cfg.local_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(shape: &[usize]) -> TensorDesc {
        TensorDesc::contiguous::<f32>(shape)
    }

    #[test]
    fn test_forward_validation() {
        let ok = KlDivForwardProblem::new(
            desc(&[4, 5]),
            desc(&[4, 5]),
            desc(&[4, 5]),
            Reduction::None,
            false,
        );
        assert!(ok.is_ok());
        let bad_target = KlDivForwardProblem::new(
            desc(&[4, 5]),
            desc(&[5, 4]),
            desc(&[4, 5]),
            Reduction::None,
            false,
        );
        assert!(bad_target.is_err());
        let bad_scalar = KlDivForwardProblem::new(
            desc(&[4, 5]),
            desc(&[4, 5]),
            desc(&[4, 5]),
            Reduction::mean(20),
            false,
        );
        assert!(bad_scalar.is_err());
    }

    #[test]
    fn test_six_dims_rejected() {
        let d = desc(&[1, 1, 1, 1, 1, 2]);
        assert!(KlDivBackwardProblem::new(
            d.clone(),
            d.clone(),
            d.clone(),
            Some(d),
            None,
            Reduction::None,
            false
        )
        .is_err());
    }

    #[test]
    fn test_reduced_workspace_and_launches() {
        let cfg = KernelConfig::default();
        let p = KlDivForwardProblem::new(
            desc(&[300, 300]),
            desc(&[300, 300]),
            desc(&[1]),
            Reduction::sum(),
            true,
        )
        .unwrap();
        // 90000 losses + 352 partials.
        assert_eq!(p.workspace_len(&cfg), 90_352);
        assert_eq!(p.workspace_size_in_bytes(&cfg), 90_352 * 4);
        let dims = p.launch_dims(&cfg);
        // elementwise + 90000 -> 352 -> 2 -> 1
        assert_eq!(dims.len(), 4);
        assert_eq!(dims[0].global_size, 90_112);
        assert_eq!(dims[3].global_size, 256);
    }
}
