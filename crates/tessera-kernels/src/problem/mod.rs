//! Problem descriptions: what a launch is asked to do, checked before any
//! kernel runs.
//!
//! Each description is built from operand [`TensorDesc`]s and mode flags,
//! validates shapes once, and answers the questions a dispatcher needs:
//! which variant applies, how much workspace it needs, and how each of its
//! kernels is launched.

pub mod cosine_embedding;
pub mod fold;
pub mod kldiv;
pub mod softmax_ce;

use tessera_core::{Error, Result, TensorDesc, MAX_RANK};

pub use cosine_embedding::{CosineBackwardProblem, CosineForwardProblem, CosineVariant};
pub use fold::{FoldParams, FoldProblem};
pub use kldiv::{KlDivBackwardProblem, KlDivForwardProblem};
pub use softmax_ce::{SoftmaxCeBackwardProblem, SoftmaxCeForwardProblem};

/// How per-element losses are combined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reduction {
    /// One loss (or gradient) per element.
    None,
    /// Losses are divided by `divisor` and summed to a scalar; the backward
    /// pass reads a broadcast scalar output gradient.
    Reduced { divisor: f64 },
}

impl Reduction {
    /// Sum reduction.
    pub fn sum() -> Self {
        Reduction::Reduced { divisor: 1.0 }
    }

    /// Mean over `numel` elements.
    pub fn mean(numel: usize) -> Self {
        Reduction::Reduced {
            divisor: numel as f64,
        }
    }

    pub fn divisor(&self) -> Option<f64> {
        match *self {
            Reduction::None => None,
            Reduction::Reduced { divisor } => Some(divisor),
        }
    }

    pub fn is_reduced(&self) -> bool {
        matches!(self, Reduction::Reduced { .. })
    }
}

pub(crate) fn check_same_shape(expected: &TensorDesc, got: &TensorDesc) -> Result<()> {
    if expected.shape() != got.shape() {
        return Err(Error::ShapeMismatch {
            expected: expected.shape().clone(),
            got: got.shape().clone(),
        });
    }
    Ok(())
}

pub(crate) fn check_rank(desc: &TensorDesc, rank: usize) -> Result<()> {
    if desc.rank() != rank {
        return Err(Error::RankMismatch {
            expected: rank,
            got: desc.rank(),
        });
    }
    Ok(())
}

pub(crate) fn check_max_rank(desc: &TensorDesc) -> Result<()> {
    if desc.rank() > MAX_RANK {
        return Err(Error::RankTooLarge {
            rank: desc.rank(),
            max: MAX_RANK,
        });
    }
    Ok(())
}

/// A reduced-mode scalar: exactly one element, whatever the rank.
pub(crate) fn check_scalar(desc: &TensorDesc) -> Result<()> {
    if desc.elem_count() != 1 || desc.rank() > 1 {
        return Err(Error::ShapeMismatch {
            expected: tessera_core::Shape::from(1),
            got: desc.shape().clone(),
        });
    }
    Ok(())
}

pub(crate) fn check_workspace(required: usize, got: usize) -> Result<()> {
    if got < required {
        return Err(Error::WorkspaceTooSmall { required, got });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduction_divisor() {
        assert_eq!(Reduction::None.divisor(), None);
        assert_eq!(Reduction::sum().divisor(), Some(1.0));
        assert_eq!(Reduction::mean(8).divisor(), Some(8.0));
        assert!(Reduction::mean(8).is_reduced());
    }

    #[test]
    fn test_scalar_check() {
        assert!(check_scalar(&TensorDesc::contiguous::<f32>(())).is_ok());
        assert!(check_scalar(&TensorDesc::contiguous::<f32>(1)).is_ok());
        assert!(check_scalar(&TensorDesc::contiguous::<f32>((1, 1))).is_err());
        assert!(check_scalar(&TensorDesc::contiguous::<f32>(2)).is_err());
    }

    #[test]
    fn test_workspace_check() {
        assert!(matches!(
            check_workspace(10, 4),
            Err(Error::WorkspaceTooSmall { required: 10, got: 4 })
        ));
        assert!(check_workspace(10, 10).is_ok());
    }
}
