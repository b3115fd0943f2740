//! # tessera-kernels
//!
//! Parallel forward and backward kernels over strided tensors:
//!
//! - [`kldiv`]: KL-divergence, unreduced and reduced
//! - [`softmax_ce`]: softmax cross-entropy with logits, one block per row
//! - [`cosine_embedding`]: cosine embedding loss, Sum and NonSum variants
//! - [`fold`]: unfold (im2col) and fold (col2im)
//! - [`reduce`]: block trees, two-phase row sums and the scalar loss-sum
//!
//! Every entry point validates its operands through a [`problem`]
//! description first and then launches on the rayon pool. Kernels never
//! fail on numerical domain problems; errors are structural only.

pub mod cosine_embedding;
pub mod fold;
pub mod kldiv;
pub mod problem;
pub mod reduce;
pub mod softmax_ce;

pub use cosine_embedding::CosineInputs;
pub use problem::{
    CosineBackwardProblem, CosineForwardProblem, CosineVariant, FoldParams, FoldProblem,
    KlDivBackwardProblem, KlDivForwardProblem, Reduction, SoftmaxCeBackwardProblem,
    SoftmaxCeForwardProblem,
};
pub use reduce::{reduce_to_scalar, SumPlan, SumTarget};
