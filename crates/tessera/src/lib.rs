//! # Tessera
//!
//! Forward and backward kernels for a handful of loss functions and for
//! fold/unfold over strided tensors, with host reference implementations to
//! check them against.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use tessera::prelude::*;
//!
//! let cfg = KernelConfig::default();
//! let input = Tensor::<f32>::from_f64(&[-1.2, -0.4, -2.0], 3).unwrap();
//! let target = Tensor::<f32>::from_f64(&[0.3, 0.6, 0.1], 3).unwrap();
//! let mut loss = Tensor::<f32>::zeros(3);
//! kernels::kldiv::forward_unreduced(&cfg, &input, &target, &mut loss, false).unwrap();
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `tessera-core` | Tensor, Shape, Layout, DType, strided views, launch emulation |
//! | `tessera-kernels` | KL-divergence, softmax cross-entropy, cosine embedding, fold/unfold, sums |
//! | `tessera-host` | Sequential `f64` references and the RMS comparison |

/// Re-export core types.
pub use tessera_core::{
    align_up, scatter, Accum, DType, Element, Error, Grid, KernelConfig, Lanes, LaunchDims, Layout,
    LocalMemory, Result, Shape, Tensor, TensorDesc, TensorLayout, TensorView, WithDType,
    Workgroup, MAX_RANK,
};

/// Re-export the parallel kernels and their problem descriptions.
pub mod kernels {
    pub use tessera_kernels::*;
}

/// Re-export the host references.
pub mod host {
    pub use tessera_host::*;
}

/// Convenient glob import: `use tessera::prelude::*;`
pub mod prelude {
    pub use crate::host::{rms_range, tolerance};
    pub use crate::kernels::{
        CosineBackwardProblem, CosineForwardProblem, CosineInputs, CosineVariant, FoldParams,
        FoldProblem, KlDivBackwardProblem, KlDivForwardProblem, Reduction,
        SoftmaxCeBackwardProblem, SoftmaxCeForwardProblem,
    };
    pub use crate::{host, kernels};
    pub use crate::{DType, Element, Error, KernelConfig, Layout, Result, Shape, Tensor, TensorDesc};
}
