use std::ops::Index;

use crate::error::{Error, Result};
use crate::layout::Layout;

// TensorView: fixed-rank strided indexing shared by every kernel
//
// A kernel launch is a flat range of work-item ids. Each id is turned into a
// coordinate tuple by decomposing it against the shape of one reference
// operand (usually the gradient being written), and the same tuple is then
// mapped through every operand's own strides:
//
//   gid ──divmod over reference sizes──▶ (c0, c1, ..., cN-1)
//   offset(operand) = Σ c_d * operand.stride[d]
//
// Because the tuple is shared, operands may be permuted, sliced or broadcast
// independently of one another and still line up element for element.
//
// Views are "inner expanded": a rank-3 layout placed in a TensorView<5>
// gets two trailing dimensions of size 1 (stride 1), which leaves offsets
// unchanged. Dimension 0 of a decomposed coordinate receives the undivided
// quotient, so `coord[0] >= size[0]` marks a work item past the end of the
// tensor. Such items must do nothing.

/// Up to five dimensions; the largest rank any kernel addresses.
pub const MAX_RANK: usize = 5;

/// Sizes and element strides of one operand, padded to rank `N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorView<const N: usize> {
    pub size: [usize; N],
    pub stride: [usize; N],
}

impl<const N: usize> TensorView<N> {
    /// Build the view of `layout`, padding trailing dimensions with size 1.
    pub fn new(layout: &Layout) -> Result<Self> {
        let rank = layout.rank();
        if rank > N {
            return Err(Error::RankTooLarge { rank, max: N });
        }
        let mut size = [1usize; N];
        let mut stride = [1usize; N];
        size[..rank].copy_from_slice(layout.dims());
        stride[..rank].copy_from_slice(layout.strides());
        Ok(TensorView { size, stride })
    }

    /// Element offset of a coordinate tuple.
    #[inline]
    pub fn offset(&self, coord: &TensorLayout<N>) -> usize {
        let mut idx = 0;
        for d in 0..N {
            idx += coord.coords[d] * self.stride[d];
        }
        idx
    }

    /// Number of logical elements.
    pub fn numel(&self) -> usize {
        self.size.iter().product()
    }

    /// Whether `coord` lies inside the view along dimension 0.
    #[inline]
    pub fn contains(&self, coord: &TensorLayout<N>) -> bool {
        coord.coords[0] < self.size[0]
    }
}

/// A coordinate tuple derived from a flat work-item id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorLayout<const N: usize> {
    pub coords: [usize; N],
}

impl<const N: usize> TensorLayout<N> {
    pub fn new(coords: [usize; N]) -> Self {
        TensorLayout { coords }
    }

    /// All-zero coordinate. Read through a rank-1 scalar view this is the
    /// broadcast offset 0 of a reduced-mode output gradient.
    pub fn origin() -> Self {
        TensorLayout { coords: [0; N] }
    }

    /// Decompose `idx` row-major against `view.size`. Dimension 0 keeps the
    /// full quotient and is not wrapped.
    #[inline]
    pub fn from_flat(view: &TensorView<N>, idx: usize) -> Self {
        let mut coords = [0usize; N];
        let mut temp = idx;
        for d in (1..N).rev() {
            coords[d] = temp % view.size[d];
            temp /= view.size[d];
        }
        if N > 0 {
            coords[0] = temp;
        }
        TensorLayout { coords }
    }
}

impl<const N: usize> Index<usize> for TensorLayout<N> {
    type Output = usize;

    fn index(&self, d: usize) -> &usize {
        &self.coords[d]
    }
}
