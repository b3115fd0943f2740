use crate::error::{Error, Result};
use crate::shape::Shape;

// Layout: how a logical shape maps onto a flat element buffer
//
// Kernel operands are rarely guaranteed dense. A caller may hand over a
// transposed gradient, a sliced target or a broadcast scalar, and the kernels
// must read them in place. A Layout carries the shape plus one element
// stride per dimension:
//
//   dense [2,3]         strides [3,1]
//   transposed [3,2]    strides [1,3]
//   broadcast [4,3]     strides [0,1]   (one row read four times)
//
// Strides are in elements, not bytes, and may be zero or non-monotonic.
// There is no base offset: a slice is expressed by handing the kernel a
// sub-slice of the buffer.

/// Shape plus per-dimension element strides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    shape: Shape,
    strides: Vec<usize>,
}

impl Layout {
    /// Dense row-major layout for `shape`.
    pub fn contiguous(shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        let strides = shape.stride_contiguous();
        Layout { shape, strides }
    }

    /// Layout with explicit strides. Fails when the stride count differs
    /// from the rank.
    pub fn with_strides(shape: impl Into<Shape>, strides: Vec<usize>) -> Result<Self> {
        let shape = shape.into();
        if strides.len() != shape.rank() {
            return Err(Error::StrideRankMismatch {
                strides: strides.len(),
                rank: shape.rank(),
            });
        }
        Ok(Layout { shape, strides })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn elem_count(&self) -> usize {
        self.shape.elem_count()
    }

    /// True when strides equal the row-major strides of the shape.
    pub fn is_contiguous(&self) -> bool {
        self.strides == self.shape.stride_contiguous()
    }

    /// True when every element occupies a distinct slot and no slot is left
    /// unused, i.e. the layout is some permutation of a dense buffer.
    /// Broadcast (stride 0) and sliced layouts are not packed.
    pub fn is_packed(&self) -> bool {
        let mut dims: Vec<(usize, usize)> = self
            .strides
            .iter()
            .copied()
            .zip(self.dims().iter().copied())
            .filter(|&(_, d)| d != 1)
            .collect();
        dims.sort_unstable();
        let mut expected = 1;
        for (stride, dim) in dims {
            if stride != expected {
                return false;
            }
            expected *= dim;
        }
        true
    }

    /// Largest element offset this layout addresses (0 for an empty layout).
    pub fn max_offset(&self) -> usize {
        if self.elem_count() == 0 {
            return 0;
        }
        self.dims()
            .iter()
            .zip(&self.strides)
            .map(|(&d, &s)| (d - 1) * s)
            .sum()
    }

    /// Minimum buffer length able to back this layout.
    pub fn required_len(&self) -> usize {
        if self.elem_count() == 0 {
            0
        } else {
            self.max_offset() + 1
        }
    }

    /// Reorder dimensions: output dim `i` is input dim `order[i]`.
    pub fn permute(&self, order: &[usize]) -> Result<Layout> {
        let rank = self.rank();
        if order.len() != rank {
            return Err(Error::RankMismatch {
                expected: rank,
                got: order.len(),
            });
        }
        let mut seen = vec![false; rank];
        for &o in order {
            if o >= rank || seen[o] {
                return Err(Error::msg(format!(
                    "permute: {:?} is not a permutation of 0..{}",
                    order, rank
                )));
            }
            seen[o] = true;
        }
        let dims = order.iter().map(|&o| self.dims()[o]).collect::<Vec<_>>();
        let strides = order.iter().map(|&o| self.strides[o]).collect();
        Ok(Layout {
            shape: Shape::new(dims),
            strides,
        })
    }

    /// Swap two dimensions.
    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Layout> {
        let mut order: Vec<usize> = (0..self.rank()).collect();
        if dim0 >= order.len() || dim1 >= order.len() {
            return Err(Error::RankMismatch {
                expected: dim0.max(dim1) + 1,
                got: self.rank(),
            });
        }
        order.swap(dim0, dim1);
        self.permute(&order)
    }

    /// Broadcast a size-1 dimension to `size` by giving it stride 0.
    pub fn expand(&self, dim: usize, size: usize) -> Result<Layout> {
        let current = self.shape.dim(dim)?;
        if current != 1 && current != size {
            return Err(Error::msg(format!(
                "expand: dim {} has size {}, cannot broadcast to {}",
                dim, current, size
            )));
        }
        let mut dims = self.dims().to_vec();
        let mut strides = self.strides.clone();
        if current == 1 && size != 1 {
            dims[dim] = size;
            strides[dim] = 0;
        }
        Ok(Layout {
            shape: Shape::new(dims),
            strides,
        })
    }

    /// Element offset of a multi-dimensional index.
    pub fn flat_index(&self, index: &[usize]) -> usize {
        index.iter().zip(&self.strides).map(|(&i, &s)| i * s).sum()
    }
}
