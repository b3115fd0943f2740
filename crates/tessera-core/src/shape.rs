use std::fmt;

// Shape: logical extent of a kernel operand
//
// Loss kernels see at most five dimensions. A few shapes recur:
//   - Scalar loss:        Shape([])  or Shape([1])
//   - Per-row loss:       Shape([N])
//   - Logits / embedding: Shape([N, C])
//   - Unfold input:       Shape([N, C, H, W])
//
// The shape alone fixes the element count, the dense row-major strides
// and the iteration order work items follow (most significant dim first).

/// N-dimensional shape of a tensor operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions (0 for a scalar).
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements. The empty product makes a scalar count 1;
    /// any zero-sized dimension makes the count 0.
    pub fn elem_count(&self) -> usize {
        self.0.iter().product()
    }

    /// Row-major strides for this shape.
    ///
    /// For [2, 3, 4] the strides are [12, 4, 1]; the last dimension is dense.
    pub fn stride_contiguous(&self) -> Vec<usize> {
        let mut strides = vec![0usize; self.rank()];
        let mut acc = 1;
        for (s, &d) in strides.iter_mut().zip(self.0.iter()).rev() {
            *s = acc;
            acc *= d;
        }
        strides
    }

    /// Size of dimension `d`, or a `RankMismatch` when `d` is past the end.
    pub fn dim(&self, d: usize) -> crate::Result<usize> {
        self.0.get(d).copied().ok_or(crate::Error::RankMismatch {
            expected: d + 1,
            got: self.rank(),
        })
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl From<()> for Shape {
    fn from(_: ()) -> Self {
        Shape(vec![])
    }
}

impl From<usize> for Shape {
    fn from(d: usize) -> Self {
        Shape(vec![d])
    }
}

impl From<(usize, usize)> for Shape {
    fn from((d0, d1): (usize, usize)) -> Self {
        Shape(vec![d0, d1])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((d0, d1, d2): (usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2])
    }
}

impl From<(usize, usize, usize, usize)> for Shape {
    fn from((d0, d1, d2, d3): (usize, usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2, d3])
    }
}

impl From<(usize, usize, usize, usize, usize)> for Shape {
    fn from((d0, d1, d2, d3, d4): (usize, usize, usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2, d3, d4])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(a: [usize; N]) -> Self {
        Shape(a.to_vec())
    }
}
