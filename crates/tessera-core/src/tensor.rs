use crate::dtype::{DType, Element, WithDType};
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::shape::Shape;
use crate::tensor_view::TensorView;

/// Shape, strides and element type of one kernel operand.
///
/// This is what problem descriptions validate and what applicability checks
/// inspect; it never owns data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDesc {
    layout: Layout,
    dtype: DType,
}

impl TensorDesc {
    pub fn new(layout: Layout, dtype: DType) -> Self {
        TensorDesc { layout, dtype }
    }

    /// Dense descriptor of `shape` with the dtype of `T`.
    pub fn contiguous<T: WithDType>(shape: impl Into<Shape>) -> Self {
        TensorDesc::new(Layout::contiguous(shape), T::DTYPE)
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        self.layout.shape()
    }

    pub fn dims(&self) -> &[usize] {
        self.layout.dims()
    }

    pub fn rank(&self) -> usize {
        self.layout.rank()
    }

    pub fn elem_count(&self) -> usize {
        self.layout.elem_count()
    }

    /// Bytes spanned by the logical elements (not the strided footprint).
    pub fn size_in_bytes(&self) -> usize {
        self.elem_count() * self.dtype.size_in_bytes()
    }
}

/// An owned flat buffer together with the layout that addresses it.
///
/// The buffer may be longer than the layout's element count: a transposed or
/// broadcast view reads the same slots in a different order or repeatedly.
/// Kernels never resize the buffer; they only read and write offsets the
/// layout produces.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T: WithDType> {
    data: Vec<T>,
    layout: Layout,
}

impl<T: WithDType> Tensor<T> {
    /// Dense row-major tensor. The buffer length must equal the element count.
    pub fn from_vec(data: Vec<T>, shape: impl Into<Shape>) -> Result<Self> {
        let layout = Layout::contiguous(shape);
        if data.len() != layout.elem_count() {
            return Err(Error::msg(format!(
                "from_vec: {} values for shape {} ({} elements)",
                data.len(),
                layout.shape(),
                layout.elem_count()
            )));
        }
        Ok(Tensor { data, layout })
    }

    /// Tensor over an explicit strided layout.
    pub fn from_vec_with_layout(data: Vec<T>, layout: Layout) -> Result<Self> {
        if data.len() < layout.required_len() {
            return Err(Error::BufferTooSmall {
                required: layout.required_len(),
                got: data.len(),
            });
        }
        Ok(Tensor { data, layout })
    }

    /// Dense tensor with every element set to `value`.
    pub fn full(shape: impl Into<Shape>, value: T) -> Self {
        let layout = Layout::contiguous(shape);
        Tensor {
            data: vec![value; layout.elem_count()],
            layout,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn shape(&self) -> &Shape {
        self.layout.shape()
    }

    pub fn dims(&self) -> &[usize] {
        self.layout.dims()
    }

    pub fn elem_count(&self) -> usize {
        self.layout.elem_count()
    }

    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    pub fn desc(&self) -> TensorDesc {
        TensorDesc::new(self.layout.clone(), T::DTYPE)
    }

    /// The raw buffer, in storage order.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Same buffer, dimensions reordered.
    pub fn permute(self, order: &[usize]) -> Result<Self> {
        let layout = self.layout.permute(order)?;
        Ok(Tensor {
            data: self.data,
            layout,
        })
    }

    pub fn transpose(self, dim0: usize, dim1: usize) -> Result<Self> {
        let layout = self.layout.transpose(dim0, dim1)?;
        Ok(Tensor {
            data: self.data,
            layout,
        })
    }

    /// Broadcast the size-1 dimension `dim` to `size` without copying.
    pub fn expand(self, dim: usize, size: usize) -> Result<Self> {
        let layout = self.layout.expand(dim, size)?;
        Ok(Tensor {
            data: self.data,
            layout,
        })
    }

    /// Element at a multi-dimensional index.
    pub fn get(&self, index: &[usize]) -> Option<T> {
        if index.len() != self.layout.rank()
            || index.iter().zip(self.dims()).any(|(&i, &d)| i >= d)
        {
            return None;
        }
        self.data.get(self.layout.flat_index(index)).copied()
    }

    /// Elements in logical row-major order, whatever the strides.
    pub fn to_vec(&self) -> Vec<T> {
        let dims = self.dims();
        let mut index = vec![0usize; dims.len()];
        let mut out = Vec::with_capacity(self.elem_count());
        for _ in 0..self.elem_count() {
            out.push(self.data[self.layout.flat_index(&index)]);
            for d in (0..dims.len()).rev() {
                index[d] += 1;
                if index[d] < dims[d] {
                    break;
                }
                index[d] = 0;
            }
        }
        out
    }

    /// Fixed-rank view of this tensor's layout.
    pub fn view<const N: usize>(&self) -> Result<TensorView<N>> {
        TensorView::new(&self.layout)
    }
}

impl<T: Element> Tensor<T> {
    /// Dense tensor of zeros.
    pub fn zeros(shape: impl Into<Shape>) -> Self {
        Tensor::full(shape, T::zero())
    }

    /// Dense tensor converted from `f64` values.
    pub fn from_f64(values: &[f64], shape: impl Into<Shape>) -> Result<Self> {
        Tensor::from_vec(values.iter().map(|&v| T::from_f64(v)).collect(), shape)
    }

    /// Logical elements widened to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.to_vec().into_iter().map(Element::to_f64).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_checks_length() {
        assert!(Tensor::from_vec(vec![1.0f32; 5], (2, 3)).is_err());
        let t = Tensor::from_vec(vec![1.0f32; 6], (2, 3)).unwrap();
        assert_eq!(t.dtype(), DType::F32);
        assert_eq!(t.desc().size_in_bytes(), 24);
    }

    #[test]
    fn test_strided_buffer_too_small() {
        let layout = Layout::with_strides((2, 3), vec![4, 1]).unwrap();
        assert!(matches!(
            Tensor::from_vec_with_layout(vec![0.0f64; 6], layout.clone()),
            Err(Error::BufferTooSmall { required: 7, got: 6 })
        ));
        assert!(Tensor::from_vec_with_layout(vec![0.0f64; 7], layout).is_ok());
    }

    #[test]
    fn test_transpose_logical_order() {
        let t = Tensor::from_vec(vec![0i32, 1, 2, 3, 4, 5], (2, 3))
            .unwrap()
            .transpose(0, 1)
            .unwrap();
        assert_eq!(t.dims(), &[3, 2]);
        assert_eq!(t.to_vec(), vec![0, 3, 1, 4, 2, 5]);
        assert_eq!(t.get(&[2, 1]), Some(5));
        assert_eq!(t.get(&[3, 0]), None);
    }

    #[test]
    fn test_half_roundtrip_through_f64() {
        let t = Tensor::<half::f16>::from_f64(&[0.5, -2.0], 2).unwrap();
        assert_eq!(t.to_f64_vec(), vec![0.5, -2.0]);
        let z = Tensor::<half::bf16>::zeros((2, 2));
        assert!(z.to_f64_vec().iter().all(|&v| v == 0.0));
    }
}
