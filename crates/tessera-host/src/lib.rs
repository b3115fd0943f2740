//! # tessera-host
//!
//! Straightforward reference implementations of every tessera kernel.
//!
//! These run without blocks, barriers or workspaces and accumulate in `f64`;
//! they are the oracle the parallel kernels are checked against with
//! [`verify::rms_range`]. Fold/unfold references fan out over output
//! elements with rayon, everything else is a plain loop.

pub mod cosine_embedding;
pub mod fold;
pub mod kldiv;
pub mod reduce;
pub mod softmax_ce;
pub mod verify;

use tessera_core::{Element, Error, Result, Shape, Tensor, TensorLayout, TensorView, MAX_RANK};

pub use verify::{rms_range, tolerance};

pub(crate) fn check_same_shape(expected: &Shape, got: &Shape) -> Result<()> {
    if expected != got {
        return Err(Error::ShapeMismatch {
            expected: expected.clone(),
            got: got.clone(),
        });
    }
    Ok(())
}

/// Write `values`, given in logical row-major order, through `dst`'s strides.
pub(crate) fn write_logical<T: Element>(
    dst: &mut Tensor<T>,
    values: impl IntoIterator<Item = f64>,
) -> Result<()> {
    let tv: TensorView<MAX_RANK> = dst.view()?;
    let data = dst.data_mut();
    for (i, v) in values.into_iter().enumerate() {
        data[tv.offset(&TensorLayout::from_flat(&tv, i))] = T::from_f64(v);
    }
    Ok(())
}

/// Element 0 of a reduced-mode scalar operand.
pub(crate) fn read_scalar<T: Element>(t: &Tensor<T>) -> Result<f64> {
    let tv = t.view::<1>()?;
    Ok(t.data()[tv.offset(&TensorLayout::origin())].to_f64())
}

pub(crate) fn write_scalar<T: Element>(t: &mut Tensor<T>, v: f64) -> Result<()> {
    let tv = t.view::<1>()?;
    t.data_mut()[tv.offset(&TensorLayout::origin())] = T::from_f64(v);
    Ok(())
}
