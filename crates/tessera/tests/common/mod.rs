#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tessera::prelude::*;
use tessera::Accum;

pub fn rng() -> StdRng {
    StdRng::seed_from_u64(0x7e55e7a)
}

pub fn cfg() -> KernelConfig {
    KernelConfig::default().workers(4).compute_units(4)
}

pub fn uniform(rng: &mut StdRng, len: usize, lo: f64, hi: f64) -> Vec<f64> {
    (0..len).map(|_| rng.gen_range(lo..hi)).collect()
}

/// Dense tensor of uniform values in `[lo, hi)`.
pub fn random<T: Element>(rng: &mut StdRng, dims: &[usize], lo: f64, hi: f64) -> Tensor<T> {
    let len = dims.iter().product();
    Tensor::from_f64(&uniform(rng, len, lo, hi), dims).unwrap()
}

/// Same logical shape as `dims`, stored with the first and last strides
/// swapped.
pub fn random_swapped<T: Element>(rng: &mut StdRng, dims: &[usize], lo: f64, hi: f64) -> Tensor<T> {
    let last = dims.len() - 1;
    let mut storage = dims.to_vec();
    storage.swap(0, last);
    random::<T>(rng, &storage, lo, hi).transpose(0, last).unwrap()
}

/// Zeroed tensor with the first and last strides swapped.
pub fn zeros_swapped<T: Element>(dims: &[usize]) -> Tensor<T> {
    let last = dims.len() - 1;
    let mut storage = dims.to_vec();
    storage.swap(0, last);
    Tensor::<T>::zeros(storage).transpose(0, last).unwrap()
}

pub fn labels(rng: &mut StdRng, n: usize) -> Tensor<i32> {
    let v = (0..n).map(|_| if rng.gen_bool(0.5) { 1 } else { -1 }).collect();
    Tensor::from_vec(v, n).unwrap()
}

pub fn workspace<T: Element>(len: usize) -> Vec<T::Accum> {
    vec![T::Accum::lit(0.0); len]
}

fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() < tol
}

pub fn assert_vec_approx(got: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(got.len(), expected.len(), "length mismatch");
    for (i, (g, e)) in got.iter().zip(expected).enumerate() {
        assert!(
            approx_eq(*g, *e, tol),
            "index {}: got {} expected {} (tol {})",
            i,
            g,
            e,
            tol
        );
    }
}

/// Kernel output against the host reference, scaled by the data's range.
pub fn assert_matches<T: Element>(what: &str, kernel: &Tensor<T>, host: &Tensor<T>) {
    let err = rms_range(&kernel.to_f64_vec(), &host.to_f64_vec());
    let tol = tolerance::<T>();
    assert!(
        err < tol,
        "{} ({}): rms {} exceeds tolerance {}",
        what,
        T::DTYPE,
        err,
        tol
    );
}

/// Tensor holding `values` in logical order, optionally stored with the
/// first and last strides swapped.
pub fn build<T: Element>(values: &[f64], dims: &[usize], swapped: bool) -> Tensor<T> {
    let mut t = if swapped {
        zeros_swapped::<T>(dims)
    } else {
        Tensor::<T>::zeros(dims)
    };
    let tv = t.view::<{ tessera::MAX_RANK }>().unwrap();
    let data = t.data_mut();
    for (i, &v) in values.iter().enumerate() {
        data[tv.offset(&tessera::TensorLayout::from_flat(&tv, i))] = T::from_f64(v);
    }
    t
}

pub fn zeros<T: Element>(dims: &[usize], swapped: bool) -> Tensor<T> {
    if swapped {
        zeros_swapped::<T>(dims)
    } else {
        Tensor::<T>::zeros(dims)
    }
}
