//! Sequential sums the reduction kernels are checked against.

/// Compensated (Neumaier) left-to-right sum, accurate to a few ulps
/// whatever the length.
pub fn sum(values: &[f64]) -> f64 {
    let mut total = 0.0f64;
    let mut carry = 0.0f64;
    for &v in values {
        let t = total + v;
        if total.abs() >= v.abs() {
            carry += (total - t) + v;
        } else {
            carry += (v - t) + total;
        }
        total = t;
    }
    total + carry
}

/// Row sums of a contiguous `[values.len() / reduce_size, reduce_size]`
/// matrix. A zero `reduce_size` yields no rows.
pub fn row_sums(values: &[f64], reduce_size: usize) -> Vec<f64> {
    if reduce_size == 0 {
        return Vec::new();
    }
    values.chunks_exact(reduce_size).map(sum).collect()
}
