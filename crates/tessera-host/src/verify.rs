use tessera_core::Element;

/// Range-normalised RMS difference of two equally long sequences:
/// `sqrt(Σ (a - b)²) / (sqrt(n) * max(max|a|, max|b|))`.
///
/// The denominator is floored at `f64::MIN_POSITIVE` so two all-zero
/// inputs compare as 0. Empty inputs compare as 0.
pub fn rms_range(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len(), "rms_range: length mismatch");
    if a.is_empty() {
        return 0.0;
    }
    let sq: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    let mag = |v: &[f64]| v.iter().fold(0.0f64, |m, x| m.max(x.abs()));
    let range = mag(a).max(mag(b)).max(f64::MIN_POSITIVE);
    sq.sqrt() / ((a.len() as f64).sqrt() * range)
}

/// Acceptable [`rms_range`] for results stored as `T`.
pub fn tolerance<T: Element>() -> f64 {
    10.0 * T::epsilon()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_is_zero() {
        assert_eq!(rms_range(&[1.0, -2.0], &[1.0, -2.0]), 0.0);
        assert_eq!(rms_range(&[0.0; 4], &[0.0; 4]), 0.0);
        assert_eq!(rms_range(&[], &[]), 0.0);
    }

    #[test]
    fn test_scale_invariant() {
        let a = [1.0, 2.0, 4.0];
        let b = [1.0, 2.0, 4.5];
        let scaled_a: Vec<f64> = a.iter().map(|v| v * 1000.0).collect();
        let scaled_b: Vec<f64> = b.iter().map(|v| v * 1000.0).collect();
        let r = rms_range(&a, &b);
        assert!((r - rms_range(&scaled_a, &scaled_b)).abs() < 1e-15);
        // sqrt(0.25) / (sqrt(3) * 4.5)
        assert!((r - 0.5 / (3.0f64.sqrt() * 4.5)).abs() < 1e-15);
    }

    #[test]
    fn test_tolerance_per_type() {
        assert_eq!(tolerance::<f32>(), 10.0 * f32::EPSILON as f64);
        assert!(tolerance::<half::bf16>() > tolerance::<half::f16>());
    }
}
