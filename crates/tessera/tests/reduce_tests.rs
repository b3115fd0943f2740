mod common;

use common::*;
use tessera::kernels::reduce::{loss_sum_passes, run_sum_plan};
use tessera::kernels::{reduce_to_scalar, SumPlan, SumTarget};
use tessera::prelude::*;

fn scalar_sum(cfg: &KernelConfig, values: &[f64]) -> f64 {
    let mut src = values.to_vec();
    let ls = cfg.reduce_local_size;
    let mut scratch = vec![0.0; (values.len() + ls - 1) / ls];
    reduce_to_scalar(cfg, &mut src, &mut scratch, values.len()).unwrap()
}

#[test]
fn test_scalar_sum_around_block_size() {
    let cfg = cfg();
    let ls = cfg.reduce_local_size;
    let mut rng = rng();
    for size in [1, 7, ls - 1, ls, ls + 1, 3 * ls + 5, ls * ls + 3] {
        let values = uniform(&mut rng, size, 0.0, 1.0);
        let got = scalar_sum(&cfg, &values);
        let expected = host::reduce::sum(&values);
        assert!(
            rms_range(&[got], &[expected]) < tolerance::<f64>(),
            "size {}: got {} expected {}",
            size,
            got,
            expected
        );
    }
}

#[test]
fn test_scalar_sum_pass_count() {
    assert_eq!(loss_sum_passes(1, 256), 1);
    assert_eq!(loss_sum_passes(256, 256), 1);
    assert_eq!(loss_sum_passes(257, 256), 2);
    assert_eq!(loss_sum_passes(256 * 256 + 1, 256), 3);
}

#[test]
fn test_scalar_sum_empty_and_small_blocks() {
    let cfg = cfg().reduce_local_size(4);
    assert_eq!(scalar_sum(&cfg, &[]), 0.0);
    let values: Vec<f64> = (1..=100).map(f64::from).collect();
    assert_eq!(scalar_sum(&cfg, &values), 5050.0);
}

#[test]
fn test_row_sums_match_host() {
    let mut rng = rng();
    for (rows, width, units) in [(3, 5000, 8), (96, 64, 1), (300, 4, 2), (1, 1, 4)] {
        let cfg = cfg().compute_units(units);
        let plan = SumPlan::new(&cfg, rows, width);
        let values = uniform(&mut rng, rows * width, 0.0, 1.0);
        let mut data = values.clone();
        let mut scratch = vec![0.0; plan.scratch_len()];
        let sums = match run_sum_plan(&cfg, &plan, &mut data, &mut scratch).unwrap() {
            SumTarget::Input => data[..rows].to_vec(),
            SumTarget::Scratch => scratch[..rows].to_vec(),
        };
        let expected = host::reduce::row_sums(&values, width);
        assert!(
            rms_range(&sums, &expected) < tolerance::<f64>(),
            "{}x{} ({:?})",
            rows,
            width,
            plan.parallelism
        );
    }
}
