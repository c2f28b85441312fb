use gpuimage_blur::blur::weights::{
    BlurParameters, GaussianWeightTable, MAX_BLUR_WINDOW, MAX_LINEAR_TAPS, OptimizedSampleSet, SampleCapacity,
    WeightSolver, blur_window, collapse_pair,
};
use gpuimage_blur::BlurVariant;
use proptest::prelude::*;

fn dynamic15() -> WeightSolver {
    WeightSolver::new(BlurVariant::Dynamic15.sample_capacity().unwrap())
}

#[test]
fn reference_radii_produce_known_tap_counts() {
    let solver = WeightSolver::default();
    for (radius, window, taps) in [(1.0, 4, 2), (2.0, 6, 3), (9.8, 22, 11), (50.0, 60, 30)] {
        let set = solver.solve(radius);
        assert_eq!(set.blur_radius, window, "radius {radius}");
        assert_eq!(set.optimized_sample_count, taps, "radius {radius}");
        assert_eq!(set.sample_count, taps.min(MAX_LINEAR_TAPS), "radius {radius}");
    }
}

#[test]
fn radius_fifty_still_caps_linear_taps() {
    let set = dynamic15().solve(50.0);
    assert!(set.sample_count <= 7);
    assert_eq!(set.optimized_sample_count, 15);
    assert_eq!(set.weights.len(), 16);
    assert_eq!(set.offsets.len(), 15);
}

#[test]
fn synthetic_pair_collapses_to_expected_offset() {
    let (weight, offset) = collapse_pair(0.3, 1.0, 0.1, 2.0);
    assert!((weight - 0.4).abs() < 1e-12);
    assert!((offset - 1.25).abs() < 1e-12);
}

#[test]
fn identity_set_has_a_single_unit_tap() {
    let set = WeightSolver::default().solve(0.5);
    assert_eq!(set, OptimizedSampleSet::identity());
    assert_eq!(set.tap_count(), 1);
    assert_eq!(set.sample_count, 0);
    assert_eq!(set.weights[0], 1.0);
    assert!(set.offsets.is_empty());
}

#[test]
fn bounded_table_is_renormalised() {
    let table = GaussianWeightTable::for_parameters_within(&BlurParameters::new(4.0), 5);
    assert_eq!(table.window(), 5);
    assert_eq!(table.weights().len(), 6);
    let sum = table.weights()[0] + 2.0 * table.weights()[1..].iter().sum::<f64>();
    assert!((sum - 1.0).abs() < 1e-12, "sum {sum}");
}

#[test]
fn enormous_radius_stays_bounded() {
    let set = dynamic15().solve(f32::MAX);
    assert_eq!(set.optimized_sample_count, 15);
    assert_eq!(set.weights.len(), 16);
    assert!((set.kernel_sum() - 1.0).abs() < 1e-5);

    let set = WeightSolver::default().solve(1.0e12);
    assert_eq!(set.blur_radius, MAX_BLUR_WINDOW);
    assert_eq!(set.optimized_sample_count, MAX_BLUR_WINDOW / 2);
    assert!((set.kernel_sum() - 1.0).abs() < 1e-4);
}

#[test]
fn sigma_override_keeps_the_window_of_the_radius() {
    let solver = WeightSolver::default();
    let params = BlurParameters::new(8.0).with_sigma(3.0);
    assert_eq!(params.sigma(), 3.0);
    let set = solver.solve_parameters(&params);
    assert_eq!(set.blur_radius, blur_window(8.0));
    assert!((set.kernel_sum() - 1.0).abs() < 1e-5);
}

proptest! {
    #[test]
    fn kernel_is_normalised(radius in 1.0f32..60.0) {
        let set = WeightSolver::default().solve(radius);
        prop_assert!((set.kernel_sum() - 1.0).abs() < 1e-5, "sum {}", set.kernel_sum());
        let capped = dynamic15().solve(radius);
        prop_assert!((capped.kernel_sum() - 1.0).abs() < 1e-5, "capped sum {}", capped.kernel_sum());
    }

    #[test]
    fn sub_unit_radius_is_identity(radius in 0.0f32..1.0) {
        let set = WeightSolver::default().solve(radius);
        prop_assert_eq!(set.tap_count(), 1);
        prop_assert_eq!(set.weights[0], 1.0);
    }

    #[test]
    fn linear_taps_never_exceed_seven(radius in 0.0f32..1.0e9) {
        let set = WeightSolver::default().solve(radius);
        prop_assert!(set.sample_count <= 7);
        prop_assert!(set.blur_radius <= MAX_BLUR_WINDOW);
        prop_assert_eq!(set.optimized_sample_count, set.blur_radius.div_ceil(2));
    }

    #[test]
    fn capped_solver_handles_any_finite_radius(exponent in 0.0f32..38.0) {
        let set = dynamic15().solve(10.0f32.powf(exponent));
        prop_assert!(set.optimized_sample_count <= 15);
        prop_assert!(set.standard_weights.len() <= 31);
        prop_assert!((set.kernel_sum() - 1.0).abs() < 1e-5, "sum {}", set.kernel_sum());
    }

    #[test]
    fn capacity_bounds_every_array(radius in 0.0f32..1.0e6, total in 1usize..20) {
        let solver = WeightSolver::new(SampleCapacity { linear_taps: 7, total_taps: total });
        let set = solver.solve(radius);
        prop_assert!(set.optimized_sample_count <= total);
        prop_assert_eq!(set.weights.len(), set.optimized_sample_count + 1);
        prop_assert_eq!(set.offsets.len(), set.optimized_sample_count);
        prop_assert!(set.standard_weights.len() <= 2 * total + 1);
    }

    #[test]
    fn collapsed_offsets_sit_between_their_texels(radius in 1.0f32..40.0) {
        let set = WeightSolver::default().solve(radius);
        for (k, offset) in set.offsets.iter().enumerate() {
            let first = (2 * k + 1) as f32;
            prop_assert!(*offset >= first && *offset <= first + 1.0, "tap {} at {}", k, offset);
        }
        prop_assert!(blur_window(radius) % 2 == 0);
    }
}
