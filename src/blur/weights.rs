//! Gaussian weight solving for the separable blur passes.
//!
//! The solver builds a 1-D Gaussian table for a blur radius and collapses
//! adjacent taps pairwise so that one bilinear fetch between two texels
//! replaces two nearest fetches. Everything is computed in `f64` and handed to
//! the shaders as `f32`, which is the precision of a uniform upload.

use std::f64::consts::PI;
use std::sync::Arc;

use serde::Serialize;

/// Taps whose weight drops below this are outside the sampling window.
pub const MIN_WEIGHT_EDGE: f64 = 1.0 / 256.0;

/// Linear-sampled taps a fragment can afford per side.
pub const MAX_LINEAR_TAPS: usize = 7;

/// Widest window [`blur_window`] returns; larger radii are clamped to it.
pub const MAX_BLUR_WINDOW: usize = 4096;

/// Blur radius and kernel shape.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlurParameters {
    pub radius: f32,
    pub sigma: Option<f32>,
    pub aspect_ratio: f32,
}

impl BlurParameters {
    pub fn new(radius: f32) -> Self {
        Self {
            radius: sanitize_radius(radius),
            sigma: None,
            aspect_ratio: 1.0,
        }
    }

    pub fn with_sigma(mut self, sigma: f32) -> Self {
        self.sigma = (sigma.is_finite() && sigma > 0.0).then_some(sigma);
        self
    }

    /// Standard deviation of the kernel; follows `radius` unless overridden.
    pub fn sigma(&self) -> f32 {
        self.sigma.unwrap_or(self.radius)
    }
}

impl Default for BlurParameters {
    fn default() -> Self {
        Self::new(0.0)
    }
}

fn sanitize_radius(radius: f32) -> f32 {
    if radius.is_finite() { radius.max(0.0) } else { 0.0 }
}

/// Half-width (in texels) of the Gaussian window for `radius`, always even.
///
/// Radii below one collapse to a zero-width window (identity blur). For very
/// large radii the edge weight never falls under [`MIN_WEIGHT_EDGE`]; the
/// window then falls back to three standard deviations. Either way it is
/// capped at [`MAX_BLUR_WINDOW`].
pub fn blur_window(radius: f32) -> usize {
    let radius = sanitize_radius(radius);
    if radius < 1.0 {
        return 0;
    }
    let r = radius as f64;
    let edge = (MIN_WEIGHT_EDGE * (2.0 * PI * r * r).sqrt()).ln();
    let window = if edge < 0.0 {
        (-2.0 * r * r * edge).sqrt().floor()
    } else {
        (3.0 * r).ceil()
    };
    let window = window.min(MAX_BLUR_WINDOW as f64) as usize;
    (window + window % 2).min(MAX_BLUR_WINDOW)
}

/// Normalised one-sided Gaussian weights, index 0 being the centre texel.
#[derive(Clone, Debug, PartialEq)]
pub struct GaussianWeightTable {
    weights: Vec<f64>,
    sum_of_weights: f64,
}

impl GaussianWeightTable {
    pub fn for_radius(radius: f32) -> Self {
        Self::for_parameters(&BlurParameters::new(radius))
    }

    pub fn for_parameters(params: &BlurParameters) -> Self {
        Self::for_parameters_within(params, usize::MAX)
    }

    /// Like [`Self::for_parameters`], keeping at most `0..=max_index`.
    ///
    /// Same weights as `for_parameters(params).truncated(max_index)`, without
    /// allocating the full window first.
    pub fn for_parameters_within(params: &BlurParameters, max_index: usize) -> Self {
        Self::build(blur_window(params.radius).min(max_index), params.sigma() as f64)
    }

    fn build(window: usize, sigma: f64) -> Self {
        if window == 0 || sigma <= 0.0 {
            return Self {
                weights: vec![1.0],
                sum_of_weights: 1.0,
            };
        }
        let two_sigma_sq = 2.0 * sigma * sigma;
        let coefficient = 1.0 / (PI * two_sigma_sq).sqrt();
        let mut weights: Vec<f64> = (0..=window)
            .map(|i| {
                let x = i as f64;
                coefficient * (-(x * x) / two_sigma_sq).exp()
            })
            .collect();
        let sum_of_weights = symmetric_sum(&weights);
        for w in &mut weights {
            *w /= sum_of_weights;
        }
        Self {
            weights,
            sum_of_weights,
        }
    }

    /// Keep indices `0..=max_index` and renormalise the shortened kernel.
    pub fn truncated(&self, max_index: usize) -> Self {
        if max_index + 1 >= self.weights.len() {
            return self.clone();
        }
        let mut weights = self.weights[..=max_index].to_vec();
        let sum = symmetric_sum(&weights);
        for w in &mut weights {
            *w /= sum;
        }
        Self {
            weights,
            sum_of_weights: self.sum_of_weights * sum,
        }
    }

    /// Largest offset from the centre that carries a weight.
    pub fn window(&self) -> usize {
        self.weights.len() - 1
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Sum of the raw (pre-normalisation) symmetric kernel.
    pub fn sum_of_weights(&self) -> f64 {
        self.sum_of_weights
    }

    pub fn to_f32(&self) -> Vec<f32> {
        self.weights.iter().map(|&w| w as f32).collect()
    }
}

/// `w[0] + 2 * sum(w[1..])`: the weight of a symmetric kernel given one side.
fn symmetric_sum(weights: &[f64]) -> f64 {
    weights
        .iter()
        .enumerate()
        .map(|(i, &w)| if i == 0 { w } else { 2.0 * w })
        .sum()
}

/// Merge two neighbouring taps into one bilinear fetch.
///
/// Returns `(weight, offset)`: the fetch lands between the two texels so that
/// the hardware filter reproduces both contributions.
pub fn collapse_pair(first_weight: f64, first_offset: f64, second_weight: f64, second_offset: f64) -> (f64, f64) {
    let weight = first_weight + second_weight;
    if weight <= 0.0 {
        return (0.0, (first_offset + second_offset) * 0.5);
    }
    let offset = (first_weight * first_offset + second_weight * second_offset) / weight;
    (weight, offset)
}

/// Array capacities of the program the weights are uploaded to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleCapacity {
    /// Collapsed taps drawn with one linear fetch each.
    pub linear_taps: usize,
    /// Collapsed taps in total, linear and residual.
    pub total_taps: usize,
}

impl Default for SampleCapacity {
    fn default() -> Self {
        Self {
            linear_taps: MAX_LINEAR_TAPS,
            total_taps: usize::MAX / 4,
        }
    }
}

/// Solver output, ready for uniform upload.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OptimizedSampleSet {
    /// Centre weight followed by one weight per collapsed tap.
    pub weights: Vec<f32>,
    /// Offset of collapsed tap `k` (weight `weights[k + 1]`), in texels.
    pub offsets: Vec<f32>,
    /// Raw Gaussian table scaled like `weights`; residual taps read from it.
    pub standard_weights: Vec<f32>,
    /// Linear-sampled collapsed taps, at most [`MAX_LINEAR_TAPS`]. Zero for
    /// the identity set; use [`Self::tap_count`] to count the centre tap too.
    pub sample_count: usize,
    /// All collapsed taps, residual ones included.
    pub optimized_sample_count: usize,
    /// Half-width of the (possibly truncated) Gaussian window.
    pub blur_radius: usize,
}

impl OptimizedSampleSet {
    pub fn identity() -> Self {
        Self {
            weights: vec![1.0],
            offsets: Vec::new(),
            standard_weights: vec![1.0],
            sample_count: 0,
            optimized_sample_count: 0,
            blur_radius: 0,
        }
    }

    /// Distinct tap weights including the centre one.
    pub fn tap_count(&self) -> usize {
        self.weights.len()
    }

    /// Taps past the linear budget, drawn as two nearest fetches each.
    pub fn residual_count(&self) -> usize {
        self.optimized_sample_count - self.sample_count
    }

    /// `weights[0] + 2 * sum(weights[1..])`; one for a normalised set.
    pub fn kernel_sum(&self) -> f32 {
        let weights: Vec<f64> = self.weights.iter().map(|&w| w as f64).collect();
        symmetric_sum(&weights) as f32
    }
}

/// Structured record handed to a [`DiagnosticsHook`] after each solve.
#[derive(Clone, Debug, Serialize)]
pub struct WeightDiagnostics {
    pub radius: f32,
    pub blur_radius: usize,
    pub sample_count: usize,
    pub optimized_sample_count: usize,
    pub weights: Vec<f32>,
    pub offsets: Vec<f32>,
}

pub type DiagnosticsHook = Arc<dyn Fn(&WeightDiagnostics) + Send + Sync>;

/// Computes kernels for one program's array capacity.
#[derive(Clone, Default)]
pub struct WeightSolver {
    capacity: SampleCapacity,
    diagnostics: Option<DiagnosticsHook>,
}

impl std::fmt::Debug for WeightSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightSolver")
            .field("capacity", &self.capacity)
            .field("diagnostics", &self.diagnostics.is_some())
            .finish()
    }
}

impl WeightSolver {
    pub fn new(capacity: SampleCapacity) -> Self {
        Self {
            capacity,
            diagnostics: None,
        }
    }

    pub fn with_diagnostics(mut self, hook: DiagnosticsHook) -> Self {
        self.diagnostics = Some(hook);
        self
    }

    pub fn set_diagnostics(&mut self, hook: Option<DiagnosticsHook>) {
        self.diagnostics = hook;
    }

    pub fn capacity(&self) -> SampleCapacity {
        self.capacity
    }

    pub fn solve(&self, radius: f32) -> OptimizedSampleSet {
        self.solve_parameters(&BlurParameters::new(radius))
    }

    /// Solve for `params`, keeping at most `capacity.total_taps` collapsed
    /// taps. The window is cut before the table is built, so any radius is
    /// cheap.
    pub fn solve_parameters(&self, params: &BlurParameters) -> OptimizedSampleSet {
        let max_index = self.capacity.total_taps.saturating_mul(2);
        let table = GaussianWeightTable::for_parameters_within(params, max_index);
        let set = self.collapse(&table);
        self.report(params.radius, &set);
        set
    }

    fn collapse(&self, table: &GaussianWeightTable) -> OptimizedSampleSet {
        if table.window() == 0 {
            return OptimizedSampleSet::identity();
        }

        let total = table.window().div_ceil(2);
        let raw = table.weights();

        let mut weights = Vec::with_capacity(total + 1);
        let mut offsets = Vec::with_capacity(total);
        weights.push(raw[0]);
        for i in 0..total {
            let first = i * 2 + 1;
            let second = i * 2 + 2;
            let (weight, offset) = collapse_pair(
                raw[first],
                first as f64,
                raw.get(second).copied().unwrap_or(0.0),
                second as f64,
            );
            weights.push(weight);
            offsets.push(offset);
        }

        // weights[0] is the centre tap; it is counted once, the others twice.
        let sum = -weights[0] + weights.iter().map(|w| w * 2.0).sum::<f64>();
        let scale = if sum > 0.0 { 1.0 / sum } else { 1.0 };

        OptimizedSampleSet {
            weights: weights.iter().map(|w| (w * scale) as f32).collect(),
            offsets: offsets.iter().map(|&o| o as f32).collect(),
            standard_weights: raw.iter().map(|w| (w * scale) as f32).collect(),
            sample_count: total.min(self.capacity.linear_taps),
            optimized_sample_count: total,
            blur_radius: table.window(),
        }
    }

    fn report(&self, radius: f32, set: &OptimizedSampleSet) {
        if let Some(hook) = &self.diagnostics {
            hook(&WeightDiagnostics {
                radius,
                blur_radius: set.blur_radius,
                sample_count: set.sample_count,
                optimized_sample_count: set.optimized_sample_count,
                weights: set.weights.clone(),
                offsets: set.offsets.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn window_matches_reference_radii() {
        assert_eq!(blur_window(0.0), 0);
        assert_eq!(blur_window(0.99), 0);
        assert_eq!(blur_window(1.0), 4);
        assert_eq!(blur_window(2.0), 6);
        assert_eq!(blur_window(9.8), 22);
        assert_eq!(blur_window(50.0), 60);
    }

    #[test]
    fn window_is_always_even() {
        for r in [1.0f32, 1.5, 3.3, 7.0, 12.25, 33.0, 101.0, 150.0] {
            assert_eq!(blur_window(r) % 2, 0, "radius {r}");
        }
    }

    #[test]
    fn huge_radius_falls_back_to_three_sigma() {
        assert_eq!(blur_window(150.0), 450);
    }

    #[test]
    fn extreme_radius_is_capped() {
        assert_eq!(blur_window(1.0e6), MAX_BLUR_WINDOW);
        assert_eq!(blur_window(f32::MAX), MAX_BLUR_WINDOW);
        let table = GaussianWeightTable::for_radius(f32::MAX);
        assert_eq!(table.window(), MAX_BLUR_WINDOW);
    }

    #[test]
    fn bounded_solver_never_builds_the_full_window() {
        let solver = WeightSolver::new(SampleCapacity {
            linear_taps: 7,
            total_taps: 15,
        });
        for radius in [1.0e7, 1.0e12, f32::MAX] {
            let set = solver.solve(radius);
            assert_eq!(set.optimized_sample_count, 15, "radius {radius}");
            assert_eq!(set.weights.len(), 16);
            assert_eq!(set.standard_weights.len(), 31);
            assert_eq!(set.blur_radius, 30);
            assert!((set.kernel_sum() - 1.0).abs() < 1e-5, "radius {radius}");
        }
    }

    #[test]
    fn bounded_table_matches_a_truncated_one() {
        let params = BlurParameters::new(50.0);
        let bounded = GaussianWeightTable::for_parameters_within(&params, 30);
        let truncated = GaussianWeightTable::for_parameters(&params).truncated(30);
        assert_eq!(bounded.window(), 30);
        for (a, b) in bounded.weights().iter().zip(truncated.weights()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn nan_and_negative_radius_are_identity() {
        assert_eq!(blur_window(f32::NAN), 0);
        assert_eq!(blur_window(-3.0), 0);
        let set = WeightSolver::default().solve(-1.0);
        assert_eq!(set, OptimizedSampleSet::identity());
    }

    #[test]
    fn table_is_normalised() {
        let table = GaussianWeightTable::for_radius(4.0);
        let sum = symmetric_sum(table.weights());
        assert!((sum - 1.0).abs() < 1e-12, "sum = {sum}");
        assert!(table.sum_of_weights() > 0.0);
    }

    #[test]
    fn truncated_table_is_renormalised() {
        let table = GaussianWeightTable::for_radius(9.8).truncated(10);
        assert_eq!(table.window(), 10);
        let sum = symmetric_sum(table.weights());
        assert!((sum - 1.0).abs() < 1e-12, "sum = {sum}");
    }

    #[test]
    fn collapse_pair_blends_offsets() {
        let (weight, offset) = collapse_pair(0.3, 1.0, 0.1, 2.0);
        assert!((weight - 0.4).abs() < 1e-12);
        assert!((offset - 1.25).abs() < 1e-12);
    }

    #[test]
    fn collapse_pair_with_zero_weight_lands_midway() {
        assert_eq!(collapse_pair(0.0, 3.0, 0.0, 4.0), (0.0, 3.5));
    }

    #[test]
    fn residual_taps_follow_the_linear_budget() {
        let solver = WeightSolver::new(SampleCapacity {
            linear_taps: 7,
            total_taps: 15,
        });
        let set = solver.solve(9.8);
        assert_eq!(set.blur_radius, 22);
        assert_eq!(set.sample_count, 7);
        assert_eq!(set.optimized_sample_count, 11);
        assert_eq!(set.residual_count(), 4);
        assert_eq!(set.offsets.len(), 11);
        assert_eq!(set.weights.len(), 12);
        assert_eq!(set.standard_weights.len(), 23);
    }

    #[test]
    fn capacity_truncates_and_keeps_the_kernel_normalised() {
        let solver = WeightSolver::new(SampleCapacity {
            linear_taps: 7,
            total_taps: 15,
        });
        let set = solver.solve(50.0);
        assert_eq!(set.optimized_sample_count, 15);
        assert_eq!(set.blur_radius, 30);
        assert!((set.kernel_sum() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn residual_weights_match_their_standard_pair() {
        let solver = WeightSolver::new(SampleCapacity {
            linear_taps: 7,
            total_taps: 15,
        });
        let set = solver.solve(9.8);
        for tap in set.sample_count..set.optimized_sample_count {
            let pair = set.standard_weights[tap * 2 + 1] + set.standard_weights[tap * 2 + 2];
            assert!((pair - set.weights[tap + 1]).abs() < 1e-6, "tap {tap}");
        }
    }

    #[test]
    fn explicit_sigma_changes_the_shape_only() {
        let narrow = GaussianWeightTable::for_parameters(&BlurParameters::new(6.0).with_sigma(2.0));
        let wide = GaussianWeightTable::for_radius(6.0);
        assert_eq!(narrow.window(), wide.window());
        assert!(narrow.weights()[0] > wide.weights()[0]);
    }

    #[test]
    fn diagnostics_hook_sees_every_solve() {
        let seen: Arc<Mutex<Vec<WeightDiagnostics>>> = Arc::default();
        let sink = seen.clone();
        let solver = WeightSolver::default().with_diagnostics(Arc::new(move |d| {
            sink.lock().unwrap().push(d.clone());
        }));
        solver.solve(2.0);
        solver.solve(0.5);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].blur_radius, 6);
        assert_eq!(seen[0].sample_count, 3);
        assert_eq!(seen[1].weights, vec![1.0]);
    }
}
