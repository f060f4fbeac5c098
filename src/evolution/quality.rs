//! Quality indicators for a Pareto front and the per-generation convergence tracker.
//!
//! All fronts are given in the minimization convention used by the loop.

use crate::consts::{
    DEFAULT_CONVERGENCE_THRESHOLD, DEFAULT_CONVERGENCE_WINDOW, DEFAULT_HYPERVOLUME_SAMPLES,
    HYPERVOLUME_REFERENCE_MARGIN, NUMBER_OF_OPTIMIZATION_OBJECTIVES,
};
use crate::evolution::aggregator::{Aggregator, PopulationStandardDeviation};
use crate::portfolio::objectives_dominate;
use rand::distributions::Uniform;
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type ObjectiveVector = [f64; NUMBER_OF_OPTIMIZATION_OBJECTIVES];

/// Convergence window and relative-improvement threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConvergenceCriteria {
    pub window: usize,
    pub threshold: f64,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            window: DEFAULT_CONVERGENCE_WINDOW,
            threshold: DEFAULT_CONVERGENCE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FrontMetrics {
    pub hypervolume: f64,
    /// `f64::INFINITY` for fronts with fewer than two points.
    pub spread: f64,
    pub spacing: f64,
    pub pareto_size: usize,
}

/// Computes front quality indicators.
///
/// Hypervolume is a Monte Carlo estimate, so the calculator owns a seeded generator and
/// successive calls draw fresh samples from it.
#[derive(Debug, Clone)]
pub struct QualityMetrics {
    reference_point: Option<ObjectiveVector>,
    samples: usize,
    rng: StdRng,
}

impl QualityMetrics {
    pub fn new(seed: u64) -> Self {
        Self {
            reference_point: None,
            samples: DEFAULT_HYPERVOLUME_SAMPLES,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn with_reference_point(mut self, reference_point: ObjectiveVector) -> Self {
        self.reference_point = Some(reference_point);
        self
    }

    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples.max(1);
        self
    }

    /// Worst value per objective pushed out by a margin of its own magnitude.
    pub fn default_reference_point(front: &[ObjectiveVector]) -> ObjectiveVector {
        let mut reference = [f64::NEG_INFINITY; NUMBER_OF_OPTIMIZATION_OBJECTIVES];
        for point in front {
            for (r, v) in reference.iter_mut().zip(point) {
                *r = r.max(*v);
            }
        }
        reference.map(|worst| worst + HYPERVOLUME_REFERENCE_MARGIN * worst.abs())
    }

    pub fn hypervolume(&mut self, front: &[ObjectiveVector]) -> f64 {
        if front.is_empty() {
            return 0.0;
        }
        let reference = self
            .reference_point
            .unwrap_or_else(|| Self::default_reference_point(front));

        let mut ideal = [f64::INFINITY; NUMBER_OF_OPTIMIZATION_OBJECTIVES];
        for point in front {
            for (lo, v) in ideal.iter_mut().zip(point) {
                *lo = lo.min(*v);
            }
        }
        let mut box_volume = 1.0;
        for (lo, hi) in ideal.iter().zip(&reference) {
            let side = hi - lo;
            if !(side > 0.0) {
                return 0.0;
            }
            box_volume *= side;
        }

        let axes: Vec<Uniform<f64>> = ideal
            .iter()
            .zip(&reference)
            .map(|(lo, hi)| Uniform::new(*lo, *hi))
            .collect();
        let mut dominated = 0usize;
        for _ in 0..self.samples {
            let mut sample = [0.0; NUMBER_OF_OPTIMIZATION_OBJECTIVES];
            for (s, axis) in sample.iter_mut().zip(&axes) {
                *s = self.rng.sample(axis);
            }
            if front.iter().any(|point| objectives_dominate(point, &sample)) {
                dominated += 1;
            }
        }
        (dominated as f64 / self.samples as f64) * box_volume
    }

    pub fn spread(front: &[ObjectiveVector]) -> f64 {
        if front.len() < 2 {
            return f64::INFINITY;
        }
        let normalized = normalize_front(front);

        let extremes: Vec<ObjectiveVector> = (0..NUMBER_OF_OPTIMIZATION_OBJECTIVES)
            .map(|objective| {
                normalized
                    .iter()
                    .copied()
                    .reduce(|best, p| if p[objective] < best[objective] { p } else { best })
                    .unwrap_or([0.0; NUMBER_OF_OPTIMIZATION_OBJECTIVES])
            })
            .collect();

        let mut sorted = normalized;
        sorted.sort_by(|a, b| a[0].total_cmp(&b[0]));
        let distances: Vec<f64> = sorted.windows(2).map(|w| euclidean(&w[0], &w[1])).collect();
        let mean = distances.iter().sum::<f64>() / distances.len() as f64;

        let d_first = euclidean(&sorted[0], &extremes[0]);
        let d_last = euclidean(&sorted[sorted.len() - 1], &extremes[extremes.len() - 1]);
        let deviation: f64 = distances.iter().map(|d| (d - mean).abs()).sum();

        let numerator = d_first + d_last + deviation;
        let denominator = d_first + d_last + distances.len() as f64 * mean;
        if denominator > 0.0 {
            numerator / denominator
        } else {
            0.0
        }
    }

    /// Population standard deviation of nearest-neighbour distances.
    pub fn spacing(front: &[ObjectiveVector]) -> f64 {
        if front.len() < 2 {
            return 0.0;
        }
        let nearest: Vec<f64> = front
            .iter()
            .enumerate()
            .map(|(i, point)| {
                front
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, other)| euclidean(point, other))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        PopulationStandardDeviation.value(&nearest).unwrap_or(0.0)
    }

    pub fn all(&mut self, front: &[ObjectiveVector]) -> FrontMetrics {
        FrontMetrics {
            hypervolume: self.hypervolume(front),
            spread: Self::spread(front),
            spacing: Self::spacing(front),
            pareto_size: front.len(),
        }
    }
}

/// Min-max scaling per objective; a flat column maps to zero.
fn normalize_front(front: &[ObjectiveVector]) -> Vec<ObjectiveVector> {
    let mut lo = [f64::INFINITY; NUMBER_OF_OPTIMIZATION_OBJECTIVES];
    let mut hi = [f64::NEG_INFINITY; NUMBER_OF_OPTIMIZATION_OBJECTIVES];
    for point in front {
        for k in 0..NUMBER_OF_OPTIMIZATION_OBJECTIVES {
            lo[k] = lo[k].min(point[k]);
            hi[k] = hi[k].max(point[k]);
        }
    }
    front
        .iter()
        .map(|point| {
            let mut scaled = [0.0; NUMBER_OF_OPTIMIZATION_OBJECTIVES];
            for k in 0..NUMBER_OF_OPTIMIZATION_OBJECTIVES {
                let range = if hi[k] - lo[k] == 0.0 { 1.0 } else { hi[k] - lo[k] };
                scaled[k] = (point[k] - lo[k]) / range;
            }
            scaled
        })
        .collect()
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// One row of a [`ConvergenceHistory`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GenerationMetrics {
    pub generation: usize,
    pub hypervolume: f64,
    pub spread: f64,
    pub spacing: f64,
    pub pareto_size: usize,
    /// Lowest first objective (negated return) in the whole population.
    pub best_fitness: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConvergenceHistory {
    pub generations: Vec<GenerationMetrics>,
}

impl ConvergenceHistory {
    pub fn len(&self) -> usize {
        self.generations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generations.is_empty()
    }

    pub fn hypervolumes(&self) -> Vec<f64> {
        self.generations.iter().map(|g| g.hypervolume).collect()
    }

    pub fn last(&self) -> Option<&GenerationMetrics> {
        self.generations.last()
    }
}

fn relative_improvement(window: &[f64]) -> f64 {
    let max = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = window.iter().copied().fold(f64::INFINITY, f64::min);
    (max - min) / (min + 1e-10)
}

/// Accumulates a [`ConvergenceHistory`] one generation at a time. It only observes: nothing
/// here feeds back into the population.
#[derive(Debug, Clone)]
pub struct ConvergenceTracker {
    history: ConvergenceHistory,
    metrics: QualityMetrics,
}

impl ConvergenceTracker {
    pub fn new(seed: u64) -> Self {
        Self {
            history: ConvergenceHistory::default(),
            metrics: QualityMetrics::new(seed),
        }
    }

    pub fn update(
        &mut self,
        generation: usize,
        front: &[ObjectiveVector],
        population: &[ObjectiveVector],
    ) -> GenerationMetrics {
        let front_metrics = self.metrics.all(front);
        let best_fitness = population
            .iter()
            .map(|p| p[0])
            .reduce(f64::min)
            .unwrap_or(0.0);
        let row = GenerationMetrics {
            generation,
            hypervolume: front_metrics.hypervolume,
            spread: front_metrics.spread,
            spacing: front_metrics.spacing,
            pareto_size: front_metrics.pareto_size,
            best_fitness,
        };
        self.history.generations.push(row);
        row
    }

    pub fn history(&self) -> &ConvergenceHistory {
        &self.history
    }

    pub fn into_history(self) -> ConvergenceHistory {
        self.history
    }

    /// True once the last `window` hypervolumes improve by less than `threshold`
    /// relatively. Needs at least `window + 1` generations.
    pub fn has_converged(&self, criteria: &ConvergenceCriteria) -> bool {
        has_converged(&self.history, criteria)
    }

    pub fn convergence_generation(&self, criteria: &ConvergenceCriteria) -> Option<usize> {
        convergence_generation(&self.history, criteria)
    }
}

pub fn has_converged(history: &ConvergenceHistory, criteria: &ConvergenceCriteria) -> bool {
    let hypervolumes = history.hypervolumes();
    if criteria.window == 0 || hypervolumes.len() < criteria.window + 1 {
        return false;
    }
    let recent = &hypervolumes[hypervolumes.len() - criteria.window..];
    relative_improvement(recent) < criteria.threshold
}

/// Generation right after the first window of `window` hypervolumes whose relative
/// improvement is below `threshold`.
pub fn convergence_generation(
    history: &ConvergenceHistory,
    criteria: &ConvergenceCriteria,
) -> Option<usize> {
    if criteria.window == 0 {
        return None;
    }
    let hypervolumes = history.hypervolumes();
    (criteria.window..hypervolumes.len())
        .find(|&i| relative_improvement(&hypervolumes[i - criteria.window..i]) < criteria.threshold)
        .map(|i| history.generations[i].generation)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_from(hypervolumes: &[f64]) -> ConvergenceHistory {
        ConvergenceHistory {
            generations: hypervolumes
                .iter()
                .enumerate()
                .map(|(i, hv)| GenerationMetrics {
                    generation: i + 1,
                    hypervolume: *hv,
                    spread: 0.0,
                    spacing: 0.0,
                    pareto_size: 1,
                    best_fitness: 0.0,
                })
                .collect(),
        }
    }

    #[test]
    fn test_single_point_front_boundaries() {
        let front = [[-0.01, 0.02, 0.03]];
        assert_eq!(QualityMetrics::spacing(&front), 0.0);
        assert_eq!(QualityMetrics::spread(&front), f64::INFINITY);
    }

    #[test]
    fn test_empty_front_has_zero_hypervolume() {
        let mut metrics = QualityMetrics::new(0);
        assert_eq!(metrics.hypervolume(&[]), 0.0);
    }

    #[test]
    fn test_hypervolume_of_single_point_with_explicit_reference() {
        let mut metrics = QualityMetrics::new(1).with_reference_point([1.0, 1.0, 1.0]);
        // The sampling box is exactly the region dominated by the point.
        let hv = metrics.hypervolume(&[[0.0, 0.0, 0.0]]);
        assert!((hv - 1.0).abs() < 1e-9, "got {hv}");
    }

    #[test]
    fn test_hypervolume_estimate_for_two_points() {
        let mut metrics = QualityMetrics::new(11)
            .with_reference_point([1.0, 1.0, 1.0])
            .with_samples(40_000);
        // Box is the unit cube; each point covers half of it and their overlap is a quarter.
        let hv = metrics.hypervolume(&[[0.0, 0.5, 0.0], [0.5, 0.0, 0.0]]);
        assert!((hv - 0.75).abs() < 0.02, "got {hv}");
    }

    #[test]
    fn test_default_reference_point_is_sign_safe() {
        let reference = QualityMetrics::default_reference_point(&[
            [-0.02, 0.01, 0.05],
            [-0.01, 0.02, 0.04],
        ]);
        assert!((reference[0] - (-0.009)).abs() < 1e-12, "negative worst moves toward zero");
        assert!((reference[1] - 0.022).abs() < 1e-12);
        assert!((reference[2] - 0.055).abs() < 1e-12);
    }

    #[test]
    fn test_spread_of_evenly_spaced_line() {
        // Points on a line; extremes coincide with the sorted endpoints for objective 0,
        // and the last objective's minimum is also an endpoint.
        let front = [[0.0, 1.0, 1.0], [0.5, 0.5, 0.5], [1.0, 0.0, 0.0]];
        let spread = QualityMetrics::spread(&front);
        assert!(spread.abs() < 1e-12, "uniform front should have zero spread, got {spread}");
    }

    #[test]
    fn test_spacing_of_uneven_front() {
        let front = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [3.0, 0.0, 0.0]];
        // nearest distances 1, 1, 2 -> population std = sqrt(2/9)
        let spacing = QualityMetrics::spacing(&front);
        assert!((spacing - (2.0_f64 / 9.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_convergence_needs_window_plus_one() {
        let criteria = ConvergenceCriteria {
            window: 3,
            threshold: 0.01,
        };
        assert!(!has_converged(&history_from(&[1.0, 1.0, 1.0]), &criteria));
        assert!(has_converged(&history_from(&[0.5, 1.0, 1.0, 1.0]), &criteria));
        assert!(!has_converged(&history_from(&[1.0, 1.0, 1.2, 1.5]), &criteria));
    }

    #[test]
    fn test_convergence_generation_is_first_flat_window_end() {
        let criteria = ConvergenceCriteria {
            window: 2,
            threshold: 0.01,
        };
        let history = history_from(&[0.1, 0.5, 0.9, 0.9, 0.9, 0.9]);
        // windows [0.1,0.5], [0.5,0.9], [0.9,0.9]; the flat one is reported at index 4
        assert_eq!(convergence_generation(&history, &criteria), Some(5));
        let history = history_from(&[0.1, 0.2, 0.4, 0.8]);
        assert_eq!(convergence_generation(&history, &criteria), None);
    }

    #[test]
    fn test_tracker_records_population_best() {
        let mut tracker = ConvergenceTracker::new(5);
        let front = [[-0.02, 0.01, 0.02], [-0.01, 0.005, 0.01]];
        let population = [[-0.02, 0.01, 0.02], [-0.01, 0.005, 0.01], [-0.03, 0.5, 0.5]];
        let row = tracker.update(1, &front, &population);
        assert_eq!(row.best_fitness, -0.03);
        assert_eq!(row.pareto_size, 2);
        assert_eq!(tracker.history().len(), 1);
    }
}
