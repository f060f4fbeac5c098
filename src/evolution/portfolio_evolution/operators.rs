//! Genetic operators that keep every genotype on the bounded probability simplex.
//!
//! Initialization samples a symmetric Dirichlet, crossover is an SBX-style blend whose two
//! coefficients always sum to one, and mutation moves mass between exactly two genes.
//! Each operator finishes with [`repair_to_bounds`], so callers can rely on
//! `sum(w) == 1` and `min_weight <= w_i <= max_weight` afterwards.

use crate::consts::{FLOAT_COMPARISON_EPSILON, MUTATION_TRANSFER_FRACTION};
use crate::evolution::portfolio_evolution::EvolutionError;
use nalgebra::DVector;
use rand::distributions::Uniform;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::Dirichlet;
use utoipa::ToSchema;

const REPAIR_BISECTION_STEPS: usize = 200;

/// Per-asset weight box.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WeightBounds {
    pub min_weight: f64,
    pub max_weight: f64,
}

impl Default for WeightBounds {
    fn default() -> Self {
        Self {
            min_weight: crate::consts::DEFAULT_MIN_WEIGHT,
            max_weight: crate::consts::DEFAULT_MAX_WEIGHT,
        }
    }
}

impl WeightBounds {
    /// The box must intersect the simplex for `num_assets` components:
    /// `n * min_weight <= 1 <= n * max_weight`.
    pub fn validate(&self, num_assets: usize) -> Result<(), EvolutionError> {
        let n = num_assets as f64;
        let ordered = 0.0 <= self.min_weight
            && self.min_weight <= self.max_weight
            && self.max_weight <= 1.0;
        if !ordered {
            return Err(EvolutionError::MalformedBounds(format!(
                "expected 0 <= min_weight <= max_weight <= 1, got [{}, {}]",
                self.min_weight, self.max_weight
            )));
        }
        if n * self.min_weight > 1.0 + FLOAT_COMPARISON_EPSILON {
            return Err(EvolutionError::MalformedBounds(format!(
                "{num_assets} assets at min_weight {} exceed a full allocation",
                self.min_weight
            )));
        }
        if n * self.max_weight < 1.0 - FLOAT_COMPARISON_EPSILON {
            return Err(EvolutionError::MalformedBounds(format!(
                "{num_assets} assets at max_weight {} cannot reach a full allocation",
                self.max_weight
            )));
        }
        Ok(())
    }

    pub fn contains(&self, weights: &[f64], tolerance: f64) -> bool {
        weights
            .iter()
            .all(|w| *w >= self.min_weight - tolerance && *w <= self.max_weight + tolerance)
    }
}

/// Clips negative or non-finite components to zero and rescales to unit sum.
/// A vector with no mass left becomes uniform.
pub fn normalize_in_place(weights: &mut [f64]) {
    weights
        .iter_mut()
        .for_each(|w| *w = if w.is_finite() { w.max(0.0) } else { 0.0 });
    let total: f64 = weights.iter().sum();
    if total > FLOAT_COMPARISON_EPSILON {
        weights.iter_mut().for_each(|w| *w /= total);
    } else {
        let uniform = 1.0 / weights.len() as f64;
        weights.iter_mut().for_each(|w| *w = uniform);
    }
}

/// Puts `weights` back on the bounded simplex.
///
/// First the cheap path: clip to the box and renormalize. Renormalizing can push a
/// component back outside the box, in which case the vector is projected instead: the
/// shift `tau` with `sum(clamp(w_i + tau, min, max)) == 1` is found by bisection. That
/// sum is monotone in `tau` and brackets 1 whenever the bounds were validated.
pub fn repair_to_bounds(weights: &mut [f64], bounds: &WeightBounds) {
    if weights.is_empty() {
        return;
    }
    normalize_in_place(weights);

    let clamp = |w: f64| w.clamp(bounds.min_weight, bounds.max_weight);
    let mut clipped: Vec<f64> = weights.iter().map(|w| clamp(*w)).collect();
    normalize_in_place(&mut clipped);
    if bounds.contains(&clipped, FLOAT_COMPARISON_EPSILON) {
        weights.copy_from_slice(&clipped);
        return;
    }

    let total_at = |tau: f64| weights.iter().map(|w| clamp(w + tau)).sum::<f64>();
    let (mut low, mut high) = (-1.0 - bounds.max_weight, 1.0 + bounds.max_weight);
    for _ in 0..REPAIR_BISECTION_STEPS {
        let mid = 0.5 * (low + high);
        if total_at(mid) < 1.0 {
            low = mid;
        } else {
            high = mid;
        }
        if high - low < f64::EPSILON {
            break;
        }
    }
    let tau = 0.5 * (low + high);
    weights.iter_mut().for_each(|w| *w = clamp(*w + tau));
}

/// A single point drawn uniformly from the simplex, i.e. from Dirichlet(1, ..., 1).
pub fn sample_simplex<R: Rng + ?Sized>(
    num_assets: usize,
    rng: &mut R,
) -> Result<Vec<f64>, EvolutionError> {
    let dirichlet = Dirichlet::new(vec![1.0; num_assets])
        .map_err(|e| EvolutionError::Sampling(e.to_string()))?;
    let draw: DVector<f64> = dirichlet.sample(rng);
    Ok(draw.iter().copied().collect())
}

pub fn initialize_population<R: Rng + ?Sized>(
    population_size: usize,
    num_assets: usize,
    bounds: &WeightBounds,
    rng: &mut R,
) -> Result<Vec<Vec<f64>>, EvolutionError> {
    if population_size == 0 && num_assets == 0 {
        return Err(EvolutionError::BadPopulationParameter(
            "Both population size and number of assets are zero, but none are supposed to be."
                .into(),
        ));
    } else if population_size == 0 {
        return Err(EvolutionError::BadPopulationParameter(
            "Population size cannot be zero".into(),
        ));
    } else if num_assets == 0 {
        return Err(EvolutionError::BadPopulationParameter(
            "Number of assets cannot be zero".into(),
        ));
    }
    bounds.validate(num_assets)?;

    (0..population_size)
        .map(|_| {
            let mut weights = sample_simplex(num_assets, rng)?;
            repair_to_bounds(&mut weights, bounds);
            Ok(weights)
        })
        .collect()
}

/// Polynomial blend factor for a uniform draw `u`. `eta` controls how tightly children
/// cluster around their parents.
pub fn blend_factor(u: f64, eta: f64) -> f64 {
    let exponent = 1.0 / (eta + 1.0);
    if u <= 0.5 {
        (2.0 * u).powf(exponent)
    } else {
        (1.0 / (2.0 * (1.0 - u))).powf(exponent)
    }
}

/// The raw (pre-repair) children of a blend. Both coefficient pairs sum to one, so unit-sum
/// parents give unit-sum children for any `beta`.
pub fn blend(parent_1: &[f64], parent_2: &[f64], beta: f64) -> (Vec<f64>, Vec<f64>) {
    parent_1
        .iter()
        .zip(parent_2)
        .map(|(&p1, &p2)| {
            (
                0.5 * ((1.0 + beta) * p1 + (1.0 - beta) * p2),
                0.5 * ((1.0 - beta) * p1 + (1.0 + beta) * p2),
            )
        })
        .unzip()
}

pub fn crossover<R: Rng + ?Sized>(
    parent_1: &[f64],
    parent_2: &[f64],
    eta: f64,
    bounds: &WeightBounds,
    rng: &mut R,
) -> (Vec<f64>, Vec<f64>) {
    let u: f64 = rng.sample(Uniform::new(0.0, 1.0));
    let beta = blend_factor(u, eta);
    let (mut child_1, mut child_2) = blend(parent_1, parent_2, beta);
    repair_to_bounds(&mut child_1, bounds);
    repair_to_bounds(&mut child_2, bounds);
    (child_1, child_2)
}

/// Signed polynomial perturbation in [-1, 1] for a uniform draw `u`.
pub fn mutation_delta(u: f64, eta: f64) -> f64 {
    let exponent = 1.0 / (eta + 1.0);
    if u < 0.5 {
        (2.0 * u).powf(exponent) - 1.0
    } else {
        1.0 - (2.0 * (1.0 - u)).powf(exponent)
    }
}

/// Moves `min(w_i, w_j) * 0.2 * delta` from gene `i` to gene `j` for two distinct random
/// genes, then repairs.
pub fn mutate<R: Rng + ?Sized>(weights: &mut [f64], eta: f64, bounds: &WeightBounds, rng: &mut R) {
    if weights.len() < 2 {
        return;
    }
    let picked = rand::seq::index::sample(rng, weights.len(), 2);
    let (i, j) = (picked.index(0), picked.index(1));
    let u: f64 = rng.sample(Uniform::new(0.0, 1.0));
    let delta = mutation_delta(u, eta);

    let transfer = weights[i].min(weights[j]) * MUTATION_TRANSFER_FRACTION * delta;
    weights[i] -= transfer;
    weights[j] += transfer;
    repair_to_bounds(weights, bounds);
}
