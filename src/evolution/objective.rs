use crate::consts::{MINIMUM_CVAR_OBSERVATIONS, NUMBER_OF_OPTIMIZATION_OBJECTIVES};
use crate::evolution::aggregator::{
    Aggregator, AggregatorError, PopulationStandardDeviation, TailMean,
};
use crate::profile::PenaltyScaling;
use crate::returns::ReturnStatistics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum OptimizationDirection {
    Maximize,
    Minimize,
}

/// A scalar measure of a weight vector against a set of return statistics.
pub trait OptimizationObjective: std::fmt::Debug + Send + Sync {
    fn compute(
        &self,
        weights: &[f64],
        statistics: &ReturnStatistics,
    ) -> Result<f64, AggregatorError>;

    fn direction(&self) -> OptimizationDirection;

    /// The value under the minimization convention used by the ranking.
    fn minimized(
        &self,
        weights: &[f64],
        statistics: &ReturnStatistics,
    ) -> Result<f64, AggregatorError> {
        let value = self.compute(weights, statistics)?;
        Ok(match self.direction() {
            OptimizationDirection::Maximize => -value,
            OptimizationDirection::Minimize => value,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExpectedReturn;

impl OptimizationObjective for ExpectedReturn {
    fn compute(
        &self,
        weights: &[f64],
        statistics: &ReturnStatistics,
    ) -> Result<f64, AggregatorError> {
        Ok(weights
            .iter()
            .zip(statistics.mean_returns.iter())
            .map(|(w, mu)| w * mu)
            .sum())
    }

    fn direction(&self) -> OptimizationDirection {
        OptimizationDirection::Maximize
    }
}

/// Portfolio variance `w' Σ w`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Variance;

impl OptimizationObjective for Variance {
    fn compute(
        &self,
        weights: &[f64],
        statistics: &ReturnStatistics,
    ) -> Result<f64, AggregatorError> {
        let n = weights.len();
        let covariance = &statistics.covariance;
        let mut variance = 0.0;
        for i in 0..n {
            for j in 0..n {
                variance += weights[i] * covariance[(i, j)] * weights[j];
            }
        }
        Ok(variance)
    }

    fn direction(&self) -> OptimizationDirection {
        OptimizationDirection::Minimize
    }
}

/// Mean of the worst `alpha` fraction of per-period portfolio losses.
///
/// With fewer than 20 finite loss observations the tail is too thin to average, and the
/// population standard deviation of the losses is used instead.
#[derive(Debug, Clone, Copy)]
pub struct ConditionalValueAtRisk {
    pub alpha: f64,
}

impl ConditionalValueAtRisk {
    pub fn losses(weights: &[f64], statistics: &ReturnStatistics) -> Vec<f64> {
        statistics
            .period_returns
            .row_iter()
            .map(|row| -row.iter().zip(weights).map(|(r, w)| r * w).sum::<f64>())
            .filter(|loss| loss.is_finite())
            .collect()
    }
}

impl OptimizationObjective for ConditionalValueAtRisk {
    fn compute(
        &self,
        weights: &[f64],
        statistics: &ReturnStatistics,
    ) -> Result<f64, AggregatorError> {
        let losses = Self::losses(weights, statistics);
        if losses.len() < MINIMUM_CVAR_OBSERVATIONS {
            return PopulationStandardDeviation.value(&losses);
        }
        TailMean {
            fraction: self.alpha,
        }
        .value(&losses)
    }

    fn direction(&self) -> OptimizationDirection {
        OptimizationDirection::Minimize
    }
}

/// Objective vector and feasibility of a single weight vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fitness {
    /// `[-return, scaled variance, scaled CVaR]`, all minimized.
    pub objectives: [f64; NUMBER_OF_OPTIMIZATION_OBJECTIVES],
    /// `max(w) - max_weight`; feasible when not positive.
    pub concentration_margin: f64,
    /// Sum of the positive parts of every active constraint.
    pub constraint_violation: f64,
}

impl Fitness {
    pub fn is_feasible(&self) -> bool {
        self.constraint_violation <= 0.0
    }
}

/// Maps weight vectors to [`Fitness`] for one problem instance.
///
/// The statistics are shared read-only across evaluation threads. Weights are assumed to
/// be on the simplex already and are never renormalized here.
#[derive(Debug, Clone)]
pub struct FitnessEvaluator {
    statistics: Arc<ReturnStatistics>,
    penalty: PenaltyScaling,
    max_weight: f64,
    cvar: ConditionalValueAtRisk,
    enforce_budget_equality: bool,
}

impl FitnessEvaluator {
    pub fn new(
        statistics: Arc<ReturnStatistics>,
        penalty: PenaltyScaling,
        max_weight: f64,
        cvar_alpha: f64,
    ) -> Self {
        Self {
            statistics,
            penalty,
            max_weight,
            cvar: ConditionalValueAtRisk { alpha: cvar_alpha },
            enforce_budget_equality: false,
        }
    }

    /// Adds `|sum(w) - 1|` to the constraint violation.
    pub fn with_budget_equality(mut self, enabled: bool) -> Self {
        self.enforce_budget_equality = enabled;
        self
    }

    pub fn statistics(&self) -> &ReturnStatistics {
        &self.statistics
    }

    pub fn num_assets(&self) -> usize {
        self.statistics.num_assets()
    }

    pub fn evaluate(&self, weights: &[f64]) -> Result<Fitness, AggregatorError> {
        let statistics = self.statistics.as_ref();
        let negated_return = ExpectedReturn.minimized(weights, statistics)?;
        let variance = Variance.compute(weights, statistics)? * self.penalty.variance;
        let cvar = self.cvar.compute(weights, statistics)? * self.penalty.cvar;

        let largest = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let concentration_margin = largest - self.max_weight;
        let mut constraint_violation = concentration_margin.max(0.0);
        if self.enforce_budget_equality {
            constraint_violation += (weights.iter().sum::<f64>() - 1.0).abs();
        }

        Ok(Fitness {
            objectives: [negated_return, variance, cvar],
            concentration_margin,
            constraint_violation,
        })
    }
}
