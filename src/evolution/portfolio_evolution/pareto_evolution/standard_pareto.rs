use crate::consts::MINIMUM_ASSETS;
use crate::evolution::objective::FitnessEvaluator;
use crate::evolution::portfolio_evolution::pareto_evolution::{rank_and_crowd, select_survivors};
use crate::evolution::portfolio_evolution::{
    evaluate_population, generate_offsprings, initialize_population, EvolutionConfig,
    EvolutionError, EvolutionResult, TerminationReason,
};
use crate::evolution::quality::{ConvergenceCriteria, ConvergenceTracker, ObjectiveVector};
use crate::portfolio::Portfolio;
use crate::profile::ProfileTable;
use crate::returns::ReturnStatistics;
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::ThreadPoolBuilder;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub trait EvolutionStrategy {
    type Config;
    fn evolve(&self, config: &Self::Config) -> Result<EvolutionResult, EvolutionError>;
}

/// NSGA-II over the three portfolio objectives.
///
/// Generations run strictly in sequence. Within a generation the offspring are evaluated in
/// parallel on a pool of `config.max_concurrency` threads.
#[derive(Debug, Clone)]
pub struct StandardParetoEvolution {
    statistics: Arc<ReturnStatistics>,
    profiles: ProfileTable,
    cancel: Option<Arc<AtomicBool>>,
}

impl StandardParetoEvolution {
    pub fn new(statistics: Arc<ReturnStatistics>) -> Self {
        Self {
            statistics,
            profiles: ProfileTable::default(),
            cancel: None,
        }
    }

    pub fn with_profiles(mut self, profiles: ProfileTable) -> Self {
        self.profiles = profiles;
        self
    }

    /// Checked between generations; setting it stops the run with what it has.
    pub fn with_cancellation(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

fn feasible_front_objectives(population: &[Portfolio]) -> Vec<ObjectiveVector> {
    population
        .iter()
        .filter(|p| p.rank == Some(0) && p.is_feasible())
        .filter_map(|p| p.objectives().copied())
        .collect()
}

fn population_objectives(population: &[Portfolio]) -> Vec<ObjectiveVector> {
    population
        .iter()
        .filter_map(|p| p.objectives().copied())
        .collect()
}

impl EvolutionStrategy for StandardParetoEvolution {
    type Config = EvolutionConfig;

    fn evolve(&self, config: &EvolutionConfig) -> Result<EvolutionResult, EvolutionError> {
        let started = Instant::now();
        let num_assets = self.statistics.num_assets();
        if num_assets < MINIMUM_ASSETS || self.statistics.num_periods() == 0 {
            return Err(EvolutionError::InsufficientData(format!(
                "need at least {MINIMUM_ASSETS} assets and one period, got {num_assets} assets \
                 and {} periods",
                self.statistics.num_periods()
            )));
        }
        config.validate(num_assets)?;

        let evaluator = FitnessEvaluator::new(
            self.statistics.clone(),
            self.profiles.penalty(config.risk_profile),
            config.bounds.max_weight,
            config.cvar_alpha,
        )
        .with_budget_equality(config.enforce_budget_equality);

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.max_concurrency.max(1))
            .build()
            .map_err(|e| EvolutionError::WorkerPool(e.to_string()))?;

        let seed = config.seed.unwrap_or_else(|| thread_rng().gen());
        let mut rng = StdRng::seed_from_u64(seed);
        let tracking = config.track_convergence || config.adaptive_termination.is_some();
        let mut tracker = ConvergenceTracker::new(seed.wrapping_add(1));
        let criteria: Option<ConvergenceCriteria> = config.adaptive_termination;

        info!(
            population_size = config.population_size,
            generations = config.generations,
            num_assets,
            risk_profile = %config.risk_profile,
            seed,
            "Starting evolution"
        );

        let initial = initialize_population(
            config.population_size,
            num_assets,
            &config.bounds,
            &mut rng,
        )?;
        let mut population = evaluate_population(&evaluator, initial, &pool)?;
        rank_and_crowd(&mut population);

        let mut generations_run = 1;
        let mut termination = TerminationReason::GenerationLimit;
        if tracking {
            let row = tracker.update(
                generations_run,
                &feasible_front_objectives(&population),
                &population_objectives(&population),
            );
            debug!(generation = 1, front_size = row.pareto_size, hypervolume = row.hypervolume);
        }

        while generations_run < config.generations {
            if self.is_cancelled() {
                info!(generation = generations_run, "Evolution cancelled");
                termination = TerminationReason::Cancelled;
                break;
            }
            if let Some(criteria) = criteria.as_ref() {
                if tracker.has_converged(criteria) {
                    info!(generation = generations_run, "Hypervolume stalled, stopping early");
                    termination = TerminationReason::Converged;
                    break;
                }
            }

            let offspring_weights =
                generate_offsprings(&population, config.population_size, config, &mut rng);
            let offspring = evaluate_population(&evaluator, offspring_weights, &pool)?;

            let mut merged = population;
            merged.extend(offspring);
            population = select_survivors(merged, config.population_size);
            generations_run += 1;

            if tracking {
                let row = tracker.update(
                    generations_run,
                    &feasible_front_objectives(&population),
                    &population_objectives(&population),
                );
                debug!(
                    generation = generations_run,
                    front_size = row.pareto_size,
                    hypervolume = row.hypervolume
                );
            }
        }

        let pareto_front: Vec<Portfolio> = population
            .iter()
            .filter(|p| p.rank == Some(0) && p.is_feasible())
            .cloned()
            .collect();
        if pareto_front.is_empty() {
            let least_violation = population
                .iter()
                .map(Portfolio::constraint_violation)
                .fold(f64::INFINITY, f64::min);
            return Err(EvolutionError::InfeasibleRun {
                population_size: config.population_size,
                generations: generations_run,
                least_violation,
            });
        }

        let execution_time_secs = started.elapsed().as_secs_f64();
        info!(
            generations_run,
            front_size = pareto_front.len(),
            execution_time_secs,
            "Evolution finished"
        );

        Ok(EvolutionResult {
            pareto_front,
            final_population: population,
            history: tracker.into_history(),
            generations_run,
            termination,
            seed,
            execution_time_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::portfolio_evolution::WeightBounds;
    use crate::evolution::quality::ConvergenceCriteria;
    use crate::profile::RiskProfile;

    fn five_asset_statistics() -> Arc<ReturnStatistics> {
        let mean = vec![0.004, 0.006, 0.008, 0.010, 0.012];
        let vols: [f64; 5] = [0.02, 0.03, 0.04, 0.05, 0.06];
        let covariance = (0..5)
            .map(|i| {
                (0..5)
                    .map(|j| {
                        let correlation = if i == j { 1.0 } else { 0.2 };
                        correlation * vols[i] * vols[j]
                    })
                    .collect()
            })
            .collect();
        let periods: Vec<Vec<f64>> = (0..36)
            .map(|t| {
                (0..5)
                    .map(|a| mean[a] + vols[a] * (((t * (a + 3)) % 7) as f64 - 3.0) / 3.0)
                    .collect()
            })
            .collect();
        let labels = (0..5).map(|i| format!("ASSET{i}")).collect();
        Arc::new(ReturnStatistics::from_moments(labels, mean, covariance, &periods).unwrap())
    }

    fn small_config(seed: u64) -> EvolutionConfig {
        EvolutionConfig {
            population_size: 20,
            generations: 10,
            seed: Some(seed),
            max_concurrency: 2,
            ..EvolutionConfig::default()
        }
    }

    #[test]
    fn test_evolve_returns_feasible_front_on_bounded_simplex() {
        let evolution = StandardParetoEvolution::new(five_asset_statistics());
        let result = evolution.evolve(&small_config(42)).unwrap();

        assert!(!result.pareto_front.is_empty());
        assert_eq!(result.final_population.len(), 20);
        assert_eq!(result.generations_run, 10);
        assert_eq!(result.history.len(), 10, "one history row per generation");
        assert_eq!(result.termination, TerminationReason::GenerationLimit);
        for portfolio in &result.pareto_front {
            let total: f64 = portfolio.weights.iter().sum();
            assert!((total - 1.0).abs() < 1e-6, "weights sum to {total}");
            assert!(portfolio.weights.iter().all(|w| *w <= 0.30 + 1e-6));
            assert!(portfolio.weights.iter().all(|w| *w >= 0.01 - 1e-6));
            assert!(portfolio.is_feasible());
        }
    }

    #[test]
    fn test_evolve_is_deterministic_for_a_seed() {
        let evolution = StandardParetoEvolution::new(five_asset_statistics());
        let first = evolution.evolve(&small_config(7)).unwrap();
        let second = evolution.evolve(&small_config(7)).unwrap();
        assert_eq!(first.front_objectives(), second.front_objectives());
    }

    #[test]
    fn test_cancellation_stops_after_first_generation() {
        let cancel = Arc::new(AtomicBool::new(true));
        let evolution =
            StandardParetoEvolution::new(five_asset_statistics()).with_cancellation(cancel);
        let result = evolution.evolve(&small_config(1)).unwrap();
        assert_eq!(result.generations_run, 1);
        assert_eq!(result.termination, TerminationReason::Cancelled);
    }

    #[test]
    fn test_adaptive_termination_with_loose_threshold() {
        let evolution = StandardParetoEvolution::new(five_asset_statistics());
        let config = EvolutionConfig {
            generations: 30,
            adaptive_termination: Some(ConvergenceCriteria {
                window: 2,
                threshold: f64::INFINITY,
            }),
            ..small_config(3)
        };
        let result = evolution.evolve(&config).unwrap();
        assert_eq!(result.generations_run, 3, "window + 1 generations are needed to decide");
        assert_eq!(result.termination, TerminationReason::Converged);
    }

    #[test]
    fn test_profile_penalty_scales_risk_objectives() {
        let evolution = StandardParetoEvolution::new(five_asset_statistics());
        let initial_only = |risk_profile| EvolutionConfig {
            generations: 1,
            risk_profile,
            ..small_config(5)
        };
        let conservative = evolution.evolve(&initial_only(RiskProfile::Conservative)).unwrap();
        let moderate = evolution.evolve(&initial_only(RiskProfile::Moderate)).unwrap();
        // Positive scaling keeps dominance intact, so the same genotypes form the front.
        let c = conservative.front_objectives();
        let m = moderate.front_objectives();
        assert_eq!(c.len(), m.len());
        for (c, m) in c.iter().zip(&m) {
            assert_eq!(c[0], m[0]);
            assert!((c[1] - 1.5 * m[1]).abs() < 1e-12);
            assert!((c[2] - 2.0 * m[2]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_rejects_bounds_that_miss_the_simplex() {
        let statistics = five_asset_statistics();
        let evolution = StandardParetoEvolution::new(statistics);
        let config = EvolutionConfig {
            bounds: WeightBounds {
                min_weight: 0.3,
                max_weight: 0.5,
            },
            ..small_config(0)
        };
        assert!(matches!(
            evolution.evolve(&config),
            Err(EvolutionError::MalformedBounds(_))
        ));
    }
}
