use crate::consts::{
    DEFAULT_CROSSOVER_ETA, DEFAULT_CROSSOVER_PROBABILITY, DEFAULT_CVAR_ALPHA,
    DEFAULT_GENERATIONS, DEFAULT_MUTATION_ETA, DEFAULT_MUTATION_PROBABILITY,
    DEFAULT_POPULATION_SIZE,
};
use crate::evolution::aggregator::AggregatorError;
use crate::evolution::objective::FitnessEvaluator;
use crate::evolution::quality::{ConvergenceCriteria, ConvergenceHistory};
use crate::portfolio::Portfolio;
use crate::profile::RiskProfile;
use rand::prelude::*;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;
use utoipa::ToSchema;

mod operators;
pub mod pareto_evolution;

pub use operators::{
    blend, blend_factor, crossover, initialize_population, mutate, mutation_delta,
    normalize_in_place, repair_to_bounds, sample_simplex, WeightBounds,
};
pub use pareto_evolution::standard_pareto::{EvolutionStrategy, StandardParetoEvolution};

#[derive(Error, Debug)]
pub enum EvolutionError {
    #[error("Invalid population parameters were passed: {0}")]
    BadPopulationParameter(String),
    #[error("Insufficient data: {0}")]
    InsufficientData(String),
    #[error("Invalid risk profile: `{0}`")]
    InvalidRiskProfile(String),
    #[error("Malformed weight bounds: {0}")]
    MalformedBounds(String),
    #[error(
        "No feasible portfolio after {generations} generations with population {population_size} \
         (least violation {least_violation})"
    )]
    InfeasibleRun {
        population_size: usize,
        generations: usize,
        least_violation: f64,
    },
    #[error("Failed to build a sampling distribution: {0}")]
    Sampling(String),
    #[error("Failed to evaluate an objective: {0}")]
    Objective(#[from] AggregatorError),
    #[error("Failed to build the evaluation worker pool: {0}")]
    WorkerPool(String),
}

fn default_max_concurrency() -> usize {
    num_cpus::get()
}
fn default_population_size() -> usize {
    DEFAULT_POPULATION_SIZE
}
fn default_generations() -> usize {
    DEFAULT_GENERATIONS
}
fn default_crossover_eta() -> f64 {
    DEFAULT_CROSSOVER_ETA
}
fn default_mutation_eta() -> f64 {
    DEFAULT_MUTATION_ETA
}
fn default_crossover_probability() -> f64 {
    DEFAULT_CROSSOVER_PROBABILITY
}
fn default_mutation_probability() -> f64 {
    DEFAULT_MUTATION_PROBABILITY
}
fn default_cvar_alpha() -> f64 {
    DEFAULT_CVAR_ALPHA
}
fn default_risk_profile() -> RiskProfile {
    RiskProfile::Moderate
}
fn default_track_convergence() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct EvolutionConfig {
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    /// Generation budget. The initial population counts as generation 1.
    #[serde(default = "default_generations")]
    pub generations: usize,
    #[serde(default = "default_crossover_eta")]
    pub crossover_eta: f64,
    #[serde(default = "default_mutation_eta")]
    pub mutation_eta: f64,
    #[serde(default = "default_crossover_probability")]
    pub crossover_probability: f64,
    /// Chance that an offspring is mutated at all.
    #[serde(default = "default_mutation_probability")]
    pub mutation_probability: f64,
    #[serde(default)]
    pub bounds: WeightBounds,
    #[serde(default = "default_cvar_alpha")]
    pub cvar_alpha: f64,
    #[serde(default = "default_risk_profile")]
    pub risk_profile: RiskProfile,
    #[serde(default)]
    pub enforce_budget_equality: bool,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Stop early once hypervolume stalls. `None` runs the full generation budget.
    #[serde(default)]
    pub adaptive_termination: Option<ConvergenceCriteria>,
    #[serde(default = "default_track_convergence")]
    pub track_convergence: bool,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: DEFAULT_POPULATION_SIZE,
            generations: DEFAULT_GENERATIONS,
            crossover_eta: DEFAULT_CROSSOVER_ETA,
            mutation_eta: DEFAULT_MUTATION_ETA,
            crossover_probability: DEFAULT_CROSSOVER_PROBABILITY,
            mutation_probability: DEFAULT_MUTATION_PROBABILITY,
            bounds: WeightBounds::default(),
            cvar_alpha: DEFAULT_CVAR_ALPHA,
            risk_profile: default_risk_profile(),
            enforce_budget_equality: false,
            seed: None,
            adaptive_termination: None,
            track_convergence: true,
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl EvolutionConfig {
    pub fn validate(&self, num_assets: usize) -> Result<(), EvolutionError> {
        if self.population_size < 2 {
            return Err(EvolutionError::BadPopulationParameter(format!(
                "population size must be at least 2, got {}",
                self.population_size
            )));
        }
        if self.generations == 0 {
            return Err(EvolutionError::BadPopulationParameter(
                "generation count cannot be zero".into(),
            ));
        }
        for (name, p) in [
            ("crossover probability", self.crossover_probability),
            ("mutation probability", self.mutation_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(EvolutionError::BadPopulationParameter(format!(
                    "{name} must lie in [0, 1], got {p}"
                )));
            }
        }
        if !(self.crossover_eta >= 0.0 && self.mutation_eta >= 0.0) {
            return Err(EvolutionError::BadPopulationParameter(
                "distribution indices must be non-negative".into(),
            ));
        }
        if !(self.cvar_alpha > 0.0 && self.cvar_alpha <= 1.0) {
            return Err(EvolutionError::BadPopulationParameter(format!(
                "CVaR alpha must lie in (0, 1], got {}",
                self.cvar_alpha
            )));
        }
        self.bounds.validate(num_assets)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    GenerationLimit,
    Converged,
    Cancelled,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EvolutionResult {
    /// Feasible rank-0 members of the final population.
    pub pareto_front: Vec<Portfolio>,
    pub final_population: Vec<Portfolio>,
    pub history: ConvergenceHistory,
    pub generations_run: usize,
    pub termination: TerminationReason,
    pub seed: u64,
    pub execution_time_secs: f64,
}

impl EvolutionResult {
    pub fn front_objectives(&self) -> Vec<[f64; 3]> {
        self.pareto_front
            .iter()
            .filter_map(|p| p.objectives().copied())
            .collect()
    }
}

/// Evaluates every weight vector on `pool`. Each evaluation reads only the shared
/// statistics and writes its own slot.
pub(crate) fn evaluate_population(
    evaluator: &FitnessEvaluator,
    population: Vec<Vec<f64>>,
    pool: &ThreadPool,
) -> Result<Vec<Portfolio>, EvolutionError> {
    pool.install(|| {
        population
            .into_par_iter()
            .map(|weights| {
                let fitness = evaluator.evaluate(&weights)?;
                let mut portfolio = Portfolio::new(weights);
                portfolio.fitness = Some(fitness);
                Ok(portfolio)
            })
            .collect()
    })
}

pub(crate) fn generate_offsprings<R: Rng + ?Sized>(
    population: &[Portfolio],
    offspring_count: usize,
    config: &EvolutionConfig,
    rng: &mut R,
) -> Vec<Vec<f64>> {
    let mut offsprings = Vec::with_capacity(offspring_count + 1);

    while offsprings.len() < offspring_count {
        let parent_1 = tournament_selection(population, rng);
        let parent_2 = tournament_selection(population, rng);

        let (mut child_1, mut child_2) = if rng.gen_bool(config.crossover_probability) {
            crossover(
                &parent_1.weights,
                &parent_2.weights,
                config.crossover_eta,
                &config.bounds,
                rng,
            )
        } else {
            (parent_1.weights.clone(), parent_2.weights.clone())
        };

        for child in [&mut child_1, &mut child_2] {
            if rng.gen_bool(config.mutation_probability) {
                mutate(child, config.mutation_eta, &config.bounds, rng);
            }
        }
        offsprings.push(child_1);
        offsprings.push(child_2);
    }
    offsprings.truncate(offspring_count);
    offsprings
}

/// Binary tournament on the crowded-comparison order, ties broken by a coin flip.
pub(crate) fn tournament_selection<'a, R: Rng + ?Sized>(
    population: &'a [Portfolio],
    rng: &mut R,
) -> &'a Portfolio {
    let first = &population[rng.gen_range(0..population.len())];
    let second = &population[rng.gen_range(0..population.len())];
    match first.partial_cmp(second) {
        Some(Ordering::Less) => first,
        Some(Ordering::Greater) => second,
        _ => {
            if rng.gen_bool(0.5) {
                first
            } else {
                second
            }
        }
    }
}
