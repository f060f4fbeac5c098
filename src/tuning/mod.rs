//! Hyperparameter tuning: grid search over (population size, generations), convergence
//! analysis at a fixed population size, and per-asset-count tuning that persists the best
//! configuration to a [`ConfigStore`].

use crate::evolution::aggregator::{
    mean_and_std, Aggregator, ArithmeticMean, PopulationStandardDeviation,
};
use crate::evolution::portfolio_evolution::{
    EvolutionConfig, EvolutionError, EvolutionStrategy, StandardParetoEvolution,
};
use crate::evolution::quality::{
    convergence_generation, ConvergenceCriteria, ConvergenceHistory, GenerationMetrics,
};
use crate::profile::{ProfileTable, RiskProfile};
use crate::returns::ReturnStatistics;
use chrono::Utc;
use itertools::Itertools;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod store;

pub use store::{
    ConfigStore, HyperparameterRecord, Hyperparameters, InMemoryConfigStore,
    JsonFileConfigStore, StoreError,
};

#[derive(Error, Debug)]
pub enum TuningError {
    #[error(transparent)]
    Evolution(#[from] EvolutionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("The search grid is empty")]
    EmptyGrid,
    #[error("Failed to export tuning results: {0}")]
    Export(String),
}

fn default_population_sizes() -> Vec<usize> {
    vec![50, 100, 200, 300]
}
fn default_generation_counts() -> Vec<usize> {
    vec![25, 50, 100, 150]
}
fn default_n_runs() -> usize {
    3
}
fn default_max_workers() -> usize {
    num_cpus::get()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SearchGrid {
    #[serde(default = "default_population_sizes")]
    pub population_sizes: Vec<usize>,
    #[serde(default = "default_generation_counts")]
    pub generation_counts: Vec<usize>,
}

impl Default for SearchGrid {
    fn default() -> Self {
        Self {
            population_sizes: default_population_sizes(),
            generation_counts: default_generation_counts(),
        }
    }
}

impl SearchGrid {
    pub fn configurations(&self) -> Vec<(usize, usize)> {
        self.population_sizes
            .iter()
            .cartesian_product(self.generation_counts.iter())
            .map(|(p, g)| (*p, *g))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TuningOptions {
    #[serde(default = "default_n_runs")]
    pub n_runs: usize,
    /// Concurrent runs.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Runs not yet started when this budget is spent are skipped.
    #[serde(default)]
    pub time_limit_secs: Option<f64>,
    /// Run `i` of the grid is seeded with `base_seed + i` when set.
    #[serde(default)]
    pub base_seed: Option<u64>,
    #[serde(default)]
    pub convergence: ConvergenceCriteria,
}

impl Default for TuningOptions {
    fn default() -> Self {
        Self {
            n_runs: default_n_runs(),
            max_workers: default_max_workers(),
            time_limit_secs: None,
            base_seed: None,
            convergence: ConvergenceCriteria::default(),
        }
    }
}

/// Outcome of one evolutionary run.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TuningResult {
    pub num_assets: usize,
    pub risk_profile: RiskProfile,
    pub population_size: usize,
    pub generations: usize,
    pub crossover_eta: f64,
    pub mutation_eta: f64,
    pub run_number: usize,
    pub execution_time_secs: f64,
    pub final_hypervolume: f64,
    pub final_spread: f64,
    pub final_spacing: f64,
    pub pareto_size: usize,
    pub convergence_generation: Option<usize>,
    pub convergence_history: ConvergenceHistory,
}

/// Aggregated statistics for one (population size, generations) pair. Standard deviations
/// use the n - 1 denominator; non-finite run values are left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConfigSummary {
    pub population_size: usize,
    pub generations: usize,
    pub n_runs: usize,
    pub hypervolume_mean: Option<f64>,
    pub hypervolume_std: Option<f64>,
    pub hypervolume_min: Option<f64>,
    pub hypervolume_max: Option<f64>,
    pub spread_mean: Option<f64>,
    pub spread_std: Option<f64>,
    pub spacing_mean: Option<f64>,
    pub spacing_std: Option<f64>,
    pub pareto_size_mean: Option<f64>,
    pub pareto_size_std: Option<f64>,
    pub execution_time_mean: Option<f64>,
    pub execution_time_std: Option<f64>,
    pub convergence_generation_mean: Option<f64>,
    pub convergence_generation_std: Option<f64>,
    pub convergence_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GridSearchOutcome {
    pub results: Vec<TuningResult>,
    /// Sorted by mean hypervolume, best first.
    pub summary: Vec<ConfigSummary>,
    pub skipped_runs: usize,
    pub failed_runs: usize,
}

/// Mean and population standard deviation of a metric across runs at one generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GenerationStatistics {
    pub generation: usize,
    pub runs: usize,
    pub hypervolume_mean: f64,
    pub hypervolume_std: f64,
    pub spread_mean: f64,
    pub spread_std: f64,
    pub spacing_mean: f64,
    pub spacing_std: f64,
    pub pareto_size_mean: f64,
    pub pareto_size_std: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConvergenceAnalysis {
    pub population_size: usize,
    pub max_generations: usize,
    pub runs: Vec<TuningResult>,
    pub per_generation: Vec<GenerationStatistics>,
    pub convergence_generations: Vec<usize>,
    pub convergence_mean: Option<f64>,
    pub convergence_std: Option<f64>,
}

/// A problem instance of a given size used by per-asset-count tuning.
#[derive(Debug, Clone)]
pub struct AssetUniverseSample {
    pub num_assets: usize,
    pub statistics: Arc<ReturnStatistics>,
}

impl AssetUniverseSample {
    pub fn new(statistics: Arc<ReturnStatistics>) -> Self {
        Self {
            num_assets: statistics.num_assets(),
            statistics,
        }
    }
}

fn finite(values: impl IntoIterator<Item = f64>) -> Vec<f64> {
    values.into_iter().filter(|v| v.is_finite()).collect()
}

fn population_mean_and_std(values: &[f64]) -> (f64, f64) {
    let values = finite(values.iter().copied());
    (
        ArithmeticMean.value(&values).unwrap_or(f64::NAN),
        PopulationStandardDeviation.value(&values).unwrap_or(f64::NAN),
    )
}

pub fn summarize(results: &[TuningResult]) -> Vec<ConfigSummary> {
    let mut keys: Vec<(usize, usize)> = Vec::new();
    for result in results {
        let key = (result.population_size, result.generations);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    let mut summary: Vec<ConfigSummary> = keys
        .into_iter()
        .map(|(population_size, generations)| {
            let runs: Vec<&TuningResult> = results
                .iter()
                .filter(|r| r.population_size == population_size && r.generations == generations)
                .collect();
            let hypervolumes = finite(runs.iter().map(|r| r.final_hypervolume));
            let (hypervolume_mean, hypervolume_std) = mean_and_std(&hypervolumes);
            let (spread_mean, spread_std) =
                mean_and_std(&finite(runs.iter().map(|r| r.final_spread)));
            let (spacing_mean, spacing_std) =
                mean_and_std(&finite(runs.iter().map(|r| r.final_spacing)));
            let (pareto_size_mean, pareto_size_std) =
                mean_and_std(&finite(runs.iter().map(|r| r.pareto_size as f64)));
            let (execution_time_mean, execution_time_std) =
                mean_and_std(&finite(runs.iter().map(|r| r.execution_time_secs)));
            let converged: Vec<f64> = runs
                .iter()
                .filter_map(|r| r.convergence_generation.map(|g| g as f64))
                .collect();
            let (convergence_generation_mean, convergence_generation_std) =
                mean_and_std(&converged);

            ConfigSummary {
                population_size,
                generations,
                n_runs: runs.len(),
                hypervolume_mean,
                hypervolume_std,
                hypervolume_min: hypervolumes.iter().copied().reduce(f64::min),
                hypervolume_max: hypervolumes.iter().copied().reduce(f64::max),
                spread_mean,
                spread_std,
                spacing_mean,
                spacing_std,
                pareto_size_mean,
                pareto_size_std,
                execution_time_mean,
                execution_time_std,
                convergence_generation_mean,
                convergence_generation_std,
                convergence_count: converged.len(),
            }
        })
        .collect();

    summary.sort_by(|a, b| {
        let a = a.hypervolume_mean.unwrap_or(f64::NEG_INFINITY);
        let b = b.hypervolume_mean.unwrap_or(f64::NEG_INFINITY);
        b.total_cmp(&a)
    });
    summary
}

/// Drives many evolutionary runs and keeps every [`TuningResult`] it produced, so they
/// can be exported or re-persisted after a failed store write.
pub struct HyperparameterTuningService {
    base_config: EvolutionConfig,
    profiles: ProfileTable,
    results: Mutex<Vec<TuningResult>>,
    session_id: Uuid,
    cancel: Option<Arc<AtomicBool>>,
}

impl HyperparameterTuningService {
    /// `base_config` supplies everything except population size, generation count, seed
    /// and risk profile, which the service sets per run.
    pub fn new(base_config: EvolutionConfig) -> Self {
        Self {
            base_config,
            profiles: ProfileTable::default(),
            results: Mutex::new(Vec::new()),
            session_id: Uuid::new_v4(),
            cancel: None,
        }
    }

    pub fn with_profiles(mut self, profiles: ProfileTable) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_cancellation(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn results(&self) -> Vec<TuningResult> {
        self.results.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn retain(&self, results: &[TuningResult]) {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(results);
    }

    fn run_once(
        &self,
        statistics: &Arc<ReturnStatistics>,
        risk_profile: RiskProfile,
        population_size: usize,
        generations: usize,
        run_number: usize,
        seed: Option<u64>,
        criteria: &ConvergenceCriteria,
    ) -> Result<TuningResult, EvolutionError> {
        let config = EvolutionConfig {
            population_size,
            generations,
            risk_profile,
            seed,
            track_convergence: true,
            max_concurrency: 1,
            ..self.base_config.clone()
        };
        let mut evolution =
            StandardParetoEvolution::new(statistics.clone()).with_profiles(self.profiles.clone());
        if let Some(cancel) = &self.cancel {
            evolution = evolution.with_cancellation(cancel.clone());
        }
        let started = Instant::now();
        let outcome = evolution.evolve(&config)?;
        let execution_time_secs = started.elapsed().as_secs_f64();

        let last = outcome.history.last();
        Ok(TuningResult {
            num_assets: statistics.num_assets(),
            risk_profile,
            population_size,
            generations,
            crossover_eta: config.crossover_eta,
            mutation_eta: config.mutation_eta,
            run_number,
            execution_time_secs,
            final_hypervolume: last.map_or(0.0, |g| g.hypervolume),
            final_spread: last.map_or(0.0, |g| g.spread),
            final_spacing: last.map_or(0.0, |g| g.spacing),
            pareto_size: last.map_or(0, |g| g.pareto_size),
            convergence_generation: convergence_generation(&outcome.history, criteria),
            convergence_history: outcome.history,
        })
    }

    /// Runs every grid configuration `n_runs` times on a pool of `max_workers` threads.
    /// A failing run is logged and skipped; the rest of the grid continues.
    pub fn grid_search(
        &self,
        statistics: Arc<ReturnStatistics>,
        risk_profile: RiskProfile,
        grid: &SearchGrid,
        options: &TuningOptions,
    ) -> Result<GridSearchOutcome, TuningError> {
        let configurations = grid.configurations();
        if configurations.is_empty() || options.n_runs == 0 {
            return Err(TuningError::EmptyGrid);
        }
        info!(
            session = %self.session_id,
            configurations = configurations.len(),
            n_runs = options.n_runs,
            total_runs = configurations.len() * options.n_runs,
            num_assets = statistics.num_assets(),
            %risk_profile,
            "Starting grid search"
        );

        let pool = ThreadPoolBuilder::new()
            .num_threads(options.max_workers.max(1))
            .build()
            .map_err(|e| EvolutionError::WorkerPool(e.to_string()))?;

        let jobs: Vec<(usize, usize, usize)> = configurations
            .iter()
            .flat_map(|&(p, g)| (1..=options.n_runs).map(move |run| (p, g, run)))
            .collect();
        let deadline = options
            .time_limit_secs
            .map(|secs| Instant::now() + Duration::from_secs_f64(secs.max(0.0)));
        let skipped = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let budget_warning = AtomicBool::new(false);

        let results: Vec<TuningResult> = pool.install(|| {
            jobs.par_iter()
                .enumerate()
                .filter_map(|(index, &(population_size, generations, run_number))| {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        if !budget_warning.swap(true, Ordering::Relaxed) {
                            warn!("Time limit reached, skipping the remaining grid");
                        }
                        skipped.fetch_add(1, Ordering::Relaxed);
                        return None;
                    }
                    if run_number == 1 {
                        info!(population_size, generations, "Testing configuration");
                    }
                    let seed = options.base_seed.map(|s| s.wrapping_add(index as u64));
                    match self.run_once(
                        &statistics,
                        risk_profile,
                        population_size,
                        generations,
                        run_number,
                        seed,
                        &options.convergence,
                    ) {
                        Ok(result) => Some(result),
                        Err(e) => {
                            error!(
                                population_size,
                                generations, run_number, "Run failed, skipping it: {e}"
                            );
                            failed.fetch_add(1, Ordering::Relaxed);
                            None
                        }
                    }
                })
                .collect()
        });

        self.retain(&results);
        let summary = summarize(&results);
        info!(
            completed = results.len(),
            skipped = skipped.load(Ordering::Relaxed),
            failed = failed.load(Ordering::Relaxed),
            "Grid search finished"
        );
        Ok(GridSearchOutcome {
            results,
            summary,
            skipped_runs: skipped.into_inner(),
            failed_runs: failed.into_inner(),
        })
    }

    /// Runs the loop `n_runs` times up to `max_generations` and aggregates the histories
    /// generation by generation.
    pub fn convergence_analysis(
        &self,
        statistics: Arc<ReturnStatistics>,
        risk_profile: RiskProfile,
        population_size: usize,
        max_generations: usize,
        options: &TuningOptions,
    ) -> Result<ConvergenceAnalysis, TuningError> {
        if options.n_runs == 0 || max_generations == 0 {
            return Err(TuningError::EmptyGrid);
        }
        info!(
            n_runs = options.n_runs,
            max_generations, population_size, "Starting convergence analysis"
        );
        let pool = ThreadPoolBuilder::new()
            .num_threads(options.max_workers.max(1))
            .build()
            .map_err(|e| EvolutionError::WorkerPool(e.to_string()))?;

        let runs: Vec<TuningResult> = pool.install(|| {
            (1..=options.n_runs)
                .into_par_iter()
                .filter_map(|run_number| {
                    let seed = options.base_seed.map(|s| s.wrapping_add(run_number as u64));
                    self.run_once(
                        &statistics,
                        risk_profile,
                        population_size,
                        max_generations,
                        run_number,
                        seed,
                        &options.convergence,
                    )
                    .map_err(|e| error!(run_number, "Convergence run failed, skipping it: {e}"))
                    .ok()
                })
                .collect()
        });
        self.retain(&runs);

        let longest = runs
            .iter()
            .map(|r| r.convergence_history.len())
            .max()
            .unwrap_or(0);
        let per_generation = (0..longest)
            .map(|g| {
                let rows: Vec<_> = runs
                    .iter()
                    .filter_map(|r| r.convergence_history.generations.get(g))
                    .collect();
                let column = |f: fn(&GenerationMetrics) -> f64| {
                    population_mean_and_std(&rows.iter().map(|row| f(row)).collect::<Vec<_>>())
                };
                let (hypervolume_mean, hypervolume_std) = column(|m| m.hypervolume);
                let (spread_mean, spread_std) = column(|m| m.spread);
                let (spacing_mean, spacing_std) = column(|m| m.spacing);
                let (pareto_size_mean, pareto_size_std) = column(|m| m.pareto_size as f64);
                GenerationStatistics {
                    generation: g + 1,
                    runs: rows.len(),
                    hypervolume_mean,
                    hypervolume_std,
                    spread_mean,
                    spread_std,
                    spacing_mean,
                    spacing_std,
                    pareto_size_mean,
                    pareto_size_std,
                }
            })
            .collect();

        let convergence_generations: Vec<usize> =
            runs.iter().filter_map(|r| r.convergence_generation).collect();
        let as_f64: Vec<f64> = convergence_generations.iter().map(|g| *g as f64).collect();
        let convergence_mean = ArithmeticMean.value(&as_f64).ok();
        let convergence_std = PopulationStandardDeviation.value(&as_f64).ok();
        if let Some(mean) = convergence_mean {
            info!(
                converged_runs = convergence_generations.len(),
                mean, "Estimated generations to convergence"
            );
        }

        Ok(ConvergenceAnalysis {
            population_size,
            max_generations,
            runs,
            per_generation,
            convergence_generations,
            convergence_mean,
            convergence_std,
        })
    }

    /// Grid search for every sample; the best configuration per asset count becomes a
    /// record. With a store, each record replaces the active one for its key.
    pub fn adaptive_tuning_by_num_assets(
        &self,
        samples: &[AssetUniverseSample],
        risk_profile: RiskProfile,
        grid: &SearchGrid,
        options: &TuningOptions,
        store: Option<&dyn ConfigStore>,
    ) -> Result<Vec<HyperparameterRecord>, TuningError> {
        let n_configurations = grid.configurations().len();
        let mut optimal = Vec::with_capacity(samples.len());
        for sample in samples {
            info!(num_assets = sample.num_assets, "Tuning asset count");
            let outcome = self.grid_search(sample.statistics.clone(), risk_profile, grid, options)?;
            match outcome.summary.first() {
                Some(best) => optimal.push(self.record_from_summary(
                    sample.num_assets,
                    risk_profile,
                    best,
                    n_configurations,
                )),
                None => warn!(
                    num_assets = sample.num_assets,
                    "No successful run for this asset count, nothing to persist"
                ),
            }
        }

        match store {
            Some(store) => self.persist(store, &optimal),
            None => Ok(optimal),
        }
    }

    /// Writes each record as the active configuration for its key. Safe to call again with
    /// the same records after a failure.
    pub fn persist(
        &self,
        store: &dyn ConfigStore,
        records: &[HyperparameterRecord],
    ) -> Result<Vec<HyperparameterRecord>, TuningError> {
        records
            .iter()
            .map(|record| {
                store.replace_active(record.clone()).map_err(|e| {
                    error!(
                        num_assets = record.num_assets,
                        "Failed to persist configuration: {e}"
                    );
                    TuningError::from(e)
                })
            })
            .collect()
    }

    pub fn record_from_summary(
        &self,
        num_assets: usize,
        risk_profile: RiskProfile,
        best: &ConfigSummary,
        n_configurations_tested: usize,
    ) -> HyperparameterRecord {
        HyperparameterRecord {
            id: 0,
            num_assets,
            risk_profile,
            population_size: best.population_size,
            generations: best.generations,
            crossover_eta: self.base_config.crossover_eta,
            mutation_eta: self.base_config.mutation_eta,
            hypervolume_mean: best.hypervolume_mean,
            hypervolume_std: best.hypervolume_std,
            spread_mean: best.spread_mean,
            spread_std: best.spread_std,
            spacing_mean: best.spacing_mean,
            spacing_std: best.spacing_std,
            pareto_size_mean: best.pareto_size_mean,
            execution_time_mean: best.execution_time_mean,
            execution_time_std: best.execution_time_std,
            convergence_generation_mean: best.convergence_generation_mean,
            n_runs: best.n_runs,
            n_configurations_tested,
            tuning_date: Utc::now(),
            notes: Some(format!("tuning session {}", self.session_id)),
            is_active: false,
        }
    }

    /// Configuration with the highest mean final hypervolume among retained results.
    pub fn get_best_configuration(&self) -> Option<Hyperparameters> {
        let results = self.results();
        let mut groups: Vec<(Hyperparameters, Vec<f64>)> = Vec::new();
        for result in &results {
            let key = Hyperparameters {
                population_size: result.population_size,
                generations: result.generations,
                crossover_eta: result.crossover_eta,
                mutation_eta: result.mutation_eta,
            };
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, hypervolumes)) => hypervolumes.push(result.final_hypervolume),
                None => groups.push((key, vec![result.final_hypervolume])),
            }
        }
        let mut best: Option<(Hyperparameters, f64)> = None;
        for (key, hypervolumes) in groups {
            let mean = ArithmeticMean.value(&hypervolumes).unwrap_or(f64::NEG_INFINITY);
            if best.map_or(true, |(_, top)| mean > top) {
                best = Some((key, mean));
            }
        }
        best.map(|(key, _)| key)
    }

    /// Writes every retained result as pretty JSON. Without a path the file goes to
    /// `tuning_results/all_results_<timestamp>.json`.
    pub fn export_results(&self, path: Option<&Path>) -> Result<PathBuf, TuningError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(format!(
                "tuning_results/all_results_{}.json",
                Utc::now().format("%Y%m%d_%H%M%S")
            )),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| TuningError::Export(e.to_string()))?;
            }
        }
        let content = serde_json::to_string_pretty(&self.results())
            .map_err(|e| TuningError::Export(e.to_string()))?;
        std::fs::write(&path, content).map_err(|e| TuningError::Export(e.to_string()))?;
        info!("Exported tuning results to {:?}", path);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::portfolio_evolution::WeightBounds;

    fn statistics(num_assets: usize) -> Arc<ReturnStatistics> {
        let mean: Vec<f64> = (0..num_assets).map(|i| 0.004 + 0.002 * i as f64).collect();
        let vols: Vec<f64> = (0..num_assets).map(|i| 0.02 + 0.01 * i as f64).collect();
        let covariance = (0..num_assets)
            .map(|i| {
                (0..num_assets)
                    .map(|j| if i == j { vols[i] * vols[i] } else { 0.1 * vols[i] * vols[j] })
                    .collect()
            })
            .collect();
        let periods: Vec<Vec<f64>> = (0..24)
            .map(|t| {
                (0..num_assets)
                    .map(|a| mean[a] + vols[a] * (((t * (a + 2)) % 5) as f64 - 2.0) / 2.0)
                    .collect()
            })
            .collect();
        let labels = (0..num_assets).map(|i| format!("A{i}")).collect();
        Arc::new(ReturnStatistics::from_moments(labels, mean, covariance, &periods).unwrap())
    }

    fn result(population_size: usize, generations: usize, hypervolume: f64) -> TuningResult {
        TuningResult {
            num_assets: 5,
            risk_profile: RiskProfile::Moderate,
            population_size,
            generations,
            crossover_eta: 15.0,
            mutation_eta: 20.0,
            run_number: 1,
            execution_time_secs: 0.1,
            final_hypervolume: hypervolume,
            final_spread: f64::INFINITY,
            final_spacing: 0.0,
            pareto_size: 1,
            convergence_generation: None,
            convergence_history: ConvergenceHistory::default(),
        }
    }

    fn options() -> TuningOptions {
        TuningOptions {
            n_runs: 2,
            max_workers: 2,
            base_seed: Some(11),
            ..TuningOptions::default()
        }
    }

    #[test]
    fn test_summarize_sorts_by_mean_hypervolume() {
        let results = vec![
            result(20, 5, 0.1),
            result(20, 5, 0.3),
            result(40, 5, 0.5),
            result(40, 5, 0.7),
        ];
        let summary = summarize(&results);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].population_size, 40);
        assert!((summary[0].hypervolume_mean.unwrap() - 0.6).abs() < 1e-12);
        let expected_std = (0.02_f64).sqrt();
        assert!((summary[0].hypervolume_std.unwrap() - expected_std).abs() < 1e-12);
        assert_eq!(summary[0].hypervolume_min, Some(0.5));
        assert_eq!(summary[0].spread_mean, None, "infinite spreads are left out");
        assert_eq!(summary[1].convergence_count, 0);
    }

    #[test]
    fn test_grid_search_counts_results_and_rows() {
        let service = HyperparameterTuningService::new(EvolutionConfig::default());
        let grid = SearchGrid {
            population_sizes: vec![20, 40],
            generation_counts: vec![5, 10],
        };
        let outcome = service
            .grid_search(statistics(5), RiskProfile::Moderate, &grid, &options())
            .unwrap();
        assert_eq!(outcome.results.len(), 8);
        assert_eq!(outcome.summary.len(), 4);
        assert_eq!(outcome.failed_runs, 0);
        for pair in outcome.summary.windows(2) {
            assert!(pair[0].hypervolume_mean >= pair[1].hypervolume_mean);
        }
        assert_eq!(service.results().len(), 8);
    }

    #[test]
    fn test_failing_runs_are_skipped() {
        // Bounds that miss the simplex for five assets make every run fail.
        let service = HyperparameterTuningService::new(EvolutionConfig {
            bounds: WeightBounds {
                min_weight: 0.3,
                max_weight: 0.5,
            },
            ..EvolutionConfig::default()
        });
        let grid = SearchGrid {
            population_sizes: vec![10],
            generation_counts: vec![2],
        };
        let outcome = service
            .grid_search(statistics(5), RiskProfile::Moderate, &grid, &options())
            .unwrap();
        assert!(outcome.results.is_empty());
        assert!(outcome.summary.is_empty());
        assert_eq!(outcome.failed_runs, 2);
    }

    #[test]
    fn test_zero_time_budget_skips_everything() {
        let service = HyperparameterTuningService::new(EvolutionConfig::default());
        let grid = SearchGrid {
            population_sizes: vec![10],
            generation_counts: vec![2, 3],
        };
        let options = TuningOptions {
            time_limit_secs: Some(0.0),
            ..options()
        };
        let outcome = service
            .grid_search(statistics(5), RiskProfile::Moderate, &grid, &options)
            .unwrap();
        assert_eq!(outcome.skipped_runs, 4);
        assert!(outcome.results.is_empty());
        assert!(outcome.summary.is_empty());
    }

    #[test]
    fn test_generous_time_budget_runs_everything() {
        let service = HyperparameterTuningService::new(EvolutionConfig::default());
        let grid = SearchGrid {
            population_sizes: vec![10],
            generation_counts: vec![2, 3],
        };
        let options = TuningOptions {
            time_limit_secs: Some(3600.0),
            ..options()
        };
        let outcome = service
            .grid_search(statistics(5), RiskProfile::Moderate, &grid, &options)
            .unwrap();
        assert_eq!(outcome.skipped_runs, 0);
        assert_eq!(outcome.results.len(), 4);
    }

    #[test]
    fn test_empty_grid_is_rejected() {
        let service = HyperparameterTuningService::new(EvolutionConfig::default());
        let grid = SearchGrid {
            population_sizes: vec![],
            generation_counts: vec![5],
        };
        assert!(matches!(
            service.grid_search(statistics(5), RiskProfile::Moderate, &grid, &options()),
            Err(TuningError::EmptyGrid)
        ));
    }

    #[test]
    fn test_convergence_analysis_aggregates_per_generation() {
        let service = HyperparameterTuningService::new(EvolutionConfig::default());
        let analysis = service
            .convergence_analysis(statistics(5), RiskProfile::Moderate, 16, 6, &options())
            .unwrap();
        assert_eq!(analysis.runs.len(), 2);
        assert_eq!(analysis.per_generation.len(), 6);
        assert!(analysis.per_generation.iter().all(|g| g.runs == 2));
    }

    #[test]
    fn test_adaptive_tuning_persists_one_active_record_per_asset_count() {
        let service = HyperparameterTuningService::new(EvolutionConfig::default());
        let store = InMemoryConfigStore::new();
        let grid = SearchGrid {
            population_sizes: vec![12],
            generation_counts: vec![3, 4],
        };
        let samples = vec![
            AssetUniverseSample::new(statistics(5)),
            AssetUniverseSample::new(statistics(6)),
        ];
        let saved = service
            .adaptive_tuning_by_num_assets(
                &samples,
                RiskProfile::Neutral,
                &grid,
                &options(),
                Some(&store),
            )
            .unwrap();
        assert_eq!(saved.len(), 2);
        assert!(saved.iter().all(|r| r.is_active && r.n_configurations_tested == 2));

        // Re-running supersedes instead of deleting.
        service
            .adaptive_tuning_by_num_assets(
                &samples,
                RiskProfile::Neutral,
                &grid,
                &options(),
                Some(&store),
            )
            .unwrap();
        assert_eq!(store.records().unwrap().len(), 4);
        assert_eq!(store.all_active().unwrap().len(), 2);
        assert!(service.get_best_configuration().is_some());
    }

    #[test]
    fn test_export_results_writes_json() {
        let service = HyperparameterTuningService::new(EvolutionConfig::default());
        service.retain(&[result(20, 5, 0.2)]);
        let dir = std::env::temp_dir().join(format!("paretofolio_export_{}", Uuid::new_v4()));
        let path = service
            .export_results(Some(&dir.join("results.json")))
            .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"population_size\": 20"));
        std::fs::remove_dir_all(dir).ok();
    }
}
