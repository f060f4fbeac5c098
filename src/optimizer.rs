//! Public entry points: optimize a universe for a risk profile, tune hyperparameters for
//! several problem sizes, and look up the tuned configuration for a size.

use crate::consts::{DEFAULT_GENERATIONS, DEFAULT_POPULATION_SIZE};
use crate::evolution::portfolio_evolution::{
    EvolutionConfig, EvolutionError, EvolutionStrategy, StandardParetoEvolution,
    TerminationReason, WeightBounds,
};
use crate::evolution::quality::QualityMetrics;
use crate::evolution::selection::select_from_front;
use crate::profile::{ProfileTable, RiskProfile};
use crate::returns::{AssetId, DateRange, ReturnsProvider};
use crate::tuning::{
    AssetUniverseSample, ConfigStore, HyperparameterRecord, HyperparameterTuningService,
    Hyperparameters, SearchGrid, StoreError, TuningError, TuningOptions,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OptimizationRequest {
    pub asset_ids: Vec<AssetId>,
    pub risk_profile: RiskProfile,
    #[serde(default)]
    pub date_range: DateRange,
    #[serde(default)]
    pub bounds: WeightBounds,
    /// Skips the store lookup when present.
    #[serde(default)]
    pub hyperparameters: Option<Hyperparameters>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl OptimizationRequest {
    pub fn new(asset_ids: Vec<AssetId>, risk_profile: RiskProfile) -> Self {
        Self {
            asset_ids,
            risk_profile,
            date_range: DateRange::unbounded(),
            bounds: WeightBounds::default(),
            hyperparameters: None,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AssetWeight {
    pub asset_id: AssetId,
    pub label: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HyperparameterSource {
    Request,
    Store {
        record_id: u64,
        num_assets: usize,
        risk_profile: RiskProfile,
    },
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OptimizationDiagnostics {
    pub front_size: usize,
    pub hypervolume: f64,
    pub execution_time_secs: f64,
    pub generations_run: usize,
    pub termination: TerminationReason,
    pub hyperparameters: Hyperparameters,
    pub hyperparameter_source: HyperparameterSource,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OptimizationOutcome {
    /// Assets with a non-zero weight, in request order.
    pub composition: Vec<AssetWeight>,
    pub diagnostics: OptimizationDiagnostics,
}

impl OptimizationOutcome {
    pub fn weight_of(&self, asset_id: AssetId) -> f64 {
        self.composition
            .iter()
            .find(|w| w.asset_id == asset_id)
            .map_or(0.0, |w| w.weight)
    }
}

pub fn default_hyperparameters(base: &EvolutionConfig) -> Hyperparameters {
    Hyperparameters {
        population_size: DEFAULT_POPULATION_SIZE,
        generations: DEFAULT_GENERATIONS,
        crossover_eta: base.crossover_eta,
        mutation_eta: base.mutation_eta,
    }
}

pub struct PortfolioOptimizer {
    provider: Arc<dyn ReturnsProvider>,
    store: Arc<dyn ConfigStore>,
    profiles: ProfileTable,
    base_config: EvolutionConfig,
}

impl PortfolioOptimizer {
    pub fn new(provider: Arc<dyn ReturnsProvider>, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            provider,
            store,
            profiles: ProfileTable::default(),
            base_config: EvolutionConfig::default(),
        }
    }

    pub fn with_profiles(mut self, profiles: ProfileTable) -> Self {
        self.profiles = profiles;
        self
    }

    /// Operator parameters, probabilities and worker budget shared by every run.
    pub fn with_base_config(mut self, base_config: EvolutionConfig) -> Self {
        self.base_config = base_config;
        self
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    pub fn provider(&self) -> &Arc<dyn ReturnsProvider> {
        &self.provider
    }

    fn resolve_hyperparameters(
        &self,
        request: &OptimizationRequest,
        num_assets: usize,
    ) -> (Hyperparameters, HyperparameterSource) {
        if let Some(hyperparameters) = request.hyperparameters {
            return (hyperparameters, HyperparameterSource::Request);
        }
        match self.store.lookup(num_assets, request.risk_profile) {
            Ok(Some(record)) => (
                record.hyperparameters(),
                HyperparameterSource::Store {
                    record_id: record.id,
                    num_assets: record.num_assets,
                    risk_profile: record.risk_profile,
                },
            ),
            Ok(None) => {
                info!(num_assets, "No tuned configuration found, using defaults");
                (default_hyperparameters(&self.base_config), HyperparameterSource::Default)
            }
            Err(e) => {
                warn!("Configuration store lookup failed, using defaults: {e}");
                (default_hyperparameters(&self.base_config), HyperparameterSource::Default)
            }
        }
    }

    pub fn optimize(
        &self,
        request: &OptimizationRequest,
    ) -> Result<OptimizationOutcome, EvolutionError> {
        let statistics = Arc::new(
            self.provider
                .get_returns(&request.asset_ids, &request.date_range)?,
        );
        let num_assets = statistics.num_assets();
        let (hyperparameters, hyperparameter_source) =
            self.resolve_hyperparameters(request, num_assets);

        let config = EvolutionConfig {
            population_size: hyperparameters.population_size,
            generations: hyperparameters.generations,
            crossover_eta: hyperparameters.crossover_eta,
            mutation_eta: hyperparameters.mutation_eta,
            bounds: request.bounds,
            risk_profile: request.risk_profile,
            seed: request.seed.or(self.base_config.seed),
            ..self.base_config.clone()
        };

        let result = StandardParetoEvolution::new(statistics.clone())
            .with_profiles(self.profiles.clone())
            .evolve(&config)?;
        let weights = select_from_front(
            &result.pareto_front,
            &self.profiles.selection(request.risk_profile),
        )?;

        let composition = statistics
            .asset_ids
            .iter()
            .zip(&statistics.labels)
            .zip(weights)
            .filter(|(_, weight)| *weight > 0.0)
            .map(|((asset_id, label), weight)| AssetWeight {
                asset_id: *asset_id,
                label: label.clone(),
                weight,
            })
            .collect();

        let front = result.front_objectives();
        let hypervolume = QualityMetrics::new(result.seed).hypervolume(&front);

        Ok(OptimizationOutcome {
            composition,
            diagnostics: OptimizationDiagnostics {
                front_size: front.len(),
                hypervolume,
                execution_time_secs: result.execution_time_secs,
                generations_run: result.generations_run,
                termination: result.termination,
                hyperparameters,
                hyperparameter_source,
                seed: result.seed,
            },
        })
    }

    /// Builds one tuning sample per asset set from the returns provider.
    pub fn sample_universes(
        &self,
        asset_sets: &[Vec<AssetId>],
        date_range: &DateRange,
    ) -> Result<Vec<AssetUniverseSample>, EvolutionError> {
        asset_sets
            .iter()
            .map(|ids| {
                let statistics = self.provider.get_returns(ids, date_range)?;
                Ok(AssetUniverseSample::new(Arc::new(statistics)))
            })
            .collect()
    }

    pub fn tuning_service(&self) -> HyperparameterTuningService {
        HyperparameterTuningService::new(self.base_config.clone())
            .with_profiles(self.profiles.clone())
    }

    /// Grid search per sample and persist the winner for each asset count.
    pub fn tune(
        &self,
        samples: &[AssetUniverseSample],
        risk_profile: RiskProfile,
        grid: &SearchGrid,
        options: &TuningOptions,
    ) -> Result<Vec<HyperparameterRecord>, TuningError> {
        self.tuning_service().adaptive_tuning_by_num_assets(
            samples,
            risk_profile,
            grid,
            options,
            Some(self.store.as_ref()),
        )
    }

    pub fn lookup_config(
        &self,
        num_assets: usize,
        risk_profile: RiskProfile,
    ) -> Result<Option<Hyperparameters>, StoreError> {
        Ok(self
            .store
            .lookup(num_assets, risk_profile)?
            .map(|record| record.hyperparameters()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::returns::InMemoryReturnsProvider;
    use crate::sampling::{default_start, SyntheticMarket};
    use crate::tuning::store::tests::record;
    use crate::tuning::InMemoryConfigStore;

    fn optimizer(num_assets: usize) -> PortfolioOptimizer {
        let histories = SyntheticMarket::new(num_assets, 36, 21)
            .histories(default_start())
            .unwrap();
        PortfolioOptimizer::new(
            Arc::new(InMemoryReturnsProvider::new(histories)),
            Arc::new(InMemoryConfigStore::new()),
        )
    }

    fn small_request(num_assets: u64) -> OptimizationRequest {
        OptimizationRequest {
            hyperparameters: Some(Hyperparameters {
                population_size: 20,
                generations: 8,
                crossover_eta: 15.0,
                mutation_eta: 20.0,
            }),
            seed: Some(5),
            ..OptimizationRequest::new((0..num_assets).collect(), RiskProfile::Moderate)
        }
    }

    #[test]
    fn test_optimize_returns_bounded_composition() {
        let outcome = optimizer(6).optimize(&small_request(6)).unwrap();
        let total: f64 = outcome.composition.iter().map(|w| w.weight).sum();
        assert!((total - 1.0).abs() < 1e-9, "composition sums to {total}");
        assert!(outcome.composition.iter().all(|w| w.weight <= 0.30 + 1e-6));
        assert!(outcome.diagnostics.front_size > 0);
        assert_eq!(outcome.diagnostics.hyperparameter_source, HyperparameterSource::Request);
    }

    #[test]
    fn test_optimize_uses_store_then_defaults() {
        let optimizer = optimizer(5);
        let mut request = small_request(5);
        request.hyperparameters = None;

        let mut tuned = record(5, RiskProfile::Moderate, 1);
        tuned.population_size = 12;
        tuned.generations = 3;
        optimizer.store().replace_active(tuned).unwrap();
        let outcome = optimizer.optimize(&request).unwrap();
        assert!(matches!(
            outcome.diagnostics.hyperparameter_source,
            HyperparameterSource::Store { num_assets: 5, .. }
        ));
        assert_eq!(outcome.diagnostics.generations_run, 3);

        assert_eq!(
            optimizer.lookup_config(5, RiskProfile::Moderate).unwrap().map(|h| h.generations),
            Some(3)
        );
    }

    #[test]
    fn test_unknown_assets_are_insufficient_data() {
        let request = OptimizationRequest::new(vec![0, 98, 99], RiskProfile::Moderate);
        assert!(matches!(
            optimizer(5).optimize(&request),
            Err(EvolutionError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_empty_store_lookup_is_none() {
        assert_eq!(optimizer(5).lookup_config(7, RiskProfile::Neutral).unwrap(), None);
    }
}
