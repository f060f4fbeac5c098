use crate::evolution::portfolio_evolution::{TerminationReason, WeightBounds};
use crate::handlers::{ErrorResponse, TuneRequest, TuneResponse};
use crate::optimizer::{
    AssetWeight, HyperparameterSource, OptimizationDiagnostics, OptimizationOutcome,
    OptimizationRequest,
};
use crate::profile::RiskProfile;
use crate::returns::DateRange;
use crate::tuning::{HyperparameterRecord, Hyperparameters, SearchGrid};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::handle_optimize,
        crate::handlers::handle_tune,
        crate::handlers::handle_lookup_config
    ),
    components(
        schemas(
            OptimizationRequest,
            OptimizationOutcome,
            OptimizationDiagnostics,
            AssetWeight,
            HyperparameterSource,
            Hyperparameters,
            HyperparameterRecord,
            SearchGrid,
            TuneRequest,
            TuneResponse,
            RiskProfile,
            DateRange,
            WeightBounds,
            TerminationReason,
            ErrorResponse
        )
    ),
    tags(
        (name = "Optimization", description = "Pick a portfolio from the evolved Pareto front"),
        (name = "Tuning", description = "Tune and look up population size and generation count")
    )
)]
pub struct ApiDoc;
