use crate::evolution::portfolio_evolution::EvolutionError;
use crate::optimizer::{OptimizationOutcome, OptimizationRequest};
use crate::profile::RiskProfile;
use crate::returns::{AssetId, DateRange};
use crate::tuning::{HyperparameterRecord, SearchGrid, StoreError, TuningError, TuningOptions};
use crate::web_app::AppState;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::error;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, "{}", self.message);
        }
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

impl From<EvolutionError> for ApiError {
    fn from(e: EvolutionError) -> Self {
        let status = match &e {
            EvolutionError::BadPopulationParameter(_)
            | EvolutionError::InsufficientData(_)
            | EvolutionError::InvalidRiskProfile(_)
            | EvolutionError::MalformedBounds(_) => StatusCode::BAD_REQUEST,
            EvolutionError::InfeasibleRun { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match &e {
            StoreError::ConfigNotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<TuningError> for ApiError {
    fn from(e: TuningError) -> Self {
        match e {
            TuningError::Evolution(e) => e.into(),
            TuningError::Store(e) => e.into(),
            TuningError::EmptyGrid => Self::new(StatusCode::BAD_REQUEST, e.to_string()),
            TuningError::Export(_) => Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }
}

impl From<task::JoinError> for ApiError {
    fn from(e: task::JoinError) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("worker task failed: {e}"),
        )
    }
}

#[utoipa::path(
    post,
    path = "/optimize",
    request_body = OptimizationRequest,
    responses(
        (status = 200, description = "Selected composition and run diagnostics", body = OptimizationOutcome),
        (status = 400, description = "Invalid request or not enough data", body = ErrorResponse),
        (status = 422, description = "No feasible portfolio was found", body = ErrorResponse)
    ),
    tag = "Optimization"
)]
pub async fn handle_optimize(
    State(state): State<AppState>,
    Json(request): Json<OptimizationRequest>,
) -> Result<Json<OptimizationOutcome>, ApiError> {
    let optimizer = state.optimizer.clone();
    let outcome = task::spawn_blocking(move || optimizer.optimize(&request)).await??;
    Ok(Json(outcome))
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TuneRequest {
    /// One asset set per problem size to tune.
    pub asset_sets: Vec<Vec<AssetId>>,
    pub risk_profile: RiskProfile,
    #[serde(default)]
    pub date_range: DateRange,
    #[serde(default)]
    pub grid: SearchGrid,
    #[serde(default)]
    pub n_runs: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TuneResponse {
    pub records: Vec<HyperparameterRecord>,
}

#[utoipa::path(
    post,
    path = "/tune",
    request_body = TuneRequest,
    responses(
        (status = 200, description = "Configurations persisted as active", body = TuneResponse),
        (status = 400, description = "Invalid grid or asset sets", body = ErrorResponse)
    ),
    tag = "Tuning"
)]
pub async fn handle_tune(
    State(state): State<AppState>,
    Json(request): Json<TuneRequest>,
) -> Result<Json<TuneResponse>, ApiError> {
    let optimizer = state.optimizer.clone();
    let mut options = TuningOptions {
        max_workers: state.tuning_max_workers,
        time_limit_secs: state.tuning_time_limit_secs,
        base_seed: request.seed,
        ..TuningOptions::default()
    };
    if let Some(n_runs) = request.n_runs {
        options.n_runs = n_runs;
    }

    let records = task::spawn_blocking(move || -> Result<_, ApiError> {
        let samples = optimizer.sample_universes(&request.asset_sets, &request.date_range)?;
        Ok(optimizer.tune(&samples, request.risk_profile, &request.grid, &options)?)
    })
    .await??;
    Ok(Json(TuneResponse { records }))
}

#[utoipa::path(
    get,
    path = "/configs/{num_assets}/{risk_profile}",
    params(
        ("num_assets" = usize, Path, description = "Number of assets in the problem"),
        ("risk_profile" = String, Path, description = "conservador, moderado, arrojado or neutro")
    ),
    responses(
        (status = 200, description = "Closest active configuration", body = HyperparameterRecord),
        (status = 400, description = "Unknown risk profile", body = ErrorResponse),
        (status = 404, description = "The store has no active configuration", body = ErrorResponse)
    ),
    tag = "Tuning"
)]
pub async fn handle_lookup_config(
    State(state): State<AppState>,
    Path((num_assets, risk_profile)): Path<(usize, String)>,
) -> Result<Json<HyperparameterRecord>, ApiError> {
    let risk_profile: RiskProfile = risk_profile
        .parse()
        .map_err(|e: crate::profile::UnknownRiskProfile| {
            ApiError::from(EvolutionError::InvalidRiskProfile(e.0))
        })?;
    let record = state.optimizer.store().require(num_assets, risk_profile)?;
    Ok(Json(record))
}
