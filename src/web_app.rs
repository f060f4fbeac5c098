use crate::docs::ApiDoc;
use crate::handlers::{handle_lookup_config, handle_optimize, handle_tune};
use crate::optimizer::PortfolioOptimizer;
use axum::{
    routing::{get, post},
    Router,
};
use http::header::HeaderName;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, request_id::MakeRequestUuid,
    request_id::PropagateRequestIdLayer, request_id::SetRequestIdLayer, trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Clone)]
pub struct AppState {
    pub optimizer: Arc<PortfolioOptimizer>,
    pub tuning_max_workers: usize,
    pub tuning_time_limit_secs: Option<f64>,
}

impl AppState {
    pub fn new(optimizer: Arc<PortfolioOptimizer>) -> Self {
        Self {
            optimizer,
            tuning_max_workers: num_cpus::get(),
            tuning_time_limit_secs: None,
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let x_request_id = HeaderName::from_static("x-request-id");
    Router::new()
        .route("/optimize", post(handle_optimize))
        .route("/tune", post(handle_tune))
        .route("/configs/{num_assets}/{risk_profile}", get(handle_lookup_config))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
        .layer(
            tower::ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(
                    x_request_id.clone(),
                    MakeRequestUuid,
                ))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(x_request_id))
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive())
                .into_inner(),
        )
}
