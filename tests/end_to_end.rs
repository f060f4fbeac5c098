use axum::body::{to_bytes, Body};
use http::{Request, StatusCode};
use paretofolio::evolution::portfolio_evolution::EvolutionConfig;
use paretofolio::optimizer::{OptimizationOutcome, OptimizationRequest, PortfolioOptimizer};
use paretofolio::profile::RiskProfile;
use paretofolio::returns::{InMemoryReturnsProvider, ReturnsProvider};
use paretofolio::sampling::{default_start, SyntheticMarket};
use paretofolio::tuning::{
    AssetUniverseSample, ConfigStore, HyperparameterRecord, HyperparameterTuningService,
    Hyperparameters, InMemoryConfigStore, JsonFileConfigStore, SearchGrid, TuningOptions,
};
use paretofolio::web_app::{build_app, AppState};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_dir(name: &str) -> PathBuf {
    let unique_id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "paretofolio_e2e_{}_{}_{}",
        std::process::id(),
        unique_id,
        name
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn provider(num_assets: usize) -> InMemoryReturnsProvider {
    let histories = SyntheticMarket::new(num_assets, 48, 1234)
        .histories(default_start())
        .unwrap();
    InMemoryReturnsProvider::new(histories)
}

fn optimizer_with(store: Arc<dyn ConfigStore>) -> PortfolioOptimizer {
    PortfolioOptimizer::new(Arc::new(provider(8)), store)
}

fn quick_options() -> TuningOptions {
    TuningOptions {
        n_runs: 2,
        max_workers: 2,
        base_seed: Some(99),
        ..TuningOptions::default()
    }
}

fn quick_grid() -> SearchGrid {
    SearchGrid {
        population_sizes: vec![12],
        generation_counts: vec![3, 5],
    }
}

#[test]
fn test_five_assets_give_a_bounded_composition() {
    let optimizer = optimizer_with(Arc::new(InMemoryConfigStore::new()));
    let request = OptimizationRequest {
        hyperparameters: Some(Hyperparameters {
            population_size: 20,
            generations: 10,
            crossover_eta: 15.0,
            mutation_eta: 20.0,
        }),
        seed: Some(2024),
        ..OptimizationRequest::new(vec![0, 1, 2, 3, 4], RiskProfile::Moderate)
    };

    let outcome = optimizer.optimize(&request).unwrap();
    let total: f64 = outcome.composition.iter().map(|w| w.weight).sum();
    assert!((total - 1.0).abs() < 1e-9, "weights sum to {total}");
    let largest = outcome
        .composition
        .iter()
        .map(|w| w.weight)
        .fold(0.0, f64::max);
    assert!(largest <= 0.30 + 1e-6, "largest weight is {largest}");
    assert_eq!(outcome.diagnostics.generations_run, 10);
    assert!(outcome.diagnostics.hypervolume >= 0.0);

    let again = optimizer.optimize(&request).unwrap();
    assert_eq!(outcome.composition, again.composition, "a fixed seed reproduces the run");
}

#[test]
fn test_grid_search_yields_one_result_per_run_and_one_row_per_configuration() {
    let statistics = Arc::new(
        provider(5)
            .get_returns(&[0, 1, 2, 3, 4], &Default::default())
            .unwrap(),
    );
    let service = HyperparameterTuningService::new(EvolutionConfig::default());
    let grid = SearchGrid {
        population_sizes: vec![20, 40],
        generation_counts: vec![5, 10],
    };
    let outcome = service
        .grid_search(statistics, RiskProfile::Moderate, &grid, &quick_options())
        .unwrap();

    assert_eq!(outcome.results.len(), 8);
    assert_eq!(outcome.summary.len(), 4);
    let means: Vec<f64> = outcome
        .summary
        .iter()
        .map(|row| row.hypervolume_mean.unwrap_or(f64::NEG_INFINITY))
        .collect();
    assert!(
        means.windows(2).all(|pair| pair[0] >= pair[1]),
        "rows are sorted by mean hypervolume: {means:?}"
    );
    assert!(outcome.summary.iter().all(|row| row.n_runs == 2));
    assert!(service.get_best_configuration().is_some());
}

#[test]
fn test_tuned_configurations_are_found_through_the_fallback_chain() {
    let optimizer = optimizer_with(Arc::new(InMemoryConfigStore::new()));
    let samples = optimizer
        .sample_universes(&[vec![0, 1, 2, 3, 4], vec![0, 1, 2, 3, 4, 5]], &Default::default())
        .unwrap();
    let records = optimizer
        .tune(&samples, RiskProfile::Neutral, &quick_grid(), &quick_options())
        .unwrap();
    assert_eq!(records.len(), 2);

    // 7 probes 7, 8 and then 6.
    let found = optimizer.lookup_config(7, RiskProfile::Neutral).unwrap().unwrap();
    let six = records.iter().find(|r| r.num_assets == 6).unwrap();
    assert_eq!(found, six.hyperparameters());

    // No aggressive configuration exists, so the neutral ones answer.
    assert!(optimizer.lookup_config(5, RiskProfile::Aggressive).unwrap().is_some());
    // Far away sizes still get the closest active record.
    let far = optimizer.store().lookup(40, RiskProfile::Moderate).unwrap().unwrap();
    assert_eq!(far.num_assets, 6);

    // Re-tuning supersedes the old rows without deleting them.
    optimizer
        .tune(&samples[..1], RiskProfile::Neutral, &quick_grid(), &quick_options())
        .unwrap();
    let all = optimizer.store().records().unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all.iter().filter(|r| r.num_assets == 5 && r.is_active).count(), 1);
}

#[test]
fn test_json_store_survives_a_reopen() {
    let dir = temp_dir("store");
    let path = dir.join("hyperparameters.json");
    let samples = vec![AssetUniverseSample::new(Arc::new(
        provider(5).get_returns(&[0, 1, 2, 3, 4], &Default::default()).unwrap(),
    ))];

    {
        let store = JsonFileConfigStore::open(&path).unwrap();
        let service = HyperparameterTuningService::new(EvolutionConfig::default());
        service
            .adaptive_tuning_by_num_assets(
                &samples,
                RiskProfile::Conservative,
                &quick_grid(),
                &quick_options(),
                Some(&store),
            )
            .unwrap();
    }

    let reopened = JsonFileConfigStore::open(&path).unwrap();
    let active = reopened.all_active().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].num_assets, 5);
    assert_eq!(active[0].risk_profile, RiskProfile::Conservative);
    assert_eq!(active[0].n_configurations_tested, 2);

    std::fs::remove_dir_all(dir).ok();
}

fn app() -> (axum::Router, Arc<PortfolioOptimizer>) {
    let optimizer = Arc::new(optimizer_with(Arc::new(InMemoryConfigStore::new())));
    let mut state = AppState::new(optimizer.clone());
    state.tuning_max_workers = 2;
    (build_app(state), optimizer)
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_http_optimize_route() {
    let (app, _) = app();
    let body = serde_json::json!({
        "asset_ids": [0, 1, 2, 3, 4, 5],
        "risk_profile": "arrojado",
        "hyperparameters": {
            "population_size": 16,
            "generations": 4,
            "crossover_eta": 15.0,
            "mutation_eta": 20.0
        },
        "seed": 3
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/optimize")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let outcome: OptimizationOutcome = body_json(response).await;
    let total: f64 = outcome.composition.iter().map(|w| w.weight).sum();
    assert!((total - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_http_optimize_rejects_too_few_assets() {
    let (app, _) = app();
    let body = serde_json::json!({ "asset_ids": [0, 1], "risk_profile": "moderado" });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/optimize")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_http_config_lookup_routes() {
    let (app, optimizer) = app();

    let missing = app
        .clone()
        .oneshot(Request::get("/configs/5/neutro").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let bogus = app
        .clone()
        .oneshot(Request::get("/configs/5/reckless").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(bogus.status(), StatusCode::BAD_REQUEST);

    let tune = serde_json::json!({
        "asset_sets": [[0, 1, 2, 3, 4]],
        "risk_profile": "neutro",
        "grid": { "population_sizes": [10], "generation_counts": [3] },
        "n_runs": 1,
        "seed": 5
    });
    let tuned = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tune")
                .header("content-type", "application/json")
                .body(Body::from(tune.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(tuned.status(), StatusCode::OK);
    assert_eq!(optimizer.store().all_active().unwrap().len(), 1);

    let found = app
        .oneshot(Request::get("/configs/6/moderado").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(found.status(), StatusCode::OK);
    let record: HyperparameterRecord = body_json(found).await;
    assert_eq!(record.num_assets, 5);
    assert_eq!(record.population_size, 10);
}
