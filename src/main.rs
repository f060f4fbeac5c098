use anyhow::Context;
use paretofolio::config::ServiceConfig;
use paretofolio::logging::init_tracing;
use paretofolio::optimizer::PortfolioOptimizer;
use paretofolio::returns::InMemoryReturnsProvider;
use paretofolio::sampling::{default_start, SyntheticMarket};
use paretofolio::tuning::JsonFileConfigStore;
use paretofolio::web_app::{build_app, AppState};
use std::sync::Arc;
use tracing::info;

const SYNTHETIC_ASSETS: usize = 20;
const SYNTHETIC_MONTHS: usize = 120;
const SYNTHETIC_SEED: u64 = 42;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info")?;
    let config = ServiceConfig::from_env();
    info!(?config, "Loaded service configuration");

    let provider = match &config.returns_dataset_path {
        Some(path) => InMemoryReturnsProvider::load_json(path)
            .with_context(|| format!("failed to load return histories from {path:?}"))?,
        None => {
            info!(
                assets = SYNTHETIC_ASSETS,
                months = SYNTHETIC_MONTHS,
                "No dataset configured, serving a synthetic universe"
            );
            let histories = SyntheticMarket::new(SYNTHETIC_ASSETS, SYNTHETIC_MONTHS, SYNTHETIC_SEED)
                .histories(default_start())?;
            InMemoryReturnsProvider::new(histories)
        }
    };
    let store = JsonFileConfigStore::open(&config.config_store_path)
        .with_context(|| format!("failed to open {:?}", config.config_store_path))?;

    let optimizer = PortfolioOptimizer::new(Arc::new(provider), Arc::new(store));
    let state = AppState {
        optimizer: Arc::new(optimizer),
        tuning_max_workers: config.tuning_max_workers,
        tuning_time_limit_secs: config.tuning_time_limit_secs,
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Listening on {}", config.bind_address);
    axum::serve(listener, build_app(state)).await?;
    Ok(())
}
