use futures::stream::{self, StreamExt};
use paretofolio::config::ServiceConfig;
use paretofolio::evolution::portfolio_evolution::EvolutionConfig;
use paretofolio::logging::init_tracing;
use paretofolio::profile::RiskProfile;
use paretofolio::sampling::SyntheticMarket;
use paretofolio::tuning::{
    AssetUniverseSample, ConfigStore, HyperparameterTuningService, JsonFileConfigStore,
    SearchGrid, TuningOptions,
};
use std::path::Path;
use std::sync::Arc;
use std::{fs::File, io::Write, time::Instant};
use tokio::task;

const ASSET_COUNTS: [usize; 4] = [5, 10, 15, 20];
const MONTHS_OF_HISTORY: usize = 60;
const SEED: u64 = 42;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info")?;
    let service_config = ServiceConfig::from_env();
    let store: Arc<dyn ConfigStore> =
        Arc::new(JsonFileConfigStore::open(&service_config.config_store_path)?);

    // Profiles run concurrently, so each one gets a share of the worker budget.
    let profiles = [
        RiskProfile::Neutral,
        RiskProfile::Conservative,
        RiskProfile::Moderate,
        RiskProfile::Aggressive,
    ];
    let options = TuningOptions {
        n_runs: 3,
        max_workers: (service_config.tuning_max_workers / profiles.len()).max(1),
        time_limit_secs: service_config.tuning_time_limit_secs,
        base_seed: Some(SEED),
        ..TuningOptions::default()
    };
    let grid = SearchGrid {
        population_sizes: vec![50, 100, 200],
        generation_counts: vec![25, 50, 100],
    };

    let samples: Vec<AssetUniverseSample> = ASSET_COUNTS
        .iter()
        .map(|&n| -> anyhow::Result<AssetUniverseSample> {
            let statistics =
                SyntheticMarket::new(n, MONTHS_OF_HISTORY, SEED + n as u64).statistics()?;
            Ok(AssetUniverseSample::new(Arc::new(statistics)))
        })
        .collect::<anyhow::Result<_>>()?;

    println!("Starting experiment: convergence analysis on {} assets", ASSET_COUNTS[1]);
    let start = Instant::now();

    let convergence = {
        let statistics = samples[1].statistics.clone();
        let options = options.clone();
        task::spawn_blocking(move || {
            HyperparameterTuningService::new(EvolutionConfig::default()).convergence_analysis(
                statistics,
                RiskProfile::Moderate,
                100,
                200,
                &options,
            )
        })
        .await??
    };
    println!(
        "→ convergence: {} of {} runs converged, mean generation = {:?}",
        convergence.convergence_generations.len(),
        convergence.runs.len(),
        convergence.convergence_mean
    );
    write_json("convergence_analysis.json", &convergence).await?;

    stream::iter(profiles)
        .map(|profile| {
            let samples = samples.clone();
            let grid = grid.clone();
            let options = options.clone();
            let store = store.clone();
            async move {
                let service = HyperparameterTuningService::new(EvolutionConfig::default());
                let (service, records) = task::spawn_blocking(move || {
                    let records = service.adaptive_tuning_by_num_assets(
                        &samples,
                        profile,
                        &grid,
                        &options,
                        Some(store.as_ref()),
                    );
                    (service, records)
                })
                .await?;
                let records = records?;

                let results_path = format!("tuning_results_{profile}.json");
                let exported = task::spawn_blocking(move || {
                    service.export_results(Some(Path::new(&results_path)))
                })
                .await??;
                anyhow::Ok((profile, records, exported))
            }
        })
        .buffer_unordered(profiles.len())
        .for_each(|res| async {
            match res {
                Ok((profile, records, exported)) => {
                    for record in &records {
                        println!(
                            "→ {profile}: {} assets -> population {}, generations {}, hv {:?}",
                            record.num_assets,
                            record.population_size,
                            record.generations,
                            record.hypervolume_mean
                        );
                    }
                    println!("  results written to {}", exported.display());
                }
                Err(e) => eprintln!("tuning failed: {e:#}"),
            }
        })
        .await;

    println!("Total experiment time: {:.2?}", start.elapsed());
    Ok(())
}

async fn write_json<T: serde::Serialize>(filename: &str, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let filename = filename.to_string();
    task::spawn_blocking(move || {
        let mut f = File::create(&filename)?;
        f.write_all(json.as_bytes())?;
        Ok::<_, std::io::Error>(())
    })
    .await??;
    Ok(())
}
