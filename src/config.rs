use std::env;
use std::path::PathBuf;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
pub const DEFAULT_CONFIG_STORE_PATH: &str = "data/hyperparameters.json";

/// Process settings for the service binary. Everything has a default, so an empty
/// environment yields a runnable configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub bind_address: String,
    pub config_store_path: PathBuf,
    /// JSON array of asset histories. Without it the service starts on a synthetic universe.
    pub returns_dataset_path: Option<PathBuf>,
    pub tuning_max_workers: usize,
    pub tuning_time_limit_secs: Option<f64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            config_store_path: PathBuf::from(DEFAULT_CONFIG_STORE_PATH),
            returns_dataset_path: None,
            tuning_max_workers: num_cpus::get(),
            tuning_time_limit_secs: None,
        }
    }
}

impl ServiceConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let bind_address = lookup("BIND_ADDRESS").unwrap_or(defaults.bind_address);

        let config_store_path = lookup("CONFIG_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.config_store_path);

        let returns_dataset_path = lookup("RETURNS_DATASET_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let tuning_max_workers = lookup("TUNING_MAX_WORKERS")
            .and_then(|v| v.parse().ok())
            .filter(|workers: &usize| *workers > 0)
            .unwrap_or(defaults.tuning_max_workers);

        let tuning_time_limit_secs = lookup("TUNING_TIME_LIMIT_SECS")
            .and_then(|v| v.parse().ok())
            .filter(|secs: &f64| secs.is_finite() && *secs > 0.0);

        Self {
            bind_address,
            config_store_path,
            returns_dataset_path,
            tuning_max_workers,
            tuning_time_limit_secs,
        }
    }
}
