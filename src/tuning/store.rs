//! Persistence of tuned hyperparameters keyed by (asset count, risk profile).
//!
//! Re-tuning a key never deletes: the previous active row is flagged inactive and the new
//! one inserted in the same critical section, so a reader always sees exactly one active
//! row for a key that has been tuned.

use crate::consts::LOOKUP_PROBE_OFFSETS;
use crate::profile::RiskProfile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info};
use utoipa::ToSchema;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Configuration store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration store contents are malformed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("No hyperparameter configuration found for {num_assets} assets and profile `{risk_profile}`")]
    ConfigNotFound {
        num_assets: usize,
        risk_profile: RiskProfile,
    },
}

/// The knobs a caller needs to run the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Hyperparameters {
    pub population_size: usize,
    pub generations: usize,
    pub crossover_eta: f64,
    pub mutation_eta: f64,
}

/// One persisted tuning outcome. Statistics are `None` when no run produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HyperparameterRecord {
    #[serde(default)]
    pub id: u64,
    pub num_assets: usize,
    pub risk_profile: RiskProfile,
    pub population_size: usize,
    pub generations: usize,
    pub crossover_eta: f64,
    pub mutation_eta: f64,
    pub hypervolume_mean: Option<f64>,
    pub hypervolume_std: Option<f64>,
    pub spread_mean: Option<f64>,
    pub spread_std: Option<f64>,
    pub spacing_mean: Option<f64>,
    pub spacing_std: Option<f64>,
    pub pareto_size_mean: Option<f64>,
    pub execution_time_mean: Option<f64>,
    pub execution_time_std: Option<f64>,
    pub convergence_generation_mean: Option<f64>,
    pub n_runs: usize,
    pub n_configurations_tested: usize,
    #[schema(value_type = String, format = DateTime)]
    pub tuning_date: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_active: bool,
}

impl HyperparameterRecord {
    pub fn hyperparameters(&self) -> Hyperparameters {
        Hyperparameters {
            population_size: self.population_size,
            generations: self.generations,
            crossover_eta: self.crossover_eta,
            mutation_eta: self.mutation_eta,
        }
    }
}

fn newest_first(record: &HyperparameterRecord) -> (Reverse<DateTime<Utc>>, Reverse<u64>) {
    (Reverse(record.tuning_date), Reverse(record.id))
}

fn find_exact<'a>(
    active: &'a [HyperparameterRecord],
    num_assets: usize,
    risk_profile: RiskProfile,
) -> Option<&'a HyperparameterRecord> {
    active
        .iter()
        .filter(|r| r.is_active && r.num_assets == num_assets && r.risk_profile == risk_profile)
        .min_by_key(|r| newest_first(r))
}

/// Fallback lookup over a snapshot of records.
///
/// Order: exact match, then asset counts offset by +1, -1, +2, -2 for the same profile,
/// then the whole chain again under the neutral profile, then the active record of any
/// profile whose asset count is closest (smaller count, then newest, on ties).
pub fn lookup_in(
    records: &[HyperparameterRecord],
    num_assets: usize,
    risk_profile: RiskProfile,
) -> Option<&HyperparameterRecord> {
    for offset in LOOKUP_PROBE_OFFSETS {
        let candidate = num_assets as i64 + offset;
        if candidate < 1 {
            continue;
        }
        if let Some(record) = find_exact(records, candidate as usize, risk_profile) {
            if offset != 0 {
                debug!(
                    num_assets,
                    found = candidate,
                    %risk_profile,
                    "Using neighbouring configuration"
                );
            }
            return Some(record);
        }
    }

    if risk_profile != RiskProfile::Neutral {
        return lookup_in(records, num_assets, RiskProfile::Neutral);
    }

    records
        .iter()
        .filter(|r| r.is_active)
        .min_by_key(|r| {
            (
                r.num_assets.abs_diff(num_assets),
                r.num_assets,
                newest_first(r),
            )
        })
}

/// Storage seam for tuned configurations.
pub trait ConfigStore: Send + Sync {
    /// Deactivates every active row for the record's key and inserts the record as the
    /// active one, atomically with respect to readers. Returns the stored row.
    fn replace_active(&self, record: HyperparameterRecord)
        -> Result<HyperparameterRecord, StoreError>;

    /// Every row, active or not, in insertion order.
    fn records(&self) -> Result<Vec<HyperparameterRecord>, StoreError>;

    /// Flags rows for `num_assets` (optionally only one profile) inactive. Returns how many
    /// rows changed.
    fn deactivate(
        &self,
        num_assets: usize,
        risk_profile: Option<RiskProfile>,
    ) -> Result<usize, StoreError>;

    fn all_active(&self) -> Result<Vec<HyperparameterRecord>, StoreError> {
        Ok(self.records()?.into_iter().filter(|r| r.is_active).collect())
    }

    fn find_active(
        &self,
        num_assets: usize,
        risk_profile: RiskProfile,
    ) -> Result<Option<HyperparameterRecord>, StoreError> {
        let active = self.all_active()?;
        Ok(find_exact(&active, num_assets, risk_profile).cloned())
    }

    /// `Ok(None)` when the fallback chain finds nothing; the caller picks defaults.
    fn lookup(
        &self,
        num_assets: usize,
        risk_profile: RiskProfile,
    ) -> Result<Option<HyperparameterRecord>, StoreError> {
        let active = self.all_active()?;
        Ok(lookup_in(&active, num_assets, risk_profile).cloned())
    }

    fn require(
        &self,
        num_assets: usize,
        risk_profile: RiskProfile,
    ) -> Result<HyperparameterRecord, StoreError> {
        self.lookup(num_assets, risk_profile)?
            .ok_or(StoreError::ConfigNotFound {
                num_assets,
                risk_profile,
            })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreContents {
    next_id: u64,
    records: Vec<HyperparameterRecord>,
}

impl StoreContents {
    fn replace_active(&mut self, mut record: HyperparameterRecord) -> HyperparameterRecord {
        for existing in self.records.iter_mut().filter(|r| {
            r.is_active
                && r.num_assets == record.num_assets
                && r.risk_profile == record.risk_profile
        }) {
            existing.is_active = false;
        }
        self.next_id += 1;
        record.id = self.next_id;
        record.is_active = true;
        self.records.push(record.clone());
        record
    }

    fn deactivate(&mut self, num_assets: usize, risk_profile: Option<RiskProfile>) -> usize {
        let mut changed = 0;
        for record in self.records.iter_mut().filter(|r| {
            r.is_active
                && r.num_assets == num_assets
                && risk_profile.map_or(true, |p| p == r.risk_profile)
        }) {
            record.is_active = false;
            changed += 1;
        }
        changed
    }
}

#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    contents: RwLock<StoreContents>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn replace_active(
        &self,
        record: HyperparameterRecord,
    ) -> Result<HyperparameterRecord, StoreError> {
        let mut contents = self.contents.write().unwrap_or_else(|e| e.into_inner());
        Ok(contents.replace_active(record))
    }

    fn records(&self) -> Result<Vec<HyperparameterRecord>, StoreError> {
        let contents = self.contents.read().unwrap_or_else(|e| e.into_inner());
        Ok(contents.records.clone())
    }

    fn deactivate(
        &self,
        num_assets: usize,
        risk_profile: Option<RiskProfile>,
    ) -> Result<usize, StoreError> {
        let mut contents = self.contents.write().unwrap_or_else(|e| e.into_inner());
        Ok(contents.deactivate(num_assets, risk_profile))
    }
}

/// Store backed by a single JSON file. Writes go to a temporary sibling first and are
/// renamed over the original, so readers see either the old or the new table.
#[derive(Debug)]
pub struct JsonFileConfigStore {
    file_path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileConfigStore {
    pub fn open(file_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let file_path = file_path.as_ref().to_path_buf();
        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            file_path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn load(&self) -> Result<StoreContents, StoreError> {
        if !self.file_path.exists() {
            return Ok(StoreContents::default());
        }
        let content = fs::read_to_string(&self.file_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, contents: &StoreContents) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(contents)?;
        let temp_path = self.file_path.with_extension("tmp");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, &self.file_path)?;
        Ok(())
    }
}

impl ConfigStore for JsonFileConfigStore {
    fn replace_active(
        &self,
        record: HyperparameterRecord,
    ) -> Result<HyperparameterRecord, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut contents = self.load()?;
        let stored = contents.replace_active(record);
        self.save(&contents)?;
        info!(
            id = stored.id,
            num_assets = stored.num_assets,
            risk_profile = %stored.risk_profile,
            "Saved hyperparameter configuration to {:?}",
            self.file_path
        );
        Ok(stored)
    }

    fn records(&self) -> Result<Vec<HyperparameterRecord>, StoreError> {
        Ok(self.load()?.records)
    }

    fn deactivate(
        &self,
        num_assets: usize,
        risk_profile: Option<RiskProfile>,
    ) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut contents = self.load()?;
        let changed = contents.deactivate(num_assets, risk_profile);
        if changed > 0 {
            self.save(&contents)?;
        }
        Ok(changed)
    }
}
