//! Return statistics consumed by the optimizer.
//!
//! Raw monthly return histories are aligned on their common dates, and summarised into a
//! mean vector, a sample covariance matrix and the aligned period-by-asset matrix the CVaR
//! objective needs.

use crate::consts::MINIMUM_ASSETS;
use crate::evolution::portfolio_evolution::EvolutionError;
use chrono::NaiveDate;
use itertools::Itertools;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use thiserror::Error;
use tracing::debug;
use utoipa::ToSchema;

pub type AssetId = u64;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Failed to read return histories: {0}")]
    Io(#[from] std::io::Error),
    #[error("Return histories are malformed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Inclusive date window. Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DateRange {
    #[schema(value_type = Option<String>, format = Date)]
    pub start: Option<NaiveDate>,
    #[schema(value_type = Option<String>, format = Date)]
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }
}

#[derive(Debug, Clone)]
pub struct ReturnStatistics {
    pub asset_ids: Vec<AssetId>,
    pub labels: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub mean_returns: DVector<f64>,
    pub covariance: DMatrix<f64>,
    /// Periods x assets.
    pub period_returns: DMatrix<f64>,
}

impl ReturnStatistics {
    /// Builds statistics from aligned per-period returns (one row per period, one column
    /// per asset). The covariance uses the n - 1 denominator.
    pub fn from_period_returns(
        asset_ids: Vec<AssetId>,
        labels: Vec<String>,
        dates: Vec<NaiveDate>,
        rows: &[Vec<f64>],
    ) -> Result<Self, EvolutionError> {
        let n_assets = asset_ids.len();
        if n_assets < MINIMUM_ASSETS {
            return Err(EvolutionError::InsufficientData(format!(
                "at least {MINIMUM_ASSETS} assets are required, got {n_assets}"
            )));
        }
        if labels.len() != n_assets {
            return Err(EvolutionError::InsufficientData(
                "asset labels and ids are misaligned".into(),
            ));
        }
        if rows.len() < 2 {
            return Err(EvolutionError::InsufficientData(format!(
                "at least 2 aligned periods are required, got {}",
                rows.len()
            )));
        }
        if let Some(bad) = rows.iter().position(|row| row.len() != n_assets) {
            return Err(EvolutionError::InsufficientData(format!(
                "period {bad} has {} returns for {n_assets} assets",
                rows[bad].len()
            )));
        }

        if rows.iter().flatten().any(|r| !r.is_finite()) {
            return Err(EvolutionError::InsufficientData(
                "period returns contain non-finite values".into(),
            ));
        }

        let n_periods = rows.len();
        let period_returns =
            DMatrix::from_fn(n_periods, n_assets, |period, asset| rows[period][asset]);
        let mean_returns = DVector::from_fn(n_assets, |asset, _| {
            period_returns.column(asset).sum() / n_periods as f64
        });
        let centered = DMatrix::from_fn(n_periods, n_assets, |period, asset| {
            period_returns[(period, asset)] - mean_returns[asset]
        });
        let covariance = (centered.transpose() * &centered) / (n_periods as f64 - 1.0);

        Ok(Self {
            asset_ids,
            labels,
            dates,
            mean_returns,
            covariance,
            period_returns,
        })
    }

    /// Builds statistics from already known moments, keeping the supplied period matrix
    /// for the tail-risk objective. Asset ids are assigned 0..n.
    pub fn from_moments(
        labels: Vec<String>,
        mean_returns: Vec<f64>,
        covariance: Vec<Vec<f64>>,
        period_returns: &[Vec<f64>],
    ) -> Result<Self, EvolutionError> {
        let n_assets = mean_returns.len();
        if n_assets < MINIMUM_ASSETS {
            return Err(EvolutionError::InsufficientData(format!(
                "at least {MINIMUM_ASSETS} assets are required, got {n_assets}"
            )));
        }
        if labels.len() != n_assets
            || covariance.len() != n_assets
            || covariance.iter().any(|row| row.len() != n_assets)
        {
            return Err(EvolutionError::InsufficientData(
                "mean vector, covariance matrix and labels are misaligned".into(),
            ));
        }
        if period_returns.is_empty() || period_returns.iter().any(|row| row.len() != n_assets) {
            return Err(EvolutionError::InsufficientData(
                "period return matrix is empty or misaligned".into(),
            ));
        }
        let all_finite = mean_returns.iter().all(|m| m.is_finite())
            && covariance.iter().flatten().all(|c| c.is_finite())
            && period_returns.iter().flatten().all(|r| r.is_finite());
        if !all_finite {
            return Err(EvolutionError::InsufficientData(
                "return statistics contain non-finite values".into(),
            ));
        }

        Ok(Self {
            asset_ids: (0..n_assets as AssetId).collect(),
            labels,
            dates: Vec::new(),
            mean_returns: DVector::from_vec(mean_returns),
            covariance: DMatrix::from_fn(n_assets, n_assets, |i, j| covariance[i][j]),
            period_returns: DMatrix::from_fn(period_returns.len(), n_assets, |p, a| {
                period_returns[p][a]
            }),
        })
    }

    pub fn num_assets(&self) -> usize {
        self.mean_returns.len()
    }

    pub fn num_periods(&self) -> usize {
        self.period_returns.nrows()
    }

    /// Pearson correlation derived from the covariance matrix.
    pub fn correlation(&self) -> DMatrix<f64> {
        let n = self.num_assets();
        DMatrix::from_fn(n, n, |i, j| {
            let denominator = (self.covariance[(i, i)] * self.covariance[(j, j)]).sqrt();
            if denominator > 0.0 {
                self.covariance[(i, j)] / denominator
            } else {
                0.0
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReturnObservation {
    pub date: NaiveDate,
    pub value: f64,
}

/// Monthly return history of one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetHistory {
    pub asset_id: AssetId,
    pub label: String,
    pub observations: Vec<ReturnObservation>,
}

impl AssetHistory {
    pub fn new(
        asset_id: AssetId,
        label: impl Into<String>,
        observations: Vec<ReturnObservation>,
    ) -> Self {
        let mut observations = observations;
        observations.sort_by_key(|o| o.date);
        Self {
            asset_id,
            label: label.into(),
            observations,
        }
    }

    /// Converts month-end closing prices into monthly percentage changes. Periods whose
    /// previous close is not positive are skipped.
    pub fn from_month_end_prices(
        asset_id: AssetId,
        label: impl Into<String>,
        prices: &[(NaiveDate, f64)],
    ) -> Self {
        let mut sorted = prices.to_vec();
        sorted.sort_by_key(|(date, _)| *date);
        let observations = sorted
            .windows(2)
            .filter(|pair| pair[0].1 > 0.0)
            .map(|pair| ReturnObservation {
                date: pair[1].0,
                value: pair[1].1 / pair[0].1 - 1.0,
            })
            .collect();
        Self::new(asset_id, label, observations)
    }

    fn in_range(&self, range: &DateRange) -> BTreeMap<NaiveDate, f64> {
        self.observations
            .iter()
            .filter(|o| range.contains(o.date) && o.value.is_finite())
            .map(|o| (o.date, o.value))
            .collect()
    }
}

/// Source of aligned return statistics for a set of assets.
pub trait ReturnsProvider: Send + Sync {
    fn get_returns(
        &self,
        asset_ids: &[AssetId],
        range: &DateRange,
    ) -> Result<ReturnStatistics, EvolutionError>;

    /// Raw per-period returns in `range` without alignment; missing values are `None`.
    fn realized_returns(
        &self,
        asset_ids: &[AssetId],
        range: &DateRange,
    ) -> Vec<(NaiveDate, Vec<Option<f64>>)>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryReturnsProvider {
    histories: HashMap<AssetId, AssetHistory>,
}

impl InMemoryReturnsProvider {
    pub fn new(histories: Vec<AssetHistory>) -> Self {
        Self {
            histories: histories.into_iter().map(|h| (h.asset_id, h)).collect(),
        }
    }

    /// Loads a JSON array of [`AssetHistory`] records.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let histories: Vec<AssetHistory> = serde_json::from_str(&content)?;
        Ok(Self::new(histories))
    }

    pub fn insert(&mut self, history: AssetHistory) {
        self.histories.insert(history.asset_id, history);
    }

    pub fn asset_ids(&self) -> Vec<AssetId> {
        let mut ids: Vec<AssetId> = self.histories.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl ReturnsProvider for InMemoryReturnsProvider {
    fn get_returns(
        &self,
        asset_ids: &[AssetId],
        range: &DateRange,
    ) -> Result<ReturnStatistics, EvolutionError> {
        let mut selected: Vec<(&AssetHistory, BTreeMap<NaiveDate, f64>)> = Vec::new();
        for id in asset_ids.iter().unique() {
            match self.histories.get(id) {
                Some(history) => {
                    let window = history.in_range(range);
                    if window.is_empty() {
                        debug!(asset_id = id, "asset has no history in range, dropping it");
                    } else {
                        selected.push((history, window));
                    }
                }
                None => debug!(asset_id = id, "unknown asset, dropping it"),
            }
        }
        if selected.len() < MINIMUM_ASSETS {
            return Err(EvolutionError::InsufficientData(format!(
                "only {} assets have history in the requested window",
                selected.len()
            )));
        }

        let mut common: BTreeSet<NaiveDate> = selected[0].1.keys().copied().collect();
        for (_, window) in selected.iter().skip(1) {
            common.retain(|date| window.contains_key(date));
        }
        if common.is_empty() {
            return Err(EvolutionError::InsufficientData(
                "no period is covered by every selected asset".into(),
            ));
        }

        let dates: Vec<NaiveDate> = common.into_iter().collect();
        let rows: Vec<Vec<f64>> = dates
            .iter()
            .map(|date| selected.iter().map(|(_, window)| window[date]).collect())
            .collect();
        let ids = selected.iter().map(|(h, _)| h.asset_id).collect();
        let labels = selected.iter().map(|(h, _)| h.label.clone()).collect();

        debug!(
            assets = selected.len(),
            periods = dates.len(),
            "aligned return history"
        );
        ReturnStatistics::from_period_returns(ids, labels, dates, &rows)
    }

    fn realized_returns(
        &self,
        asset_ids: &[AssetId],
        range: &DateRange,
    ) -> Vec<(NaiveDate, Vec<Option<f64>>)> {
        let windows: Vec<BTreeMap<NaiveDate, f64>> = asset_ids
            .iter()
            .map(|id| {
                self.histories
                    .get(id)
                    .map(|h| h.in_range(range))
                    .unwrap_or_default()
            })
            .collect();
        let dates: BTreeSet<NaiveDate> = windows.iter().flat_map(|w| w.keys().copied()).collect();
        dates
            .into_iter()
            .map(|date| (date, windows.iter().map(|w| w.get(&date).copied()).collect()))
            .collect()
    }
}
