//! Walk-forward backtest: optimize at each rebalancing date with only the trailing window
//! of history, then hold the composition until the next date.

use crate::consts::MONTHS_PER_YEAR;
use crate::evolution::aggregator::{Aggregator, ArithmeticMean, PopulationStandardDeviation};
use crate::evolution::portfolio_evolution::{EvolutionError, WeightBounds};
use crate::optimizer::{AssetWeight, OptimizationRequest, PortfolioOptimizer};
use crate::profile::RiskProfile;
use crate::returns::{AssetId, DateRange};
use crate::tuning::Hyperparameters;
use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

fn default_rebalance_months() -> u32 {
    6
}
fn default_window_months() -> u32 {
    36
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BacktestConfig {
    #[schema(value_type = String, format = Date)]
    pub start: NaiveDate,
    #[schema(value_type = String, format = Date)]
    pub end: NaiveDate,
    pub asset_ids: Vec<AssetId>,
    #[serde(default)]
    pub excluded_asset_ids: Vec<AssetId>,
    pub risk_profile: RiskProfile,
    #[serde(default = "default_rebalance_months")]
    pub rebalance_months: u32,
    /// Months of history visible to each optimization.
    #[serde(default = "default_window_months")]
    pub window_months: u32,
    #[serde(default)]
    pub bounds: WeightBounds,
    #[serde(default)]
    pub hyperparameters: Option<Hyperparameters>,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BacktestPeriod {
    #[schema(value_type = String, format = Date)]
    pub rebalance_date: NaiveDate,
    #[schema(value_type = String, format = Date)]
    pub next_date: NaiveDate,
    pub composition: Vec<AssetWeight>,
    pub monthly_returns: Vec<f64>,
    pub period_return: f64,
    pub cumulative_return: f64,
    /// Annualized, population standard deviation of the monthly returns.
    pub volatility: f64,
    pub sharpe: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BacktestReport {
    pub periods: Vec<BacktestPeriod>,
    #[schema(value_type = Vec<String>)]
    pub skipped_dates: Vec<NaiveDate>,
    pub total_return: f64,
    pub mean_period_return: f64,
    pub mean_volatility: f64,
    pub mean_sharpe: f64,
    pub max_drawdown: f64,
}

/// Start, every `step` months while not past `end`, then `end` itself.
pub fn rebalance_dates(start: NaiveDate, end: NaiveDate, step: u32) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = Some(start);
    while let Some(date) = current.filter(|d| *d <= end) {
        dates.push(date);
        current = date.checked_add_months(Months::new(step.max(1)));
    }
    if dates.last() != Some(&end) {
        dates.push(end);
    }
    dates
}

/// Compounded return of a monthly series.
pub fn compound(monthly_returns: &[f64]) -> f64 {
    monthly_returns.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0
}

/// Largest peak-to-trough fall of the wealth curve `1 + cumulative_return`.
pub fn max_drawdown(cumulative_returns: &[f64]) -> f64 {
    let mut values = cumulative_returns.iter().map(|r| 1.0 + r);
    let Some(mut peak) = values.next() else {
        return 0.0;
    };
    let mut worst = 0.0_f64;
    for value in std::iter::once(peak).chain(values) {
        peak = peak.max(value);
        if peak > 0.0 {
            worst = worst.max((peak - value) / peak);
        }
    }
    worst
}

fn annualized_volatility_and_sharpe(monthly_returns: &[f64]) -> (f64, f64) {
    let (Ok(mean), Ok(std)) = (
        ArithmeticMean.value(monthly_returns),
        PopulationStandardDeviation.value(monthly_returns),
    ) else {
        return (0.0, 0.0);
    };
    let volatility = std * MONTHS_PER_YEAR.sqrt();
    let sharpe = if volatility > 0.0 {
        mean * MONTHS_PER_YEAR / volatility
    } else {
        0.0
    };
    (volatility, sharpe)
}

pub struct Backtester<'a> {
    optimizer: &'a PortfolioOptimizer,
}

impl<'a> Backtester<'a> {
    pub fn new(optimizer: &'a PortfolioOptimizer) -> Self {
        Self { optimizer }
    }

    fn realized_monthly_returns(
        &self,
        composition: &[AssetWeight],
        after: NaiveDate,
        until: NaiveDate,
    ) -> Vec<f64> {
        let ids: Vec<AssetId> = composition.iter().map(|w| w.asset_id).collect();
        let range = DateRange::new(after.succ_opt(), Some(until));
        self.optimizer
            .provider()
            .realized_returns(&ids, &range)
            .into_iter()
            .map(|(_, returns)| {
                composition
                    .iter()
                    .zip(returns)
                    .filter_map(|(w, r)| r.map(|r| w.weight * r))
                    .sum()
            })
            .collect()
    }

    pub fn run(&self, config: &BacktestConfig) -> Result<BacktestReport, EvolutionError> {
        if config.end <= config.start {
            return Err(EvolutionError::InsufficientData(format!(
                "backtest end {} is not after start {}",
                config.end, config.start
            )));
        }
        let universe: Vec<AssetId> = config
            .asset_ids
            .iter()
            .copied()
            .filter(|id| !config.excluded_asset_ids.contains(id))
            .collect();
        let dates = rebalance_dates(config.start, config.end, config.rebalance_months);
        info!(
            rebalances = dates.len() - 1,
            assets = universe.len(),
            risk_profile = %config.risk_profile,
            "Starting backtest"
        );

        let mut periods: Vec<BacktestPeriod> = Vec::new();
        let mut skipped_dates = Vec::new();
        let mut cumulative_return = 0.0;

        for pair in dates.windows(2) {
            let (rebalance_date, next_date) = (pair[0], pair[1]);
            let window_start = rebalance_date.checked_sub_months(Months::new(config.window_months));
            let request = OptimizationRequest {
                asset_ids: universe.clone(),
                risk_profile: config.risk_profile,
                date_range: DateRange::new(window_start, Some(rebalance_date)),
                bounds: config.bounds,
                hyperparameters: config.hyperparameters,
                seed: config.seed,
            };
            let outcome = match self.optimizer.optimize(&request) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(%rebalance_date, "Optimization failed, skipping period: {e}");
                    skipped_dates.push(rebalance_date);
                    continue;
                }
            };

            let monthly_returns =
                self.realized_monthly_returns(&outcome.composition, rebalance_date, next_date);
            let period_return = compound(&monthly_returns);
            cumulative_return = (1.0 + cumulative_return) * (1.0 + period_return) - 1.0;
            let (volatility, sharpe) = annualized_volatility_and_sharpe(&monthly_returns);
            info!(
                %rebalance_date,
                period_return, cumulative_return, "Rebalanced"
            );

            periods.push(BacktestPeriod {
                rebalance_date,
                next_date,
                composition: outcome.composition,
                monthly_returns,
                period_return,
                cumulative_return,
                volatility,
                sharpe,
            });
        }

        let mean_of = |f: fn(&BacktestPeriod) -> f64| {
            ArithmeticMean
                .value(&periods.iter().map(f).collect::<Vec<_>>())
                .unwrap_or(0.0)
        };
        let cumulative: Vec<f64> = periods.iter().map(|p| p.cumulative_return).collect();
        Ok(BacktestReport {
            total_return: cumulative.last().copied().unwrap_or(0.0),
            mean_period_return: mean_of(|p| p.period_return),
            mean_volatility: mean_of(|p| p.volatility),
            mean_sharpe: mean_of(|p| p.sharpe),
            max_drawdown: max_drawdown(&cumulative),
            periods,
            skipped_dates,
        })
    }
}
