//! Synthetic monthly return universes, used by the demo binaries and by tuning runs that
//! need a problem of a given size without market data.

use crate::evolution::portfolio_evolution::EvolutionError;
use crate::returns::{AssetHistory, AssetId, ReturnObservation, ReturnStatistics};
use chrono::{Months, NaiveDate};
use nalgebra::DVector;
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use statrs::distribution::MultivariateNormal;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Sampler {
    /// Independent draws from a multivariate normal, one row per period.
    Normal {
        mean: Vec<f64>,
        /// Row-major, `mean.len()` squared entries.
        covariance: Vec<f64>,
        periods_to_sample: usize,
    },
}

impl Sampler {
    pub fn sample_returns<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<Vec<Vec<f64>>, EvolutionError> {
        match self {
            Sampler::Normal {
                mean,
                covariance,
                periods_to_sample,
            } => {
                let normal = MultivariateNormal::new(mean.clone(), covariance.clone())
                    .map_err(|e| EvolutionError::Sampling(e.to_string()))?;
                Ok((0..*periods_to_sample)
                    .map(|_| {
                        let row: DVector<f64> = normal.sample(rng);
                        row.iter().copied().collect()
                    })
                    .collect())
            }
        }
    }
}

/// Parameters of a synthetic universe. Asset `i` gets a mean and volatility linearly spaced
/// over the given ranges; every pair shares the same correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticMarket {
    pub num_assets: usize,
    pub periods: usize,
    pub mean_range: (f64, f64),
    pub volatility_range: (f64, f64),
    pub correlation: f64,
    pub seed: u64,
}

impl SyntheticMarket {
    pub fn new(num_assets: usize, periods: usize, seed: u64) -> Self {
        Self {
            num_assets,
            periods,
            mean_range: (0.004, 0.015),
            volatility_range: (0.02, 0.09),
            correlation: 0.25,
            seed,
        }
    }

    fn spaced(&self, (low, high): (f64, f64), i: usize) -> f64 {
        if self.num_assets <= 1 {
            return low;
        }
        low + (high - low) * i as f64 / (self.num_assets - 1) as f64
    }

    pub fn sampler(&self) -> Sampler {
        let n = self.num_assets;
        let vols: Vec<f64> = (0..n).map(|i| self.spaced(self.volatility_range, i)).collect();
        let covariance = (0..n * n)
            .map(|k| {
                let (i, j) = (k / n, k % n);
                let correlation = if i == j { 1.0 } else { self.correlation };
                correlation * vols[i] * vols[j]
            })
            .collect();
        Sampler::Normal {
            mean: (0..n).map(|i| self.spaced(self.mean_range, i)).collect(),
            covariance,
            periods_to_sample: self.periods,
        }
    }

    pub fn sample_returns(&self) -> Result<Vec<Vec<f64>>, EvolutionError> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        self.sampler().sample_returns(&mut rng)
    }

    pub fn labels(&self) -> Vec<String> {
        (0..self.num_assets).map(|i| format!("SYN{i:03}")).collect()
    }

    /// Sample statistics of one draw, assets numbered 0..n.
    pub fn statistics(&self) -> Result<ReturnStatistics, EvolutionError> {
        let rows = self.sample_returns()?;
        let dates = self.dates(default_start());
        ReturnStatistics::from_period_returns(
            (0..self.num_assets as AssetId).collect(),
            self.labels(),
            dates,
            &rows,
        )
    }

    /// The same draw as per-asset monthly histories starting at `start`.
    pub fn histories(&self, start: NaiveDate) -> Result<Vec<AssetHistory>, EvolutionError> {
        let rows = self.sample_returns()?;
        let dates = self.dates(start);
        Ok(self
            .labels()
            .into_iter()
            .enumerate()
            .map(|(asset, label)| {
                let observations = dates
                    .iter()
                    .zip(&rows)
                    .map(|(date, row)| ReturnObservation {
                        date: *date,
                        value: row[asset],
                    })
                    .collect();
                AssetHistory::new(asset as AssetId, label, observations)
            })
            .collect())
    }

    fn dates(&self, start: NaiveDate) -> Vec<NaiveDate> {
        (0..self.periods as u32)
            .filter_map(|i| start.checked_add_months(Months::new(i)))
            .collect()
    }
}

pub fn default_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2015, 1, 1).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_draw() {
        let market = SyntheticMarket::new(4, 24, 9);
        assert_eq!(market.sample_returns().unwrap(), market.sample_returns().unwrap());
        let other = SyntheticMarket { seed: 10, ..market.clone() };
        assert_ne!(market.sample_returns().unwrap(), other.sample_returns().unwrap());
    }

    #[test]
    fn test_statistics_shape_and_dates() {
        let market = SyntheticMarket::new(6, 48, 1);
        let statistics = market.statistics().unwrap();
        assert_eq!(statistics.num_assets(), 6);
        assert_eq!(statistics.num_periods(), 48);
        assert_eq!(statistics.dates[1], NaiveDate::from_ymd_opt(2015, 2, 1).unwrap());
        // The riskiest asset keeps the largest sample variance with this many periods.
        assert!(statistics.covariance[(5, 5)] > statistics.covariance[(0, 0)]);
    }

    #[test]
    fn test_histories_line_up_with_statistics() {
        let market = SyntheticMarket::new(3, 12, 4);
        let histories = market.histories(default_start()).unwrap();
        let statistics = market.statistics().unwrap();
        assert_eq!(histories.len(), 3);
        assert_eq!(histories[2].observations.len(), 12);
        assert_eq!(histories[2].observations[3].value, statistics.period_returns[(3, 2)]);
    }

    #[test]
    fn test_bad_covariance_is_a_sampling_error() {
        let sampler = Sampler::Normal {
            mean: vec![0.0, 0.0],
            covariance: vec![1.0, 2.0, 2.0, 1.0],
            periods_to_sample: 3,
        };
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            sampler.sample_returns(&mut rng),
            Err(EvolutionError::Sampling(_))
        ));
    }
}
