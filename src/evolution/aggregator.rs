use thiserror::Error;

/// Aggregator trait which reduces a series to a single f64.
/// CVaR, its small-sample fallback and the tuning summaries are all
/// expressed as aggregators over plain slices.
pub trait Aggregator: Sync + Send {
    fn value(&self, series: &[f64]) -> Result<f64, AggregatorError>;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregatorError {
    #[error("Cannot aggregate an empty series")]
    EmptySeries,
    #[error("Number of periods is invalid for aggregator: `{0}`")]
    InvalidNumberOfPeriods(String),
    #[error("Tail fraction must lie in (0, 1], got {0}")]
    InvalidTailFraction(f64),
}

pub struct ArithmeticMean;
impl Aggregator for ArithmeticMean {
    fn value(&self, series: &[f64]) -> Result<f64, AggregatorError> {
        if series.is_empty() {
            return Err(AggregatorError::EmptySeries);
        }
        Ok(series.iter().sum::<f64>() / (series.len() as f64))
    }
}

/// Sample standard deviation (n - 1 denominator).
pub struct StandardDeviation;
impl Aggregator for StandardDeviation {
    fn value(&self, series: &[f64]) -> Result<f64, AggregatorError> {
        if series.len() <= 1 {
            return Err(AggregatorError::InvalidNumberOfPeriods(
                "Standard deviation cannot be computed for series with less than 2 elements."
                    .into(),
            ));
        }
        let number_of_periods = series.len() as f64;
        let mean = series.iter().sum::<f64>() / number_of_periods;
        let variance =
            series.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (number_of_periods - 1.);
        Ok(variance.sqrt())
    }
}

/// Population standard deviation (n denominator). A single observation has zero spread.
pub struct PopulationStandardDeviation;
impl Aggregator for PopulationStandardDeviation {
    fn value(&self, series: &[f64]) -> Result<f64, AggregatorError> {
        if series.is_empty() {
            return Err(AggregatorError::EmptySeries);
        }
        let n = series.len() as f64;
        let mean = series.iter().sum::<f64>() / n;
        let variance = series.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        Ok(variance.sqrt())
    }
}

/// Mean of the largest `max(1, floor(fraction * n))` values of the series.
///
/// Applied to a loss series this is the conditional value at risk at level `fraction`.
pub struct TailMean {
    pub fraction: f64,
}

impl Aggregator for TailMean {
    fn value(&self, series: &[f64]) -> Result<f64, AggregatorError> {
        if series.is_empty() {
            return Err(AggregatorError::EmptySeries);
        }
        if !(self.fraction > 0.0 && self.fraction <= 1.0) {
            return Err(AggregatorError::InvalidTailFraction(self.fraction));
        }
        let mut sorted = series.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let k = ((self.fraction * sorted.len() as f64).floor() as usize).max(1);
        let tail = &sorted[sorted.len() - k..];
        Ok(tail.iter().sum::<f64>() / k as f64)
    }
}

/// Mean and sample standard deviation of a series, with the conventions used by the
/// tuning summaries: `None` mean for an empty series, zero spread for a single value.
pub fn mean_and_std(series: &[f64]) -> (Option<f64>, Option<f64>) {
    let mean = ArithmeticMean.value(series).ok();
    let std = match series.len() {
        0 => None,
        1 => Some(0.0),
        _ => StandardDeviation.value(series).ok(),
    };
    (mean, std)
}
