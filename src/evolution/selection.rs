use crate::consts::{COMPOSITION_DUST_THRESHOLD, NORMALIZATION_RANGE_EPSILON};
use crate::evolution::portfolio_evolution::{normalize_in_place, EvolutionError};
use crate::portfolio::Portfolio;
use crate::profile::SelectionWeights;
use itertools::Itertools;

/// Min-max scales a column to [0, 1]. A column whose range is at most
/// `NORMALIZATION_RANGE_EPSILON` maps to 0.5 everywhere.
fn normalize_column(values: &[f64]) -> Vec<f64> {
    let (min, max) = match values.iter().copied().minmax_by(|a, b| a.total_cmp(b)) {
        itertools::MinMaxResult::NoElements => return vec![],
        itertools::MinMaxResult::OneElement(v) => (v, v),
        itertools::MinMaxResult::MinMax(lo, hi) => (lo, hi),
    };
    let range = max - min;
    if range <= NORMALIZATION_RANGE_EPSILON {
        return vec![0.5; values.len()];
    }
    values.iter().map(|v| (v - min) / range).collect()
}

/// Scores each front member as `r * w_r - v * w_v - c * w_c` over normalized columns,
/// with the first objective turned back into a return.
pub fn score_front(front: &[Portfolio], weights: &SelectionWeights) -> Vec<f64> {
    let column = |k: usize| -> Vec<f64> {
        front
            .iter()
            .map(|p| p.objectives().map_or(f64::NAN, |o| o[k]))
            .collect()
    };
    let returns: Vec<f64> = column(0).into_iter().map(|negated| -negated).collect();
    let returns = normalize_column(&returns);
    let variances = normalize_column(&column(1));
    let cvars = normalize_column(&column(2));

    returns
        .iter()
        .zip(&variances)
        .zip(&cvars)
        .map(|((r, v), c)| {
            r * weights.expected_return - v * weights.variance - c * weights.cvar
        })
        .collect()
}

/// Picks one member of the front for a profile and cleans its weights: renormalize, drop
/// anything under 0.1%, renormalize again.
pub fn select_from_front(
    front: &[Portfolio],
    weights: &SelectionWeights,
) -> Result<Vec<f64>, EvolutionError> {
    let scores = score_front(front, weights);
    let best = scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, score)| match best {
            Some((_, top)) if *score <= top => best,
            _ if score.is_nan() => best,
            _ => Some((i, *score)),
        })
        .map(|(i, _)| i)
        .ok_or_else(|| {
            EvolutionError::InsufficientData("cannot select from an empty front".into())
        })?;

    Ok(clean_composition(&front[best].weights))
}

pub fn clean_composition(weights: &[f64]) -> Vec<f64> {
    let mut cleaned = weights.to_vec();
    normalize_in_place(&mut cleaned);
    cleaned
        .iter_mut()
        .filter(|w| **w < COMPOSITION_DUST_THRESHOLD)
        .for_each(|w| *w = 0.0);
    normalize_in_place(&mut cleaned);
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::objective::Fitness;
    use crate::profile::{ProfileTable, RiskProfile};

    fn member(weights: Vec<f64>, objectives: [f64; 3]) -> Portfolio {
        let mut portfolio = Portfolio::new(weights);
        portfolio.fitness = Some(Fitness {
            objectives,
            concentration_margin: -0.1,
            constraint_violation: 0.0,
        });
        portfolio
    }

    fn front() -> Vec<Portfolio> {
        vec![
            // safe: low return, low risk
            member(vec![0.5, 0.3, 0.2], [-0.004, 0.0010, 0.010]),
            // balanced
            member(vec![0.34, 0.33, 0.33], [-0.008, 0.0020, 0.020]),
            // risky: high return, high risk
            member(vec![0.2, 0.3, 0.5], [-0.012, 0.0045, 0.045]),
        ]
    }

    #[test]
    fn test_profiles_pick_different_ends_of_the_front() {
        let table = ProfileTable::default();
        let front = front();
        let conservative =
            select_from_front(&front, &table.selection(RiskProfile::Conservative)).unwrap();
        let aggressive =
            select_from_front(&front, &table.selection(RiskProfile::Aggressive)).unwrap();
        assert_eq!(conservative, vec![0.5, 0.3, 0.2]);
        assert_eq!(aggressive, vec![0.2, 0.3, 0.5]);
    }

    #[test]
    fn test_flat_columns_normalize_to_half() {
        assert_eq!(normalize_column(&[0.2, 0.2, 0.2]), vec![0.5, 0.5, 0.5]);
        assert_eq!(normalize_column(&[1.0, 3.0, 2.0]), vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn test_single_member_front_is_selected() {
        let front = vec![member(vec![0.25, 0.25, 0.5], [-0.01, 0.002, 0.02])];
        let weights = SelectionWeights {
            expected_return: 0.4,
            variance: 0.3,
            cvar: 0.3,
        };
        let chosen = select_from_front(&front, &weights).unwrap();
        assert_eq!(chosen, vec![0.25, 0.25, 0.5]);
    }

    #[test]
    fn test_clean_composition_drops_dust() {
        let cleaned = clean_composition(&[0.0005, 0.4995, 0.5]);
        assert_eq!(cleaned[0], 0.0);
        assert!((cleaned.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(cleaned[1] > 0.4995);
    }

    #[test]
    fn test_empty_front_is_an_error() {
        let weights = SelectionWeights {
            expected_return: 1.0,
            variance: 0.0,
            cvar: 0.0,
        };
        assert!(select_from_front(&[], &weights).is_err());
    }
}
