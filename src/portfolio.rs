use crate::consts::NUMBER_OF_OPTIMIZATION_OBJECTIVES;
use crate::evolution::objective::Fitness;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

/// One member of a population: a weight vector on the simplex plus what the loop
/// learned about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: usize,
    pub rank: Option<usize>,
    pub crowding_distance: Option<f64>,
    pub weights: Vec<f64>,
    pub fitness: Option<Fitness>,
}

impl PartialEq for Portfolio {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Crowded-comparison order: lower rank first, then larger crowding distance first.
/// `Less` means "preferred".
impl PartialOrd for Portfolio {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.id == other.id {
            return Some(Ordering::Equal);
        }
        let self_rank = self.rank.unwrap_or(usize::MAX);
        let other_rank = other.rank.unwrap_or(usize::MAX);
        if self_rank != other_rank {
            return Some(self_rank.cmp(&other_rank));
        }
        let self_distance = self.crowding_distance.unwrap_or(0.0);
        let other_distance = other.crowding_distance.unwrap_or(0.0);
        other_distance.partial_cmp(&self_distance)
    }
}

static PORTFOLIO_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

impl Portfolio {
    pub fn new(weights: Vec<f64>) -> Self {
        let id = PORTFOLIO_ID_COUNTER.fetch_add(1, AtomicOrdering::SeqCst);
        Portfolio {
            id,
            rank: None,
            crowding_distance: None,
            weights,
            fitness: None,
        }
    }

    pub fn objectives(&self) -> Option<&[f64; NUMBER_OF_OPTIMIZATION_OBJECTIVES]> {
        self.fitness.as_ref().map(|f| &f.objectives)
    }

    /// Unevaluated portfolios count as infinitely infeasible.
    pub fn constraint_violation(&self) -> f64 {
        self.fitness
            .as_ref()
            .map_or(f64::INFINITY, |f| f.constraint_violation)
    }

    pub fn is_feasible(&self) -> bool {
        self.constraint_violation() <= 0.0
    }

    /// Constrained domination: a feasible portfolio beats an infeasible one, between two
    /// infeasible ones the smaller violation wins, and between two feasible ones plain
    /// Pareto dominance on the (minimized) objectives applies.
    pub fn dominates(&self, other: &Portfolio) -> bool {
        let self_violation = self.constraint_violation();
        let other_violation = other.constraint_violation();
        match (self_violation <= 0.0, other_violation <= 0.0) {
            (true, false) => true,
            (false, true) => false,
            (false, false) => self_violation < other_violation,
            (true, true) => match (self.objectives(), other.objectives()) {
                (Some(a), Some(b)) => objectives_dominate(a, b),
                _ => false,
            },
        }
    }

    pub fn is_dominated_by(&self, other: &Portfolio) -> bool {
        other.dominates(self)
    }
}

/// `a` dominates `b` iff `a` is no worse in every objective and strictly better in one.
pub fn objectives_dominate(a: &[f64], b: &[f64]) -> bool {
    let at_least_as_good_in_all = a.iter().zip(b).all(|(x, y)| x <= y);
    let strictly_better_in_one = a.iter().zip(b).any(|(x, y)| x < y);
    at_least_as_good_in_all && strictly_better_in_one
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluated(objectives: [f64; 3], violation: f64) -> Portfolio {
        let mut portfolio = Portfolio::new(vec![1.0 / 3.0; 3]);
        portfolio.fitness = Some(Fitness {
            objectives,
            concentration_margin: violation,
            constraint_violation: violation,
        });
        portfolio
    }

    #[test]
    fn test_plain_dominance() {
        let a = evaluated([-0.02, 0.01, 0.03], 0.0);
        let b = evaluated([-0.01, 0.01, 0.04], 0.0);
        let c = evaluated([-0.03, 0.02, 0.03], 0.0);
        assert!(a.dominates(&b));
        assert!(b.is_dominated_by(&a));
        assert!(!a.dominates(&c) && !c.dominates(&a), "a and c trade off");
        assert!(!a.dominates(&a.clone()), "equal vectors do not dominate");
    }

    #[test]
    fn test_constrained_dominance() {
        let feasible = evaluated([10.0, 10.0, 10.0], 0.0);
        let slightly_infeasible = evaluated([-1.0, 0.0, 0.0], 0.01);
        let very_infeasible = evaluated([-2.0, 0.0, 0.0], 0.5);
        assert!(feasible.dominates(&slightly_infeasible));
        assert!(slightly_infeasible.dominates(&very_infeasible));
        assert!(!very_infeasible.dominates(&feasible));
    }

    #[test]
    fn test_crowded_comparison_order() {
        let mut a = evaluated([0.0; 3], 0.0);
        let mut b = evaluated([0.0; 3], 0.0);
        a.rank = Some(0);
        b.rank = Some(1);
        a.crowding_distance = Some(0.1);
        b.crowding_distance = Some(f64::INFINITY);
        assert_eq!(a.partial_cmp(&b), Some(Ordering::Less), "rank wins first");
        b.rank = Some(0);
        assert_eq!(a.partial_cmp(&b), Some(Ordering::Greater), "then crowding");
    }
}
