use crate::consts::NUMBER_OF_OPTIMIZATION_OBJECTIVES;
use crate::portfolio::Portfolio;
use rayon::prelude::*;
use tracing::warn;

pub mod standard_pareto;

/// Partitions `population` into dominance fronts under constrained domination and writes
/// each member's rank. Front 0 is the non-dominated set.
///
/// Domination lists are built in parallel, one row per member, then peeled front by front.
pub fn fast_non_dominated_sort(population: &mut [Portfolio]) -> Vec<Vec<usize>> {
    if population.is_empty() {
        return vec![];
    }

    let dominated_sets: Vec<Vec<usize>> = population
        .par_iter()
        .enumerate()
        .map(|(i, portfolio_a)| {
            population
                .iter()
                .enumerate()
                .filter(|(j, portfolio_b)| i != *j && portfolio_a.dominates(portfolio_b))
                .map(|(j, _)| j)
                .collect()
        })
        .collect();

    let mut domination_counts = vec![0usize; population.len()];
    for dominated in &dominated_sets {
        for &j in dominated {
            domination_counts[j] += 1;
        }
    }

    let mut fronts: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = (0..population.len())
        .filter(|&i| domination_counts[i] == 0)
        .collect();

    while !current.is_empty() {
        let rank = fronts.len();
        let mut next = Vec::new();
        for &i in &current {
            population[i].rank = Some(rank);
            for &j in &dominated_sets[i] {
                domination_counts[j] -= 1;
                if domination_counts[j] == 0 {
                    next.push(j);
                }
            }
        }
        next.sort_unstable();
        fronts.push(current);
        current = next;
    }

    let assigned: usize = fronts.iter().map(Vec::len).sum();
    if assigned != population.len() {
        // only reachable with NaN objectives, where dominance stops being a partial order
        warn!(
            "{} portfolios were left out of the dominance sort, appending them as a last front",
            population.len() - assigned
        );
        let rank = fronts.len();
        let leftover: Vec<usize> = (0..population.len())
            .filter(|&i| domination_counts[i] > 0)
            .collect();
        leftover.iter().for_each(|&i| population[i].rank = Some(rank));
        fronts.push(leftover);
    }

    fronts
}

/// Writes the crowding distance of every member of `front` (indices into `population`).
///
/// Distances start at zero and accumulate over objectives. Boundary members of each
/// objective get infinity, interior ones the normalized gap between their neighbours.
pub fn calculate_and_update_crowding_distance(population: &mut [Portfolio], front: &[usize]) {
    front
        .iter()
        .for_each(|&i| population[i].crowding_distance = Some(0.0));
    if front.len() <= 2 {
        front
            .iter()
            .for_each(|&i| population[i].crowding_distance = Some(f64::INFINITY));
        return;
    }

    let objective_value = |portfolio: &Portfolio, objective_idx: usize| {
        portfolio
            .objectives()
            .map_or(f64::INFINITY, |objectives| objectives[objective_idx])
    };

    for objective_idx in 0..NUMBER_OF_OPTIMIZATION_OBJECTIVES {
        let mut sorted = front.to_vec();
        sorted.sort_by(|&a, &b| {
            objective_value(&population[a], objective_idx)
                .total_cmp(&objective_value(&population[b], objective_idx))
        });

        let first = sorted[0];
        let last = sorted[sorted.len() - 1];
        population[first].crowding_distance = Some(f64::INFINITY);
        population[last].crowding_distance = Some(f64::INFINITY);

        let range = objective_value(&population[last], objective_idx)
            - objective_value(&population[first], objective_idx);
        if !(range > 0.0) || !range.is_finite() {
            continue;
        }
        for k in 1..sorted.len() - 1 {
            let previous = objective_value(&population[sorted[k - 1]], objective_idx);
            let next = objective_value(&population[sorted[k + 1]], objective_idx);
            let current = population[sorted[k]].crowding_distance.unwrap_or(0.0);
            population[sorted[k]].crowding_distance = Some(current + (next - previous) / range);
        }
    }
}

/// Ranks and crowds the whole population in place, returning the fronts.
pub fn rank_and_crowd(population: &mut [Portfolio]) -> Vec<Vec<usize>> {
    let fronts = fast_non_dominated_sort(population);
    for front in &fronts {
        calculate_and_update_crowding_distance(population, front);
    }
    fronts
}

/// Elitist survival: whole fronts in rank order while they fit, then the most isolated
/// members of the first front that does not.
pub fn select_survivors(mut merged: Vec<Portfolio>, population_size: usize) -> Vec<Portfolio> {
    let fronts = rank_and_crowd(&mut merged);
    let mut keep: Vec<usize> = Vec::with_capacity(population_size);

    for front in fronts {
        if keep.len() >= population_size {
            break;
        }
        if keep.len() + front.len() <= population_size {
            keep.extend(front);
        } else {
            let needed = population_size - keep.len();
            let mut partial = front;
            partial.sort_by(|&a, &b| {
                let dist_a = merged[a].crowding_distance.unwrap_or(f64::NEG_INFINITY);
                let dist_b = merged[b].crowding_distance.unwrap_or(f64::NEG_INFINITY);
                dist_b.total_cmp(&dist_a)
            });
            keep.extend(partial.into_iter().take(needed));
            break;
        }
    }

    let mut slots: Vec<Option<Portfolio>> = merged.into_iter().map(Some).collect();
    keep.into_iter().filter_map(|i| slots[i].take()).collect()
}

/// The fronts as owned vectors, ranked and crowded.
pub fn build_pareto_fronts(portfolios: &[Portfolio]) -> Vec<Vec<Portfolio>> {
    let mut population = portfolios.to_vec();
    let fronts = rank_and_crowd(&mut population);
    fronts
        .into_iter()
        .map(|front| front.into_iter().map(|i| population[i].clone()).collect())
        .collect()
}
