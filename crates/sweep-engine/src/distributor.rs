//! Splitting combinations into per-worker batches.
//!
//! Two modes:
//! - simple: contiguous slices of `ceil(len / workers)` combinations;
//! - load-balanced: longest-job-first bin packing on estimated cost.
//!
//! Either way every input combination lands in exactly one batch.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use sweep_types::ParameterCombination;

/// Estimates the relative evaluation cost of a combination.
pub trait CostEstimator: Send + Sync {
    fn estimate(&self, combo: &ParameterCombination) -> f64;
}

impl<F> CostEstimator for F
where
    F: Fn(&ParameterCombination) -> f64 + Send + Sync,
{
    fn estimate(&self, combo: &ParameterCombination) -> f64 {
        self(combo)
    }
}

/// Default proxy: one unit per parameter, never below one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterCountCost;

impl CostEstimator for ParameterCountCost {
    fn estimate(&self, combo: &ParameterCombination) -> f64 {
        combo.len().max(1) as f64
    }
}

/// Running sum of the cost assigned to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkerLoad {
    pub worker: usize,
    pub assigned: usize,
    pub cost: f64,
}

/// Batches plus the load each one carries. `batches[i]` belongs to
/// `loads[i]`; empty batches are dropped.
#[derive(Debug, Clone, Default)]
pub struct Distribution {
    pub batches: Vec<Vec<ParameterCombination>>,
    pub loads: Vec<WorkerLoad>,
}

impl Distribution {
    pub fn total_combinations(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }
}

pub struct WorkDistributor {
    estimator: Arc<dyn CostEstimator>,
}

impl Default for WorkDistributor {
    fn default() -> Self {
        Self::new(Arc::new(ParameterCountCost))
    }
}

impl WorkDistributor {
    pub fn new(estimator: Arc<dyn CostEstimator>) -> Self {
        Self { estimator }
    }

    /// Split `combinations` across at most `worker_count` batches.
    pub fn distribute(
        &self,
        combinations: Vec<ParameterCombination>,
        worker_count: usize,
        balance: bool,
    ) -> Distribution {
        let worker_count = worker_count.max(1);
        if combinations.is_empty() {
            return Distribution::default();
        }
        if balance {
            self.balanced(combinations, worker_count)
        } else {
            self.contiguous(combinations, worker_count)
        }
    }

    fn contiguous(&self, combinations: Vec<ParameterCombination>, worker_count: usize) -> Distribution {
        let chunk = combinations.len().div_ceil(worker_count);
        let mut distribution = Distribution::default();
        let mut rest = combinations.into_iter().peekable();

        while rest.peek().is_some() {
            let batch: Vec<ParameterCombination> = rest.by_ref().take(chunk).collect();
            let cost = batch.iter().map(|c| self.estimator.estimate(c)).sum();
            distribution.loads.push(WorkerLoad {
                worker: distribution.batches.len(),
                assigned: batch.len(),
                cost,
            });
            distribution.batches.push(batch);
        }
        distribution
    }

    fn balanced(&self, combinations: Vec<ParameterCombination>, worker_count: usize) -> Distribution {
        let mut costed: Vec<(f64, ParameterCombination)> = combinations
            .into_iter()
            .map(|c| (sanitize_cost(self.estimator.estimate(&c)), c))
            .collect();
        // Stable sort keeps enumeration order among equal costs.
        costed.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut batches: Vec<Vec<ParameterCombination>> = vec![Vec::new(); worker_count];
        let mut loads: Vec<WorkerLoad> = (0..worker_count)
            .map(|worker| WorkerLoad {
                worker,
                ..WorkerLoad::default()
            })
            .collect();

        for (cost, combo) in costed {
            // Lowest index wins ties.
            let target = loads
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.cost.total_cmp(&b.1.cost).then(a.0.cmp(&b.0)))
                .map(|(i, _)| i)
                .unwrap_or(0);
            loads[target].cost += cost;
            loads[target].assigned += 1;
            batches[target].push(combo);
        }

        let (batches, loads): (Vec<_>, Vec<_>) = batches
            .into_iter()
            .zip(loads)
            .filter(|(batch, _)| !batch.is_empty())
            .unzip();
        Distribution { batches, loads }
    }
}

fn sanitize_cost(cost: f64) -> f64 {
    if cost.is_finite() && cost > 0.0 {
        cost
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridEnumerator;
    use sweep_types::ParameterSpace;

    fn combos(n: usize) -> Vec<ParameterCombination> {
        (0..n)
            .map(|i| ParameterCombination::new().with("i", i as f64))
            .collect()
    }

    fn sorted_ids(distribution: &Distribution) -> Vec<i64> {
        let mut ids: Vec<i64> = distribution
            .batches
            .iter()
            .flatten()
            .map(|c| c.get("i").unwrap() as i64)
            .collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn simple_mode_uses_contiguous_slices() {
        let dist = WorkDistributor::default().distribute(combos(10), 4, false);
        let sizes: Vec<usize> = dist.batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
        assert_eq!(dist.batches[1][0].get("i"), Some(3.0));
        assert_eq!(sorted_ids(&dist), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn balanced_mode_covers_input_exactly_once() {
        let estimator = |c: &ParameterCombination| c.get("i").unwrap_or(0.0) + 1.0;
        let dist = WorkDistributor::new(Arc::new(estimator)).distribute(combos(37), 5, true);
        assert_eq!(dist.total_combinations(), 37);
        assert_eq!(sorted_ids(&dist), (0..37).collect::<Vec<_>>());
        assert_eq!(dist.batches.len(), dist.loads.len());
    }

    #[test]
    fn balanced_mode_evens_out_skewed_costs() {
        // costs 8, 7, 6, 5, 4, 3, 2, 1 over 2 workers
        let estimator = |c: &ParameterCombination| 8.0 - c.get("i").unwrap_or(0.0);
        let distributor = WorkDistributor::new(Arc::new(estimator));

        let balanced = distributor.distribute(combos(8), 2, true);
        let costs: Vec<f64> = balanced.loads.iter().map(|l| l.cost).collect();
        assert_eq!(costs, vec![18.0, 18.0]);

        let simple = distributor.distribute(combos(8), 2, false);
        let costs: Vec<f64> = simple.loads.iter().map(|l| l.cost).collect();
        assert_eq!(costs, vec![26.0, 10.0]);
    }

    #[test]
    fn single_worker_degenerates_to_one_batch() {
        let grid = GridEnumerator::new(vec![
            ParameterSpace::new("fast", 5.0, 15.0, 5.0),
            ParameterSpace::new("slow", 20.0, 30.0, 10.0),
        ])
        .unwrap();
        let distributor = WorkDistributor::default();

        let simple = distributor.distribute(grid.iter().collect(), 1, false);
        let balanced = distributor.distribute(grid.iter().collect(), 1, true);
        assert_eq!(simple.batches.len(), 1);
        assert_eq!(balanced.batches.len(), 1);
        assert_eq!(simple.total_combinations(), balanced.total_combinations());
        assert_eq!(simple.loads[0].cost, balanced.loads[0].cost);
    }

    #[test]
    fn fewer_combinations_than_workers() {
        let dist = WorkDistributor::default().distribute(combos(2), 8, true);
        assert_eq!(dist.batches.len(), 2);
        assert!(dist.batches.iter().all(|b| b.len() == 1));

        let dist = WorkDistributor::default().distribute(combos(2), 8, false);
        assert_eq!(dist.batches.len(), 2);
    }

    #[test]
    fn empty_input_and_zero_workers() {
        let dist = WorkDistributor::default().distribute(Vec::new(), 4, true);
        assert!(dist.batches.is_empty());

        let dist = WorkDistributor::default().distribute(combos(3), 0, false);
        assert_eq!(dist.batches.len(), 1);
    }

    #[test]
    fn default_cost_is_parameter_count() {
        let combo = ParameterCombination::new().with("a", 1.0).with("b", 2.0);
        assert_eq!(ParameterCountCost.estimate(&combo), 2.0);
        assert_eq!(ParameterCountCost.estimate(&ParameterCombination::new()), 1.0);
    }
}
