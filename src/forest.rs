//! Regression trees and the bagged forest built from them.
//!
//! Trees are grown CART-style: greedy binary splits chosen to minimize the
//! summed squared error of the two sides, thresholds at midpoints between
//! distinct feature values. The forest averages trees fitted on bootstrap
//! resamples of the training set. All randomness flows from the caller's
//! seed, so a given dataset, parameter set, and seed always produce the
//! same model.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Hyperparameters of one forest fit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    /// `None` grows until the leaf criteria stop the split.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// One fitted tree, stored as a flat arena with the root at index 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Fits a tree on the rows of `x`/`y` named by `indices` (duplicates
    /// allowed: bootstrap samples repeat rows).
    pub fn fit(x: &[Vec<f64>], y: &[f64], indices: &[usize], params: &ForestParams) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(x, y, indices.to_vec(), 0, params);
        tree
    }

    fn grow(
        &mut self,
        x: &[Vec<f64>],
        y: &[f64],
        idx: Vec<usize>,
        depth: usize,
        params: &ForestParams,
    ) -> usize {
        let n = idx.len() as f64;
        let sum: f64 = idx.iter().map(|&i| y[i]).sum();
        let sum_sq: f64 = idx.iter().map(|&i| y[i] * y[i]).sum();
        let mean = sum / n;
        let sse = (sum_sq - sum * sum / n).max(0.0);

        let depth_reached = params.max_depth.map_or(false, |d| depth >= d);
        if depth_reached || idx.len() < params.min_samples_split || sse <= 1e-12 {
            return self.push_leaf(mean);
        }

        let Some(split) = best_split(x, y, &idx, params.min_samples_leaf) else {
            return self.push_leaf(mean);
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = idx
            .into_iter()
            .partition(|&i| x[i][split.feature] <= split.threshold);

        // Reserve the slot before descending so the root stays at index 0.
        let node_id = self.nodes.len();
        self.nodes.push(Node::Leaf { value: mean });
        let left = self.grow(x, y, left_idx, depth + 1, params);
        let right = self.grow(x, y, right_idx, depth + 1, params);
        self.nodes[node_id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node_id
    }

    fn push_leaf(&mut self, value: f64) -> usize {
        self.nodes.push(Node::Leaf { value });
        self.nodes.len() - 1
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut node = 0usize;
        loop {
            match &self.nodes[node] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    #[cfg(test)]
    fn depth(&self) -> usize {
        fn walk(nodes: &[Node], at: usize) -> usize {
            match &nodes[at] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    score: f64,
}

/// Scans every feature for the boundary minimizing left SSE + right SSE.
/// Returns `None` when no boundary satisfies `min_samples_leaf` on both
/// sides, which happens for constant features or tiny nodes.
fn best_split(x: &[Vec<f64>], y: &[f64], idx: &[usize], min_leaf: usize) -> Option<SplitCandidate> {
    let n_features = x[idx[0]].len();
    let n = idx.len();
    let mut best: Option<SplitCandidate> = None;

    for feature in 0..n_features {
        let mut pairs: Vec<(f64, f64)> = idx.iter().map(|&i| (x[i][feature], y[i])).collect();
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let total_sum: f64 = pairs.iter().map(|p| p.1).sum();
        let total_sq: f64 = pairs.iter().map(|p| p.1 * p.1).sum();
        let mut left_sum = 0.0;
        let mut left_sq = 0.0;

        for split_at in 1..n {
            let (value, target) = pairs[split_at - 1];
            left_sum += target;
            left_sq += target * target;

            // No boundary between equal values.
            if pairs[split_at].0 <= value {
                continue;
            }
            if split_at < min_leaf || n - split_at < min_leaf {
                continue;
            }

            let nl = split_at as f64;
            let nr = (n - split_at) as f64;
            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let score = (left_sq - left_sum * left_sum / nl).max(0.0)
                + (right_sq - right_sum * right_sum / nr).max(0.0);

            if best.as_ref().map_or(true, |b| score < b.score) {
                best = Some(SplitCandidate {
                    feature,
                    threshold: (value + pairs[split_at].0) / 2.0,
                    score,
                });
            }
        }
    }
    best
}

/// An averaged ensemble of trees, each fitted on its own bootstrap sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    params: ForestParams,
}

impl RandomForest {
    /// Fits `params.n_trees` trees. Each tree draws its bootstrap sample
    /// from an rng derived from `seed` and the tree's position, so tree `i`
    /// is identical across runs.
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &ForestParams, seed: u64) -> Self {
        let n = y.len();
        let mut trees = Vec::with_capacity(params.n_trees);
        for t in 0..params.n_trees {
            let stream = seed ^ (t as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
            let mut rng = StdRng::seed_from_u64(stream);
            let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            trees.push(RegressionTree::fit(x, y, &sample, params));
        }
        Self {
            trees,
            params: params.clone(),
        }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();
        total / self.trees.len() as f64
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter().map(|row| self.predict_row(row)).collect()
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(n_trees: usize) -> ForestParams {
        ForestParams {
            n_trees,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }

    /// y steps from 1.0 to 3.0 at x = 0.5.
    fn step_data(per_side: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..per_side {
            x.push(vec![i as f64 / per_side as f64 * 0.4]);
            y.push(1.0);
            x.push(vec![0.6 + i as f64 / per_side as f64 * 0.4]);
            y.push(3.0);
        }
        (x, y)
    }

    #[test]
    fn constant_target_fits_a_single_leaf() {
        let x = vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0]];
        let y = vec![5.0; 4];
        let tree = RegressionTree::fit(&x, &y, &[0, 1, 2, 3], &params(1));
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.predict_row(&[2.5]), 5.0);
    }

    #[test]
    fn tree_learns_a_step_function_exactly() {
        let (x, y) = step_data(10);
        let indices: Vec<usize> = (0..y.len()).collect();
        let tree = RegressionTree::fit(&x, &y, &indices, &params(1));
        assert_eq!(tree.predict_row(&[0.1]), 1.0);
        assert_eq!(tree.predict_row(&[0.9]), 3.0);
    }

    #[test]
    fn max_depth_one_means_at_most_one_split() {
        let (x, y) = step_data(10);
        let indices: Vec<usize> = (0..y.len()).collect();
        let p = ForestParams {
            max_depth: Some(1),
            ..params(1)
        };
        let tree = RegressionTree::fit(&x, &y, &indices, &p);
        assert!(tree.depth() <= 1);
    }

    #[test]
    fn min_samples_leaf_blocks_unbalanced_splits() {
        let x = vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]];
        let y = vec![0.0, 0.0, 0.0, 10.0];
        let p = ForestParams {
            min_samples_leaf: 2,
            ..params(1)
        };
        let tree = RegressionTree::fit(&x, &y, &[0, 1, 2, 3], &p);
        // Only the 2|2 boundary is allowed.
        assert_eq!(tree.predict_row(&[0.0]), 0.0);
        assert_eq!(tree.predict_row(&[3.0]), 5.0);
    }

    #[test]
    fn forest_approximates_the_step() {
        let (x, y) = step_data(25);
        let forest = RandomForest::fit(&x, &y, &params(30), 7);
        assert!((forest.predict_row(&[0.1]) - 1.0).abs() < 0.4);
        assert!((forest.predict_row(&[0.9]) - 3.0).abs() < 0.4);
    }

    #[test]
    fn same_seed_reproduces_the_forest_bit_for_bit() {
        let (x, y) = step_data(20);
        let a = RandomForest::fit(&x, &y, &params(15), 42);
        let b = RandomForest::fit(&x, &y, &params(15), 42);
        for probe in [[0.05], [0.3], [0.55], [0.8]] {
            assert_eq!(a.predict_row(&probe), b.predict_row(&probe));
        }
    }

    #[test]
    fn serde_round_trip_preserves_predictions() {
        let (x, y) = step_data(10);
        let forest = RandomForest::fit(&x, &y, &params(10), 3);
        let bytes = bincode::serialize(&forest).expect("serialize");
        let back: RandomForest = bincode::deserialize(&bytes).expect("deserialize");
        assert_eq!(forest.predict_row(&[0.2]), back.predict_row(&[0.2]));
        assert_eq!(back.n_trees(), 10);
    }
}
