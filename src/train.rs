//! Model training pipeline: dataset preparation, train/test split,
//! randomized hyperparameter search with k-fold cross-validation, final fit,
//! and held-out diagnostics.
//!
//! Every random choice (split shuffle, fold assignment, candidate sampling,
//! bootstrap draws) derives from the configured seed, so the same dataset
//! and config always produce the same model and the same report.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::config::{SearchSpaceConfig, TrainingConfig};
use crate::error::TrainError;
use crate::forest::{ForestParams, RandomForest};
use crate::model::{StandardScaler, TrainedPredictor, FEATURE_COLUMNS};
use crate::models::FeatureTable;

/// Fewer usable rows than this and the fit is meaningless.
const MIN_ROWS: usize = 10;

/// Diagnostics from one training run.
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub rows_total: usize,
    pub rows_used: usize,
    pub rows_train: usize,
    pub rows_test: usize,
    pub candidates_tried: usize,
    pub best_params: ForestParams,
    pub best_cv_mse: f64,
    pub mae: f64,
    pub r2: f64,
    /// Permutation importance per feature, sorted descending.
    pub importances: Vec<(String, f64)>,
}

/// Trains the calorie predictor on `table` and reports held-out quality.
pub fn train(
    table: &FeatureTable,
    config: &TrainingConfig,
) -> Result<(TrainedPredictor, TrainReport), TrainError> {
    let (x, y) = prepare(table);
    info!(
        rows = table.len(),
        usable = x.len(),
        "prepared training matrix"
    );
    if x.len() < MIN_ROWS {
        return Err(TrainError::TooFewRows {
            rows: x.len(),
            min: MIN_ROWS,
        });
    }

    let (train_idx, test_idx) = split_indices(x.len(), config.test_fraction, config.seed);
    let x_train = gather(&x, &train_idx);
    let y_train = gather_y(&y, &train_idx);
    let x_test = gather(&x, &test_idx);
    let y_test = gather_y(&y, &test_idx);

    let scaler = StandardScaler::fit(&x_train);
    let xs_train = scaler.transform(&x_train);
    let xs_test = scaler.transform(&x_test);

    let candidates = sample_candidates(&config.search_space, config.search_iters, config.seed)?;
    let folds = kfold_indices(xs_train.len(), config.cv_folds, config.seed);

    let mut best: Option<(ForestParams, f64)> = None;
    for params in &candidates {
        let mse = cross_val_mse(&xs_train, &y_train, &folds, params, config.seed);
        debug!(?params, cv_mse = mse, "candidate scored");
        if best.as_ref().map_or(true, |(_, b)| mse < *b) {
            best = Some((params.clone(), mse));
        }
    }
    let (best_params, best_cv_mse) = best.ok_or(TrainError::EmptySearchSpace)?;
    info!(?best_params, best_cv_mse, "search complete");

    let forest = RandomForest::fit(&xs_train, &y_train, &best_params, config.seed);

    let predictions = forest.predict(&xs_test);
    let mae = mean_absolute_error(&y_test, &predictions);
    let r2 = r2_score(&y_test, &predictions);
    let importances = permutation_importances(&forest, &xs_test, &y_test, config.seed);

    let report = TrainReport {
        rows_total: table.len(),
        rows_used: x.len(),
        rows_train: train_idx.len(),
        rows_test: test_idx.len(),
        candidates_tried: candidates.len(),
        best_params,
        best_cv_mse,
        mae,
        r2,
        importances,
    };
    let predictor = TrainedPredictor {
        scaler,
        forest,
        features: FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect(),
    };
    Ok((predictor, report))
}

/// Builds the feature matrix and target vector. Rows are kept only when the
/// target is positive and every feature is non-negative; absent optional
/// nutrients count as 0.
fn prepare(table: &FeatureTable) -> (Vec<Vec<f64>>, Vec<f64>) {
    let mut x = Vec::new();
    let mut y = Vec::new();
    for row in table.rows() {
        let features = [
            row.protein,
            row.fat,
            row.carbohydrates,
            row.fiber.unwrap_or(0.0),
            row.sugar.unwrap_or(0.0),
            row.sodium.unwrap_or(0.0),
        ];
        if !row.calories.is_finite() || row.calories <= 0.0 {
            continue;
        }
        if features.iter().any(|v| !v.is_finite() || *v < 0.0) {
            continue;
        }
        x.push(features.to_vec());
        y.push(row.calories);
    }
    (x, y)
}

fn gather(x: &[Vec<f64>], idx: &[usize]) -> Vec<Vec<f64>> {
    idx.iter().map(|&i| x[i].clone()).collect()
}

fn gather_y(y: &[f64], idx: &[usize]) -> Vec<f64> {
    idx.iter().map(|&i| y[i]).collect()
}

/// Shuffles row indices and takes the first chunk as the test partition.
/// Both sides are non-empty for any valid fraction.
fn split_indices(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let test_len = ((n as f64 * test_fraction).round() as usize).clamp(1, n - 1);
    let test = indices[..test_len].to_vec();
    let train = indices[test_len..].to_vec();
    (train, test)
}

/// Assigns shuffled indices to `k` folds of near-equal size.
fn kfold_indices(n: usize, k: usize, seed: u64) -> Vec<Vec<usize>> {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    indices.shuffle(&mut rng);

    let mut folds = Vec::with_capacity(k);
    for f in 0..k {
        let start = f * n / k;
        let end = (f + 1) * n / k;
        folds.push(indices[start..end].to_vec());
    }
    folds
}

/// Draws up to `iters` distinct parameter combinations. When the grid is no
/// larger than `iters` the whole grid is evaluated instead.
fn sample_candidates(
    space: &SearchSpaceConfig,
    iters: usize,
    seed: u64,
) -> Result<Vec<ForestParams>, TrainError> {
    if space.n_trees.is_empty()
        || space.max_depth.is_empty()
        || space.min_samples_split.is_empty()
        || space.min_samples_leaf.is_empty()
    {
        return Err(TrainError::EmptySearchSpace);
    }

    let total = space.n_trees.len()
        * space.max_depth.len()
        * space.min_samples_split.len()
        * space.min_samples_leaf.len();

    let mut picks: BTreeSet<(usize, usize, usize, usize)> = BTreeSet::new();
    if total <= iters {
        for a in 0..space.n_trees.len() {
            for b in 0..space.max_depth.len() {
                for c in 0..space.min_samples_split.len() {
                    for d in 0..space.min_samples_leaf.len() {
                        picks.insert((a, b, c, d));
                    }
                }
            }
        }
    } else {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(2));
        while picks.len() < iters {
            picks.insert((
                rng.gen_range(0..space.n_trees.len()),
                rng.gen_range(0..space.max_depth.len()),
                rng.gen_range(0..space.min_samples_split.len()),
                rng.gen_range(0..space.min_samples_leaf.len()),
            ));
        }
    }

    Ok(picks
        .into_iter()
        .map(|(a, b, c, d)| ForestParams {
            n_trees: space.n_trees[a],
            max_depth: match space.max_depth[b] {
                0 => None,
                depth => Some(depth),
            },
            min_samples_split: space.min_samples_split[c],
            min_samples_leaf: space.min_samples_leaf[d],
        })
        .collect())
}

/// Mean of per-fold mean squared errors. Empty folds (more folds than rows)
/// are skipped.
fn cross_val_mse(
    x: &[Vec<f64>],
    y: &[f64],
    folds: &[Vec<usize>],
    params: &ForestParams,
    seed: u64,
) -> f64 {
    let mut fold_mses = Vec::with_capacity(folds.len());
    for (f, fold) in folds.iter().enumerate() {
        if fold.is_empty() {
            continue;
        }
        let hold: BTreeSet<usize> = fold.iter().copied().collect();
        let fit_idx: Vec<usize> = (0..x.len()).filter(|i| !hold.contains(i)).collect();
        if fit_idx.is_empty() {
            continue;
        }
        let forest = RandomForest::fit(&gather(x, &fit_idx), &gather_y(y, &fit_idx), params, seed);
        let se: f64 = fold
            .iter()
            .map(|&i| {
                let p = forest.predict_row(&x[i]);
                (p - y[i]) * (p - y[i])
            })
            .sum();
        let mse = se / fold.len() as f64;
        debug!(fold = f, mse, "fold scored");
        fold_mses.push(mse);
    }
    if fold_mses.is_empty() {
        return f64::INFINITY;
    }
    fold_mses.iter().sum::<f64>() / fold_mses.len() as f64
}

pub fn mean_absolute_error(y: &[f64], predictions: &[f64]) -> f64 {
    let n = y.len() as f64;
    y.iter()
        .zip(predictions)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / n
}

pub fn r2_score(y: &[f64], predictions: &[f64]) -> f64 {
    let n = y.len() as f64;
    let mean = y.iter().sum::<f64>() / n;
    let ss_tot: f64 = y.iter().map(|v| (v - mean) * (v - mean)).sum();
    let ss_res: f64 = y
        .iter()
        .zip(predictions)
        .map(|(a, p)| (a - p) * (a - p))
        .sum();
    if ss_tot <= f64::EPSILON {
        return if ss_res <= f64::EPSILON { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Importance of each feature as the drop in held-out R² after shuffling
/// that feature's column. Near zero (or negative) means the model does not
/// rely on the feature.
fn permutation_importances(
    forest: &RandomForest,
    x_test: &[Vec<f64>],
    y_test: &[f64],
    seed: u64,
) -> Vec<(String, f64)> {
    let baseline = r2_score(y_test, &forest.predict(x_test));
    let mut importances = Vec::with_capacity(FEATURE_COLUMNS.len());
    for (j, name) in FEATURE_COLUMNS.iter().enumerate() {
        let mut order: Vec<usize> = (0..x_test.len()).collect();
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(3 + j as u64));
        order.shuffle(&mut rng);

        let shuffled: Vec<Vec<f64>> = x_test
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let mut row = row.clone();
                row[j] = x_test[order[i]][j];
                row
            })
            .collect();
        let r2 = r2_score(y_test, &forest.predict(&shuffled));
        importances.push((name.to_string(), baseline - r2));
    }
    importances.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    importances
}
