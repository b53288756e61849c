//! Fitted model artifacts: the feature scaler, the forest, and their
//! persistence as a single binary file.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TrainError;
use crate::forest::RandomForest;

/// Input features of the calorie predictor, in matrix column order.
pub const FEATURE_COLUMNS: [&str; 6] = [
    "protein",
    "fat",
    "carbohydrates",
    "fiber",
    "sugar",
    "sodium",
];

/// The column the predictor estimates.
pub const TARGET_COLUMN: &str = "calories";

/// Per-feature standardization fitted on the training partition: subtract
/// the mean, divide by the standard deviation. A zero-variance feature keeps
/// scale 1 so it passes through centered instead of dividing by zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(x: &[Vec<f64>]) -> Self {
        let n = x.len() as f64;
        let width = x.first().map_or(0, Vec::len);
        let mut means = vec![0.0; width];
        for row in x {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in &mut means {
            *m /= n;
        }

        let mut scales = vec![0.0; width];
        for row in x {
            for ((s, v), m) in scales.iter_mut().zip(row).zip(&means) {
                let d = v - m;
                *s += d * d;
            }
        }
        for s in &mut scales {
            *s = (*s / n).sqrt();
            if *s == 0.0 {
                *s = 1.0;
            }
        }

        Self { means, scales }
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(&self.means)
            .zip(&self.scales)
            .map(|((v, m), s)| (v - m) / s)
            .collect()
    }

    pub fn transform(&self, x: &[Vec<f64>]) -> Vec<Vec<f64>> {
        x.iter().map(|row| self.transform_row(row)).collect()
    }
}

/// The persisted scaler + forest pair, ready for prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedPredictor {
    pub scaler: StandardScaler,
    pub forest: RandomForest,
    /// Feature names in the order `predict_row` expects them.
    pub features: Vec<String>,
}

impl TrainedPredictor {
    /// Predicts calories for one unscaled feature row, ordered per
    /// [`FEATURE_COLUMNS`].
    pub fn predict_row(&self, features: &[f64]) -> f64 {
        self.forest.predict_row(&self.scaler.transform_row(features))
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter().map(|row| self.predict_row(row)).collect()
    }

    /// Writes the artifact. Serialization goes to a sibling temp file first
    /// and is renamed into place, so an interrupted save never clobbers a
    /// good model.
    pub fn save(&self, path: &Path) -> Result<(), TrainError> {
        let bytes = bincode::serialize(self).map_err(|e| TrainError::Artifact {
            path: path.to_path_buf(),
            message: format!("serialize failed: {e}"),
        })?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| TrainError::Artifact {
                    path: path.to_path_buf(),
                    message: format!("creating parent directory failed: {e}"),
                })?;
            }
        }
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, &bytes).map_err(|e| TrainError::Artifact {
            path: tmp.clone(),
            message: format!("write failed: {e}"),
        })?;
        fs::rename(&tmp, path).map_err(|e| TrainError::Artifact {
            path: path.to_path_buf(),
            message: format!("rename failed: {e}"),
        })?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, TrainError> {
        let bytes = fs::read(path).map_err(|e| TrainError::Artifact {
            path: path.to_path_buf(),
            message: format!("read failed: {e}"),
        })?;
        bincode::deserialize(&bytes).map_err(|e| TrainError::Artifact {
            path: path.to_path_buf(),
            message: format!("deserialize failed: {e}"),
        })
    }
}
