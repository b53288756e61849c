use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    pub cache: CacheConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub mapping: MappingOverrides,
    #[serde(default)]
    pub training: TrainingConfig,
}

impl Config {
    /// Config for commands that can run without a config file, e.g.
    /// `predict` with an explicit model path.
    pub fn minimal() -> Self {
        Self {
            api: ApiConfig::default(),
            cache: CacheConfig {
                dir: PathBuf::from("./cache"),
            },
            dataset: DatasetConfig::default(),
            mapping: MappingOverrides::default(),
            training: TrainingConfig::default(),
        }
    }

    /// Resolves the API key. The `USDA_API_KEY` environment variable wins
    /// over `[api] key` in the config file; blank values count as unset.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        if let Ok(key) = std::env::var("USDA_API_KEY") {
            if !key.trim().is_empty() {
                return Ok(key);
            }
        }
        match &self.api.key {
            Some(key) if !key.trim().is_empty() => Ok(key.clone()),
            _ => Err(ConfigError::MissingApiKey),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_limit_per_query")]
    pub limit_per_query: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            key: None,
            page_size: default_page_size(),
            limit_per_query: default_limit_per_query(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            requests_per_second: default_requests_per_second(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.nal.usda.gov/fdc/v1".to_string()
}
fn default_page_size() -> u32 {
    200
}
fn default_limit_per_query() -> usize {
    400
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_requests_per_second() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_secs() -> u64 {
    2
}
fn default_max_delay_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    #[serde(default = "default_dataset_path")]
    pub path: PathBuf,
    #[serde(default = "default_queries")]
    pub queries: Vec<String>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: default_dataset_path(),
            queries: default_queries(),
        }
    }
}

fn default_dataset_path() -> PathBuf {
    PathBuf::from("usda_nutrition_dataset.csv")
}

fn default_queries() -> Vec<String> {
    [
        "raw apple",
        "banana",
        "whole wheat bread",
        "brown rice",
        "almond milk",
        "grilled chicken breast",
        "boiled egg",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Per-column tweaks to the built-in nutrient mapping, keyed by output
/// column name. `source` renames the API field a column reads; `default`
/// replaces the fallback value of an optional nutrient column.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct MappingOverrides {
    #[serde(flatten)]
    pub columns: BTreeMap<String, ColumnOverride>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ColumnOverride {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub default: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrainingConfig {
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_search_iters")]
    pub search_iters: usize,
    #[serde(default = "default_cv_folds")]
    pub cv_folds: usize,
    #[serde(default)]
    pub search_space: SearchSpaceConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            test_fraction: default_test_fraction(),
            seed: default_seed(),
            search_iters: default_search_iters(),
            cv_folds: default_cv_folds(),
            search_space: SearchSpaceConfig::default(),
        }
    }
}

fn default_model_path() -> PathBuf {
    PathBuf::from("nutrition_model.bin")
}
fn default_test_fraction() -> f64 {
    0.2
}
fn default_seed() -> u64 {
    42
}
fn default_search_iters() -> usize {
    50
}
fn default_cv_folds() -> usize {
    5
}

/// Candidate values for the randomized hyperparameter search. A `max_depth`
/// of 0 means unbounded.
#[derive(Debug, Deserialize, Clone)]
pub struct SearchSpaceConfig {
    #[serde(default = "default_n_trees")]
    pub n_trees: Vec<usize>,
    #[serde(default = "default_max_depth")]
    pub max_depth: Vec<usize>,
    #[serde(default = "default_min_samples_split")]
    pub min_samples_split: Vec<usize>,
    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: Vec<usize>,
}

impl Default for SearchSpaceConfig {
    fn default() -> Self {
        Self {
            n_trees: default_n_trees(),
            max_depth: default_max_depth(),
            min_samples_split: default_min_samples_split(),
            min_samples_leaf: default_min_samples_leaf(),
        }
    }
}

fn default_n_trees() -> Vec<usize> {
    vec![100, 200, 300, 400]
}
fn default_max_depth() -> Vec<usize> {
    vec![10, 15, 20, 25, 0]
}
fn default_min_samples_split() -> Vec<usize> {
    vec![2, 5, 10]
}
fn default_min_samples_leaf() -> Vec<usize> {
    vec![1, 2, 4]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate api
    if config.api.base_url.trim().is_empty() {
        anyhow::bail!("api.base_url must not be empty");
    }
    if config.api.page_size == 0 {
        anyhow::bail!("api.page_size must be > 0");
    }
    if config.api.limit_per_query == 0 {
        anyhow::bail!("api.limit_per_query must be > 0");
    }
    if config.api.requests_per_second == 0 {
        anyhow::bail!("api.requests_per_second must be > 0");
    }
    if config.api.retry.max_attempts == 0 {
        anyhow::bail!("api.retry.max_attempts must be >= 1");
    }

    // Validate mapping overrides against the built-in column set
    crate::normalize::NutrientMapping::with_overrides(&config.mapping)
        .with_context(|| "Invalid [mapping] section")?;

    // Validate training
    if !(0.0..1.0).contains(&config.training.test_fraction) || config.training.test_fraction == 0.0
    {
        anyhow::bail!("training.test_fraction must be in (0.0, 1.0)");
    }
    if config.training.cv_folds < 2 {
        anyhow::bail!("training.cv_folds must be >= 2");
    }
    if config.training.search_iters == 0 {
        anyhow::bail!("training.search_iters must be >= 1");
    }
    let space = &config.training.search_space;
    if space.n_trees.is_empty()
        || space.max_depth.is_empty()
        || space.min_samples_split.is_empty()
        || space.min_samples_leaf.is_empty()
    {
        anyhow::bail!("training.search_space lists must not be empty");
    }
    if space.n_trees.contains(&0) {
        anyhow::bail!("training.search_space.n_trees values must be >= 1");
    }
    if space.min_samples_split.iter().any(|&v| v < 2) {
        anyhow::bail!("training.search_space.min_samples_split values must be >= 2");
    }
    if space.min_samples_leaf.contains(&0) {
        anyhow::bail!("training.search_space.min_samples_leaf values must be >= 1");
    }

    Ok(config)
}
