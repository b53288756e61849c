//! # FoodData Harvest CLI (`fdh`)
//!
//! The `fdh` binary is the primary interface for FoodData Harvest. It provides
//! commands for building the nutrition dataset, training the calorie model,
//! running predictions, and managing the on-disk query cache.
//!
//! ## Usage
//!
//! ```bash
//! fdh --config ./config/fdh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fdh build` | Fetch (or reuse cached) search results and write the CSV dataset |
//! | `fdh train` | Train the calorie predictor from the CSV dataset |
//! | `fdh predict` | Predict calories for one set of macro-nutrients |
//! | `fdh cache stats` | Summarize cached queries, sizes, and ages |
//! | `fdh cache clear` | Delete cache entries to force a refetch |
//!
//! ## Examples
//!
//! ```bash
//! # Build the dataset for the configured query list
//! fdh build --config ./config/fdh.toml
//!
//! # Build for ad-hoc queries
//! fdh build --query "raw apple" --query "boiled egg"
//!
//! # Train and persist the model
//! fdh train --config ./config/fdh.toml
//!
//! # Predict from macros (grams, sodium in mg)
//! fdh predict --protein 31 --fat 3.6 --carbohydrates 0
//!
//! # Inspect the cache
//! fdh cache stats --config ./config/fdh.toml
//! ```

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fooddata_harvest::config::{self, Config};
use fooddata_harvest::model::TrainedPredictor;
use fooddata_harvest::models::FeatureTable;
use fooddata_harvest::pipeline::Pipeline;
use fooddata_harvest::progress::ProgressMode;
use fooddata_harvest::stats;
use fooddata_harvest::train;

/// FoodData Harvest CLI — a concurrent USDA FoodData Central harvester and
/// calorie-model trainer.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/fdh.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "fdh",
    about = "FoodData Harvest — fetch USDA nutrition data, build datasets, train a calorie model",
    version,
    long_about = "FoodData Harvest fetches paged USDA FoodData Central search results for a set \
    of queries, caches raw responses per query, normalizes them into a flat nutrition CSV, and \
    trains a calorie predictor (standard scaling plus a seeded regression forest tuned by \
    randomized search) on the result."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/fdh.toml`. API, cache, dataset, mapping, and
    /// training settings are read from this file.
    #[arg(long, global = true, default_value = "./config/fdh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Build the nutrition dataset CSV.
    ///
    /// Partitions the queries into cached and uncached, fetches the uncached
    /// ones concurrently (paged, rate-limited, with retry), persists fresh
    /// results to the cache, and normalizes everything into the CSV table.
    /// With a warm cache this runs fully offline.
    Build {
        /// Query to harvest (repeatable). Defaults to `[dataset] queries`
        /// from the config file.
        #[arg(long = "query")]
        queries: Vec<String>,

        /// Output CSV path. Defaults to `[dataset] path` from the config.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Progress output on stderr: `off`, `human`, or `json`.
        /// Defaults to `human` when stderr is a TTY, otherwise `off`.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Train the calorie predictor.
    ///
    /// Reads the dataset CSV, splits train/test, runs a seeded randomized
    /// hyperparameter search with k-fold cross-validation, fits the final
    /// forest, reports MAE and R² on the held-out split, and saves the
    /// model artifact.
    Train {
        /// Dataset CSV to train on. Defaults to `[dataset] path`.
        #[arg(long)]
        data: Option<PathBuf>,

        /// Where to write the model artifact. Defaults to
        /// `[training] model_path`.
        #[arg(long)]
        model: Option<PathBuf>,
    },

    /// Predict calories for one food from its nutrients.
    ///
    /// Loads the trained model artifact and prints the estimate. Nutrient
    /// units follow the dataset: grams per 100g, sodium in milligrams.
    Predict {
        /// Protein in grams.
        #[arg(long)]
        protein: f64,

        /// Total fat in grams.
        #[arg(long)]
        fat: f64,

        /// Carbohydrates in grams.
        #[arg(long)]
        carbohydrates: f64,

        /// Dietary fiber in grams.
        #[arg(long, default_value_t = 0.0)]
        fiber: f64,

        /// Total sugars in grams.
        #[arg(long, default_value_t = 0.0)]
        sugar: f64,

        /// Sodium in milligrams.
        #[arg(long, default_value_t = 0.0)]
        sodium: f64,

        /// Model artifact to load. Defaults to `[training] model_path`.
        #[arg(long)]
        model: Option<PathBuf>,
    },

    /// Inspect or clear the on-disk query cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

/// Cache management subcommands.
#[derive(Subcommand)]
enum CacheAction {
    /// Summarize cache entries: queries, record counts, sizes, fetch ages.
    Stats,

    /// Delete cache entries so the next build refetches them.
    Clear {
        /// Clear only this query's entry. Omit to clear the whole cache.
        query: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            queries,
            out,
            progress,
        } => {
            let cfg = config::load_config(&cli.config)?;
            run_build(&cfg, queries, out, progress.as_deref()).await?;
        }
        Commands::Train { data, model } => {
            let cfg = config::load_config(&cli.config)?;
            run_train(&cfg, data, model)?;
        }
        Commands::Predict {
            protein,
            fat,
            carbohydrates,
            fiber,
            sugar,
            sodium,
            model,
        } => {
            // With an explicit --model the config file is optional.
            let cfg = match &model {
                Some(_) => {
                    config::load_config(&cli.config).unwrap_or_else(|_| Config::minimal())
                }
                None => config::load_config(&cli.config)?,
            };
            run_predict(
                &cfg,
                [protein, fat, carbohydrates, fiber, sugar, sodium],
                model,
            )?;
        }
        Commands::Cache { action } => {
            let cfg = config::load_config(&cli.config)?;
            match action {
                CacheAction::Stats => stats::run_cache_stats(&cfg)?,
                CacheAction::Clear { query } => {
                    stats::run_cache_clear(&cfg, query.as_deref())?
                }
            }
        }
    }

    Ok(())
}

async fn run_build(
    cfg: &Config,
    queries: Vec<String>,
    out: Option<PathBuf>,
    progress: Option<&str>,
) -> Result<()> {
    let queries = if queries.is_empty() {
        cfg.dataset.queries.clone()
    } else {
        queries
    };
    if queries.is_empty() {
        bail!("no queries to build: pass --query or set [dataset] queries in the config");
    }

    let mode = match progress {
        None => ProgressMode::default_for_tty(),
        Some("off") => ProgressMode::Off,
        Some("human") => ProgressMode::Human,
        Some("json") => ProgressMode::Json,
        Some(other) => bail!("unknown progress mode '{}' (expected off, human, or json)", other),
    };
    let reporter = mode.reporter();

    let started = Instant::now();
    let pipeline = Pipeline::new(cfg)?;
    let table = pipeline
        .build_dataset_with_progress(&queries, reporter.as_ref())
        .await?;

    println!("build");
    println!("  queries: {}", queries.len());
    println!("  rows: {}", table.len());
    if table.is_empty() {
        println!("  no records survived normalization; dataset not written");
    } else {
        let out = out.unwrap_or_else(|| cfg.dataset.path.clone());
        table
            .write_csv(&out)
            .with_context(|| format!("failed to write dataset to {}", out.display()))?;
        println!("  dataset: {}", out.display());
    }
    println!("  elapsed: {:.1}s", started.elapsed().as_secs_f64());
    println!("ok");
    Ok(())
}

fn run_train(cfg: &Config, data: Option<PathBuf>, model: Option<PathBuf>) -> Result<()> {
    let data = data.unwrap_or_else(|| cfg.dataset.path.clone());
    let model_path = model.unwrap_or_else(|| cfg.training.model_path.clone());

    let started = Instant::now();
    let table = FeatureTable::read_csv(&data)
        .with_context(|| format!("failed to load dataset {}", data.display()))?;
    let (predictor, report) = train::train(&table, &cfg.training)?;
    predictor.save(&model_path)?;

    let depth = match report.best_params.max_depth {
        Some(d) => d.to_string(),
        None => "none".to_string(),
    };
    println!("train");
    println!(
        "  rows: {} usable of {} ({} train / {} test)",
        report.rows_used, report.rows_total, report.rows_train, report.rows_test
    );
    println!("  candidates: {}", report.candidates_tried);
    println!(
        "  best: {} trees, depth {}, split {}, leaf {}",
        report.best_params.n_trees,
        depth,
        report.best_params.min_samples_split,
        report.best_params.min_samples_leaf
    );
    println!("  cv mse: {:.2}", report.best_cv_mse);
    println!("  mae: {:.2}", report.mae);
    println!("  r2: {:.4}", report.r2);
    println!("  importances:");
    for (name, importance) in &report.importances {
        println!("    {:<16} {:+.4}", name, importance);
    }
    println!("  model: {}", model_path.display());
    println!("  elapsed: {:.1}s", started.elapsed().as_secs_f64());
    println!("ok");
    Ok(())
}

fn run_predict(cfg: &Config, features: [f64; 6], model: Option<PathBuf>) -> Result<()> {
    if features.iter().any(|v| !v.is_finite() || *v < 0.0) {
        bail!("nutrient values must be non-negative numbers");
    }
    let model_path = model.unwrap_or_else(|| cfg.training.model_path.clone());
    let predictor = TrainedPredictor::load(&model_path)?;
    let calories = predictor.predict_row(&features);
    println!("predicted calories: {:.1}", calories);
    Ok(())
}
