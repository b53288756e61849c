//! # FoodData Harvest
//!
//! A concurrent harvester and model trainer for USDA FoodData Central.
//!
//! FoodData Harvest fetches paged food-search results for a set of queries,
//! caches each query's raw records on disk, normalizes them into a flat
//! nutrition table, and trains a calorie predictor (standard scaling plus a
//! bagged regression forest tuned by randomized search) on that table.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌────────────┐   ┌───────────┐
//! │ FDC API  │──▶│  Fetcher  │──▶│ JSON cache │──▶│ Normalize │
//! │ (paged)  │   │ retry+fan │   │ per query  │   │  mapping  │
//! └──────────┘   └───────────┘   └────────────┘   └─────┬─────┘
//!                                                       │
//!                                   ┌───────────────────┤
//!                                   ▼                   ▼
//!                             ┌──────────┐       ┌──────────┐
//!                             │ CSV data │──────▶│ Training │
//!                             │  table   │       │  forest  │
//!                             └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export USDA_API_KEY=...       # api.data.gov key
//! fdh build                     # fetch + cache + normalize to CSV
//! fdh train                     # fit the calorie model
//! fdh predict --protein 31 --fat 3.6 --carbohydrates 0
//! fdh cache stats               # what's cached, how fresh
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types and the CSV table |
//! | [`api`] | FoodData Central HTTP client |
//! | [`fetch`] | Retry schedule and concurrent query fan-out |
//! | [`cache`] | Per-query JSON cache |
//! | [`normalize`] | Nutrient mapping and row extraction |
//! | [`pipeline`] | Cache/fetch/normalize orchestration |
//! | [`progress`] | Fetch progress reporting (human/JSON) |
//! | [`forest`] | Regression trees and the bagged forest |
//! | [`model`] | Scaler, predictor, artifact persistence |
//! | [`train`] | Split, search, cross-validation, diagnostics |
//! | [`stats`] | Cache stats and clear commands |

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod forest;
pub mod model;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod stats;
pub mod train;
