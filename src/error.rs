//! Error types for the harvest and training pipelines.
//!
//! The split matters operationally: [`FetchError`] distinguishes transient
//! failures (retried, then degraded to partial results for that query) from
//! terminal ones (fail the query immediately), while [`ConfigError`],
//! [`CacheError`], and [`TrainError`] abort the whole run.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal configuration problems detected before any work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("USDA_API_KEY is not set (export it, add it to .env, or set [api] key in the config file)")]
    MissingApiKey,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure of a single page request against the search API.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection-level failure: DNS, connect, timeout, broken stream.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// Server-side failure (HTTP 5xx) or throttling (HTTP 429).
    #[error("server error: HTTP {status}")]
    Server { status: u16 },

    /// Client-side rejection (HTTP 4xx other than 429). Retrying cannot help.
    #[error("client error: HTTP {status}: {message}")]
    Client { status: u16, message: String },

    /// The response body did not decode into the expected search shape.
    #[error("unexpected response shape: {0}")]
    Shape(String),
}

impl FetchError {
    /// Whether the retry schedule applies to this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transport(_) | FetchError::Server { .. })
    }
}

/// Cache I/O failures. A cache entry that cannot be read or parsed surfaces
/// as an error rather than silently triggering a refetch.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache entry {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures in the model training pipeline.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("dataset has {rows} usable rows after filtering; need at least {min}")]
    TooFewRows { rows: usize, min: usize },

    #[error("hyperparameter search space is empty")]
    EmptySearchSpace,

    #[error("model artifact error at {path}: {message}")]
    Artifact { path: PathBuf, message: String },
}
