//! Dataset pipeline orchestration.
//!
//! Composes the cache store, the concurrent fetcher, and the schema
//! normalizer into one idempotent entry point: only uncached queries touch
//! the network, fresh results are persisted before merging, and the merged
//! per-query sets are normalized into the flat feature table. Running twice
//! with a warm cache performs no API calls and yields the same table.

use std::sync::Arc;

use anyhow::Result;

use crate::api::{FdcClient, FoodSearchApi};
use crate::cache::CacheStore;
use crate::config::Config;
use crate::fetch::{Fetcher, RetryPolicy};
use crate::models::FeatureTable;
use crate::normalize::{self, NutrientMapping};
use crate::progress::{FetchProgressReporter, NoProgress};

pub struct Pipeline {
    cache: CacheStore,
    fetcher: Fetcher,
    mapping: NutrientMapping,
}

impl Pipeline {
    /// Builds the production pipeline. Resolves the API key and constructs
    /// the HTTP client up front, before any cache or network work.
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config.api_key()?;
        let api: Arc<dyn FoodSearchApi> = Arc::new(FdcClient::new(&config.api, api_key)?);
        Self::with_api(config, api)
    }

    /// The same pipeline over any search backend. Tests inject mocks here.
    pub fn with_api(config: &Config, api: Arc<dyn FoodSearchApi>) -> Result<Self> {
        let cache = CacheStore::new(&config.cache.dir)?;
        let retry = RetryPolicy::from_config(&config.api.retry);
        let fetcher = Fetcher::new(api, retry, config.api.limit_per_query);
        let mapping = NutrientMapping::with_overrides(&config.mapping)?;
        Ok(Self {
            cache,
            fetcher,
            mapping,
        })
    }

    pub async fn build_dataset(&self, queries: &[String]) -> Result<FeatureTable> {
        self.build_dataset_with_progress(queries, &NoProgress).await
    }

    /// Builds the normalized nutrition table for `queries`.
    pub async fn build_dataset_with_progress(
        &self,
        queries: &[String],
        progress: &dyn FetchProgressReporter,
    ) -> Result<FeatureTable> {
        let queries = dedup_queries(queries);
        let (mut data, to_fetch) = self.cache.load(&queries)?;

        if to_fetch.is_empty() {
            tracing::info!(queries = queries.len(), "all queries cached, skipping fetch");
        } else {
            tracing::info!(
                cached = data.len(),
                to_fetch = to_fetch.len(),
                "fetching uncached queries"
            );
            let fresh = self.fetcher.fetch_all(&to_fetch, progress).await?;
            self.cache.save(&fresh)?;
            // Disjoint with the cached side: `fresh` keys come from the
            // remaining partition.
            data.extend(fresh);
        }

        Ok(normalize::normalize(&data, &self.mapping))
    }
}

/// Queries form a set: repeated names collapse to the first occurrence.
fn dedup_queries(queries: &[String]) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    queries
        .iter()
        .filter(|q| seen.insert(q.as_str()))
        .cloned()
        .collect()
}
