//! Paged query fetching: per-page retry, per-query page loops, and the
//! concurrent fan-out across queries.
//!
//! Failure containment is per query. A page that keeps failing transiently
//! exhausts its retry schedule and the query keeps whatever pages it already
//! has; a terminal failure stops that query immediately. Neither disturbs the
//! other queries in the same run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinSet;

use crate::api::{FoodSearchApi, SearchPage};
use crate::config::RetryConfig;
use crate::error::FetchError;
use crate::models::QueryResultSet;
use crate::progress::{FetchProgressEvent, FetchProgressReporter};

/// Retry schedule for transient page failures. Attempt delays double from
/// `base_delay` up to `max_delay`; terminal failures never consult this.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_secs(config.base_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
        }
    }

    /// Delay before attempt `attempt`. The first attempt (1) has no delay;
    /// attempt 2 waits `base_delay`, each further attempt doubles, capped at
    /// `max_delay`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

#[derive(Clone)]
pub struct Fetcher {
    api: Arc<dyn FoodSearchApi>,
    retry: RetryPolicy,
    limit_per_query: usize,
}

impl Fetcher {
    pub fn new(api: Arc<dyn FoodSearchApi>, retry: RetryPolicy, limit_per_query: usize) -> Self {
        Self {
            api,
            retry,
            limit_per_query,
        }
    }

    /// One page, with the retry schedule applied to transient failures.
    async fn fetch_page_with_retry(
        &self,
        query: &str,
        page_number: u32,
    ) -> Result<SearchPage, FetchError> {
        let mut attempt = 1u32;
        loop {
            match self.api.search_page(query, page_number).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    attempt += 1;
                    let delay = self.retry.delay_before(attempt);
                    tracing::warn!(
                        query = %query,
                        page_number,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient fetch error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// All pages for one query, in order, up to the per-query record limit.
    /// Page fetch failures degrade to whatever was collected so far.
    pub async fn fetch_query(&self, query: &str) -> QueryResultSet {
        let mut records = QueryResultSet::new();
        let mut page_number = 1u32;
        while records.len() < self.limit_per_query {
            match self.fetch_page_with_retry(query, page_number).await {
                Ok(page) => {
                    if page.foods.is_empty() {
                        tracing::debug!(query = %query, page_number, "results exhausted");
                        break;
                    }
                    records.extend(page.foods);
                    page_number += 1;
                }
                Err(e) => {
                    tracing::error!(
                        query = %query,
                        page_number,
                        error = %e,
                        "query fetch failed, keeping {} records already fetched",
                        records.len()
                    );
                    break;
                }
            }
        }
        records.truncate(self.limit_per_query);
        records
    }

    /// Fetches every query concurrently, one task per query, and joins them
    /// all before returning. The map is keyed by query, so result order does
    /// not depend on task completion order.
    pub async fn fetch_all(
        &self,
        queries: &[String],
        progress: &dyn FetchProgressReporter,
    ) -> Result<BTreeMap<String, QueryResultSet>> {
        let total = queries.len() as u64;
        let mut set = JoinSet::new();
        for query in queries {
            let fetcher = self.clone();
            let query = query.clone();
            set.spawn(async move {
                let records = fetcher.fetch_query(&query).await;
                (query, records)
            });
        }

        let mut results = BTreeMap::new();
        let mut done = 0u64;
        while let Some(joined) = set.join_next().await {
            let (query, records) = joined.context("query fetch task panicked")?;
            done += 1;
            progress.report(FetchProgressEvent::QueryDone {
                query: query.clone(),
                records: records.len() as u64,
                done,
                total,
            });
            results.insert(query, records);
        }

        let records: usize = results.values().map(Vec::len).sum();
        tracing::info!(queries = results.len(), records, "fetch complete");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }

    #[test]
    fn first_attempt_has_no_delay() {
        assert_eq!(policy().delay_before(1), Duration::ZERO);
    }

    #[test]
    fn delays_double_then_cap() {
        let p = policy();
        assert_eq!(p.delay_before(2), Duration::from_secs(2));
        assert_eq!(p.delay_before(3), Duration::from_secs(4));
        assert_eq!(p.delay_before(4), Duration::from_secs(8));
        assert_eq!(p.delay_before(5), Duration::from_secs(10));
        assert_eq!(p.delay_before(6), Duration::from_secs(10));
    }

    #[test]
    fn from_config_clamps_zero_attempts_to_one() {
        let p = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 0,
            base_delay_secs: 1,
            max_delay_secs: 1,
        });
        assert_eq!(p.max_attempts, 1);
    }
}
