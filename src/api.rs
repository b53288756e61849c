//! USDA FoodData Central search API client.
//!
//! Wraps `GET {base_url}/foods/search` behind the [`FoodSearchApi`] trait so
//! the fetch layer and tests can swap in other implementations. The real
//! client paces itself with a token-bucket rate limiter shared across all
//! concurrent query tasks.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;

use crate::config::ApiConfig;
use crate::error::{ConfigError, FetchError};
use crate::models::RawFoodRecord;

/// One page of search results. An absent or empty `foods` array means the
/// results are exhausted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub foods: Vec<RawFoodRecord>,
    #[serde(default, rename = "totalHits")]
    pub total_hits: Option<u64>,
}

/// A paged food search backend. One call is one attempt: retries are the
/// caller's concern.
#[async_trait]
pub trait FoodSearchApi: Send + Sync {
    /// Fetches page `page_number` (1-based) of results for `query`.
    async fn search_page(&self, query: &str, page_number: u32) -> Result<SearchPage, FetchError>;
}

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

pub struct FdcClient {
    client: Client,
    base_url: String,
    api_key: String,
    page_size: u32,
    rate_limiter: DirectRateLimiter,
}

impl FdcClient {
    pub fn new(config: &ApiConfig, api_key: String) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to build HTTP client: {e}")))?;

        let per_second = NonZeroU32::new(config.requests_per_second).ok_or_else(|| {
            ConfigError::Invalid("api.requests_per_second must be > 0".to_string())
        })?;
        let rate_limiter = RateLimiter::direct(Quota::per_second(per_second));

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            page_size: config.page_size,
            rate_limiter,
        })
    }

    fn search_url(&self) -> String {
        format!("{}/foods/search", self.base_url)
    }
}

#[async_trait]
impl FoodSearchApi for FdcClient {
    async fn search_page(&self, query: &str, page_number: u32) -> Result<SearchPage, FetchError> {
        self.rate_limiter.until_ready().await;

        tracing::debug!(query = %query, page_number, "requesting search page");

        let page_size = self.page_size.to_string();
        let page = page_number.to_string();
        let params = [
            ("query", query),
            ("pageSize", page_size.as_str()),
            ("pageNumber", page.as_str()),
            ("api_key", self.api_key.as_str()),
        ];

        let response = self
            .client
            .get(self.search_url())
            .query(&params)
            .send()
            .await
            .map_err(FetchError::Transport)?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<SearchPage>()
                .await
                .map_err(|e| FetchError::Shape(e.to_string()));
        }
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(FetchError::Server {
                status: status.as_u16(),
            });
        }
        let message = response.text().await.unwrap_or_default();
        Err(FetchError::Client {
            status: status.as_u16(),
            message,
        })
    }
}
