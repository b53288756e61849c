//! End-to-end pipeline tests over a scripted in-memory search API: cache
//! idempotency, paging limits, retry bounds, and per-query failure isolation.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use fooddata_harvest::api::{FoodSearchApi, SearchPage};
use fooddata_harvest::cache::CacheStore;
use fooddata_harvest::config::Config;
use fooddata_harvest::error::FetchError;
use fooddata_harvest::fetch::{Fetcher, RetryPolicy};
use fooddata_harvest::models::{QueryResultSet, RawFoodRecord};
use fooddata_harvest::pipeline::Pipeline;
use fooddata_harvest::progress::{FetchProgressEvent, FetchProgressReporter, NoProgress};

/// A record with all four mandatory nutrients present.
fn food(desc: &str, calories: f64) -> RawFoodRecord {
    RawFoodRecord(json!({
        "description": desc,
        "brandOwner": "Test Brand",
        "foodNutrients": [
            {"nutrientName": "Energy", "value": calories},
            {"nutrientName": "Protein", "value": 1.0},
            {"nutrientName": "Total lipid (fat)", "value": 2.0},
            {"nutrientName": "Carbohydrate, by difference", "value": 3.0},
        ]
    }))
}

/// A record the normalizer must drop: no carbohydrate nutrient.
fn incomplete_food(desc: &str) -> RawFoodRecord {
    RawFoodRecord(json!({
        "description": desc,
        "foodNutrients": [
            {"nutrientName": "Energy", "value": 100.0},
            {"nutrientName": "Protein", "value": 1.0},
            {"nutrientName": "Total lipid (fat)", "value": 2.0},
        ]
    }))
}

fn page_of(n: usize, prefix: &str) -> Vec<RawFoodRecord> {
    (0..n)
        .map(|i| food(&format!("{prefix} {i}"), 100.0 + i as f64))
        .collect()
}

enum QueryScript {
    /// Serve these pages in order; anything past the end is an empty page.
    Pages(Vec<Vec<RawFoodRecord>>),
    /// Serve these pages, then fail transiently forever.
    PagesThenTransient(Vec<Vec<RawFoodRecord>>),
    /// Fail transiently on every call.
    AlwaysTransient,
    /// Fail terminally on every call.
    AlwaysTerminal,
}

struct MockApi {
    scripts: BTreeMap<String, QueryScript>,
    calls: AtomicU32,
    page_calls: Mutex<BTreeMap<(String, u32), u32>>,
}

impl MockApi {
    fn new(scripts: BTreeMap<String, QueryScript>) -> Arc<Self> {
        Arc::new(Self {
            scripts,
            calls: AtomicU32::new(0),
            page_calls: Mutex::new(BTreeMap::new()),
        })
    }

    fn total_calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn calls_for(&self, query: &str) -> u32 {
        self.page_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|((q, _), _)| q == query)
            .map(|(_, n)| n)
            .sum()
    }

    fn highest_page_for(&self, query: &str) -> u32 {
        self.page_calls
            .lock()
            .unwrap()
            .keys()
            .filter(|(q, _)| q == query)
            .map(|(_, page)| *page)
            .max()
            .unwrap_or(0)
    }
}

#[async_trait]
impl FoodSearchApi for MockApi {
    async fn search_page(&self, query: &str, page_number: u32) -> Result<SearchPage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .page_calls
            .lock()
            .unwrap()
            .entry((query.to_string(), page_number))
            .or_insert(0) += 1;

        match self.scripts.get(query) {
            Some(QueryScript::Pages(pages)) => Ok(SearchPage {
                foods: pages
                    .get((page_number - 1) as usize)
                    .cloned()
                    .unwrap_or_default(),
                total_hits: None,
            }),
            Some(QueryScript::PagesThenTransient(pages)) => {
                match pages.get((page_number - 1) as usize) {
                    Some(foods) => Ok(SearchPage {
                        foods: foods.clone(),
                        total_hits: None,
                    }),
                    None => Err(FetchError::Server { status: 503 }),
                }
            }
            Some(QueryScript::AlwaysTransient) => Err(FetchError::Server { status: 503 }),
            Some(QueryScript::AlwaysTerminal) => Err(FetchError::Client {
                status: 400,
                message: "bad request".to_string(),
            }),
            None => Ok(SearchPage::default()),
        }
    }
}

fn test_config(cache_dir: &Path) -> Config {
    let mut cfg = Config::minimal();
    cfg.cache.dir = cache_dir.to_path_buf();
    cfg.api.retry.base_delay_secs = 0;
    cfg.api.retry.max_delay_secs = 0;
    cfg
}

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    }
}

fn queries(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn second_build_runs_entirely_from_cache() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp.path().join("cache"));
    let mock = MockApi::new(BTreeMap::from([
        ("raw apple".to_string(), QueryScript::Pages(vec![page_of(3, "apple")])),
        ("banana".to_string(), QueryScript::Pages(vec![page_of(2, "banana")])),
    ]));

    let pipeline = Pipeline::with_api(&cfg, mock.clone()).unwrap();
    let first = pipeline
        .build_dataset(&queries(&["raw apple", "banana"]))
        .await
        .unwrap();
    assert_eq!(first.len(), 5);
    // Each query costs its data pages plus the terminating empty page.
    let calls_after_first = mock.total_calls();
    assert_eq!(calls_after_first, 4);

    let again = Pipeline::with_api(&cfg, mock.clone()).unwrap();
    let second = again
        .build_dataset(&queries(&["raw apple", "banana"]))
        .await
        .unwrap();

    assert_eq!(mock.total_calls(), calls_after_first, "warm cache must not hit the API");
    assert_eq!(second, first, "rebuild must be row-equivalent");
}

#[tokio::test]
async fn only_uncached_queries_touch_the_api() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp.path().join("cache"));

    // Pre-populate banana by hand; the mock only knows about apples.
    let store = CacheStore::new(&cfg.cache.dir).unwrap();
    let mut seeded: BTreeMap<String, QueryResultSet> = BTreeMap::new();
    seeded.insert("banana".to_string(), page_of(4, "banana"));
    store.save(&seeded).unwrap();

    let mock = MockApi::new(BTreeMap::from([(
        "raw apple".to_string(),
        QueryScript::Pages(vec![page_of(3, "apple")]),
    )]));
    let pipeline = Pipeline::with_api(&cfg, mock.clone()).unwrap();
    let table = pipeline
        .build_dataset(&queries(&["banana", "raw apple"]))
        .await
        .unwrap();

    assert_eq!(table.len(), 7);
    assert_eq!(mock.calls_for("banana"), 0, "cached query must not be fetched");
    assert!(mock.calls_for("raw apple") > 0);
}

#[tokio::test]
async fn incomplete_records_are_dropped_not_zero_filled() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp.path().join("cache"));
    let mock = MockApi::new(BTreeMap::from([(
        "mixed bag".to_string(),
        QueryScript::Pages(vec![vec![
            food("good one", 120.0),
            incomplete_food("no carbs"),
            food("good two", 180.0),
        ]]),
    )]));

    let pipeline = Pipeline::with_api(&cfg, mock).unwrap();
    let table = pipeline.build_dataset(&queries(&["mixed bag"])).await.unwrap();

    assert_eq!(table.len(), 2);
    assert!(table.rows().iter().all(|r| r.description.starts_with("good")));
}

#[tokio::test]
async fn record_limit_truncates_and_stops_paging() {
    let mock = MockApi::new(BTreeMap::from([(
        "popular".to_string(),
        QueryScript::Pages(vec![page_of(250, "a"), page_of(250, "b"), page_of(250, "c")]),
    )]));
    let fetcher = Fetcher::new(mock.clone(), fast_policy(3), 400);

    let records = fetcher.fetch_query("popular").await;

    assert_eq!(records.len(), 400);
    assert_eq!(
        mock.highest_page_for("popular"),
        2,
        "page 3 is beyond the limit and must not be requested"
    );
}

#[tokio::test]
async fn empty_first_page_ends_the_query_immediately() {
    let mock = MockApi::new(BTreeMap::from([(
        "obscure".to_string(),
        QueryScript::Pages(vec![Vec::new()]),
    )]));
    let fetcher = Fetcher::new(mock.clone(), fast_policy(3), 400);

    let records = fetcher.fetch_query("obscure").await;

    assert!(records.is_empty());
    assert_eq!(mock.total_calls(), 1);
}

#[tokio::test]
async fn transient_failures_stop_at_the_attempt_bound() {
    let mock = MockApi::new(BTreeMap::from([(
        "flaky".to_string(),
        QueryScript::AlwaysTransient,
    )]));
    let fetcher = Fetcher::new(mock.clone(), fast_policy(3), 400);

    let records = fetcher.fetch_query("flaky").await;

    assert!(records.is_empty());
    assert_eq!(mock.total_calls(), 3, "exactly max_attempts calls, then give up");
}

#[tokio::test]
async fn terminal_failures_never_retry() {
    let mock = MockApi::new(BTreeMap::from([(
        "rejected".to_string(),
        QueryScript::AlwaysTerminal,
    )]));
    let fetcher = Fetcher::new(mock.clone(), fast_policy(3), 400);

    let records = fetcher.fetch_query("rejected").await;

    assert!(records.is_empty());
    assert_eq!(mock.total_calls(), 1);
}

#[tokio::test]
async fn failing_page_keeps_earlier_pages() {
    let mock = MockApi::new(BTreeMap::from([(
        "truncated".to_string(),
        QueryScript::PagesThenTransient(vec![page_of(200, "kept")]),
    )]));
    let fetcher = Fetcher::new(mock.clone(), fast_policy(3), 400);

    let records = fetcher.fetch_query("truncated").await;

    assert_eq!(records.len(), 200, "page 1 results survive the page 2 failure");
    // Page 2 burned the full retry budget.
    assert_eq!(mock.calls_for("truncated"), 1 + 3);
}

#[tokio::test]
async fn one_bad_query_does_not_poison_the_others() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp.path().join("cache"));
    let mock = MockApi::new(BTreeMap::from([
        ("raw apple".to_string(), QueryScript::Pages(vec![page_of(3, "apple")])),
        ("flaky".to_string(), QueryScript::AlwaysTransient),
        ("banana".to_string(), QueryScript::Pages(vec![page_of(2, "banana")])),
    ]));

    let pipeline = Pipeline::with_api(&cfg, mock).unwrap();
    let table = pipeline
        .build_dataset(&queries(&["raw apple", "flaky", "banana"]))
        .await
        .unwrap();

    // The failing query contributes zero rows but kills nothing.
    assert_eq!(table.len(), 5);

    // Its empty result set is cached like any other.
    let store = CacheStore::new(&cfg.cache.dir).unwrap();
    assert!(store.has("flaky"));
}

struct CollectingProgress {
    events: Mutex<Vec<(u64, u64)>>,
}

impl FetchProgressReporter for CollectingProgress {
    fn report(&self, event: FetchProgressEvent) {
        let FetchProgressEvent::QueryDone { done, total, .. } = event;
        self.events.lock().unwrap().push((done, total));
    }
}

#[tokio::test]
async fn progress_counts_every_query_against_the_total() {
    let mock = MockApi::new(BTreeMap::from([
        ("a".to_string(), QueryScript::Pages(vec![page_of(1, "a")])),
        ("b".to_string(), QueryScript::Pages(vec![page_of(1, "b")])),
        ("c".to_string(), QueryScript::AlwaysTerminal),
    ]));
    let fetcher = Fetcher::new(mock, fast_policy(1), 400);
    let progress = CollectingProgress {
        events: Mutex::new(Vec::new()),
    };

    let results = fetcher
        .fetch_all(&queries(&["a", "b", "c"]), &progress)
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    let events = progress.events.lock().unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|(_, total)| *total == 3));
    let mut dones: Vec<u64> = events.iter().map(|(done, _)| *done).collect();
    dones.sort_unstable();
    assert_eq!(dones, vec![1, 2, 3]);
}

#[tokio::test]
async fn fetch_all_joins_every_task_before_returning() {
    let mock = MockApi::new(BTreeMap::from([
        ("q one".to_string(), QueryScript::Pages(vec![page_of(2, "one")])),
        ("q two".to_string(), QueryScript::Pages(vec![page_of(3, "two")])),
        ("q three".to_string(), QueryScript::Pages(vec![page_of(4, "three")])),
    ]));
    let fetcher = Fetcher::new(mock, fast_policy(3), 400);

    let results = fetcher
        .fetch_all(&queries(&["q one", "q two", "q three"]), &NoProgress)
        .await
        .unwrap();

    let keys: Vec<&String> = results.keys().collect();
    assert_eq!(keys, ["q one", "q three", "q two"]);
    assert_eq!(results["q one"].len(), 2);
    assert_eq!(results["q two"].len(), 3);
    assert_eq!(results["q three"].len(), 4);
}
