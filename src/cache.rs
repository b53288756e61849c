//! On-disk cache of raw search results, one JSON file per query.
//!
//! File names derive from queries by replacing spaces with underscores, so
//! `raw apple` lives in `raw_apple.json`. Writes go to a sibling temp file
//! first and are renamed into place, so a crash mid-write never leaves a
//! truncated entry behind.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CacheError;
use crate::models::QueryResultSet;

pub struct CacheStore {
    dir: PathBuf,
}

/// One cache entry as reported by `fdh cache stats`.
#[derive(Debug, Clone)]
pub struct CacheEntryInfo {
    pub query: String,
    pub records: usize,
    pub size_bytes: u64,
    /// Unix timestamp of the last write, if the filesystem reports one.
    pub modified_ts: Option<i64>,
}

impl CacheStore {
    /// Opens the store, creating the directory if needed.
    pub fn new(dir: &Path) -> Result<Self, CacheError> {
        fs::create_dir_all(dir).map_err(|e| CacheError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// File-system-safe key for a query: spaces become underscores.
    pub fn cache_key(query: &str) -> String {
        query.replace(' ', "_")
    }

    fn key_to_query(key: &str) -> String {
        key.replace('_', " ")
    }

    pub fn entry_path(&self, query: &str) -> PathBuf {
        self.dir.join(format!("{}.json", Self::cache_key(query)))
    }

    pub fn has(&self, query: &str) -> bool {
        self.entry_path(query).is_file()
    }

    /// Partitions `queries` into cached results and the remainder that needs
    /// fetching. Every query lands in exactly one side.
    pub fn load(
        &self,
        queries: &[String],
    ) -> Result<(BTreeMap<String, QueryResultSet>, Vec<String>), CacheError> {
        let mut cached = BTreeMap::new();
        let mut remaining = Vec::new();
        for query in queries {
            let path = self.entry_path(query);
            if !path.is_file() {
                remaining.push(query.clone());
                continue;
            }
            cached.insert(query.clone(), read_entry(&path)?);
        }
        if !cached.is_empty() {
            let records: usize = cached.values().map(Vec::len).sum();
            tracing::info!(
                queries = cached.len(),
                records,
                "loaded cached search results"
            );
        }
        Ok((cached, remaining))
    }

    /// Persists one result set per query. Empty result sets are cached too:
    /// a query known to return nothing should not be refetched next run.
    pub fn save(&self, data: &BTreeMap<String, QueryResultSet>) -> Result<(), CacheError> {
        for (query, records) in data {
            let path = self.entry_path(query);
            let json = serde_json::to_string_pretty(records).map_err(|e| CacheError::Io {
                path: path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            })?;
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, json).map_err(|e| CacheError::Io {
                path: tmp.clone(),
                source: e,
            })?;
            fs::rename(&tmp, &path).map_err(|e| CacheError::Io {
                path: path.clone(),
                source: e,
            })?;
            tracing::debug!(query = %query, records = records.len(), path = %path.display(), "cached");
        }
        Ok(())
    }

    /// Lists all entries, sorted by query.
    pub fn entries(&self) -> Result<Vec<CacheEntryInfo>, CacheError> {
        let mut out = Vec::new();
        let dir_iter = fs::read_dir(&self.dir).map_err(|e| CacheError::Io {
            path: self.dir.clone(),
            source: e,
        })?;
        for entry in dir_iter {
            let entry = entry.map_err(|e| CacheError::Io {
                path: self.dir.clone(),
                source: e,
            })?;
            let path = entry.path();
            let Some(stem) = cache_file_stem(&path) else {
                continue;
            };
            let records = read_entry(&path)?.len();
            let metadata = fs::metadata(&path).map_err(|e| CacheError::Io {
                path: path.clone(),
                source: e,
            })?;
            let modified_ts = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64);
            out.push(CacheEntryInfo {
                query: Self::key_to_query(&stem),
                records,
                size_bytes: metadata.len(),
                modified_ts,
            });
        }
        out.sort_by(|a, b| a.query.cmp(&b.query));
        Ok(out)
    }

    /// Removes one query's entry, or every entry when `query` is `None`.
    /// Returns the number of files deleted.
    pub fn clear(&self, query: Option<&str>) -> Result<usize, CacheError> {
        match query {
            Some(query) => {
                let path = self.entry_path(query);
                if !path.is_file() {
                    return Ok(0);
                }
                fs::remove_file(&path).map_err(|e| CacheError::Io {
                    path: path.clone(),
                    source: e,
                })?;
                Ok(1)
            }
            None => {
                let mut deleted = 0;
                let dir_iter = fs::read_dir(&self.dir).map_err(|e| CacheError::Io {
                    path: self.dir.clone(),
                    source: e,
                })?;
                for entry in dir_iter {
                    let entry = entry.map_err(|e| CacheError::Io {
                        path: self.dir.clone(),
                        source: e,
                    })?;
                    let path = entry.path();
                    if cache_file_stem(&path).is_none() {
                        continue;
                    }
                    fs::remove_file(&path).map_err(|e| CacheError::Io {
                        path: path.clone(),
                        source: e,
                    })?;
                    deleted += 1;
                }
                Ok(deleted)
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn cache_file_stem(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
}

fn read_entry(path: &Path) -> Result<QueryResultSet, CacheError> {
    let content = fs::read_to_string(path).map_err(|e| CacheError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| CacheError::Corrupt {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawFoodRecord;
    use serde_json::json;

    fn record(desc: &str) -> RawFoodRecord {
        RawFoodRecord(json!({"description": desc}))
    }

    fn store() -> (tempfile::TempDir, CacheStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CacheStore::new(&dir.path().join("cache")).expect("store");
        (dir, store)
    }

    #[test]
    fn keys_replace_spaces_with_underscores() {
        assert_eq!(CacheStore::cache_key("raw apple"), "raw_apple");
        assert_eq!(CacheStore::cache_key("banana"), "banana");
        assert_eq!(
            CacheStore::cache_key("grilled chicken breast"),
            "grilled_chicken_breast"
        );
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_dir, store) = store();
        let mut data = BTreeMap::new();
        data.insert("raw apple".to_string(), vec![record("apple one")]);
        store.save(&data).expect("save");

        assert!(store.has("raw apple"));
        assert!(store.entry_path("raw apple").ends_with("raw_apple.json"));

        let (cached, remaining) = store
            .load(&["raw apple".to_string(), "banana".to_string()])
            .expect("load");
        assert_eq!(cached.len(), 1);
        assert_eq!(cached["raw apple"][0], record("apple one"));
        assert_eq!(remaining, vec!["banana".to_string()]);
    }

    #[test]
    fn empty_result_sets_are_cached() {
        let (_dir, store) = store();
        let mut data = BTreeMap::new();
        data.insert("unobtainium".to_string(), Vec::new());
        store.save(&data).expect("save");

        let (cached, remaining) = store.load(&["unobtainium".to_string()]).expect("load");
        assert!(remaining.is_empty());
        assert!(cached["unobtainium"].is_empty());
    }

    #[test]
    fn entries_are_pretty_printed_json() {
        let (_dir, store) = store();
        let mut data = BTreeMap::new();
        data.insert("raw apple".to_string(), vec![record("apple one")]);
        store.save(&data).expect("save");

        let content = fs::read_to_string(store.entry_path("raw apple")).expect("read");
        assert!(content.contains('\n'), "expected indented JSON");
    }

    #[test]
    fn corrupt_entry_surfaces_as_error() {
        let (_dir, store) = store();
        fs::write(store.entry_path("banana"), "{not json").expect("write");
        let err = store.load(&["banana".to_string()]).unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { .. }));
    }

    #[test]
    fn no_temp_files_remain_after_save() {
        let (_dir, store) = store();
        let mut data = BTreeMap::new();
        data.insert("raw apple".to_string(), vec![record("a")]);
        data.insert("banana".to_string(), vec![record("b")]);
        store.save(&data).expect("save");

        let leftovers: Vec<_> = fs::read_dir(store.dir())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn stats_and_clear_cover_all_entries() {
        let (_dir, store) = store();
        let mut data = BTreeMap::new();
        data.insert("raw apple".to_string(), vec![record("a"), record("b")]);
        data.insert("banana".to_string(), vec![record("c")]);
        store.save(&data).expect("save");

        let entries = store.entries().expect("entries");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].query, "banana");
        assert_eq!(entries[0].records, 1);
        assert_eq!(entries[1].query, "raw apple");
        assert_eq!(entries[1].records, 2);
        assert!(entries.iter().all(|e| e.size_bytes > 0));

        assert_eq!(store.clear(Some("banana")).expect("clear one"), 1);
        assert!(!store.has("banana"));
        assert!(store.has("raw apple"));

        assert_eq!(store.clear(None).expect("clear all"), 1);
        assert!(store.entries().expect("entries").is_empty());
    }

    #[test]
    fn clearing_missing_entry_is_a_no_op() {
        let (_dir, store) = store();
        assert_eq!(store.clear(Some("nothing here")).expect("clear"), 0);
    }
}
