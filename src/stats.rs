//! Cache inspection and maintenance.
//!
//! Provides a quick summary of what's cached: entry counts, record counts,
//! sizes, and fetch ages. Used by `fdh cache stats` to give confidence that
//! builds will run from cache instead of hammering the API, and by
//! `fdh cache clear` to force a refetch.

use anyhow::Result;

use crate::cache::CacheStore;
use crate::config::Config;

/// Run the cache stats command: scan the cache directory and print a summary.
pub fn run_cache_stats(config: &Config) -> Result<()> {
    let store = CacheStore::new(&config.cache.dir)?;
    let entries = store.entries()?;

    let total_records: usize = entries.iter().map(|e| e.records).sum();
    let total_bytes: u64 = entries.iter().map(|e| e.size_bytes).sum();

    println!("FoodData Harvest — Cache Stats");
    println!("==============================");
    println!();
    println!("  Directory:   {}", store.dir().display());
    println!("  Entries:     {}", entries.len());
    println!("  Records:     {}", total_records);
    println!("  Size:        {}", format_bytes(total_bytes));

    if !entries.is_empty() {
        println!();
        println!(
            "  {:<32} {:>8} {:>10}   {}",
            "QUERY", "RECORDS", "SIZE", "FETCHED"
        );
        println!("  {}", "-".repeat(68));
        for entry in &entries {
            let fetched = match entry.modified_ts {
                Some(ts) => format_ts_relative(ts),
                None => "unknown".to_string(),
            };
            println!(
                "  {:<32} {:>8} {:>10}   {}",
                entry.query,
                entry.records,
                format_bytes(entry.size_bytes),
                fetched
            );
        }
    }

    println!();
    Ok(())
}

/// Run the cache clear command for one query or the whole cache.
pub fn run_cache_clear(config: &Config, query: Option<&str>) -> Result<()> {
    let store = CacheStore::new(&config.cache.dir)?;
    let deleted = store.clear(query)?;
    match query {
        Some(query) => match deleted {
            0 => println!("cache clear: no entry for '{}'", query),
            _ => println!("cache clear: removed entry for '{}'", query),
        },
        None => println!(
            "cache clear: removed {} entr{}",
            deleted,
            if deleted == 1 { "y" } else { "ies" }
        ),
    }
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_picks_sensible_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn recent_timestamps_render_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 120), "2 mins ago");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
    }
}
