//! Core data models used throughout FoodData Harvest.
//!
//! These types represent the raw search records, normalized feature rows, and
//! the flat nutrition table that flow through the fetch and training pipeline.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One food record exactly as the search API returned it.
///
/// Kept as an opaque JSON object so the cache round-trips bytes the API sent
/// and the normalizer can resolve any field the mapping names, including ones
/// this crate has no struct for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawFoodRecord(pub Value);

impl RawFoodRecord {
    /// Nutrient name to value lookup built from the record's `foodNutrients`
    /// array. An entry that exists but carries no numeric `value` counts as 0.
    pub fn nutrient_values(&self) -> HashMap<String, f64> {
        let mut out = HashMap::new();
        let Some(nutrients) = self.0.get("foodNutrients").and_then(Value::as_array) else {
            return out;
        };
        for entry in nutrients {
            let Some(name) = entry.get("nutrientName").and_then(Value::as_str) else {
                continue;
            };
            let value = entry.get("value").and_then(Value::as_f64).unwrap_or(0.0);
            out.insert(name.to_string(), value);
        }
        out
    }

    /// Top-level field of the record, if present.
    pub fn top_level(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// All records fetched for one query, in API page order.
pub type QueryResultSet = Vec<RawFoodRecord>;

/// One normalized row of the nutrition table.
///
/// The four macro-nutrient fields are mandatory: a record that cannot fill
/// all of them never becomes a row. The remaining nutrients stay optional and
/// serialize as empty CSV cells when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub description: String,
    pub brand: String,
    pub calories: f64,
    pub protein: f64,
    pub fat: f64,
    pub carbohydrates: f64,
    pub fiber: Option<f64>,
    pub sugar: Option<f64>,
    pub sodium: Option<f64>,
}

/// The flat nutrition dataset produced by normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    /// Column order of the CSV form.
    pub const COLUMNS: [&'static str; 9] = [
        "description",
        "brand",
        "calories",
        "protein",
        "fat",
        "carbohydrates",
        "fiber",
        "sugar",
        "sodium",
    ];

    pub fn new(rows: Vec<FeatureRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Writes the table as CSV, header first, one row per line.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        out.push_str(&Self::COLUMNS.join(","));
        out.push('\n');
        for row in &self.rows {
            let cells = [
                csv_escape(&row.description),
                csv_escape(&row.brand),
                format_cell(Some(row.calories)),
                format_cell(Some(row.protein)),
                format_cell(Some(row.fat)),
                format_cell(Some(row.carbohydrates)),
                format_cell(row.fiber),
                format_cell(row.sugar),
                format_cell(row.sodium),
            ];
            out.push_str(&cells.join(","));
            out.push('\n');
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let mut file = fs::File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        file.write_all(out.as_bytes())
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Reads a table previously produced by [`write_csv`](Self::write_csv).
    pub fn read_csv(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut records = parse_csv(&content);
        if records.is_empty() {
            bail!("{}: empty CSV, expected a header row", path.display());
        }
        let header = records.remove(0);
        if header != Self::COLUMNS {
            bail!(
                "{}: unexpected CSV header {:?}, expected {:?}",
                path.display(),
                header,
                Self::COLUMNS
            );
        }
        let mut rows = Vec::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            // Header is line 1, so data row i is line i + 2.
            let line = i + 2;
            if record.len() != Self::COLUMNS.len() {
                bail!(
                    "{} line {}: expected {} cells, found {}",
                    path.display(),
                    line,
                    Self::COLUMNS.len(),
                    record.len()
                );
            }
            rows.push(FeatureRow {
                description: record[0].clone(),
                brand: record[1].clone(),
                calories: parse_required(&record[2], "calories", line)?,
                protein: parse_required(&record[3], "protein", line)?,
                fat: parse_required(&record[4], "fat", line)?,
                carbohydrates: parse_required(&record[5], "carbohydrates", line)?,
                fiber: parse_optional(&record[6], "fiber", line)?,
                sugar: parse_optional(&record[7], "sugar", line)?,
                sodium: parse_optional(&record[8], "sodium", line)?,
            });
        }
        Ok(Self { rows })
    }
}

fn format_cell(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v}"),
        None => String::new(),
    }
}

fn csv_escape(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

fn parse_required(cell: &str, column: &str, line: usize) -> Result<f64> {
    cell.trim()
        .parse::<f64>()
        .with_context(|| format!("line {line}: column {column}: invalid number {cell:?}"))
}

fn parse_optional(cell: &str, column: &str, line: usize) -> Result<Option<f64>> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(None);
    }
    Ok(Some(parse_required(cell, column, line)?))
}

/// Minimal CSV reader for the dataset files this crate writes: quoted cells,
/// doubled-quote escapes, and newlines inside quotes.
fn parse_csv(content: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    cell.push('"');
                }
                '"' => in_quotes = false,
                _ => cell.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut cell)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut cell));
                records.push(std::mem::take(&mut record));
            }
            _ => cell.push(c),
        }
    }
    if !cell.is_empty() || !record.is_empty() {
        record.push(cell);
        records.push(record);
    }
    records
}
