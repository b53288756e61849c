//! Raw record to feature row normalization.
//!
//! The schema lives in a mapping table, not in code: each output column names
//! the API field it reads and the fallback used when the field is absent.
//! Resolution order for every column is nutrient entry first, then top-level
//! record field, then the configured default. Records that cannot fill all
//! four macro-nutrient columns are dropped, never zero-filled.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::config::MappingOverrides;
use crate::error::ConfigError;
use crate::models::{FeatureRow, FeatureTable, QueryResultSet, RawFoodRecord};

/// How one output column is filled from a raw record.
#[derive(Debug, Clone)]
pub struct ColumnRule {
    pub column: &'static str,
    /// Nutrient name or top-level field to read.
    pub source: String,
    pub default: CellDefault,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellDefault {
    Text(&'static str),
    Number(f64),
    /// No fallback: the cell stays empty when the source is absent.
    None,
}

/// A resolved cell prior to row assembly.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Text(String),
    Number(f64),
}

const TEXT_COLUMNS: [&str; 2] = ["description", "brand"];

/// The column rules the table is built from.
#[derive(Debug, Clone)]
pub struct NutrientMapping {
    rules: Vec<ColumnRule>,
}

impl NutrientMapping {
    /// The built-in USDA FoodData Central mapping.
    pub fn usda_default() -> Self {
        let rules = vec![
            rule("description", "description", CellDefault::Text("")),
            rule("brand", "brandOwner", CellDefault::Text("")),
            rule("calories", "Energy", CellDefault::None),
            rule("protein", "Protein", CellDefault::None),
            rule("fat", "Total lipid (fat)", CellDefault::None),
            rule("carbohydrates", "Carbohydrate, by difference", CellDefault::None),
            rule("fiber", "Fiber, total dietary", CellDefault::None),
            rule("sugar", "Sugars, total including NLEA", CellDefault::None),
            rule("sodium", "Sodium, Na", CellDefault::None),
        ];
        Self { rules }
    }

    /// The built-in mapping with config overrides applied. Overrides may only
    /// name known columns, and numeric defaults only apply to nutrient
    /// columns.
    pub fn with_overrides(overrides: &MappingOverrides) -> Result<Self, ConfigError> {
        let mut mapping = Self::usda_default();
        for (column, over) in &overrides.columns {
            let rule = mapping
                .rules
                .iter_mut()
                .find(|r| r.column == column)
                .ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "mapping override names unknown column '{column}'"
                    ))
                })?;
            if let Some(source) = &over.source {
                rule.source = source.clone();
            }
            if let Some(default) = over.default {
                if TEXT_COLUMNS.contains(&rule.column) {
                    return Err(ConfigError::Invalid(format!(
                        "mapping override for text column '{column}' cannot set a numeric default"
                    )));
                }
                rule.default = CellDefault::Number(default);
            }
        }
        Ok(mapping)
    }

    pub fn rules(&self) -> &[ColumnRule] {
        &self.rules
    }
}

fn rule(column: &'static str, source: &str, default: CellDefault) -> ColumnRule {
    ColumnRule {
        column,
        source: source.to_string(),
        default,
    }
}

/// Flattens per-query result sets into the normalized table, in query key
/// order. Empty input produces an empty table.
pub fn normalize(
    data: &BTreeMap<String, QueryResultSet>,
    mapping: &NutrientMapping,
) -> FeatureTable {
    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for records in data.values() {
        for record in records {
            match normalize_record(record, mapping) {
                Some(row) => rows.push(row),
                None => dropped += 1,
            }
        }
    }
    if dropped > 0 {
        tracing::debug!(dropped, kept = rows.len(), "records missing mandatory nutrients");
    }
    FeatureTable::new(rows)
}

/// Resolves one record against the mapping. Returns `None` when any of the
/// four mandatory macro-nutrient columns cannot be filled.
pub fn normalize_record(record: &RawFoodRecord, mapping: &NutrientMapping) -> Option<FeatureRow> {
    let nutrients = record.nutrient_values();
    let mut cells: BTreeMap<&str, Cell> = BTreeMap::new();
    for rule in mapping.rules() {
        if let Some(cell) = resolve_cell(record, &nutrients, rule) {
            cells.insert(rule.column, cell);
        }
    }

    Some(FeatureRow {
        description: text_cell(cells.remove("description")),
        brand: text_cell(cells.remove("brand")),
        calories: number_cell(cells.remove("calories"))?,
        protein: number_cell(cells.remove("protein"))?,
        fat: number_cell(cells.remove("fat"))?,
        carbohydrates: number_cell(cells.remove("carbohydrates"))?,
        fiber: number_cell(cells.remove("fiber")),
        sugar: number_cell(cells.remove("sugar")),
        sodium: number_cell(cells.remove("sodium")),
    })
}

fn resolve_cell(
    record: &RawFoodRecord,
    nutrients: &std::collections::HashMap<String, f64>,
    rule: &ColumnRule,
) -> Option<Cell> {
    if let Some(value) = nutrients.get(&rule.source) {
        return Some(Cell::Number(*value));
    }
    match record.top_level(&rule.source) {
        Some(Value::String(s)) => return Some(Cell::Text(s.clone())),
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_f64() {
                return Some(Cell::Number(v));
            }
        }
        _ => {}
    }
    match &rule.default {
        CellDefault::Text(s) => Some(Cell::Text(s.to_string())),
        CellDefault::Number(v) => Some(Cell::Number(*v)),
        CellDefault::None => None,
    }
}

fn text_cell(cell: Option<Cell>) -> String {
    match cell {
        Some(Cell::Text(s)) => s,
        Some(Cell::Number(v)) => v.to_string(),
        None => String::new(),
    }
}

fn number_cell(cell: Option<Cell>) -> Option<f64> {
    match cell {
        Some(Cell::Number(v)) => Some(v),
        _ => None,
    }
}
