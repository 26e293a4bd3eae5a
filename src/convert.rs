//! Thin format converters between JSON artifacts and tabular artifacts.
//!
//! Total functions: empty, missing, or corrupt inputs produce structurally
//! valid empty outputs rather than errors, so an empty track never blocks
//! the rest of the pipeline.

use crate::table::Table;
use crate::variant::Row;
use anyhow::Result;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::Path;

/// Flatten a nested JSON object into a single-level map with `_`-joined
/// key paths. Arrays and scalars are kept as-is under their joined key.
pub fn flatten_json(obj: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    flatten_into(obj, "", &mut out);
    out
}

fn flatten_into(obj: &Map<String, Value>, prefix: &str, out: &mut Map<String, Value>) {
    for (key, value) in obj {
        let joined = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}_{}", prefix, key)
        };
        match value {
            Value::Object(nested) => flatten_into(nested, &joined, out),
            other => {
                out.insert(joined, other.clone());
            }
        }
    }
}

/// Load a JSON file expected to hold a list of objects.
///
/// Missing, empty, corrupt, or non-list content yields an empty list.
pub fn load_json_rows(path: &Path) -> Vec<Row> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) if !c.trim().is_empty() => c,
        _ => return Vec::new(),
    };

    match serde_json::from_str::<Value>(&contents) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        Ok(_) | Err(_) => {
            tracing::warn!("{} is not a valid JSON list, treating as empty", path.display());
            Vec::new()
        }
    }
}

/// Convert a list of JSON objects to a table.
///
/// Headers are the union of all keys, sorted for a deterministic layout;
/// missing cells are empty. Nested objects are flattened first.
pub fn json_rows_to_table(rows: &[Row]) -> Table {
    if rows.is_empty() {
        return Table::empty();
    }

    let flattened: Vec<Row> = rows.iter().map(flatten_json).collect();

    let mut keys = BTreeSet::new();
    for row in &flattened {
        for key in row.keys() {
            keys.insert(key.clone());
        }
    }

    Table {
        headers: keys.into_iter().collect(),
        rows: flattened,
    }
}

/// Read a JSON list artifact and write it as a TSV artifact.
pub fn json_file_to_tsv(json_path: &Path, tsv_path: &Path) -> Result<()> {
    let rows = load_json_rows(json_path);
    if rows.is_empty() {
        tracing::warn!(
            "{} is empty or unreadable, writing an empty table",
            json_path.display()
        );
    }
    let table = json_rows_to_table(&rows);
    crate::table::write_tsv(tsv_path, &table)
}
