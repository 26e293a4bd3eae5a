//! The enrichment ledger: a persisted, resumable map from canonical variant
//! identifier to merged row record.
//!
//! Owned by exactly one batch client at a time. The on-disk form is a JSON
//! list of row objects, each carrying its identifier under the `HGVS` key;
//! in memory it is keyed by that identifier. The whole ledger is rewritten
//! after every batch, so the file on disk is always exactly the result of
//! the batches completed so far.

use crate::variant::Row;
use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::path::Path;

/// Column under which each ledger row stores its canonical identifier.
pub const ID_COLUMN: &str = "HGVS";

/// In-memory ledger state.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: Map<String, Value>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a ledger from disk. A missing file is an empty ledger; a corrupt
    /// one is discarded with a warning and rebuilt from scratch.
    pub fn load(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Self::new(),
        };

        let rows: Vec<Row> = match serde_json::from_str::<Vec<Row>>(&contents) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(
                    "ledger {} is corrupted ({}), rebuilding from scratch",
                    path.display(),
                    e
                );
                return Self::new();
            }
        };

        let mut entries = Map::new();
        for row in rows {
            if let Some(id) = row.get(ID_COLUMN).and_then(|v| v.as_str()).map(String::from) {
                entries.insert(id, Value::Object(row));
            }
        }
        Self { entries }
    }

    /// Persist the full ledger to disk as a JSON list, fully flushed before
    /// returning. This write is the resumption contract between batches.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let rows: Vec<&Value> = self.entries.values().collect();
        let json = serde_json::to_string_pretty(&rows)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing ledger {}", path.display()))?;
        Ok(())
    }

    /// Merge a row record under the given identifier, replacing any prior
    /// entry for it.
    pub fn insert(&mut self, id: &str, row: Row) {
        self.entries.insert(id.to_string(), Value::Object(row));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The row stored for an identifier, if any.
    pub fn get(&self, id: &str) -> Option<&Map<String, Value>> {
        self.entries.get(id).and_then(|v| v.as_object())
    }

    /// Write a structurally valid empty ledger. Used when the input schema
    /// is unrecognized or the input holds no rows.
    pub fn persist_empty(path: &Path) -> Result<()> {
        std::fs::write(path, "[]")
            .with_context(|| format!("writing empty ledger {}", path.display()))?;
        Ok(())
    }
}
