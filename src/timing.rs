//! Runtime estimation from historical timing data.
//!
//! Estimates blend a linear cold-start model with recorded wall-clock times
//! from previous runs of identically sized inputs. History lives in a single
//! JSON object file mapping row-count strings to elapsed seconds, read fully
//! at estimate time and rewritten fully once per run. A single run owns the
//! file at a time.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Seconds per input row for the cold-start linear model.
const BASE_RATE: f64 = 0.05;

/// Minimum estimate returned, so tiny inputs still get a meaningful figure.
const MIN_ESTIMATE_SECS: f64 = 10.0;

/// Weight given to the linear model when history exists for the row count.
const MODEL_WEIGHT: f64 = 0.7;

/// Persisted mapping from row count to observed elapsed seconds.
pub struct TimingStore {
    path: PathBuf,
}

impl TimingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the full history. A missing file is an empty history; a corrupt
    /// file is discarded with a warning.
    pub fn load(&self) -> HashMap<String, f64> {
        if !self.path.exists() {
            return HashMap::new();
        }
        match std::fs::read_to_string(&self.path)
            .map_err(anyhow::Error::from)
            .and_then(|s| serde_json::from_str(&s).map_err(anyhow::Error::from))
        {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(
                    "timing history {} unreadable ({}), starting fresh",
                    self.path.display(),
                    e
                );
                HashMap::new()
            }
        }
    }

    /// Record the elapsed time for a run of `rows` rows, rewriting the file.
    pub fn record(&self, rows: usize, elapsed_secs: f64) -> Result<()> {
        let mut data = self.load();
        data.insert(rows.to_string(), elapsed_secs);
        let json = serde_json::to_string_pretty(&data)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("writing timing history {}", self.path.display()))?;
        Ok(())
    }

    /// Estimate runtime in seconds for an input of `rows` rows.
    pub fn estimate(&self, rows: usize) -> f64 {
        estimate_with_history(rows, &self.load())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Pure estimation formula.
///
/// History lookup is by exact row count, so it only refines estimates when
/// rerunning an identically sized input. That precision limit is accepted:
/// bucketing would change observable behavior.
pub fn estimate_with_history(rows: usize, history: &HashMap<String, f64>) -> f64 {
    let linear = rows as f64 * BASE_RATE;

    let blended = match history.get(&rows.to_string()) {
        Some(&historical) => linear * MODEL_WEIGHT + historical * (1.0 - MODEL_WEIGHT),
        None => linear,
    };

    let rounded = (blended * 100.0).round() / 100.0;
    rounded.max(MIN_ESTIMATE_SECS)
}
