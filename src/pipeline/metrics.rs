//! Run-level counters for the pipeline.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Metrics for a single pipeline run.
#[derive(Debug)]
pub struct Metrics {
    /// Stages whose producing operation actually ran
    pub stages_produced: AtomicU64,

    /// Stages skipped because their artifact already existed
    pub stages_skipped: AtomicU64,

    /// Queries sent to the local prediction service
    pub predict_queries: AtomicU64,

    /// Prediction queries that yielded no enrichment (empty/failed)
    pub predict_misses: AtomicU64,

    /// Ledger flushes performed (one per completed batch)
    pub ledger_flushes: AtomicU64,

    /// Queries sent to the remote classification service
    pub classify_queries: AtomicU64,

    /// Retried classification attempts
    pub classify_retries: AtomicU64,

    /// Classification queries dropped after exhausting retries
    pub classify_failures: AtomicU64,

    start_time: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            stages_produced: AtomicU64::new(0),
            stages_skipped: AtomicU64::new(0),
            predict_queries: AtomicU64::new(0),
            predict_misses: AtomicU64::new(0),
            ledger_flushes: AtomicU64::new(0),
            classify_queries: AtomicU64::new(0),
            classify_retries: AtomicU64::new(0),
            classify_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_stage_produced(&self) {
        self.stages_produced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_stage_skipped(&self) {
        self.stages_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_predict_query(&self) {
        self.predict_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_predict_miss(&self) {
        self.predict_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_ledger_flush(&self) {
        self.ledger_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_classify_query(&self) {
        self.classify_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_classify_retry(&self) {
        self.classify_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_classify_failure(&self) {
        self.classify_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Snapshot the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            stages_produced: self.stages_produced.load(Ordering::Relaxed),
            stages_skipped: self.stages_skipped.load(Ordering::Relaxed),
            predict_queries: self.predict_queries.load(Ordering::Relaxed),
            predict_misses: self.predict_misses.load(Ordering::Relaxed),
            ledger_flushes: self.ledger_flushes.load(Ordering::Relaxed),
            classify_queries: self.classify_queries.load(Ordering::Relaxed),
            classify_retries: self.classify_retries.load(Ordering::Relaxed),
            classify_failures: self.classify_failures.load(Ordering::Relaxed),
            elapsed_secs: self.elapsed().as_secs_f64(),
        }
    }
}

/// Serializable point-in-time view of a run's counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub stages_produced: u64,
    pub stages_skipped: u64,
    pub predict_queries: u64,
    pub predict_misses: u64,
    pub ledger_flushes: u64,
    pub classify_queries: u64,
    pub classify_retries: u64,
    pub classify_failures: u64,
    pub elapsed_secs: f64,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Stages: {} produced, {} skipped | Predict: {} queries ({} misses), {} flushes | \
             Classify: {} queries, {} retries, {} dropped | Elapsed: {:.1}s",
            self.stages_produced,
            self.stages_skipped,
            self.predict_queries,
            self.predict_misses,
            self.ledger_flushes,
            self.classify_queries,
            self.classify_retries,
            self.classify_failures,
            self.elapsed_secs,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.add_stage_produced();
        metrics.add_stage_produced();
        metrics.add_stage_skipped();
        metrics.add_predict_query();
        metrics.add_ledger_flush();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.stages_produced, 2);
        assert_eq!(snapshot.stages_skipped, 1);
        assert_eq!(snapshot.predict_queries, 1);
        assert_eq!(snapshot.ledger_flushes, 1);
        assert_eq!(snapshot.classify_failures, 0);
    }

    #[test]
    fn test_snapshot_display() {
        let metrics = Metrics::new();
        metrics.add_classify_query();
        metrics.add_classify_retry();

        let display = format!("{}", metrics.snapshot());
        assert!(display.contains("1 queries"));
        assert!(display.contains("1 retries"));
    }
}
