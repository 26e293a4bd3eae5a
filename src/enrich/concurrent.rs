//! Bounded-parallelism client for the remote classification service.
//!
//! Each eligible row becomes one HTTP query dispatched through a
//! `buffer_unordered` pool. Calls carry an independent retry policy for
//! transient failures; rows whose query ultimately fails are dropped from
//! the output rather than null-padded. Output order is unspecified.

use crate::error::PipelineError;
use crate::pipeline::Metrics;
use crate::table;
use crate::variant::{Row, SCHEMA_ONE_COLUMNS, SCHEMA_TWO_COLUMNS};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Status codes that warrant a retry.
const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Which of the two input layouts a file uses, chosen from its filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    Set1,
    Set2,
}

impl Dataset {
    /// Detect the dataset marker ("set1"/"set2", case-insensitive) from a
    /// filename. The earliest marker wins; no marker defaults to set1.
    pub fn from_filename(name: &str) -> Self {
        let lower = name.to_lowercase();
        match (lower.find("set1"), lower.find("set2")) {
            (Some(a), Some(b)) if b < a => Dataset::Set2,
            (None, Some(_)) => Dataset::Set2,
            _ => Dataset::Set1,
        }
    }

    fn key_columns(&self) -> [&'static str; 4] {
        match self {
            Dataset::Set1 => SCHEMA_ONE_COLUMNS,
            Dataset::Set2 => SCHEMA_TWO_COLUMNS,
        }
    }

    /// The marker used in artifact filenames.
    pub fn tag(&self) -> &'static str {
        match self {
            Dataset::Set1 => "set1",
            Dataset::Set2 => "set2",
        }
    }
}

/// One classification query: the four variant components, with the `chr`
/// prefix already stripped from the chromosome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantQuery {
    pub chromosome: String,
    pub position: String,
    pub ref_allele: String,
    pub alt_allele: String,
}

impl VariantQuery {
    /// Build a query from a row, or `None` if any required field is missing
    /// or empty (such rows contribute nothing; they are not errors).
    pub fn from_row(row: &Row, dataset: Dataset) -> Option<Self> {
        let cols = dataset.key_columns();
        let cell = |name: &str| -> Option<String> {
            let value = row.get(name)?.as_str()?.trim().to_string();
            if value.is_empty() {
                None
            } else {
                Some(value)
            }
        };

        Some(Self {
            chromosome: cell(cols[0])?.replace("chr", ""),
            position: cell(cols[1])?,
            ref_allele: cell(cols[2])?,
            alt_allele: cell(cols[3])?,
        })
    }
}

/// Per-call failure modes, split so the retry policy can tell transient
/// failures from definitive empties.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// A status code from the transient set; worth retrying.
    #[error("transient status {0}")]
    TransientStatus(u16),

    /// A transport-level failure (connect, timeout); worth retrying.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Transport to the classification service. `Ok(None)` is a definitive
/// "no enrichment" (non-2xx outside the transient set, empty body, or a
/// body that does not decode); errors are retried per policy.
#[async_trait]
pub trait ClassifyService: Send + Sync {
    async fn classify(&self, query: &VariantQuery) -> Result<Option<Value>, QueryError>;
}

/// HTTP transport: parameterized GET, never interpolated command lines.
pub struct HttpClassifyService {
    client: reqwest::Client,
    endpoint: String,
    build: String,
}

impl HttpClassifyService {
    pub fn new(
        endpoint: impl Into<String>,
        build: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            build: build.into(),
        })
    }
}

#[async_trait]
impl ClassifyService for HttpClassifyService {
    async fn classify(&self, query: &VariantQuery) -> Result<Option<Value>, QueryError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("queryType", "position"),
                ("chr", query.chromosome.as_str()),
                ("pos", query.position.as_str()),
                ("ref", query.ref_allele.as_str()),
                ("alt", query.alt_allele.as_str()),
                ("build", self.build.as_str()),
            ])
            .send()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if TRANSIENT_STATUSES.contains(&status) {
            return Err(QueryError::TransientStatus(status));
        }
        if !response.status().is_success() {
            return Ok(None);
        }

        let body = response
            .text()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;
        if body.trim().is_empty() {
            return Ok(None);
        }

        // A non-JSON body is a definitive empty result, not a retry.
        Ok(serde_json::from_str(&body).ok())
    }
}

/// Retry/backoff policy for one classification call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(300),
        }
    }
}

/// Concurrent, best-effort enrichment over an input table.
pub struct ConcurrentEnricher {
    service: Arc<dyn ClassifyService>,
    pool_width: usize,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
}

impl ConcurrentEnricher {
    pub fn new(
        service: Arc<dyn ClassifyService>,
        pool_width: usize,
        retry: RetryPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            service,
            pool_width,
            retry,
            metrics,
        }
    }

    /// Query the service for every eligible row of `input` and write the
    /// successful responses as a JSON list to `output`.
    pub async fn run(&self, input: &Path, output: &Path) -> Result<()> {
        if !input.exists() {
            return Err(PipelineError::InputMissing {
                path: input.to_path_buf(),
            }
            .into());
        }

        let dataset = Dataset::from_filename(
            input
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default(),
        );
        tracing::info!("detected dataset type: {:?}", dataset);

        let input_table = table::read_tsv(input)?;
        let queries: Vec<VariantQuery> = input_table
            .rows
            .iter()
            .filter_map(|row| VariantQuery::from_row(row, dataset))
            .collect();

        tracing::info!(
            "{} of {} rows eligible for classification",
            queries.len(),
            input_table.len()
        );

        let results = self.classify_all(queries).await;

        let json = serde_json::to_string_pretty(&results)?;
        std::fs::write(output, json)
            .with_context(|| format!("writing classification output {}", output.display()))?;
        Ok(())
    }

    /// Dispatch all queries through the bounded pool, collecting successful
    /// non-empty responses as they complete.
    pub async fn classify_all(&self, queries: Vec<VariantQuery>) -> Vec<Value> {
        let results: Vec<Option<Value>> = stream::iter(queries)
            .map(|query| async move { self.classify_with_retry(&query).await })
            .buffer_unordered(self.pool_width.max(1))
            .collect()
            .await;

        results.into_iter().flatten().collect()
    }

    /// One call with the per-call retry policy applied. Exhausted retries
    /// degrade to `None`; they never surface as an error.
    async fn classify_with_retry(&self, query: &VariantQuery) -> Option<Value> {
        self.metrics.add_classify_query();
        let mut backoff = self.retry.initial_backoff;

        for attempt in 1..=self.retry.max_attempts {
            match self.service.classify(query).await {
                Ok(Some(value)) if !is_empty_value(&value) => return Some(value),
                Ok(_) => return None,
                Err(e) => {
                    if attempt == self.retry.max_attempts {
                        tracing::warn!(
                            "classification failed for {}:{} after {} attempts: {}",
                            query.chromosome,
                            query.position,
                            attempt,
                            e
                        );
                        self.metrics.add_classify_failure();
                        return None;
                    }
                    tracing::debug!(
                        "attempt {} failed for {}:{} ({}), retrying in {:?}",
                        attempt,
                        query.chromosome,
                        query.position,
                        e,
                        backoff
                    );
                    self.metrics.add_classify_retry();
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
        None
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
