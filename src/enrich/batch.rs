//! Checkpointed batch client for the local prediction service.
//!
//! Identifiers pending enrichment are partitioned into fixed-size batches.
//! Within a batch, queries run strictly sequentially; batching exists for
//! checkpoint granularity, not throughput. The full ledger is flushed to
//! disk after every batch, so a crash loses at most the in-flight batch.

use crate::convert::flatten_json;
use crate::enrich::ledger::{Ledger, ID_COLUMN};
use crate::error::PipelineError;
use crate::pipeline::Metrics;
use crate::table;
use crate::variant::{self, Schema};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Transport to the prediction service. `Ok(None)` means the service had no
/// enrichment for the identifier; errors are treated the same way by the
/// batch client, never aborting a batch.
#[async_trait]
pub trait PredictService: Send + Sync {
    async fn predict(&self, variant_id: &str) -> Result<Option<Value>>;
}

/// HTTP transport: GET with the canonical identifier as a query parameter.
pub struct HttpPredictService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPredictService {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl PredictService for HttpPredictService {
    async fn predict(&self, variant_id: &str) -> Result<Option<Value>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("variant_name", variant_id)])
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::warn!(
                "prediction service returned {} for {}",
                response.status(),
                variant_id
            );
            return Ok(None);
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            tracing::warn!("empty response for {}", variant_id);
            return Ok(None);
        }

        match serde_json::from_str::<Value>(&body) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!("undecodable response for {}: {}", variant_id, e);
                Ok(None)
            }
        }
    }
}

/// Resumable batch enrichment over an input table.
pub struct BatchEnricher {
    service: Arc<dyn PredictService>,
    batch_size: usize,
    metrics: Arc<Metrics>,
}

impl BatchEnricher {
    pub fn new(service: Arc<dyn PredictService>, batch_size: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            service,
            batch_size,
            metrics,
        }
    }

    /// Ensure `ledger_path` holds a merged record for every identifier in
    /// `input`, resuming from whatever a prior run left behind.
    ///
    /// An unrecognized schema or an empty input is not an error: an empty
    /// valid ledger is written and the call succeeds. Only a missing or
    /// unreadable input is fatal.
    pub async fn run(&self, input: &Path, ledger_path: &Path) -> Result<()> {
        if !input.exists() {
            return Err(PipelineError::InputMissing {
                path: input.to_path_buf(),
            }
            .into());
        }

        let input_table = table::read_tsv(input)?;
        if input_table.headers.is_empty() {
            tracing::warn!(
                "{} is empty or headerless, writing an empty ledger",
                input.display()
            );
            Ledger::persist_empty(ledger_path)?;
            return Ok(());
        }

        let schema = variant::detect_schema(&input_table.headers);
        if schema == Schema::Unrecognized {
            tracing::warn!(
                "{} matches neither known schema (headers: {:?}), writing an empty ledger",
                input.display(),
                input_table.headers
            );
            Ledger::persist_empty(ledger_path)?;
            return Ok(());
        }

        // Identifier -> row; duplicates collapse, last writer wins.
        let mut id_to_row: Map<String, Value> = Map::new();
        for row in input_table.rows {
            if let Some(id) = variant::identifier_for_row(schema, &row) {
                let mut row = row;
                row.insert(ID_COLUMN.to_string(), Value::String(id.clone()));
                id_to_row.insert(id, Value::Object(row));
            }
        }

        if id_to_row.is_empty() {
            tracing::warn!("no valid variants in {}, writing an empty ledger", input.display());
            Ledger::persist_empty(ledger_path)?;
            return Ok(());
        }

        let mut ledger = Ledger::load(ledger_path);
        let pending: Vec<String> = id_to_row
            .keys()
            .filter(|id| !ledger.contains(id))
            .cloned()
            .collect();

        tracing::info!(
            "{} unique identifiers, {} pending queries",
            id_to_row.len(),
            pending.len()
        );

        let total_batches = pending.len().div_ceil(self.batch_size);
        for (batch_idx, batch) in pending.chunks(self.batch_size).enumerate() {
            tracing::info!("processing batch {}/{}", batch_idx + 1, total_batches);

            for id in batch {
                self.metrics.add_predict_query();
                let response = match self.service.predict(id).await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("query failed for {}: {}", id, e);
                        None
                    }
                };

                let mut row = id_to_row
                    .get(id)
                    .and_then(|v| v.as_object())
                    .cloned()
                    .unwrap_or_default();

                match response.as_ref().and_then(|v| v.as_object()) {
                    Some(obj) if !obj.is_empty() => {
                        for (key, value) in flatten_json(obj) {
                            row.insert(key, value);
                        }
                    }
                    _ => self.metrics.add_predict_miss(),
                }

                ledger.insert(id, row);
            }

            // Fully flushed before the next batch starts; this write is the
            // resumption contract.
            ledger.persist(ledger_path)?;
            self.metrics.add_ledger_flush();
            tracing::info!("saved {} entries to {}", ledger.len(), ledger_path.display());
        }

        if total_batches == 0 {
            // Nothing pending, but the ledger must still exist on disk.
            ledger.persist(ledger_path)?;
        }

        Ok(())
    }
}
