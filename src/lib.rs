//! ACMG Annotation Pipeline
//!
//! Coordination engine for a multi-stage genomic variant annotation chain:
//! an external CLI annotator, a remote classification service, and a locally
//! hosted prediction service, converging in a consensus ACMG classification
//! table.
//!
//! # Architecture
//!
//! - **Cache**: artifact-existence stage caching for crash recovery
//! - **Variant**: schema detection and canonical variant identifiers
//! - **Enrich**: batch (checkpointed) and concurrent (pooled) clients
//! - **Service**: lifecycle supervision of the local prediction service
//! - **Pipeline**: the stage orchestrator with run metrics
//!
//! # Usage
//!
//! ```no_run
//! use acmg_pipeline::{run_pipeline, Config};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     run_pipeline(config, Path::new("variants.tsv"), None, Path::new("final.tsv")).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod classify;
pub mod config;
pub mod convert;
pub mod enrich;
pub mod error;
pub mod merge;
pub mod pipeline;
pub mod service;
pub mod table;
pub mod timing;
pub mod variant;

pub use config::Config;
pub use error::PipelineError;
pub use pipeline::{Metrics, MetricsSnapshot, Orchestrator};
pub use timing::TimingStore;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// Run the full annotation pipeline with the given configuration.
pub async fn run_pipeline(
    config: Config,
    input: &Path,
    annotated_vcf: Option<&Path>,
    final_output: &Path,
) -> Result<MetricsSnapshot> {
    config.validate()?;

    tracing::info!("Starting ACMG annotation pipeline");

    let metrics = Metrics::new();
    let orchestrator = Orchestrator::new(Arc::new(config), metrics.clone())?;
    orchestrator.run(input, annotated_vcf, final_output).await?;

    Ok(metrics.snapshot())
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}
