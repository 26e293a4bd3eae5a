//! Enrichment clients for the two external annotation services.
//!
//! The batch client queries the locally hosted prediction service
//! sequentially with checkpointed, resumable ledger writes. The concurrent
//! client queries the remote classification service through a bounded worker
//! pool with per-call retry.

mod batch;
mod concurrent;
mod ledger;

pub use batch::{BatchEnricher, HttpPredictService, PredictService};
pub use concurrent::{
    ClassifyService, ConcurrentEnricher, Dataset, HttpClassifyService, QueryError, RetryPolicy,
    VariantQuery,
};
pub use ledger::{Ledger, ID_COLUMN};
