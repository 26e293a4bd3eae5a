//! Pipeline orchestration: the stage chain and its run-level metrics.

mod metrics;
mod orchestrator;

pub use metrics::{Metrics, MetricsSnapshot};
pub use orchestrator::{ArtifactPaths, Orchestrator};
