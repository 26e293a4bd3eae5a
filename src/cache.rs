//! Artifact-existence stage cache.
//!
//! Each pipeline stage produces exactly one artifact at a deterministic
//! path. The artifact's presence on disk is the sole completion signal:
//! no manifests, no checksums, no timestamps. Re-running the pipeline skips
//! every stage whose artifact survived, which is the intended crash-recovery
//! path.

use anyhow::Result;
use std::future::Future;
use std::path::Path;

/// Outcome of an `ensure` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The producing operation ran and the artifact now exists.
    Produced,
    /// The artifact already existed; the operation was not invoked.
    Skipped,
}

/// Run `produce` only if `artifact` does not already exist.
///
/// The operation is responsible for writing the artifact; a successful
/// return with no artifact on disk will cause downstream stages to fail
/// when they read it, which surfaces the bug rather than masking it.
pub async fn ensure_artifact<F, Fut>(artifact: &Path, produce: F) -> Result<StageOutcome>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    if artifact.exists() {
        tracing::info!("{} already exists, skipping", artifact.display());
        return Ok(StageOutcome::Skipped);
    }

    tracing::info!("{} missing, producing it", artifact.display());
    produce().await?;
    Ok(StageOutcome::Produced)
}
