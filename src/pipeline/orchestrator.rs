//! The stage orchestrator: runs the full annotation chain over one input.
//!
//! Every stage writes exactly one artifact at a deterministic path under the
//! working directory, and is wrapped by [`ensure_artifact`] so a rerun after
//! a crash resumes from the last surviving artifact. A present secondary
//! (annotated VCF) input selects the two-set track; without it only the
//! pathogenic set flows through.

use crate::cache::{ensure_artifact, StageOutcome};
use crate::classify;
use crate::config::Config;
use crate::convert;
use crate::enrich::{
    BatchEnricher, ClassifyService, ConcurrentEnricher, Dataset, HttpClassifyService,
    HttpPredictService, PredictService, RetryPolicy,
};
use crate::error::PipelineError;
use crate::merge;
use crate::pipeline::Metrics;
use crate::service::{ProcessControl, ServiceControl, Supervisor, SupervisorPolicy};
use crate::table;
use crate::timing::TimingStore;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Deterministic artifact locations for one input file.
pub struct ArtifactPaths {
    work_dir: PathBuf,
    base: String,
}

impl ArtifactPaths {
    pub fn new(work_dir: &Path, input: &Path) -> Result<Self> {
        let base = input
            .file_stem()
            .and_then(|s| s.to_str())
            .map(String::from)
            .with_context(|| format!("input {} has no usable file name", input.display()))?;
        Ok(Self {
            work_dir: work_dir.to_path_buf(),
            base,
        })
    }

    fn path(&self, suffix: &str) -> PathBuf {
        self.work_dir.join(format!("{}_{}", self.base, suffix))
    }

    pub fn annotated(&self) -> PathBuf {
        self.path("annotated.tsv")
    }

    pub fn merged_set1(&self) -> PathBuf {
        self.path("merged_set1.tsv")
    }

    pub fn pathogenic_set2(&self) -> PathBuf {
        self.path("pathogenic_set2.tsv")
    }

    /// The table a dataset's enrichment stages start from.
    pub fn set_table(&self, dataset: Dataset) -> PathBuf {
        match dataset {
            Dataset::Set1 => self.merged_set1(),
            Dataset::Set2 => self.pathogenic_set2(),
        }
    }

    pub fn classify_json(&self, dataset: Dataset) -> PathBuf {
        self.path(&format!("wintervar_{}.json", dataset.tag()))
    }

    pub fn merged_intervar(&self, dataset: Dataset) -> PathBuf {
        self.path(&format!("merged_{}_intervar.tsv", dataset.tag()))
    }

    pub fn predict_ledger(&self, dataset: Dataset) -> PathBuf {
        self.path(&format!("auto_acmg_{}.json", dataset.tag()))
    }

    pub fn predict_table(&self, dataset: Dataset) -> PathBuf {
        self.path(&format!("auto_acmg_{}.tsv", dataset.tag()))
    }
}

/// Drives the stage chain. Transports and the service control are injected
/// so the whole chain can run against simulated endpoints.
pub struct Orchestrator {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    predict_service: Arc<dyn PredictService>,
    classify_service: Arc<dyn ClassifyService>,
    service_control: Arc<dyn ServiceControl>,
}

impl Orchestrator {
    /// Orchestrator with real HTTP transports and process control.
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>) -> Result<Self> {
        let predict_service = Arc::new(HttpPredictService::new(
            config.predict.endpoint.clone(),
            config.predict.request_timeout(),
        )?);
        let classify_service = Arc::new(HttpClassifyService::new(
            config.classify.endpoint.clone(),
            config.classify.build.clone(),
            config.classify.request_timeout(),
        )?);
        let service_control = Arc::new(ProcessControl::new(
            config.predict.launch_command.clone(),
            config.predict.service_dir.clone(),
            config.predict.log_file.clone(),
            config.predict.port,
        ));
        Ok(Self::with_services(
            config,
            metrics,
            predict_service,
            classify_service,
            service_control,
        ))
    }

    /// Orchestrator with injected transports, used by tests.
    pub fn with_services(
        config: Arc<Config>,
        metrics: Arc<Metrics>,
        predict_service: Arc<dyn PredictService>,
        classify_service: Arc<dyn ClassifyService>,
        service_control: Arc<dyn ServiceControl>,
    ) -> Self {
        Self {
            config,
            metrics,
            predict_service,
            classify_service,
            service_control,
        }
    }

    /// Run the full chain for `input`, writing the final classification
    /// table to `final_output`.
    pub async fn run(
        &self,
        input: &Path,
        annotated_vcf: Option<&Path>,
        final_output: &Path,
    ) -> Result<()> {
        if !input.exists() {
            return Err(PipelineError::InputMissing {
                path: input.to_path_buf(),
            }
            .into());
        }

        std::fs::create_dir_all(&self.config.work_dir)
            .with_context(|| format!("creating work dir {}", self.config.work_dir.display()))?;

        let rows = table::count_data_rows(input);
        let timing = TimingStore::new(&self.config.timing_log);
        tracing::info!(
            "input has {} rows, estimated runtime {:.2}s",
            rows,
            timing.estimate(rows)
        );

        let paths = ArtifactPaths::new(&self.config.work_dir, input)?;
        let datasets = if annotated_vcf.is_some() {
            vec![Dataset::Set1, Dataset::Set2]
        } else {
            vec![Dataset::Set2]
        };

        let started = Instant::now();

        self.annotate(input, &paths).await?;
        self.split(annotated_vcf, &paths).await?;
        for dataset in &datasets {
            self.classify_enrich(*dataset, &paths).await?;
            self.classify_merge(*dataset, &paths).await?;
        }
        self.predict(&datasets, &paths).await?;
        for dataset in &datasets {
            self.predict_table(*dataset, &paths).await?;
        }
        self.finalize(&datasets, &paths, final_output).await?;

        let elapsed = started.elapsed().as_secs_f64();
        timing.record(rows, elapsed)?;
        tracing::info!(
            "pipeline finished in {:.2}s, final output {}",
            elapsed,
            final_output.display()
        );
        tracing::info!("{}", self.metrics.snapshot());
        Ok(())
    }

    fn track(&self, outcome: StageOutcome) {
        match outcome {
            StageOutcome::Produced => self.metrics.add_stage_produced(),
            StageOutcome::Skipped => self.metrics.add_stage_skipped(),
        }
    }

    /// Stage 1: external CLI annotation of the primary input.
    async fn annotate(&self, input: &Path, paths: &ArtifactPaths) -> Result<()> {
        let artifact = paths.annotated();
        let outcome = ensure_artifact(&artifact, || async {
            let command = self
                .config
                .annotator
                .command
                .replace("{input}", &input.display().to_string())
                .replace("{output}", &artifact.display().to_string());
            run_shell(&command, "annotate").await
        })
        .await?;
        self.track(outcome);
        Ok(())
    }

    /// Stage 2: carve the annotation into the pathogenic set and, on the
    /// two-set track, the common set.
    async fn split(&self, annotated_vcf: Option<&Path>, paths: &ArtifactPaths) -> Result<()> {
        let annotation_path = paths.annotated();

        let outcome = match annotated_vcf {
            Some(secondary) => {
                // Both set tables come out of one producing operation; the
                // common-set artifact is the completion signal.
                ensure_artifact(&paths.merged_set1(), || async {
                    let annotation = table::read_tsv(&annotation_path)?;
                    let pathogenic = merge::pathogenic_subset(&annotation)?;
                    table::write_tsv(&paths.pathogenic_set2(), &pathogenic)?;

                    let annotated = table::read_tsv(secondary)?;
                    let common = merge::common_subset(&annotated, &annotation)?;
                    table::write_tsv(&paths.merged_set1(), &common)?;
                    Ok(())
                })
                .await?
            }
            None => {
                ensure_artifact(&paths.pathogenic_set2(), || async {
                    let annotation = table::read_tsv(&annotation_path)?;
                    let pathogenic = merge::pathogenic_subset(&annotation)?;
                    table::write_tsv(&paths.pathogenic_set2(), &pathogenic)?;
                    Ok(())
                })
                .await?
            }
        };
        self.track(outcome);
        Ok(())
    }

    /// Stage 3: concurrent classification queries for one set.
    async fn classify_enrich(&self, dataset: Dataset, paths: &ArtifactPaths) -> Result<()> {
        let artifact = paths.classify_json(dataset);
        let outcome = ensure_artifact(&artifact, || async {
            let enricher = ConcurrentEnricher::new(
                self.classify_service.clone(),
                self.config.classify.max_workers,
                RetryPolicy {
                    max_attempts: self.config.classify.max_retries,
                    initial_backoff: self.config.classify.initial_backoff(),
                },
                self.metrics.clone(),
            );
            enricher.run(&paths.set_table(dataset), &artifact).await
        })
        .await?;
        self.track(outcome);
        Ok(())
    }

    /// Stage 4: flatten the classification JSON and join it onto the set.
    async fn classify_merge(&self, dataset: Dataset, paths: &ArtifactPaths) -> Result<()> {
        let artifact = paths.merged_intervar(dataset);
        let outcome = ensure_artifact(&artifact, || async {
            let responses = convert::load_json_rows(&paths.classify_json(dataset));
            let intervar = merge::intervar_table_from_json(&responses);
            let set_table = table::read_tsv(&paths.set_table(dataset))?;
            let joined = merge::join_intervar(&set_table, &intervar, dataset);
            table::write_tsv(&artifact, &joined)
        })
        .await?;
        self.track(outcome);
        Ok(())
    }

    /// Stage 5: bring the prediction service up if any ledger is missing,
    /// then run the batch client per set.
    async fn predict(&self, datasets: &[Dataset], paths: &ArtifactPaths) -> Result<()> {
        let pending: Vec<Dataset> = datasets
            .iter()
            .copied()
            .filter(|ds| !paths.predict_ledger(*ds).exists())
            .collect();

        if pending.is_empty() {
            for _ in datasets {
                self.metrics.add_stage_skipped();
            }
            tracing::info!("all prediction ledgers present, service not started");
            return Ok(());
        }

        let supervisor = Supervisor::new(
            self.service_control.clone(),
            SupervisorPolicy {
                poll_interval: self.config.predict.poll_interval(),
                poll_budget: self.config.predict.poll_budget,
                max_restarts: self.config.predict.max_restarts,
            },
        );
        supervisor.start().await?;

        for dataset in datasets {
            let artifact = paths.predict_ledger(*dataset);
            let outcome = ensure_artifact(&artifact, || async {
                let enricher = BatchEnricher::new(
                    self.predict_service.clone(),
                    self.config.predict.batch_size,
                    self.metrics.clone(),
                );
                enricher
                    .run(&paths.merged_intervar(*dataset), &artifact)
                    .await
            })
            .await?;
            self.track(outcome);
        }
        Ok(())
    }

    /// Stage 6: flatten a prediction ledger to a table.
    async fn predict_table(&self, dataset: Dataset, paths: &ArtifactPaths) -> Result<()> {
        let artifact = paths.predict_table(dataset);
        let outcome = ensure_artifact(&artifact, || async {
            convert::json_file_to_tsv(&paths.predict_ledger(dataset), &artifact)
        })
        .await?;
        self.track(outcome);
        Ok(())
    }

    /// Stage 7: consensus classification over the fully enriched sets.
    async fn finalize(
        &self,
        datasets: &[Dataset],
        paths: &ArtifactPaths,
        final_output: &Path,
    ) -> Result<()> {
        let outcome = ensure_artifact(final_output, || async {
            let read_set = |dataset: Dataset| -> table::Table {
                if datasets.contains(&dataset) {
                    table::read_tsv(&paths.predict_table(dataset)).unwrap_or_default()
                } else {
                    table::Table::empty()
                }
            };
            let result = classify::finalize(&read_set(Dataset::Set1), &read_set(Dataset::Set2));
            table::write_tsv(final_output, &result)
        })
        .await?;
        self.track(outcome);
        Ok(())
    }
}

/// Run a shell command to completion; a non-zero exit fails the stage.
async fn run_shell(command: &str, stage: &str) -> Result<()> {
    tracing::info!("executing: {}", command);
    let status = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .status()
        .await
        .with_context(|| format!("spawning command for stage {}", stage))?;

    if !status.success() {
        return Err(PipelineError::StageFailed {
            stage: stage.to_string(),
            reason: format!("command exited with {}", status),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::{QueryError, VariantQuery};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct FakePredict {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PredictService for FakePredict {
        async fn predict(&self, variant_id: &str) -> Result<Option<Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(json!({
                "prediction_criteria": { "pm2": { "prediction": "Applicable" } },
                "queried": variant_id
            })))
        }
    }

    struct FakeClassify {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ClassifyService for FakeClassify {
        async fn classify(&self, query: &VariantQuery) -> Result<Option<Value>, QueryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(json!({
                "Chromosome": query.chromosome,
                "Position": query.position,
                "Ref_allele": query.ref_allele,
                "Alt_allele": query.alt_allele,
                "Intervar": "Pathogenic",
                "PVS1": 1
            })))
        }
    }

    struct ReadyService;

    #[async_trait]
    impl ServiceControl for ReadyService {
        async fn launch(&self) -> Result<()> {
            Ok(())
        }

        async fn read_log(&self) -> Result<String> {
            Ok("INFO: Application startup complete.".to_string())
        }

        async fn port_holders(&self) -> Result<Vec<u32>> {
            Ok(vec![])
        }

        async fn terminate(&self, _pid: u32) -> Result<()> {
            Ok(())
        }
    }

    fn test_config(dir: &Path) -> Arc<Config> {
        let mut config = Config::default();
        config.work_dir = dir.join("work");
        config.timing_log = dir.join("timing.json");
        // The annotator just copies the input through.
        config.annotator.command = "cp {input} {output}".to_string();
        config.predict.poll_interval_secs = 0;
        Arc::new(config)
    }

    fn write_input(dir: &Path) -> PathBuf {
        let input = dir.join("variants.tsv");
        std::fs::write(
            &input,
            "chrom\tpos\tref_base\talt_base\tACMG\n\
             chr1\t100\tA\tG\tPathogenic\n\
             chr2\t200\tC\tT\tBenign\n\
             chr3\t300\tG\tA\tLikely Pathogenic\n",
        )
        .unwrap();
        input
    }

    fn orchestrator(config: Arc<Config>) -> (Orchestrator, Arc<FakePredict>, Arc<FakeClassify>) {
        let predict = Arc::new(FakePredict {
            calls: AtomicUsize::new(0),
        });
        let classify = Arc::new(FakeClassify {
            calls: AtomicUsize::new(0),
        });
        let orchestrator = Orchestrator::with_services(
            config,
            Metrics::new(),
            predict.clone(),
            classify.clone(),
            Arc::new(ReadyService),
        );
        (orchestrator, predict, classify)
    }

    #[tokio::test]
    async fn test_single_set_track_end_to_end() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let input = write_input(dir.path());
        let output = dir.path().join("final.tsv");

        let (orchestrator, predict, classify) = orchestrator(config.clone());
        orchestrator.run(&input, None, &output).await.unwrap();

        // Two of three rows are pathogenic.
        assert_eq!(classify.calls.load(Ordering::SeqCst), 2);
        assert_eq!(predict.calls.load(Ordering::SeqCst), 2);

        let paths = ArtifactPaths::new(&config.work_dir, &input).unwrap();
        assert!(paths.pathogenic_set2().exists());
        assert!(paths.classify_json(Dataset::Set2).exists());
        assert!(paths.merged_intervar(Dataset::Set2).exists());
        assert!(paths.predict_ledger(Dataset::Set2).exists());
        assert!(!paths.merged_set1().exists());

        let result = table::read_tsv(&output).unwrap();
        assert_eq!(result.len(), 2);
        assert!(result.headers.contains(&"Final_PVS1".to_string()));
        assert!(result.headers.contains(&"Final_PM2".to_string()));
        // Consensus picked up both the classification and prediction sources.
        assert_eq!(result.rows[0]["Final_PVS1"], json!("1"));
        assert_eq!(result.rows[0]["Final_PM2"], json!("1"));
    }

    #[tokio::test]
    async fn test_rerun_skips_all_stages() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let input = write_input(dir.path());
        let output = dir.path().join("final.tsv");

        let (first, predict, classify) = orchestrator(config.clone());
        first.run(&input, None, &output).await.unwrap();
        let predict_calls = predict.calls.load(Ordering::SeqCst);
        let classify_calls = classify.calls.load(Ordering::SeqCst);

        let (second, predict2, classify2) = orchestrator(config);
        second.run(&input, None, &output).await.unwrap();

        assert_eq!(predict2.calls.load(Ordering::SeqCst), 0);
        assert_eq!(classify2.calls.load(Ordering::SeqCst), 0);
        assert!(predict_calls > 0 && classify_calls > 0);
        let snapshot = second.metrics.snapshot();
        assert_eq!(snapshot.stages_produced, 0);
        assert!(snapshot.stages_skipped >= 6);
    }

    #[tokio::test]
    async fn test_two_set_track_produces_both_sets() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let input = write_input(dir.path());
        let output = dir.path().join("final.tsv");

        let annotated_vcf = dir.path().join("annotated.tsv");
        std::fs::write(
            &annotated_vcf,
            "CHROMOSOME\tCHROMOSOME_POSITION_HG38\tREFERENCE_ALLELE\tRISK_ALLELE\tGENE\n\
             chr1\t100\tA\tG\tBRCA1\n",
        )
        .unwrap();

        let (orchestrator, _predict, _classify) = orchestrator(config.clone());
        orchestrator
            .run(&input, Some(&annotated_vcf), &output)
            .await
            .unwrap();

        let paths = ArtifactPaths::new(&config.work_dir, &input).unwrap();
        assert!(paths.merged_set1().exists());
        assert!(paths.pathogenic_set2().exists());
        assert!(paths.predict_table(Dataset::Set1).exists());
        assert!(paths.predict_table(Dataset::Set2).exists());
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_missing_input_is_fatal() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let (orchestrator, _, _) = orchestrator(config);

        let result = orchestrator
            .run(
                &dir.path().join("nope.tsv"),
                None,
                &dir.path().join("final.tsv"),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_timing_recorded_after_run() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let input = write_input(dir.path());
        let output = dir.path().join("final.tsv");

        let (orchestrator, _, _) = orchestrator(config.clone());
        orchestrator.run(&input, None, &output).await.unwrap();

        let history = TimingStore::new(&config.timing_log).load();
        assert!(history.contains_key("3"));
    }

    #[test]
    fn test_artifact_paths_derive_from_stem() {
        let paths = ArtifactPaths::new(Path::new("/work"), Path::new("/data/sample.vcf")).unwrap();
        assert_eq!(
            paths.annotated(),
            PathBuf::from("/work/sample_annotated.tsv")
        );
        assert_eq!(
            paths.classify_json(Dataset::Set2),
            PathBuf::from("/work/sample_wintervar_set2.json")
        );
        assert_eq!(
            paths.predict_table(Dataset::Set1),
            PathBuf::from("/work/sample_auto_acmg_set1.tsv")
        );
    }
}
