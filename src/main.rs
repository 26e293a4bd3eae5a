//! ACMG Annotation Pipeline CLI
//!
//! Coordinates the annotation, classification, and prediction stages into a
//! final consensus ACMG table.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use acmg_pipeline::{build_runtime, run_pipeline, Config, Metrics, TimingStore};

#[derive(Parser)]
#[command(name = "acmg-pipeline")]
#[command(about = "Multi-stage ACMG variant annotation pipeline", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline on an input table
    Run {
        /// Primary input table
        input: PathBuf,

        /// Final consensus output table
        output: PathBuf,

        /// Optional annotated VCF export; enables the two-set track
        #[arg(long)]
        annotated: Option<PathBuf>,
    },

    /// Run only the checkpointed batch client against the prediction service
    BatchEnrich {
        /// Input table
        input: PathBuf,

        /// Output ledger (JSON list)
        output: PathBuf,
    },

    /// Run only the pooled client against the classification service
    ConcurrentEnrich {
        /// Input table
        input: PathBuf,

        /// Output JSON list of responses
        output: PathBuf,
    },

    /// Print the runtime estimate for an input table
    Estimate {
        /// Input table
        input: PathBuf,
    },

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            output,
            annotated,
        } => run_command(cli.config, input, annotated, output)?,

        Commands::BatchEnrich { input, output } => batch_enrich_command(cli.config, input, output)?,

        Commands::ConcurrentEnrich { input, output } => {
            concurrent_enrich_command(cli.config, input, output)?
        }

        Commands::Estimate { input } => estimate_command(cli.config, input)?,

        Commands::Validate => validate_command(cli.config)?,

        Commands::GenerateConfig { output } => generate_config_command(output)?,
    }

    Ok(())
}

fn load_config(config_path: &PathBuf) -> Result<Config> {
    if config_path.exists() {
        Config::from_file(config_path)
    } else {
        tracing::info!(
            "no config file at {}, using defaults",
            config_path.display()
        );
        Ok(Config::default())
    }
}

fn run_command(
    config_path: PathBuf,
    input: PathBuf,
    annotated: Option<PathBuf>,
    output: PathBuf,
) -> Result<()> {
    let config = load_config(&config_path)?;
    config.validate()?;

    let runtime = build_runtime(None)?;
    let stats = runtime.block_on(async {
        run_pipeline(config, &input, annotated.as_deref(), &output).await
    })?;

    tracing::info!("Pipeline complete: {}", stats);
    Ok(())
}

fn batch_enrich_command(config_path: PathBuf, input: PathBuf, output: PathBuf) -> Result<()> {
    use acmg_pipeline::enrich::{BatchEnricher, HttpPredictService};

    let config = load_config(&config_path)?;
    config.validate()?;

    let runtime = build_runtime(None)?;
    runtime.block_on(async {
        let service = Arc::new(HttpPredictService::new(
            config.predict.endpoint.clone(),
            config.predict.request_timeout(),
        )?);
        let enricher = BatchEnricher::new(service, config.predict.batch_size, Metrics::new());
        enricher.run(&input, &output).await
    })?;

    Ok(())
}

fn concurrent_enrich_command(config_path: PathBuf, input: PathBuf, output: PathBuf) -> Result<()> {
    use acmg_pipeline::enrich::{ConcurrentEnricher, HttpClassifyService, RetryPolicy};

    let config = load_config(&config_path)?;
    config.validate()?;

    let runtime = build_runtime(None)?;
    runtime.block_on(async {
        let service = Arc::new(HttpClassifyService::new(
            config.classify.endpoint.clone(),
            config.classify.build.clone(),
            config.classify.request_timeout(),
        )?);
        let enricher = ConcurrentEnricher::new(
            service,
            config.classify.max_workers,
            RetryPolicy {
                max_attempts: config.classify.max_retries,
                initial_backoff: config.classify.initial_backoff(),
            },
            Metrics::new(),
        );
        enricher.run(&input, &output).await
    })?;

    Ok(())
}

fn estimate_command(config_path: PathBuf, input: PathBuf) -> Result<()> {
    use acmg_pipeline::table;

    let config = load_config(&config_path)?;
    let rows = table::count_data_rows(&input);
    let estimate = TimingStore::new(&config.timing_log).estimate(rows);
    println!("{} rows, estimated runtime: {:.2} seconds", rows, estimate);
    Ok(())
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# ACMG Annotation Pipeline Configuration

# Directory for intermediate stage artifacts. Surviving artifacts are the
# crash-recovery mechanism: delete one to force its stage to rerun.
work_dir: "work"

# Timing history used for runtime estimates
timing_log: "pipeline_timing.json"

# === ANNOTATOR: external CLI annotation stage ===
annotator:
  # {input} and {output} are substituted with the artifact paths
  command: "python Diablo_annotate.py -i {input} -o {output}"

# === PREDICT: locally hosted prediction service ===
predict:
  endpoint: "http://localhost:8080/api/v1/predict/seqvar"
  port: 8080

  # Variants per ledger checkpoint
  batch_size: 100

  # How the service is launched and where it logs
  launch_command: "pipenv run uvicorn src.main:app --host 0.0.0.0 --port 8080"
  service_dir: "auto-acmg"
  log_file: "auto_acmg.log"

  # Startup polling and bounded port-conflict restarts
  poll_interval_secs: 1
  poll_budget: 30
  max_restarts: 3

  request_timeout_secs: 30

# === CLASSIFY: remote classification service ===
classify:
  endpoint: "http://wintervar.wglab.org/api_new.php"
  build: "hg38"

  # Concurrent in-flight queries
  max_workers: 10

  # Per-query retry policy for transient failures
  max_retries: 3
  backoff_ms: 300

  timeout_secs: 5
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::try_parse_from(["acmg-pipeline", "run", "in.tsv", "out.tsv"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_parse_run_with_annotated() {
        let cli = Cli::try_parse_from([
            "acmg-pipeline",
            "run",
            "in.tsv",
            "out.tsv",
            "--annotated",
            "annotated.tsv",
        ]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_parse_enrich_subcommands() {
        assert!(Cli::try_parse_from(["acmg-pipeline", "batch-enrich", "in.tsv", "out.json"]).is_ok());
        assert!(
            Cli::try_parse_from(["acmg-pipeline", "concurrent-enrich", "in.tsv", "out.json"])
                .is_ok()
        );
    }

    #[test]
    fn test_cli_parse_validate_with_config() {
        let cli = Cli::try_parse_from(["acmg-pipeline", "validate", "-c", "test.json"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["acmg-pipeline"]).is_err());
    }
}
