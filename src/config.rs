//! Configuration for the ACMG annotation pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding intermediate stage artifacts
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Timing history file for runtime estimation
    #[serde(default = "default_timing_log")]
    pub timing_log: PathBuf,

    /// External annotator configuration
    #[serde(default)]
    pub annotator: AnnotatorConfig,

    /// Local prediction service configuration
    #[serde(default)]
    pub predict: PredictConfig,

    /// Remote classification service configuration
    #[serde(default)]
    pub classify: ClassifyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            timing_log: default_timing_log(),
            annotator: AnnotatorConfig::default(),
            predict: PredictConfig::default(),
            classify: ClassifyConfig::default(),
        }
    }
}

/// External CLI annotator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatorConfig {
    /// Command template; `{input}` and `{output}` are substituted with the
    /// actual artifact paths.
    #[serde(default = "default_annotator_command")]
    pub command: String,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            command: default_annotator_command(),
        }
    }
}

/// Local prediction service: endpoint, batch sizing, and lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictConfig {
    /// Prediction endpoint queried per variant
    #[serde(default = "default_predict_endpoint")]
    pub endpoint: String,

    /// Port the service binds; used for conflict resolution
    #[serde(default = "default_predict_port")]
    pub port: u16,

    /// Variants per ledger flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Shell command that launches the service
    #[serde(default = "default_launch_command")]
    pub launch_command: String,

    /// Working directory for the launch command
    #[serde(default = "default_service_dir")]
    pub service_dir: Option<PathBuf>,

    /// Log file the service writes its startup markers to
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// Seconds between startup log polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Number of polls before startup is declared failed
    #[serde(default = "default_poll_budget")]
    pub poll_budget: usize,

    /// Relaunches allowed after port conflicts
    #[serde(default = "default_max_restarts")]
    pub max_restarts: usize,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            endpoint: default_predict_endpoint(),
            port: default_predict_port(),
            batch_size: default_batch_size(),
            launch_command: default_launch_command(),
            service_dir: default_service_dir(),
            log_file: default_log_file(),
            poll_interval_secs: default_poll_interval_secs(),
            poll_budget: default_poll_budget(),
            max_restarts: default_max_restarts(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Remote classification service: endpoint, pool width, retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyConfig {
    /// Classification endpoint
    #[serde(default = "default_classify_endpoint")]
    pub endpoint: String,

    /// Genome build sent with each query
    #[serde(default = "default_build")]
    pub build: String,

    /// Concurrent in-flight queries
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Attempts per query before the row is dropped
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial backoff in milliseconds, doubled per retry
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Per-request timeout in seconds
    #[serde(default = "default_classify_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            endpoint: default_classify_endpoint(),
            build: default_build(),
            max_workers: default_max_workers(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            timeout_secs: default_classify_timeout_secs(),
        }
    }
}

impl PredictConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ClassifyConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // Try YAML first (it's a superset of JSON)
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.predict.batch_size == 0 {
            anyhow::bail!("Batch size must be > 0");
        }
        if self.classify.max_workers == 0 {
            anyhow::bail!("Classification pool width must be > 0");
        }
        if self.classify.max_retries == 0 {
            anyhow::bail!("Classification retry count must be > 0");
        }
        if self.predict.poll_budget == 0 {
            anyhow::bail!("Service poll budget must be > 0");
        }
        if !self.annotator.command.contains("{input}")
            || !self.annotator.command.contains("{output}")
        {
            anyhow::bail!("Annotator command must contain {{input}} and {{output}} placeholders");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_work_dir() -> PathBuf { PathBuf::from("work") }
fn default_timing_log() -> PathBuf { PathBuf::from("pipeline_timing.json") }
fn default_annotator_command() -> String {
    "python Diablo_annotate.py -i {input} -o {output}".to_string()
}
fn default_predict_endpoint() -> String {
    "http://localhost:8080/api/v1/predict/seqvar".to_string()
}
fn default_predict_port() -> u16 { 8080 }
fn default_batch_size() -> usize { 100 }
fn default_launch_command() -> String {
    "pipenv run uvicorn src.main:app --host 0.0.0.0 --port 8080".to_string()
}
fn default_service_dir() -> Option<PathBuf> { Some(PathBuf::from("auto-acmg")) }
fn default_log_file() -> PathBuf { PathBuf::from("auto_acmg.log") }
fn default_poll_interval_secs() -> u64 { 1 }
fn default_poll_budget() -> usize { 30 }
fn default_max_restarts() -> usize { 3 }
fn default_request_timeout_secs() -> u64 { 30 }
fn default_classify_endpoint() -> String {
    "http://wintervar.wglab.org/api_new.php".to_string()
}
fn default_build() -> String { "hg38".to_string() }
fn default_max_workers() -> usize { 10 }
fn default_max_retries() -> usize { 3 }
fn default_backoff_ms() -> u64 { 300 }
fn default_classify_timeout_secs() -> u64 { 5 }
