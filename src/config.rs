//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.pitchlens.toml` files.

use crate::cli::OutputFormat;
use crate::models::StageName;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default config file name, looked up in the current directory.
pub const CONFIG_FILE_NAME: &str = ".pitchlens.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Capability (LLM endpoint) settings.
    #[serde(default)]
    pub capability: CapabilityConfig,

    /// Stage timeouts, retries and the job deadline.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Report scoring settings.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Document intake settings.
    #[serde(default)]
    pub documents: DocumentsConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Report format.
    #[serde(default)]
    pub format: OutputFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
            format: OutputFormat::default(),
        }
    }
}

fn default_output() -> String {
    "pitchlens_report.md".to_string()
}

/// Settings for the reasoning capability endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// Ollama-compatible API URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// HTTP request timeout in seconds. Should not be shorter than the stage timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_request_timeout() -> u64 {
    180
}

/// Pipeline timing and retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Bound on extraction plus analysis for one job.
    #[serde(default = "default_job_deadline")]
    pub job_deadline_seconds: u64,

    /// Timeout of a single capability attempt.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_seconds: u64,

    /// Attempts per stage, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles afterwards.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Upper bound on a single backoff delay.
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            job_deadline_seconds: default_job_deadline(),
            stage_timeout_seconds: default_stage_timeout(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

impl PipelineConfig {
    pub fn job_deadline(&self) -> Duration {
        Duration::from_secs(self.job_deadline_seconds)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_seconds)
    }

    /// Reject settings the controller cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.stage_timeout_seconds == 0 {
            return Err("stage_timeout_seconds must be at least 1".to_string());
        }
        if self.job_deadline_seconds < self.stage_timeout_seconds {
            return Err(
                "job_deadline_seconds must not be shorter than stage_timeout_seconds".to_string(),
            );
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err("backoff_max_ms must not be smaller than backoff_base_ms".to_string());
        }
        Ok(())
    }
}

fn default_job_deadline() -> u64 {
    600
}

fn default_stage_timeout() -> u64 {
    120
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    8_000
}

/// Composite score weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_financial_weight")]
    pub financial_weight: f64,

    #[serde(default = "default_risk_weight")]
    pub risk_weight: f64,

    #[serde(default = "default_market_weight")]
    pub market_weight: f64,

    /// Dimensions without which the recommendation is "insufficient data".
    #[serde(default = "default_critical_dimensions")]
    pub critical_dimensions: Vec<StageName>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            financial_weight: default_financial_weight(),
            risk_weight: default_risk_weight(),
            market_weight: default_market_weight(),
            critical_dimensions: default_critical_dimensions(),
        }
    }
}

fn default_financial_weight() -> f64 {
    0.30
}

fn default_risk_weight() -> f64 {
    0.25
}

fn default_market_weight() -> f64 {
    0.20
}

fn default_critical_dimensions() -> Vec<StageName> {
    vec![StageName::Financial]
}

/// Document intake settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentsConfig {
    /// Accepted (text) document extensions.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Maximum document size in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Maximum documents per submission.
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            max_file_size: default_max_file_size(),
            max_documents: default_max_documents(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    vec!["txt", "md", "markdown", "csv", "json", "tsv"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_file_size() -> u64 {
    2 * 1024 * 1024 // 2MB
}

fn default_max_documents() -> usize {
    20
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// Only values the CLI actually provides override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.capability.model = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.capability.base_url = url.clone();
        }
        if let Some(temperature) = args.temperature {
            self.capability.temperature = temperature;
        }

        if let Some(deadline) = args.deadline {
            self.pipeline.job_deadline_seconds = deadline;
        }
        if let Some(timeout) = args.stage_timeout {
            self.pipeline.stage_timeout_seconds = timeout;
        }
        if let Some(attempts) = args.max_attempts {
            self.pipeline.max_attempts = attempts;
        }

        if let Some(ref extensions) = args.extensions {
            self.documents.extensions = extensions.clone();
        }

        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(format) = args.format {
            self.general.format = format;
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
