//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation. Unset options fall back to the config file.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// PitchLens - AI due diligence for startup pitch materials
///
/// Runs extraction, financial, risk and market analysis and a final
/// synthesis over pitch decks and memos using a local Ollama model, and
/// writes an investment report.
///
/// Examples:
///   pitchlens --docs deck.md financials.csv
///   pitchlens --docs ./dataroom --company "TechFlow AI" --format json
///   pitchlens --docs ./dataroom --dry-run
///   pitchlens --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Documents or directories to analyze
    ///
    /// Directories are walked recursively for supported text formats.
    #[arg(
        short,
        long,
        value_name = "PATH",
        num_args = 1..,
        required_unless_present = "init_config"
    )]
    pub docs: Vec<PathBuf>,

    /// Company name hint
    ///
    /// The extraction stage determines the actual name.
    #[arg(long, value_name = "NAME")]
    pub company: Option<String>,

    /// Additional context for the analysts
    #[arg(long, value_name = "TEXT")]
    pub writeup: Option<String>,

    /// Ollama model to use for analysis
    ///
    /// Can also be set via PITCHLENS_MODEL env var or .pitchlens.toml config.
    #[arg(short, long, env = "PITCHLENS_MODEL")]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, value_name = "URL", env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Temperature for LLM responses (0.0 - 1.0)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Job deadline in seconds
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// Per-attempt stage timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub stage_timeout: Option<u64>,

    /// Attempts per stage, including the first
    #[arg(long, value_name = "COUNT")]
    pub max_attempts: Option<u32>,

    /// Document extensions to accept (comma-separated)
    ///
    /// Example: --extensions md,txt
    #[arg(long, value_name = "EXTS", value_delimiter = ',')]
    pub extensions: Option<Vec<String>>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .pitchlens.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: resolve and validate documents without calling the model
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .pitchlens.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.docs.is_empty() {
            return Err("At least one document is required (--docs)".to_string());
        }

        if let Some(ref company) = self.company {
            if company.trim().is_empty() {
                return Err("Company name must not be blank".to_string());
            }
        }

        // Not needed for dry-run
        if !self.dry_run {
            if let Some(ref url) = self.ollama_url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
                }
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=1.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 1.0".to_string());
            }
        }

        if self.deadline == Some(0) {
            return Err("Deadline must be at least 1 second".to_string());
        }
        if self.stage_timeout == Some(0) {
            return Err("Stage timeout must be at least 1 second".to_string());
        }
        if self.max_attempts == Some(0) {
            return Err("Max attempts must be at least 1".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            docs: vec![PathBuf::from("deck.md")],
            company: None,
            writeup: None,
            model: None,
            ollama_url: Some("http://localhost:11434".to_string()),
            temperature: None,
            deadline: None,
            stage_timeout: None,
            max_attempts: None,
            extensions: None,
            output: None,
            format: None,
            config: None,
            verbose: false,
            quiet: false,
            dry_run: false,
            init_config: false,
        }
    }

    #[test]
    fn test_parse_from_command_line() {
        let args = Args::try_parse_from([
            "pitchlens",
            "--docs",
            "deck.md",
            "memo.txt",
            "--format",
            "json",
            "--max-attempts",
            "2",
        ])
        .unwrap();

        assert_eq!(args.docs.len(), 2);
        assert_eq!(args.format, Some(OutputFormat::Json));
        assert_eq!(args.max_attempts, Some(2));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_docs_required_unless_init_config() {
        assert!(Args::try_parse_from(["pitchlens"]).is_err());
        let args = Args::try_parse_from(["pitchlens", "--init-config"]).unwrap();
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_url() {
        let mut args = make_args();
        args.ollama_url = Some("localhost:11434".to_string());
        assert!(args.validate().is_err());

        args.dry_run = true;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_ranges() {
        let mut args = make_args();
        args.temperature = Some(1.5);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.max_attempts = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.company = Some("   ".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
