//! PitchLens - AI-powered startup due diligence
//!
//! A CLI that submits pitch documents to the analysis orchestrator, shows
//! the job's progress and writes the resulting investment report.
//!
//! Exit codes:
//!   0 - Analysis completed
//!   1 - Runtime error (configuration, documents, connection, etc.)
//!   2 - The analysis job failed

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use pitchlens::cli::{Args, OutputFormat};
use pitchlens::config::{Config, CONFIG_FILE_NAME};
use pitchlens::documents::{DocumentStore, FsDocumentStore};
use pitchlens::gateway::{OllamaConfig, OllamaGateway};
use pitchlens::models::{AnalysisRequest, DocumentRef, Job, JobId, JobStatus};
use pitchlens::report::{self, ReportMetadata};
use pitchlens::service::AnalysisService;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("PitchLens v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_analysis(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .pitchlens.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to customize the model, timeouts, scoring weights, and more.");
    Ok(())
}

/// Initialize logging. `RUST_LOG` wins over the verbosity flags when set.
fn init_logging(args: &Args) {
    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let installed = match EnvFilter::try_from_default_env() {
        Ok(filter) => {
            tracing::subscriber::set_global_default(builder.with_env_filter(filter).finish())
        }
        Err(_) => tracing::subscriber::set_global_default(
            builder.with_max_level(args.log_level()).finish(),
        ),
    };

    if let Err(e) = installed {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the complete analysis workflow. Returns the exit code.
async fn run_analysis(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config
        .pipeline
        .validate()
        .map_err(|e| anyhow!("Invalid pipeline configuration: {}", e))?;

    let documents = Arc::new(FsDocumentStore::new(config.documents.clone()));
    let refs = documents.expand(&args.docs);

    if args.dry_run {
        return handle_dry_run(documents.as_ref(), &refs);
    }

    println!("🤖 Connecting to the analysis model...");
    println!("   Model: {}", config.capability.model);
    println!("   Ollama: {}", config.capability.base_url);
    println!(
        "   Deadline: {}s (stage timeout {}s, {} attempts)",
        config.pipeline.job_deadline_seconds,
        config.pipeline.stage_timeout_seconds,
        config.pipeline.max_attempts
    );

    let gateway = OllamaGateway::new(OllamaConfig::from(&config.capability))
        .context("Failed to create the Ollama client")?;
    let service = AnalysisService::new(&config, Arc::new(gateway), documents);

    let health = service.health().await;
    if !health.capability_reachable {
        warn!(
            "Ollama is not reachable at {}: {}",
            config.capability.base_url,
            health.capability_error.as_deref().unwrap_or("unknown error")
        );
    }

    let request = AnalysisRequest {
        company_name: args.company.clone(),
        documents: refs,
        additional_writeup: args.writeup.clone(),
    };
    let document_count = request.documents.len();
    let id = service.submit(request).context("Submission rejected")?;

    println!("\n🔬 Analyzing {} document(s) (job {})...\n", document_count, id);
    let job = track_progress(&service, id, args.quiet).await?;

    println!("\n📝 Generating report...");
    let metadata = ReportMetadata {
        model_used: config.capability.model.clone(),
        generated_at: Utc::now(),
        duration_seconds: start_time.elapsed().as_secs_f64(),
    };
    let output = match config.general.format {
        OutputFormat::Json => report::generate_json_report(&job, &metadata)?,
        OutputFormat::Markdown => report::generate_markdown_report(&job, &metadata),
    };
    std::fs::write(&config.general.output, &output)
        .with_context(|| format!("Failed to write report to {}", config.general.output))?;

    print_summary(&service, &job, metadata.duration_seconds);

    if job.status == JobStatus::Failed {
        eprintln!(
            "\n⛔ Analysis failed. Details saved to: {}",
            config.general.output
        );
        return Ok(2);
    }

    println!(
        "\n✅ Analysis complete! Report saved to: {}",
        config.general.output
    );
    Ok(0)
}

/// Poll the job's status into a spinner until it is terminal.
async fn track_progress(service: &AnalysisService, id: JobId, quiet: bool) -> Result<Arc<Job>> {
    let spinner = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?,
    );
    spinner.enable_steady_tick(Duration::from_millis(120));

    let finished = service.wait_for_terminal(id);
    tokio::pin!(finished);
    let mut poll = tokio::time::interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            job = &mut finished => {
                spinner.finish_and_clear();
                return Ok(job?);
            }
            _ = poll.tick() => {
                let view = service.status(id)?;
                spinner.set_message(format!("{:>3}% {}", view.progress, view.current_step));
            }
        }
    }
}

fn print_summary(service: &AnalysisService, job: &Job, duration: f64) {
    println!("\n📊 Analysis Summary:");

    match service.summary(job.id) {
        Ok(summary) => {
            println!(
                "   Company: {}",
                summary.company_name.as_deref().unwrap_or("Unknown")
            );
            match summary.overall_score {
                Some(score) => println!("   Overall score: {:.1}/100", score),
                None => println!("   Overall score: n/a"),
            }
            println!("   Recommendation: {}", summary.recommendation);
            for highlight in &summary.key_highlights {
                println!("   ✔ {}", highlight);
            }
            for concern in &summary.critical_concerns {
                println!("   ⚠ {}", concern);
            }
            if !summary.missing_sections.is_empty() {
                let missing: Vec<&str> =
                    summary.missing_sections.iter().map(|s| s.title()).collect();
                println!("   Missing sections: {}", missing.join(", "));
            }
        }
        Err(e) => debug!("No summary for job {}: {}", job.id, e),
    }

    if let Some(failure) = &job.failure {
        println!("   Failure: {}", failure);
    }
    println!("   Duration: {:.1}s", duration);
}

/// Handle --dry-run: resolve and validate documents, no model calls.
fn handle_dry_run(documents: &FsDocumentStore, refs: &[DocumentRef]) -> Result<i32> {
    println!("\n🔍 Dry run: resolving documents (no model calls)...\n");

    if refs.is_empty() {
        println!("   No supported documents found.");
        println!(
            "   Supported formats: {}",
            documents.supported_formats().join(", ")
        );
        return Ok(1);
    }

    let mut rejected = 0;
    for doc in refs {
        match documents.validate(doc) {
            Ok(info) => println!("     📄 {} ({} bytes)", info.reference, info.size),
            Err(e) => {
                rejected += 1;
                println!("     ❌ {}", e);
            }
        }
    }

    println!("\n   Total: {} documents, {} rejected", refs.len(), rejected);
    if refs.len() > documents.max_documents() {
        println!(
            "   ⚠️  More than {} documents; the submission would be rejected.",
            documents.max_documents()
        );
        rejected += 1;
    }

    println!("\n✅ Dry run complete. No model calls were made.");
    Ok(if rejected == 0 { 0 } else { 1 })
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE_NAME);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
