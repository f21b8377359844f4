// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Codi Pipeline entry point - CLI and commands.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use codi_pipeline::config::{
    self, apply_pipeline_overrides, load_pipeline, validate_pipeline, CliOptions,
    PipelineOverrides,
};
use codi_pipeline::executor::{create_pipeline_executor, PipelineCallbacks, PipelineExecuteOptions};
use codi_pipeline::telemetry::{init_telemetry, TelemetryConfig};
use codi_pipeline::types::{ExecutionResult, ProgressPhase, ProgressUpdate};
use codi_pipeline::VERSION;

/// Codi Pipeline - map-reduce batch processing over AI models.
#[derive(Parser)]
#[command(name = "codi-pipeline")]
#[command(author, version, about = "Map-reduce batch processing over AI models", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress progress output and informational logs
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for run results.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Formatted reduce output
    Text,
    /// Full execution result as JSON
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline
    Run {
        /// Pipeline file or a directory containing pipeline.yaml
        #[arg(default_value = ".")]
        file: PathBuf,

        /// Maximum concurrent map calls
        #[arg(short, long)]
        parallel: Option<usize>,

        /// Only process the first N input items
        #[arg(short, long)]
        limit: Option<usize>,

        /// Default model for calls that don't name one
        #[arg(short, long, env = "CODI_PIPELINE_MODEL")]
        model: Option<String>,

        /// Base URL of an OpenAI-compatible endpoint
        #[arg(long, env = "CODI_PIPELINE_BASE_URL")]
        base_url: Option<String>,

        /// Environment variable holding the API key
        #[arg(long)]
        api_key_env: Option<String>,

        /// Maximum tokens per completion
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Output format
        #[arg(short = 'f', long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Also write the formatted output to a file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check a pipeline file without running it
    Validate {
        /// Pipeline file or a directory containing pipeline.yaml
        #[arg(default_value = ".")]
        file: PathBuf,
    },

    /// Write an example pipeline.yaml
    Init {
        /// Directory to create the pipeline in
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the merged invoker settings
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(&TelemetryConfig::from_verbosity(cli.verbose, cli.quiet))?;

    match cli.command {
        Commands::Run {
            file,
            parallel,
            limit,
            model,
            base_url,
            api_key_env,
            max_tokens,
            format,
            output,
        } => {
            let cli_options = CliOptions {
                base_url,
                model,
                api_key_env,
                max_tokens,
            };
            let overrides = PipelineOverrides { parallel, limit };
            handle_run(&file, cli_options, overrides, format, output, cli.quiet).await
        }
        Commands::Validate { file } => handle_validate(&file),
        Commands::Init { dir } => {
            let path = config::init_pipeline(&dir)?;
            println!("{} Created pipeline: {}", "✓".green(), path.display());
            Ok(())
        }
        Commands::Config { action } => match action {
            Some(ConfigAction::Show) | None => {
                let workspace_root = std::env::current_dir()?;
                let settings = config::load_settings(&workspace_root, CliOptions::default())?;
                println!("{}", serde_yaml::to_string(&settings)?);
                Ok(())
            }
        },
        Commands::Version => {
            println!("codi-pipeline {}", VERSION);
            Ok(())
        }
    }
}

// ============================================================================
// Run
// ============================================================================

/// Progress bar driven by pipeline callbacks, cancelled by Ctrl-C.
struct ProgressReporter {
    bar: ProgressBar,
    cancelled: Arc<AtomicBool>,
}

impl ProgressReporter {
    fn new(quiet: bool, cancelled: Arc<AtomicBool>) -> anyhow::Result<Self> {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{prefix:>10.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                    .map_err(|e| anyhow::anyhow!("Invalid progress template: {}", e))?
                    .progress_chars("##-"),
            );
            bar
        };
        Ok(Self { bar, cancelled })
    }
}

impl PipelineCallbacks for ProgressReporter {
    fn on_progress(&self, update: &ProgressUpdate) {
        if update.phase == ProgressPhase::Complete {
            self.bar.finish_and_clear();
            return;
        }
        self.bar.set_prefix(update.phase.to_string());
        self.bar.set_length(update.total as u64);
        self.bar.set_position(update.processed as u64);
        if let Some(ref message) = update.message {
            self.bar.set_message(message.clone());
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

async fn handle_run(
    file: &Path,
    cli_options: CliOptions,
    overrides: PipelineOverrides,
    format: OutputFormat,
    output: Option<PathBuf>,
    quiet: bool,
) -> anyhow::Result<()> {
    let (mut pipeline, base_dir) = load_pipeline(file)?;
    apply_pipeline_overrides(&mut pipeline, &overrides);

    let workspace_root = std::env::current_dir()?;
    let settings = config::load_settings(&workspace_root, cli_options)?;
    let executor = create_pipeline_executor(&settings)?;

    if !quiet {
        eprintln!(
            "{} Running {} with {}",
            "→".cyan(),
            pipeline.name.bright_white(),
            settings.model.bright_magenta()
        );
    }

    let cancelled = Arc::new(AtomicBool::new(false));
    let signal_flag = cancelled.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_flag.store(true, Ordering::SeqCst);
        }
    });

    let reporter = Arc::new(ProgressReporter::new(quiet, cancelled)?);
    let options = PipelineExecuteOptions {
        base_dir: Some(base_dir),
    };
    let outcome = executor
        .execute_with_callbacks(&pipeline, Some(options), reporter.clone())
        .await;
    reporter.bar.finish_and_clear();

    let result = match outcome {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => {
            eprintln!("{}", "Pipeline cancelled".yellow());
            std::process::exit(130);
        }
        Err(e) => return Err(e.into()),
    };

    if let (Some(path), Some(formatted)) = (&output, result.formatted_output()) {
        std::fs::write(path, formatted)?;
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => {
            if let Some(formatted) = result.formatted_output() {
                println!("{}", formatted);
            }
        }
    }

    if !quiet {
        print_summary(&result);
    }
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(result: &ExecutionResult) {
    let stats = &result.execution_stats;
    let line = format!(
        "{}/{} items succeeded in {}ms ({} AI calls, max {} concurrent)",
        stats.successful_maps,
        stats.total_items,
        result.total_time_ms,
        stats.ai_calls,
        stats.max_concurrency
    );
    if result.success {
        eprintln!("{} {}", "✓".green(), line);
    } else {
        eprintln!("{} {}", "✗".red(), line);
    }

    if let Some(ref filter) = result.filter_result {
        eprintln!(
            "  {} filter kept {}/{} items",
            filter.stats.filter_type,
            filter.stats.included_count,
            filter.stats.total_items
        );
    }
    for failed in result.map_results.iter().filter(|r| !r.success) {
        if let Some(ref error) = failed.error {
            eprintln!("  {} {}", "✗".red(), error.dimmed());
        }
    }
    if let Some(ref error) = result.error {
        eprintln!("{}", error.red());
    }
}

// ============================================================================
// Validate
// ============================================================================

fn handle_validate(file: &Path) -> anyhow::Result<()> {
    let (pipeline, _) = load_pipeline(file)?;
    let validation = validate_pipeline(&pipeline);

    for warning in &validation.warnings {
        println!("{} {}", "warning:".yellow(), warning);
    }
    for error in &validation.errors {
        println!("{} {}", "error:".red(), error);
    }

    if validation.valid {
        println!("{} {} is valid", "✓".green(), pipeline.name.bright_white());
        Ok(())
    } else {
        anyhow::bail!(
            "{} has {} error(s)",
            pipeline.name,
            validation.errors.len()
        )
    }
}
