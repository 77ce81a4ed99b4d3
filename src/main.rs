//! Binary entry point for convergent.
//!
//! Runs one pipeline operation against the configured providers and prints
//! the consolidated result.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use convergent::observability::{self, InitOptions};
use convergent::services::RunOptions;
use convergent::{Engine, EngineConfig, OperationStatus, PresentationConfig, ProviderId};
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

/// Convergent - confidence-weighted aggregation over unreliable providers.
#[derive(Parser)]
#[command(name = "convergent")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "CONVERGENT_CONFIG_PATH")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for a target.
    Run {
        /// The query target.
        target: String,

        /// Additional requirement (repeatable).
        #[arg(short, long = "requirement")]
        requirements: Vec<String>,

        /// Verbosity: concise, detailed, or comprehensive.
        #[arg(long)]
        verbosity: Option<String>,

        /// Structure: flat or sectioned.
        #[arg(long)]
        structure: Option<String>,

        /// Tone: neutral, assertive, or technical.
        #[arg(long)]
        tone: Option<String>,

        /// Session id for conversational memory.
        #[arg(short, long)]
        session: Option<String>,

        /// Operation deadline in milliseconds.
        #[arg(long)]
        deadline_ms: Option<u64>,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List registered providers.
    Providers,

    /// Manage configuration.
    Config {
        /// Show current configuration.
        #[arg(long)]
        show: bool,
    },
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    let _observability = match observability::init_from_config(
        &config.observability,
        InitOptions {
            verbose: cli.verbose,
            metrics_expose: false,
        },
    ) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(cli: Cli, config: EngineConfig) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Run {
            target,
            requirements,
            verbosity,
            structure,
            tone,
            session,
            deadline_ms,
            json,
        } => {
            let presentation = PresentationConfig::normalize(
                verbosity.as_deref(),
                structure.as_deref(),
                tone.as_deref(),
            );
            let mut options = RunOptions::default();
            options.session_id = session;
            options.deadline = deadline_ms.map(Duration::from_millis);
            cmd_run(config, &target, &requirements, presentation, options, json).await
        },
        Commands::Providers => cmd_providers(&config),
        Commands::Config { show } => cmd_config(&config, show),
    }
}

/// Loads configuration from an explicit path or the default location, then
/// applies environment overrides.
fn load_config(path: Option<&str>) -> anyhow::Result<EngineConfig> {
    let config = match path.map(str::trim).filter(|p| !p.is_empty()) {
        Some(path) => EngineConfig::load_from_file(Path::new(path))
            .with_context(|| format!("loading {path}"))?,
        None => EngineConfig::load_default(),
    };
    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

async fn cmd_run(
    config: EngineConfig,
    target: &str,
    requirements: &[String],
    presentation: PresentationConfig,
    options: RunOptions,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let engine = Engine::from_config(config)?;
    let run = engine
        .run_pipeline_with(target, requirements, presentation, options)
        .await?;

    if json {
        let operation = engine.operation_status(&run.operation_id)?;
        println!("{}", serde_json::to_string_pretty(&operation)?);
    } else {
        println!("{}", run.result.narrative);
        println!();
        println!("Operation:   {}", run.operation_id);
        println!("Status:      {}", run.status);
        println!("Confidence:  {:.2}%", run.confidence_score());
        println!("Synthesized: {}", run.result.synthesized_by);
        if run.degraded() {
            println!("Degraded:    yes");
        }
        if !run.result.sources_used.is_empty() {
            let sources: Vec<&str> = run.result.sources_used.iter().map(ProviderId::as_str).collect();
            println!("Sources:     {}", sources.join(", "));
        }
    }

    Ok(if run.status == OperationStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn cmd_providers(config: &EngineConfig) -> anyhow::Result<ExitCode> {
    let engine = Engine::from_config(config.clone())?;
    println!("{:<20} {:>8} {:>11}  {:<10} CAPABILITIES", "ID", "PRIORITY", "RELIABILITY", "GROUP");
    for provider in engine.registry().all().iter().map(|p| &p.descriptor) {
        let capabilities: Vec<&str> = provider.capabilities.iter().map(String::as_str).collect();
        println!(
            "{:<20} {:>8} {:>11.2}  {:<10} {}",
            provider.id.as_str(),
            provider.priority,
            provider.base_reliability,
            provider.group.as_deref().unwrap_or("-"),
            capabilities.join(",")
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_config(config: &EngineConfig, show: bool) -> anyhow::Result<ExitCode> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    } else {
        match &config.source {
            Some(path) => println!("Configuration loaded from {}", path.display()),
            None => println!("Using built-in defaults (no config file found)"),
        }
        println!("Phases:    {}", config.phases.len());
        println!("Providers: {}", config.providers.len());
    }
    Ok(ExitCode::SUCCESS)
}
