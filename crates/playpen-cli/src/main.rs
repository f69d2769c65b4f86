//! Playpen CLI
//!
//! A command-line tool for running programs through the playpen supervisor.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use playpen::{Config, EXAMPLE_CONFIG, ProcessSpawner, ResultPayload, RunError, Supervisor};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::EnvFilter;

/// How long to wait for the runtime to load before giving up
const READY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "playpen")]
#[command(about = "A tool for running untrusted programs under a supervisor")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Execution timeout in milliseconds (overrides the config)
    #[arg(short, long, global = true)]
    timeout_ms: Option<u64>,

    /// Runtime directory (overrides the config)
    #[arg(short, long, global = true)]
    base_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: playpen.toml)
        #[arg(short, long, default_value = "playpen.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run a program file
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,
    },

    /// Read programs from stdin, one per line
    Repl,

    /// Show the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let mut config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    if let Some(timeout_ms) = cli.timeout_ms {
        anyhow::ensure!(timeout_ms > 0, "--timeout-ms must be greater than zero");
        config.timeout_ms = timeout_ms;
    }
    if let Some(base_path) = cli.base_path {
        config = config.with_base_path(base_path);
    }

    match cli.command {
        Commands::Init { output, force } => {
            init_config(&output, force).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { source } => run_file(config, &source).await,
        Commands::Repl => repl(config).await,
        Commands::ShowConfig => {
            show_config(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Start a supervisor over worker processes and wait for its runtime
async fn start_supervisor(config: Config) -> Result<Supervisor> {
    let spawner = ProcessSpawner::from_config(&config).context("failed to locate worker")?;
    info!(worker = %spawner.worker_path().display(), "starting supervisor");

    let supervisor = Supervisor::start(config, spawner);
    if !supervisor.wait_ready(READY_TIMEOUT).await {
        let reason = supervisor
            .state()
            .last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "runtime did not become ready".to_string());
        supervisor.dispose().await;
        anyhow::bail!("failed to start runtime: {reason}");
    }
    Ok(supervisor)
}

async fn run_file(config: Config, source: &Path) -> Result<ExitCode> {
    let code = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    let supervisor = start_supervisor(config).await?;
    info!(source = %source.display(), "running program");
    let outcome = supervisor.run(code).await;
    supervisor.dispose().await;

    Ok(report(outcome))
}

async fn repl(config: Config) -> Result<ExitCode> {
    let supervisor = start_supervisor(config).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut status = ExitCode::SUCCESS;

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        match line.trim() {
            "" => continue,
            ":quit" => break,
            ":reset" => {
                if let Err(e) = supervisor.reset().await {
                    warn!(error = %e, "reset failed");
                }
            }
            code => {
                status = report(supervisor.run(code).await);
                // A timeout replaces the isolate; wait for its successor
                if !supervisor.state().is_ready && !supervisor.wait_ready(READY_TIMEOUT).await {
                    anyhow::bail!("runtime did not recover");
                }
            }
        }
    }

    supervisor.dispose().await;
    Ok(status)
}

/// Print one outcome: program output to stdout, diagnostics to stderr
fn report(outcome: Result<ResultPayload, RunError>) -> ExitCode {
    match outcome {
        Ok(payload) => {
            print!("{}", payload.output);
            if !payload.result.is_empty() {
                println!("{}", payload.result);
            }
            for warning in &payload.warnings {
                eprintln!("warning: {warning}");
            }
            for error in &payload.errors {
                eprintln!("error: {error}");
            }

            if payload.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn show_config(config: &Config) {
    println!("Max input size: {} characters", config.max_input_size);
    println!("Timeout: {} ms", config.timeout_ms);
    println!("Runtime directory: {}", config.base_path.display());
    println!("Runtime manifest: {}", config.manifest_name);
    match &config.worker_path {
        Some(path) => println!("Worker binary: {}", path.display()),
        None => println!("Worker binary: (discovered)"),
    }
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
