//! Playpen Worker
//!
//! Isolate process spawned by the playpen supervisor. Speaks newline-delimited
//! JSON on stdin/stdout and hosts one WebAssembly runtime.
//!
//! Stdout carries the channel, so all logging goes to stderr.

use std::io::{BufWriter, stdin, stdout};

use anyhow::{Context, Result};
use clap::Parser;
use playpen::{Bridge, DEFAULT_MANIFEST_NAME, WasmLoader, serve};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "playpen-worker")]
#[command(about = "Isolate process hosting a playpen runtime")]
#[command(version)]
struct Cli {
    /// Runtime manifest file name inside the base path sent with `init`
    #[arg(short, long, default_value = DEFAULT_MANIFEST_NAME)]
    manifest: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
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

    info!(pid = std::process::id(), manifest = %cli.manifest, "worker started");

    let mut bridge = Bridge::new(WasmLoader::new(cli.manifest));
    let stdin = stdin();
    let stdout = stdout();
    serve(&mut bridge, stdin.lock(), BufWriter::new(stdout.lock()))
        .context("worker channel failed")?;

    debug!("supervisor closed the channel");
    Ok(())
}
