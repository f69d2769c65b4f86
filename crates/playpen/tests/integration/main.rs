//! Integration tests for playpen
//!
//! These tests drive the real `playpen-worker` binary. Build it first, then
//! run with: cargo test -p playpen --features integration-tests
//!
//! Tests that need the worker are marked `#[ignore]`. To include them:
//!    cargo build -p playpen-worker
//!    cargo test -p playpen --features integration-tests -- --include-ignored

#![cfg(feature = "integration-tests")]

use std::path::PathBuf;
use std::time::Duration;

use playpen::config::Config;
use playpen::isolate::find_worker_binary;

mod config_loading;
mod supervisor_process;
mod worker_process;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// How long the worker gets to load the demo runtime
pub(crate) const READY_TIMEOUT: Duration = Duration::from_secs(20);

/// The demo runtime shipped at the workspace root
pub(crate) fn runtime_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../runtime")
}

/// Config pointing at the built worker and the demo runtime
pub(crate) fn test_config() -> Config {
    let worker = find_worker_binary().expect("playpen-worker should be built");
    Config::default()
        .with_worker_path(worker)
        .with_base_path(runtime_dir())
}
