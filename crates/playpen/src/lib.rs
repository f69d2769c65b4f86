//! A library for supervised execution of untrusted programs.
//!
//! Playpen runs programs against a foreign, non-preemptible runtime hosted in
//! an isolate, and gives the caller a bounded, crash-proof request/response
//! contract on top of it.
//!
//! # Features
//!
//! - **Supervisor** — Validates programs, runs one job at a time, and enforces a wall clock timeout.
//! - **Destructive recovery** — A stuck isolate is killed and replaced under a new generation.
//! - **Generation guard** — Late messages from a replaced isolate are dropped.
//! - **Process isolates** — The runtime lives in a separate `playpen-worker` process.
//! - **WebAssembly runtimes** — Foreign runtimes are core wasm modules run with wasmtime.
//! - **TOML configuration** — Input limits, timeout, and runtime location.

pub use bridge::{Bridge, ForeignRuntime, LoadError, RuntimeFault, RuntimeLoader, serve};
pub use config::{Config, ConfigError, DEFAULT_MANIFEST_NAME, EXAMPLE_CONFIG};
pub use isolate::{IsolateError, IsolateHandle, IsolateSpawner, ProcessSpawner, ThreadSpawner};
pub use protocol::{Inbound, Outbound, ProtocolError};
pub use runtime::{RuntimeManifest, WasmLoader, WasmRuntime};
pub use supervisor::{
    JobError, JobOutcome, Phase, RunError, Submission, SubmitError, Supervisor, SupervisorState,
};
pub use types::{ExecutionRequest, Generation, JobId, MAX_INPUT_SIZE, ResultPayload, TIMEOUT_MS};

pub mod bridge;
pub mod config;
pub mod isolate;
pub mod protocol;
pub mod runtime;
pub mod supervisor;
pub mod types;

#[cfg(test)]
mod testing;
