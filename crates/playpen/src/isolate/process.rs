//! Worker process isolates
//!
//! Runs the bridge in a `playpen-worker` child process and drives its
//! stdin/stdout channel. Terminating the isolate kills the process.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::isolate::{
    EventSender, IsolateError, IsolateEvent, IsolateHandle, IsolateSpawner, TaggedEvent,
};
use crate::protocol::{Inbound, MessageReader, Outbound, ProtocolError, write_message_async};
use crate::types::Generation;

/// Environment variable overriding worker binary discovery
pub const WORKER_PATH_ENV: &str = "PLAYPEN_WORKER_PATH";

const WORKER_NAME: &str = if cfg!(windows) {
    "playpen-worker.exe"
} else {
    "playpen-worker"
};

/// Find the playpen-worker binary.
///
/// Looks in the following order:
/// 1. `PLAYPEN_WORKER_PATH` environment variable
/// 2. Same directory as the current executable (and its parent, for test
///    binaries under `target/<profile>/deps`)
/// 3. System PATH
pub fn find_worker_binary() -> Result<PathBuf, IsolateError> {
    if let Ok(path) = std::env::var(WORKER_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
        warn!(path = %path.display(), "{WORKER_PATH_ENV} points to a missing file");
    }

    if let Ok(exe_path) = std::env::current_exe() {
        for dir in exe_path.ancestors().skip(1).take(2) {
            let candidate = dir.join(WORKER_NAME);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    let path_var = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(WORKER_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(IsolateError::WorkerNotFound(PathBuf::from(WORKER_NAME)))
}

/// Spawns each isolate as a `playpen-worker` child process
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    worker_path: PathBuf,
    manifest_name: String,
}

impl ProcessSpawner {
    pub fn new(worker_path: impl Into<PathBuf>, manifest_name: impl Into<String>) -> Self {
        Self {
            worker_path: worker_path.into(),
            manifest_name: manifest_name.into(),
        }
    }

    /// Create a spawner from configuration, discovering the worker if needed
    pub fn from_config(config: &Config) -> Result<Self, IsolateError> {
        let worker_path = match &config.worker_path {
            Some(path) if path.exists() => path.clone(),
            Some(path) => return Err(IsolateError::WorkerNotFound(path.clone())),
            None => find_worker_binary()?,
        };
        Ok(Self::new(worker_path, config.manifest_name.clone()))
    }

    /// Get the worker binary path
    pub fn worker_path(&self) -> &Path {
        &self.worker_path
    }
}

impl IsolateSpawner for ProcessSpawner {
    #[instrument(skip(self, events), fields(worker = %self.worker_path.display()))]
    fn spawn(
        &self,
        generation: Generation,
        events: EventSender,
    ) -> Result<IsolateHandle, IsolateError> {
        let mut child = Command::new(&self.worker_path)
            .arg("--manifest")
            .arg(&self.manifest_name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            // Worker logs go to stderr; let them through for debugging
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(IsolateError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or(IsolateError::Closed)?;
        let stdout = child.stdout.take().ok_or(IsolateError::Closed)?;
        let label = match child.id() {
            Some(pid) => format!("pid {pid}"),
            None => "exited".to_string(),
        };

        debug!(%generation, %label, "spawned worker process");

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(child, stdin, stdout, inbound_rx, events, generation));

        Ok(IsolateHandle::new(generation, inbound_tx, driver, label))
    }
}

/// Pump messages between the supervisor and one worker process
///
/// Owns the child: when this task is aborted the child is dropped and killed.
async fn drive(
    mut child: Child,
    mut stdin: ChildStdin,
    stdout: ChildStdout,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    events: EventSender,
    generation: Generation,
) {
    let mut reader = MessageReader::new(BufReader::new(stdout));
    let forward = |event| {
        events
            .send(TaggedEvent { generation, event })
            .is_ok()
    };

    let fault = loop {
        tokio::select! {
            message = inbound.recv() => match message {
                Some(message) => {
                    if let Err(e) = write_message_async(&mut stdin, &message).await {
                        break Break::Failed(format!("failed to write to worker: {e}"));
                    }
                }
                // Handle dropped without terminate(); the child dies with us
                None => return,
            },

            message = reader.next_message::<Outbound>() => match message {
                Ok(Some(message)) => {
                    if !forward(IsolateEvent::Message(message)) {
                        return;
                    }
                }
                Ok(None) => break Break::Closed,
                Err(ProtocolError::Json(e)) => {
                    warn!(error = %e, "skipping malformed worker message");
                }
                Err(e) => break Break::Failed(format!("worker channel failed: {e}")),
            },
        }
    };

    drop(stdin);
    drop(reader);
    let reason = match fault {
        Break::Closed => "worker closed its output".to_string(),
        Break::Failed(reason) => {
            // The worker may still be alive and waiting on stdin
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "worker already gone");
            }
            reason
        }
    };
    let fault = match child.wait().await {
        Ok(status) => format!("{reason} ({status})"),
        Err(e) => format!("{reason} (wait failed: {e})"),
    };
    warn!(%generation, %fault, "worker process faulted");
    forward(IsolateEvent::Fault(fault));
}

/// Why the driver stopped pumping
enum Break {
    /// The worker closed stdout, so it is exiting on its own
    Closed,
    Failed(String),
}
