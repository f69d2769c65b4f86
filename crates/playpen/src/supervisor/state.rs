//! Observable supervisor state

use std::time::Duration;

use thiserror::Error;

use crate::types::{Generation, JobId, ResultPayload};

/// Text reported for any isolate fault
pub const CRASH_MESSAGE: &str = "Runtime worker crashed.";

/// Why a dispatched job produced no result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The runtime reported an error (including normalized execution crashes)
    #[error("{0}")]
    Runtime(String),

    /// The isolate died or could not be reached; the detail is kept for logs
    #[error("Runtime worker crashed.")]
    Crash(String),

    /// No reply within the wall clock budget; the isolate was replaced
    #[error("Execution timed out after {}s.", .0.as_secs_f64())]
    Timeout(Duration),

    /// The runtime could not be loaded
    #[error("{0}")]
    Load(String),

    #[error("Supervisor was disposed.")]
    Disposed,
}

impl JobError {
    /// Check if the isolate was replaced because of this error
    pub fn restarted_isolate(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Outcome of one job
pub type JobOutcome = Result<ResultPayload, JobError>;

/// Lifecycle phase derived from [`SupervisorState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No isolate has been requested yet
    Uninitialized,
    /// Waiting for `ready` from the current isolate
    Loading,
    Ready,
    Executing,
    Disposed,
}

/// Snapshot of the supervisor, published after every change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorState {
    /// Generation of the current isolate
    pub generation: Generation,

    /// `ready` was observed for the current generation
    pub is_ready: bool,

    /// A job has been dispatched and has not finished
    pub is_running: bool,

    /// Result of the most recent successful job
    pub result: Option<ResultPayload>,

    /// Most recent error, job-scoped or from loading
    pub last_error: Option<JobError>,

    /// Most recently accepted job
    pub last_job: Option<JobId>,

    /// Most recently finished job
    pub completed_job: Option<JobId>,

    pub is_disposed: bool,
}

impl SupervisorState {
    pub fn phase(&self) -> Phase {
        if self.is_disposed {
            Phase::Disposed
        } else if self.is_running {
            Phase::Executing
        } else if self.is_ready {
            Phase::Ready
        } else if self.generation == Generation::default() {
            Phase::Uninitialized
        } else {
            Phase::Loading
        }
    }
}
