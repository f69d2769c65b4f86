//! Execution supervisor
//!
//! Owns exactly one isolate at a time, validates programs, runs at most one
//! job at a time, and enforces a wall clock timeout. A timed-out isolate is
//! destroyed and replaced under a new [`Generation`]; events from superseded
//! generations never touch [`SupervisorState`].
//!
//! The supervisor is a handle to a background task. Every method takes
//! `&self`, and dropping the handle disposes the supervisor.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

pub use crate::supervisor::state::{CRASH_MESSAGE, JobError, JobOutcome, Phase, SupervisorState};
use crate::config::Config;
use crate::isolate::IsolateSpawner;
use crate::supervisor::event_loop::{Command, EventLoop, Waiting};
use crate::types::{ExecutionRequest, Generation, JobId, ResultPayload};

mod event_loop;
mod state;

/// Reasons a request is turned away before reaching the isolate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("Input too large. Maximum size is {max} characters.")]
    Validation { length: usize, max: usize },

    #[error("Runtime not ready.")]
    NotReady,

    #[error("supervisor has been disposed")]
    Disposed,
}

/// Errors from [`Supervisor::run`], [`Supervisor::wait_for_job`] and
/// [`Supervisor::initialize`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("another job is already running")]
    Busy,

    #[error("outcome of {0} is no longer available")]
    Expired(JobId),
}

/// How the supervisor took a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The job was dispatched to the isolate
    Accepted(JobId),

    /// Another job is in flight; nothing was sent
    AlreadyRunning,
}

/// Check a request against the input size limit
pub fn validate(request: &ExecutionRequest, max_input_size: usize) -> Result<(), SubmitError> {
    if request.fits(max_input_size) {
        Ok(())
    } else {
        Err(SubmitError::Validation {
            length: request.char_len(),
            max: max_input_size,
        })
    }
}

/// Handle to a running supervisor
pub struct Supervisor {
    config: Config,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SupervisorState>,
}

impl Supervisor {
    /// Start the supervisor and initialize the first isolate
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<S: IsolateSpawner>(config: Config, spawner: S) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SupervisorState::default());

        // Queued before the loop starts, so it is always handled first
        let _ = commands.send(Command::Initialize { reply: None });
        tokio::spawn(EventLoop::new(config.clone(), spawner, commands_rx, state_tx).run());

        Self {
            config,
            commands,
            state,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Snapshot of the current state
    pub fn state(&self) -> SupervisorState {
        self.state.borrow().clone()
    }

    /// Receiver notified after every state change
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.clone()
    }

    /// Wait until the current isolate is ready
    ///
    /// Returns `false` if it is not ready within `timeout` or the supervisor
    /// is disposed.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut state = self.subscribe();
        let ready = tokio::time::timeout(
            timeout,
            state.wait_for(|state| state.is_ready || state.is_disposed),
        )
        .await;

        match ready {
            Ok(Ok(state)) => state.is_ready,
            _ => false,
        }
    }

    /// Replace the isolate with a fresh one and wait for its runtime to load
    ///
    /// Returns the new generation once it is ready. Fails with
    /// [`JobError::Load`] if the runtime could not be loaded, or with
    /// [`JobError::Crash`] if the isolate died or was replaced first.
    pub async fn initialize(&self) -> Result<Generation, RunError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Initialize { reply: Some(reply) })?;
        match rx.await {
            Ok(outcome) => Ok(outcome?),
            Err(_) => Err(JobError::Disposed.into()),
        }
    }

    /// Submit a program without waiting for its outcome
    pub async fn submit(&self, code: impl Into<String>) -> Result<Submission, SubmitError> {
        self.dispatch(ExecutionRequest::new(code), None).await
    }

    /// Submit a program and wait for its outcome
    pub async fn run(&self, code: impl Into<String>) -> Result<ResultPayload, RunError> {
        let (outcome, rx) = oneshot::channel();
        match self
            .dispatch(ExecutionRequest::new(code), Some(outcome))
            .await?
        {
            Submission::Accepted(_) => {}
            Submission::AlreadyRunning => return Err(RunError::Busy),
        }

        match rx.await {
            Ok(outcome) => Ok(outcome?),
            Err(_) => Err(JobError::Disposed.into()),
        }
    }

    /// Wait for the outcome of a job accepted by [`submit`](Self::submit)
    ///
    /// Only the running job and the most recently finished one can be waited
    /// for; older jobs yield [`RunError::Expired`].
    pub async fn wait_for_job(&self, job: JobId) -> Result<ResultPayload, RunError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Wait { job, reply })?;

        let outcome = match rx.await {
            Ok(Waiting::Pending(outcome)) => outcome.await.unwrap_or(Err(JobError::Disposed)),
            Ok(Waiting::Finished(outcome)) => outcome,
            Ok(Waiting::Unknown) => return Err(RunError::Expired(job)),
            Err(_) => Err(JobError::Disposed),
        };
        Ok(outcome?)
    }

    /// Clear global state in the runtime without running anything
    pub async fn reset(&self) -> Result<(), SubmitError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Reset { reply })?;
        rx.await.map_err(|_| SubmitError::Disposed)?
    }

    /// Forget the stored result and error; the isolate is untouched
    pub fn clear(&self) -> Result<(), SubmitError> {
        self.send(Command::Clear)
    }

    /// Terminate the isolate and stop the supervisor
    ///
    /// Idempotent. A running job fails with [`JobError::Disposed`].
    pub async fn dispose(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Dispose { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    async fn dispatch(
        &self,
        request: ExecutionRequest,
        outcome: Option<oneshot::Sender<JobOutcome>>,
    ) -> Result<Submission, SubmitError> {
        if let Err(e) = validate(&request, self.config.max_input_size) {
            warn!(error = %e, "rejecting program");
            return Err(e);
        }

        debug!(len = request.code.len(), "submitting program");
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit {
            request,
            outcome,
            reply,
        })?;
        rx.await.map_err(|_| SubmitError::Disposed)?
    }

    fn send(&self, command: Command) -> Result<(), SubmitError> {
        self.commands
            .send(command)
            .map_err(|_| SubmitError::Disposed)
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .finish()
    }
}
