//! Supervisor event loop
//!
//! Single task owning the isolate handle. It reacts to three sources: commands
//! from the [`Supervisor`](super::Supervisor) handle, tagged events from
//! isolates, and the execution deadline.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::bridge::LOAD_FAILED_MESSAGE;
use crate::config::Config;
use crate::isolate::{EventSender, IsolateEvent, IsolateHandle, IsolateSpawner, TaggedEvent};
use crate::protocol::{Inbound, Outbound};
use crate::supervisor::{JobError, JobOutcome, Submission, SubmitError, SupervisorState};
use crate::types::{ExecutionRequest, Generation, JobId};

pub(crate) enum Command {
    Initialize {
        reply: Option<oneshot::Sender<InitOutcome>>,
    },
    Submit {
        request: ExecutionRequest,
        outcome: Option<oneshot::Sender<JobOutcome>>,
        reply: oneshot::Sender<Result<Submission, SubmitError>>,
    },
    Wait {
        job: JobId,
        reply: oneshot::Sender<Waiting>,
    },
    Reset {
        reply: oneshot::Sender<Result<(), SubmitError>>,
    },
    Clear,
    Dispose {
        reply: oneshot::Sender<()>,
    },
}

/// Answer to [`Command::Wait`]
pub(crate) enum Waiting {
    /// The job is running; its outcome arrives on the receiver
    Pending(oneshot::Receiver<JobOutcome>),
    Finished(JobOutcome),
    /// The job is unknown or its outcome was superseded
    Unknown,
}

/// Outcome of loading the runtime in a new isolate
pub(crate) type InitOutcome = Result<Generation, JobError>;

struct RunningJob {
    id: JobId,
    waiters: Vec<oneshot::Sender<JobOutcome>>,
}

pub(crate) struct EventLoop<S> {
    config: Config,
    spawner: S,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: EventSender,
    events: mpsc::UnboundedReceiver<TaggedEvent>,
    state: watch::Sender<SupervisorState>,
    isolate: Option<IsolateHandle>,
    generation: Generation,
    job: Option<RunningJob>,
    loading: Vec<oneshot::Sender<InitOutcome>>,
    deadline: Option<Instant>,
    next_job: u64,
    last_outcome: Option<(JobId, JobOutcome)>,
}

impl<S: IsolateSpawner> EventLoop<S> {
    pub(crate) fn new(
        config: Config,
        spawner: S,
        commands: mpsc::UnboundedReceiver<Command>,
        state: watch::Sender<SupervisorState>,
    ) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        Self {
            config,
            spawner,
            commands,
            events_tx,
            events,
            state,
            isolate: None,
            generation: Generation::default(),
            job: None,
            loading: Vec::new(),
            deadline: None,
            next_job: 0,
            last_outcome: None,
        }
    }

    /// Serve until disposed or until every handle is dropped
    pub(crate) async fn run(mut self) {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Dispose { reply }) => {
                        self.dispose().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.on_command(command).await,
                    None => {
                        debug!("supervisor handle dropped");
                        self.dispose().await;
                        return;
                    }
                },

                // The loop holds a sender, so this never yields None
                Some(tagged) = self.events.recv() => self.on_event(tagged),

                () = expired(deadline) => self.on_timeout().await,
            }
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Initialize { reply } => {
                let spawned = self.initialize().await;
                if let Some(reply) = reply {
                    match spawned {
                        // Answered once the runtime reports ready or fails
                        Ok(_) => self.loading.push(reply),
                        Err(e) => {
                            let _ = reply.send(Err(e));
                        }
                    }
                }
            }
            Command::Submit {
                request,
                outcome,
                reply,
            } => {
                let _ = reply.send(self.on_submit(request, outcome));
            }
            Command::Wait { job, reply } => self.on_wait(job, reply),
            Command::Reset { reply } => {
                let _ = reply.send(self.on_reset());
            }
            Command::Clear => self.update(|state| {
                state.result = None;
                state.last_error = None;
            }),
            // Handled by the loop itself
            Command::Dispose { .. } => {}
        }
    }

    /// Replace the current isolate with a fresh one under a new generation
    #[instrument(skip(self), fields(generation))]
    async fn initialize(&mut self) -> InitOutcome {
        let replaced = JobError::Crash("isolate replaced".to_string());
        if let Some(job) = self.job.take() {
            self.finish(job, Err(replaced.clone()));
        }
        self.settle_loading(Err(replaced));
        if let Some(old) = self.isolate.take() {
            old.terminate().await;
        }

        let generation = self.generation.next();
        self.generation = generation;
        tracing::Span::current().record("generation", generation.get());

        let mut load_error = None;
        match self.spawner.spawn(generation, self.events_tx.clone()) {
            Ok(handle) => {
                info!(label = handle.label(), "isolate spawned");
                let init = Inbound::Init {
                    base_path: self.config.base_path_string(),
                };
                // A dead isolate reports itself through a fault event
                if let Err(e) = handle.send(init) {
                    warn!(error = %e, "failed to send init");
                }
                self.isolate = Some(handle);
            }
            Err(e) => {
                error!(error = %e, "failed to spawn isolate");
                load_error = Some(JobError::Load(format!("{LOAD_FAILED_MESSAGE} ({e})")));
            }
        }

        self.update(|state| {
            state.generation = generation;
            state.is_ready = false;
            if load_error.is_some() {
                state.last_error = load_error.clone();
            }
        });
        match load_error {
            Some(e) => Err(e),
            None => Ok(generation),
        }
    }

    fn on_event(&mut self, tagged: TaggedEvent) {
        if tagged.generation != self.generation {
            debug!(
                stale = %tagged.generation,
                current = %self.generation,
                "dropping event from superseded isolate"
            );
            return;
        }

        match tagged.event {
            IsolateEvent::Message(Outbound::Ready) => {
                info!(generation = %self.generation, "runtime ready");
                self.update(|state| state.is_ready = true);
                self.settle_loading(Ok(self.generation));
            }
            IsolateEvent::Message(Outbound::Result { data }) => match self.job.take() {
                Some(job) => self.finish(job, Ok(data)),
                None => warn!("ignoring result with no job running"),
            },
            IsolateEvent::Message(Outbound::Error { content }) => match self.job.take() {
                Some(job) => self.finish(job, Err(JobError::Runtime(content))),
                None => {
                    warn!(%content, "isolate reported an error with no job running");
                    let error = if self.state.borrow().is_ready {
                        JobError::Runtime(content)
                    } else {
                        JobError::Load(content)
                    };
                    if matches!(error, JobError::Load(_)) {
                        self.settle_loading(Err(error.clone()));
                    }
                    self.update(|state| state.last_error = Some(error));
                }
            },
            IsolateEvent::Fault(reason) => {
                error!(%reason, "isolate fault");
                match self.job.take() {
                    Some(job) => self.finish(job, Err(JobError::Crash(reason))),
                    None => {
                        let error = JobError::Crash(reason);
                        self.settle_loading(Err(error.clone()));
                        self.update(|state| state.last_error = Some(error));
                    }
                }
            }
        }
    }

    fn on_submit(
        &mut self,
        request: ExecutionRequest,
        outcome: Option<oneshot::Sender<JobOutcome>>,
    ) -> Result<Submission, SubmitError> {
        if !self.state.borrow().is_ready {
            return Err(SubmitError::NotReady);
        }
        if self.job.is_some() {
            debug!("job already running, ignoring submission");
            return Ok(Submission::AlreadyRunning);
        }
        let Some(isolate) = &self.isolate else {
            return Err(SubmitError::NotReady);
        };

        self.next_job += 1;
        let id = JobId::new(self.next_job);
        let job = RunningJob {
            id,
            waiters: outcome.into_iter().collect(),
        };

        // Reset first so state from the previous job never leaks into this one
        let sent = isolate
            .send(Inbound::Reset)
            .and_then(|()| isolate.send(Inbound::Run { code: request.code }));

        self.update(|state| {
            state.is_running = true;
            state.result = None;
            state.last_error = None;
            state.last_job = Some(id);
        });

        match sent {
            Ok(()) => {
                debug!(job = %id, "job dispatched");
                self.deadline = Some(Instant::now() + self.config.timeout());
                self.job = Some(job);
            }
            Err(e) => {
                warn!(job = %id, error = %e, "failed to dispatch job");
                self.finish(job, Err(JobError::Crash(e.to_string())));
            }
        }
        Ok(Submission::Accepted(id))
    }

    fn on_wait(&mut self, id: JobId, reply: oneshot::Sender<Waiting>) {
        let waiting = match (&mut self.job, &self.last_outcome) {
            (Some(job), _) if job.id == id => {
                let (tx, rx) = oneshot::channel();
                job.waiters.push(tx);
                Waiting::Pending(rx)
            }
            (_, Some((last, outcome))) if *last == id => Waiting::Finished(outcome.clone()),
            _ => Waiting::Unknown,
        };
        let _ = reply.send(waiting);
    }

    fn on_reset(&mut self) -> Result<(), SubmitError> {
        let Some(isolate) = self.isolate.as_ref().filter(|_| self.state.borrow().is_ready) else {
            return Err(SubmitError::NotReady);
        };
        if let Err(e) = isolate.send(Inbound::Reset) {
            warn!(error = %e, "failed to send reset");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(generation = %self.generation))]
    async fn on_timeout(&mut self) {
        self.deadline = None;
        let Some(job) = self.job.take() else {
            return;
        };

        let timeout = self.config.timeout();
        warn!(job = %job.id, ?timeout, "execution timed out, restarting isolate");
        self.finish(job, Err(JobError::Timeout(timeout)));
        self.update(|state| state.is_ready = false);
        if let Err(e) = self.initialize().await {
            warn!(error = %e, "replacement isolate failed to start");
        }
    }

    fn finish(&mut self, job: RunningJob, outcome: JobOutcome) {
        self.deadline = None;
        match &outcome {
            Ok(_) => debug!(job = %job.id, "job finished"),
            Err(e) => debug!(job = %job.id, error = %e, "job failed"),
        }

        self.update(|state| {
            state.is_running = false;
            state.completed_job = Some(job.id);
            match &outcome {
                Ok(result) => state.result = Some(result.clone()),
                Err(e) => state.last_error = Some(e.clone()),
            }
        });

        for waiter in job.waiters {
            let _ = waiter.send(outcome.clone());
        }
        self.last_outcome = Some((job.id, outcome));
    }

    /// Answer everyone waiting for the current generation to load
    fn settle_loading(&mut self, outcome: InitOutcome) {
        for waiter in self.loading.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
    }

    #[instrument(skip(self))]
    async fn dispose(&mut self) {
        if let Some(job) = self.job.take() {
            self.finish(job, Err(JobError::Disposed));
        }
        self.settle_loading(Err(JobError::Disposed));
        if let Some(isolate) = self.isolate.take() {
            isolate.terminate().await;
        }
        self.update(|state| {
            state.is_ready = false;
            state.is_running = false;
            state.result = None;
            state.is_disposed = true;
        });
        info!("supervisor disposed");
    }

    fn update(&self, modify: impl FnOnce(&mut SupervisorState)) {
        self.state.send_modify(modify);
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
