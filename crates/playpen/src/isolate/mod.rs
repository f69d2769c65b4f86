//! Isolates hosting the runtime bridge
//!
//! An isolate is an independently scheduled execution context that talks to
//! the supervisor only through messages. This module provides the seam the
//! supervisor uses to create them ([`IsolateSpawner`]), the exclusively owned
//! handle to one live isolate ([`IsolateHandle`]), and two hosts:
//!
//! - [`ProcessSpawner`] runs the bridge in a `playpen-worker` child process,
//!   so a stuck program can be killed outright.
//! - [`ThreadSpawner`] runs the bridge on a thread of the current process.

use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

pub use crate::isolate::process::{ProcessSpawner, WORKER_PATH_ENV, find_worker_binary};
pub use crate::isolate::thread::ThreadSpawner;
use crate::protocol::{Inbound, Outbound};
use crate::types::Generation;

mod process;
mod thread;

/// Errors that occur while creating or talking to an isolate
#[derive(Debug, Error)]
pub enum IsolateError {
    #[error("failed to spawn isolate: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("worker binary not found: {0}")]
    WorkerNotFound(PathBuf),

    #[error("isolate channel is closed")]
    Closed,
}

/// Something an isolate did, as observed by its driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsolateEvent {
    /// The isolate sent a message
    Message(Outbound),

    /// The isolate died or its channel broke
    Fault(String),
}

/// An isolate event stamped with the generation of the isolate that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEvent {
    pub generation: Generation,
    pub event: IsolateEvent,
}

/// Sender half of the supervisor's event channel
pub type EventSender = mpsc::UnboundedSender<TaggedEvent>;

/// Creates isolates on behalf of the supervisor
pub trait IsolateSpawner: Send + Sync + 'static {
    /// Create a new isolate for `generation`
    ///
    /// Everything the isolate sends must be forwarded to `events`, tagged with
    /// `generation`. Must be called from within a tokio runtime.
    fn spawn(&self, generation: Generation, events: EventSender)
    -> Result<IsolateHandle, IsolateError>;
}

/// Exclusive handle to one live isolate
///
/// Inbound messages are delivered in the order they are sent. Dropping the
/// handle terminates the isolate.
#[derive(Debug)]
pub struct IsolateHandle {
    generation: Generation,
    inbound: mpsc::UnboundedSender<Inbound>,
    driver: JoinHandle<()>,
    label: String,
}

impl IsolateHandle {
    /// Wrap the channel and driver task of a freshly spawned isolate
    pub fn new(
        generation: Generation,
        inbound: mpsc::UnboundedSender<Inbound>,
        driver: JoinHandle<()>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            generation,
            inbound,
            driver,
            label: label.into(),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Human-readable description of the isolate (e.g. its process ID)
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Queue a message for the isolate
    pub fn send(&self, message: Inbound) -> Result<(), IsolateError> {
        self.inbound.send(message).map_err(|_| IsolateError::Closed)
    }

    /// Terminate the isolate, discarding anything it is still computing
    ///
    /// Returns once the driver is gone, so nothing from this isolate can be
    /// forwarded afterwards.
    pub async fn terminate(mut self) {
        debug!(generation = %self.generation, label = %self.label, "terminating isolate");
        self.driver.abort();
        let _ = (&mut self.driver).await;
    }
}

impl Drop for IsolateHandle {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
