//! Runtime bridge hosted inside the isolate
//!
//! Translates channel messages into calls on the foreign runtime and
//! normalizes every fault into an `error` message, so nothing the runtime does
//! can take the isolate down.

use std::any::Any;
use std::io::{BufRead, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::protocol::{Inbound, Outbound, ProtocolError, read_message, write_message};
use crate::types::ResultPayload;

/// Reply to `run` before a successful `init`
pub const NOT_READY_MESSAGE: &str = "Runtime not ready.";

/// Reply to any fault raised while executing a program
pub const CRASHED_MESSAGE: &str = "Execution crashed.";

/// Reply to any failure while loading the runtime
pub const LOAD_FAILED_MESSAGE: &str = "Failed to initialize runtime.";

/// Errors that occur while fetching or instantiating the foreign runtime
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read runtime manifest {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    #[error("failed to read runtime module {path}: {source}")]
    Fetch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to compile runtime module: {0}")]
    Compile(String),

    #[error("failed to instantiate runtime module: {0}")]
    Instantiate(String),

    #[error("runtime module is missing export '{0}'")]
    MissingExport(String),

    #[error("runtime entry point failed: {0}")]
    Entry(String),
}

/// Faults raised by the foreign runtime while executing or resetting
#[derive(Debug, Error)]
pub enum RuntimeFault {
    #[error("runtime trapped: {0}")]
    Trap(String),

    #[error("runtime broke the calling convention: {0}")]
    Abi(String),
}

/// The two entry points a foreign runtime exposes
pub trait ForeignRuntime {
    /// Run a program and return its outcome as a JSON [`ResultPayload`]
    fn execute(&mut self, code: &str) -> Result<String, RuntimeFault>;

    /// Clear global state left behind by previous programs
    fn reset(&mut self) -> Result<(), RuntimeFault>;
}

/// Fetches and instantiates a foreign runtime relative to a base path
pub trait RuntimeLoader {
    type Runtime: ForeignRuntime;

    fn load(&self, base_path: &Path) -> Result<Self::Runtime, LoadError>;
}

enum Slot<R> {
    Uninitialized,
    Failed,
    Ready(R),
}

/// Isolate-side message handler wrapping one foreign runtime
pub struct Bridge<L: RuntimeLoader> {
    loader: L,
    slot: Slot<L::Runtime>,
}

impl<L: RuntimeLoader> Bridge<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            slot: Slot::Uninitialized,
        }
    }

    /// Check if the runtime loaded successfully
    pub fn is_ready(&self) -> bool {
        matches!(self.slot, Slot::Ready(_))
    }

    /// Handle one inbound message, returning the reply to send (if any)
    pub fn handle(&mut self, message: Inbound) -> Option<Outbound> {
        match message {
            Inbound::Init { base_path } => Some(self.init(Path::new(&base_path))),
            Inbound::Run { code } => Some(self.run(&code)),
            Inbound::Reset => {
                self.reset();
                None
            }
        }
    }

    #[instrument(skip(self))]
    fn init(&mut self, base_path: &Path) -> Outbound {
        if self.is_ready() {
            debug!("runtime already loaded");
            return Outbound::Ready;
        }

        let loaded = panic::catch_unwind(AssertUnwindSafe(|| self.loader.load(base_path)));
        match loaded {
            Ok(Ok(runtime)) => {
                info!("runtime loaded");
                self.slot = Slot::Ready(runtime);
                Outbound::Ready
            }
            Ok(Err(e)) => {
                error!(error = %e, "failed to load runtime");
                self.slot = Slot::Failed;
                load_failed()
            }
            Err(payload) => {
                error!(panic = %panic_message(&*payload), "runtime loader panicked");
                self.slot = Slot::Failed;
                load_failed()
            }
        }
    }

    fn run(&mut self, code: &str) -> Outbound {
        let Slot::Ready(runtime) = &mut self.slot else {
            warn!("run received before the runtime was ready");
            return Outbound::Error {
                content: NOT_READY_MESSAGE.to_string(),
            };
        };

        let raw = match panic::catch_unwind(AssertUnwindSafe(|| runtime.execute(code))) {
            Ok(Ok(raw)) => raw,
            Ok(Err(fault)) => {
                warn!(error = %fault, "execution faulted");
                return crashed();
            }
            Err(payload) => {
                warn!(panic = %panic_message(&*payload), "execution panicked");
                return crashed();
            }
        };

        match serde_json::from_str::<ResultPayload>(&raw) {
            Ok(data) => Outbound::Result { data },
            Err(e) => {
                warn!(error = %e, len = raw.len(), "runtime returned a malformed payload");
                crashed()
            }
        }
    }

    fn reset(&mut self) {
        let Slot::Ready(runtime) = &mut self.slot else {
            debug!("reset ignored, runtime not loaded");
            return;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| runtime.reset())) {
            Ok(Ok(())) => debug!("runtime state cleared"),
            Ok(Err(fault)) => warn!(error = %fault, "reset faulted"),
            Err(payload) => warn!(panic = %panic_message(&*payload), "reset panicked"),
        }
    }
}

/// Serve the channel over a blocking reader/writer pair until end of stream
///
/// Malformed lines are logged and skipped; I/O failures end the loop.
pub fn serve<L, R, W>(
    bridge: &mut Bridge<L>,
    mut reader: R,
    mut writer: W,
) -> Result<(), ProtocolError>
where
    L: RuntimeLoader,
    R: BufRead,
    W: Write,
{
    loop {
        let message = match read_message::<_, Inbound>(&mut reader) {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("channel closed");
                return Ok(());
            }
            Err(ProtocolError::Json(e)) => {
                warn!(error = %e, "skipping malformed message");
                continue;
            }
            Err(e) => return Err(e),
        };

        if let Some(reply) = bridge.handle(message) {
            write_message(&mut writer, &reply)?;
        }
    }
}

fn crashed() -> Outbound {
    Outbound::Error {
        content: CRASHED_MESSAGE.to_string(),
    }
}

fn load_failed() -> Outbound {
    Outbound::Error {
        content: LOAD_FAILED_MESSAGE.to_string(),
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
