//! Test doubles for the runtime and isolate seams

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::bridge::{ForeignRuntime, LoadError, RuntimeFault, RuntimeLoader};
use crate::isolate::{EventSender, IsolateError, IsolateEvent, IsolateHandle, IsolateSpawner};
use crate::protocol::{Inbound, Outbound};
use crate::types::{Generation, ResultPayload};

/// How long the fake runtime blocks on the `hang` program
pub(crate) const HANG: Duration = Duration::from_secs(30);

pub(crate) fn run(code: &str) -> Inbound {
    Inbound::Run {
        code: code.to_string(),
    }
}

pub(crate) fn output(text: &str) -> ResultPayload {
    ResultPayload {
        output: text.to_string(),
        ..Default::default()
    }
}

/// Loader for [`FakeRuntime`], a tiny interpreter with scripted behaviors:
///
/// - `print 1+1;` prints `2`
/// - `count` increments a global counter and prints it
/// - `fault`, `panic`, `garbage` fail in the three ways a runtime can
/// - `hang` blocks the calling thread for [`HANG`]
/// - anything else echoes the program as the result
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeLoader {
    fail: bool,
    loads: Arc<AtomicUsize>,
}

impl FakeLoader {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub(crate) fn load_count(&self) -> Arc<AtomicUsize> {
        self.loads.clone()
    }
}

impl RuntimeLoader for FakeLoader {
    type Runtime = FakeRuntime;

    fn load(&self, base_path: &Path) -> Result<FakeRuntime, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(LoadError::Fetch {
                path: base_path.join("runtime.wasm"),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            });
        }
        Ok(FakeRuntime { counter: 0 })
    }
}

#[derive(Debug)]
pub(crate) struct FakeRuntime {
    counter: u64,
}

impl ForeignRuntime for FakeRuntime {
    fn execute(&mut self, code: &str) -> Result<String, RuntimeFault> {
        let payload = match code {
            "print 1+1;" => output("2\n"),
            "count" => {
                self.counter += 1;
                output(&format!("{}\n", self.counter))
            }
            "fault" => return Err(RuntimeFault::Trap("unreachable".to_string())),
            "panic" => panic!("interpreter bug"),
            "garbage" => return Ok("not json".to_string()),
            "hang" => {
                std::thread::sleep(HANG);
                output("")
            }
            other => ResultPayload {
                result: other.to_string(),
                ..Default::default()
            },
        };
        Ok(serde_json::to_string(&payload).expect("payload serializes"))
    }

    fn reset(&mut self) -> Result<(), RuntimeFault> {
        self.counter = 0;
        Ok(())
    }
}

/// One isolate created by [`ScriptedSpawner`]
pub(crate) struct ScriptedIsolate {
    pub(crate) generation: Generation,
    pub(crate) inbound: mpsc::UnboundedReceiver<Inbound>,
    pub(crate) events: EventSender,
}

impl ScriptedIsolate {
    /// Pretend the isolate sent a message
    pub(crate) fn reply(&self, message: Outbound) {
        self.emit(IsolateEvent::Message(message));
    }

    pub(crate) fn emit(&self, event: IsolateEvent) {
        let _ = self.events.send(crate::isolate::TaggedEvent {
            generation: self.generation,
            event,
        });
    }

    /// Everything the supervisor has sent so far
    pub(crate) fn drain(&mut self) -> Vec<Inbound> {
        let mut messages = Vec::new();
        while let Ok(message) = self.inbound.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Check if the supervisor dropped its end of the channel
    pub(crate) fn is_closed(&self) -> bool {
        self.inbound.is_closed()
    }
}

/// Spawner handing every isolate's channel ends to the test
#[derive(Clone, Default)]
pub(crate) struct ScriptedSpawner {
    isolates: Arc<Mutex<Vec<ScriptedIsolate>>>,
    refuse: bool,
}

impl ScriptedSpawner {
    /// A spawner whose isolates can never be created
    pub(crate) fn refusing() -> Self {
        Self {
            refuse: true,
            ..Default::default()
        }
    }

    pub(crate) fn spawned(&self) -> usize {
        self.isolates.lock().unwrap().len()
    }

    /// Take the isolate of a generation out of the spawner
    pub(crate) fn take(&self, generation: u64) -> ScriptedIsolate {
        let mut isolates = self.isolates.lock().unwrap();
        let index = isolates
            .iter()
            .position(|isolate| isolate.generation == Generation::new(generation))
            .unwrap_or_else(|| panic!("no isolate for generation {generation}"));
        isolates.remove(index)
    }
}

impl IsolateSpawner for ScriptedSpawner {
    fn spawn(
        &self,
        generation: Generation,
        events: EventSender,
    ) -> Result<IsolateHandle, IsolateError> {
        if self.refuse {
            return Err(IsolateError::WorkerNotFound(PathBuf::from("playpen-worker")));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(std::future::pending::<()>());
        self.isolates.lock().unwrap().push(ScriptedIsolate {
            generation,
            inbound: inbound_rx,
            events,
        });
        Ok(IsolateHandle::new(generation, inbound_tx, driver, "scripted"))
    }
}
