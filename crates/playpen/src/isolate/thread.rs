//! In-process isolates
//!
//! Runs the bridge on a dedicated OS thread and relays its replies from a
//! tokio task. Useful for embedding and tests.
//!
//! A thread cannot be killed: terminating a thread isolate detaches it, and a
//! program stuck in the runtime keeps its thread busy until it returns. Its
//! replies are discarded. Use [`ProcessSpawner`](super::ProcessSpawner) when
//! stuck programs must actually be reclaimed.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bridge::{Bridge, RuntimeLoader};
use crate::isolate::{
    EventSender, IsolateError, IsolateEvent, IsolateHandle, IsolateSpawner, TaggedEvent,
};
use crate::protocol::{Inbound, Outbound};
use crate::types::Generation;

/// Spawns each isolate as a thread hosting a [`Bridge`] over `L`
#[derive(Debug, Clone)]
pub struct ThreadSpawner<L> {
    loader: L,
}

impl<L> ThreadSpawner<L> {
    pub fn new(loader: L) -> Self {
        Self { loader }
    }
}

impl<L> IsolateSpawner for ThreadSpawner<L>
where
    L: RuntimeLoader + Clone + Send + Sync + 'static,
{
    fn spawn(
        &self,
        generation: Generation,
        events: EventSender,
    ) -> Result<IsolateHandle, IsolateError> {
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<Inbound>();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let loader = self.loader.clone();

        let thread = std::thread::Builder::new()
            .name(format!("playpen-isolate-{}", generation.get()))
            .spawn(move || {
                let mut bridge = Bridge::new(loader);
                while let Some(message) = inbound_rx.blocking_recv() {
                    if let Some(reply) = bridge.handle(message)
                        && outbound_tx.send(reply).is_err()
                    {
                        break;
                    }
                }
                debug!(%generation, "isolate thread exiting");
            })
            .map_err(IsolateError::SpawnFailed)?;
        let label = format!("thread {:?}", thread.thread().id());

        let driver = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let event = IsolateEvent::Message(message);
                if events.send(TaggedEvent { generation, event }).is_err() {
                    return;
                }
            }

            // The thread only drops its sender by exiting, and it only exits
            // on its own when it panics outside the bridge
            warn!(%generation, "isolate thread stopped");
            let event = IsolateEvent::Fault("isolate thread stopped".to_string());
            let _ = events.send(TaggedEvent { generation, event });
        });

        Ok(IsolateHandle::new(generation, inbound_tx, driver, label))
    }
}
