use std::time::Duration;

use playpen::bridge::{CRASHED_MESSAGE, LOAD_FAILED_MESSAGE, NOT_READY_MESSAGE};
use playpen::isolate::{IsolateEvent, IsolateSpawner, ProcessSpawner, TaggedEvent};
use playpen::protocol::{Inbound, Outbound};
use playpen::types::Generation;
use tokio::sync::mpsc;

use super::{READY_TIMEOUT, runtime_dir, test_config};

async fn next_event(rx: &mut mpsc::UnboundedReceiver<TaggedEvent>) -> IsolateEvent {
    tokio::time::timeout(READY_TIMEOUT, rx.recv())
        .await
        .expect("worker replied in time")
        .expect("event channel open")
        .event
}

fn message(event: IsolateEvent) -> Outbound {
    match event {
        IsolateEvent::Message(message) => message,
        IsolateEvent::Fault(reason) => panic!("worker faulted: {reason}"),
    }
}

fn init(base_path: &std::path::Path) -> Inbound {
    Inbound::Init {
        base_path: base_path.display().to_string(),
    }
}

fn run(code: &str) -> Inbound {
    Inbound::Run {
        code: code.to_string(),
    }
}

#[tokio::test]
#[ignore = "requires playpen-worker binary"]
async fn test_worker_serves_demo_runtime() {
    let spawner = ProcessSpawner::from_config(&test_config()).unwrap();
    let (events, mut rx) = mpsc::unbounded_channel();
    let handle = spawner.spawn(Generation::new(1), events).unwrap();

    handle.send(run("count")).unwrap();
    handle.send(init(&runtime_dir())).unwrap();
    handle.send(run("count")).unwrap();
    handle.send(run("count")).unwrap();
    handle.send(Inbound::Reset).unwrap();
    handle.send(run("count")).unwrap();

    assert_eq!(
        message(next_event(&mut rx).await),
        Outbound::Error {
            content: NOT_READY_MESSAGE.to_string()
        }
    );
    assert_eq!(message(next_event(&mut rx).await), Outbound::Ready);

    for expected in ["1\n", "2\n", "1\n"] {
        match message(next_event(&mut rx).await) {
            Outbound::Result { data } => assert_eq!(data.output, expected),
            other => panic!("expected result, got {other:?}"),
        }
    }

    handle.terminate().await;
}

#[tokio::test]
#[ignore = "requires playpen-worker binary"]
async fn test_worker_normalizes_traps() {
    let spawner = ProcessSpawner::from_config(&test_config()).unwrap();
    let (events, mut rx) = mpsc::unbounded_channel();
    let handle = spawner.spawn(Generation::new(1), events).unwrap();

    handle.send(init(&runtime_dir())).unwrap();
    handle.send(run("?trap")).unwrap();
    handle.send(run("#bad pointer")).unwrap();

    assert_eq!(message(next_event(&mut rx).await), Outbound::Ready);
    let crashed = Outbound::Error {
        content: CRASHED_MESSAGE.to_string(),
    };
    assert_eq!(message(next_event(&mut rx).await), crashed);
    assert_eq!(message(next_event(&mut rx).await), crashed);

    handle.terminate().await;
}

#[tokio::test]
#[ignore = "requires playpen-worker binary"]
async fn test_worker_reports_load_failure_and_keeps_serving() {
    let empty = tempfile::tempdir().unwrap();
    let spawner = ProcessSpawner::from_config(&test_config()).unwrap();
    let (events, mut rx) = mpsc::unbounded_channel();
    let handle = spawner.spawn(Generation::new(1), events).unwrap();

    handle.send(init(empty.path())).unwrap();
    handle.send(run("count")).unwrap();

    assert_eq!(
        message(next_event(&mut rx).await),
        Outbound::Error {
            content: LOAD_FAILED_MESSAGE.to_string()
        }
    );
    assert_eq!(
        message(next_event(&mut rx).await),
        Outbound::Error {
            content: NOT_READY_MESSAGE.to_string()
        }
    );

    handle.terminate().await;
}

#[tokio::test]
#[ignore = "requires playpen-worker binary"]
async fn test_terminate_kills_stuck_worker() {
    let spawner = ProcessSpawner::from_config(&test_config()).unwrap();
    let (events, mut rx) = mpsc::unbounded_channel();
    let handle = spawner.spawn(Generation::new(1), events).unwrap();

    handle.send(init(&runtime_dir())).unwrap();
    assert_eq!(message(next_event(&mut rx).await), Outbound::Ready);

    handle.send(run("!spin")).unwrap();
    let stuck = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(stuck.is_err(), "a spinning program never replies");

    handle.terminate().await;
    assert!(rx.recv().await.is_none());
}
