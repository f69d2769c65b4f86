use std::time::Duration;

use playpen::bridge::{CRASHED_MESSAGE, LOAD_FAILED_MESSAGE};
use playpen::isolate::ProcessSpawner;
use playpen::supervisor::{JobError, RunError, SubmitError, Supervisor};
use playpen::types::Generation;

use super::{READY_TIMEOUT, test_config};

fn start(config: playpen::config::Config) -> Supervisor {
    let spawner = ProcessSpawner::from_config(&config).unwrap();
    Supervisor::start(config, spawner)
}

#[tokio::test]
#[ignore = "requires playpen-worker binary"]
async fn test_run_against_worker() {
    let supervisor = start(test_config());
    assert!(supervisor.wait_ready(READY_TIMEOUT).await);

    let result = supervisor.run("count").await.unwrap();
    assert_eq!(result.output, "1\n");
    assert!(result.is_success());

    // Every job starts from a reset runtime
    let result = supervisor.run("count").await.unwrap();
    assert_eq!(result.output, "1\n");

    supervisor.dispose().await;
}

#[tokio::test]
#[ignore = "requires playpen-worker binary"]
async fn test_trap_keeps_worker() {
    let supervisor = start(test_config());
    assert!(supervisor.wait_ready(READY_TIMEOUT).await);

    let err = supervisor.run("?").await.unwrap_err();
    assert_eq!(
        err,
        RunError::Job(JobError::Runtime(CRASHED_MESSAGE.to_string()))
    );
    assert!(supervisor.run("count").await.is_ok());
    assert_eq!(supervisor.state().generation, Generation::new(1));

    supervisor.dispose().await;
}

#[tokio::test]
#[ignore = "requires playpen-worker binary"]
async fn test_infinite_loop_is_killed_and_replaced() {
    let timeout = Duration::from_millis(500);
    let supervisor = start(test_config().with_timeout(timeout));
    assert!(supervisor.wait_ready(READY_TIMEOUT).await);

    let err = supervisor.run("!loop forever").await.unwrap_err();
    assert_eq!(err, RunError::Job(JobError::Timeout(timeout)));
    assert_eq!(err.to_string(), "Execution timed out after 0.5s.");

    assert!(supervisor.wait_ready(READY_TIMEOUT).await);
    assert_eq!(supervisor.state().generation, Generation::new(2));

    let result = supervisor.run("count").await.unwrap();
    assert_eq!(result.output, "1\n");

    supervisor.dispose().await;
}

#[tokio::test]
#[ignore = "requires playpen-worker binary"]
async fn test_missing_runtime_never_ready() {
    let empty = tempfile::tempdir().unwrap();
    let supervisor = start(test_config().with_base_path(empty.path()));

    assert!(!supervisor.wait_ready(Duration::from_secs(2)).await);
    assert_eq!(
        supervisor.state().last_error,
        Some(JobError::Load(LOAD_FAILED_MESSAGE.to_string()))
    );
    assert_eq!(
        supervisor.submit("count").await,
        Err(SubmitError::NotReady)
    );

    supervisor.dispose().await;
}

#[tokio::test]
#[ignore = "requires playpen-worker binary"]
async fn test_oversized_program_is_rejected_locally() {
    let supervisor = start(test_config());
    assert!(supervisor.wait_ready(READY_TIMEOUT).await);

    let code = "x".repeat(10_001);
    assert_eq!(
        supervisor.submit(code).await,
        Err(SubmitError::Validation {
            length: 10_001,
            max: 10_000
        })
    );
    assert!(!supervisor.state().is_running);

    supervisor.dispose().await;
}

#[tokio::test]
#[ignore = "requires playpen-worker binary"]
async fn test_initialize_returns_ready_isolate() {
    let supervisor = start(test_config());
    assert!(supervisor.wait_ready(READY_TIMEOUT).await);

    let generation = tokio::time::timeout(READY_TIMEOUT, supervisor.initialize())
        .await
        .expect("initialized in time");
    assert_eq!(generation, Ok(Generation::new(2)));

    let result = supervisor.run("count").await.unwrap();
    assert_eq!(result.output, "1\n");

    supervisor.dispose().await;
}
