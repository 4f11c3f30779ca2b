//! Retry executor tests against the in-memory backend
//!
//! Waits are measured on tokio's paused clock, so the expected backoff can be
//! asserted exactly.

mod helpers;

use helpers::{fatal_fault, transient_fault, FakeBackend, FakePatch, FakeSession};
use patchpub_worker::db::BackendFault;
use patchpub_worker::error::ProcessError;
use patchpub_worker::retry::{RetryExecutor, RetryOutcome, RetryPolicy};
use patchpub_worker::source::{ConnectionSource, PatchMetadata, PatchSession};
use std::time::Duration;
use tokio::time::Instant;

fn backend_with_patch(identifier: &str) -> FakeBackend {
    let backend = FakeBackend::new();
    backend.add_patch(identifier, FakePatch::released(identifier, "Session Manager"));
    backend
}

async fn fetch(
    executor: &RetryExecutor<'_, FakeBackend>,
    identifier: &str,
) -> RetryOutcome<Vec<PatchMetadata>, BackendFault> {
    executor
        .run(identifier, |session: FakeSession| {
            let identifier = identifier.to_string();
            async move { session.fetch_metadata(&identifier).await }
        })
        .await
}

#[tokio::test(start_paused = true)]
async fn test_transient_faults_then_success() {
    let backend = backend_with_patch("PATCH100");
    backend.fail_metadata("PATCH100", vec![transient_fault(), transient_fault()]);
    let executor = RetryExecutor::new(&backend, RetryPolicy::default());

    let started = Instant::now();
    let outcome = fetch(&executor, "PATCH100").await;
    let elapsed = started.elapsed();

    match outcome {
        RetryOutcome::Done { value, attempts } => {
            assert_eq!(attempts, 3);
            assert_eq!(value.len(), 1);
            assert_eq!(value[0].identifier, "PATCH100");
        },
        other => panic!("expected success, got {:?}", other),
    }
    // 750ms after the first attempt, 1500ms after the second
    assert!(elapsed >= Duration::from_millis(2250), "waited {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(2300), "waited {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_fault_is_not_retried() {
    let backend = backend_with_patch("PATCH200");
    backend.fail_metadata("PATCH200", vec![fatal_fault(), transient_fault()]);
    let executor = RetryExecutor::new(&backend, RetryPolicy::default());

    let started = Instant::now();
    let outcome = fetch(&executor, "PATCH200").await;

    match outcome {
        RetryOutcome::Fatal { error, attempts } => {
            assert_eq!(attempts, 1);
            assert_eq!(error.code.as_deref(), Some("42501"));
        },
        other => panic!("expected fatal, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_millis(1));
    assert_eq!(backend.metadata_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted() {
    let backend = backend_with_patch("PATCH300");
    backend.fail_metadata("PATCH300", (0..6).map(|_| transient_fault()).collect());
    let executor = RetryExecutor::new(&backend, RetryPolicy::default());

    let started = Instant::now();
    let outcome = fetch(&executor, "PATCH300").await;
    let elapsed = started.elapsed();

    match outcome {
        RetryOutcome::RetriesExhausted { error, attempts } => {
            assert_eq!(attempts, 5);
            assert_eq!(error.code.as_deref(), Some("57P01"));
        },
        other => panic!("expected exhaustion, got {:?}", other),
    }
    // 750 + 1500 + 3000 + 6000, no wait after the last attempt
    assert!(elapsed >= Duration::from_millis(11250), "waited {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(11300), "waited {:?}", elapsed);
    assert_eq!(backend.metadata_calls().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_zero_retries_gives_single_attempt() {
    let backend = backend_with_patch("PATCH400");
    backend.fail_metadata("PATCH400", vec![transient_fault()]);
    let policy = RetryPolicy {
        max_retries: 0,
        base_delay: Duration::from_millis(750),
    };
    let executor = RetryExecutor::new(&backend, policy);

    match fetch(&executor, "PATCH400").await {
        RetryOutcome::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 1),
        other => panic!("expected exhaustion, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_lost_connection_on_acquire_is_recoverable() {
    let backend = backend_with_patch("PATCH500");
    backend.fail_acquire(vec![BackendFault::connection_lost("connection reset by peer")]);
    let executor = RetryExecutor::new(&backend, RetryPolicy::default());

    match fetch(&executor, "PATCH500").await {
        RetryOutcome::Done { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("expected success, got {:?}", other),
    }
    assert_eq!(backend.acquired(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_every_session_is_released() {
    let backend = backend_with_patch("PATCH600");
    backend.fail_metadata("PATCH600", vec![transient_fault(), transient_fault(), fatal_fault()]);
    let executor = RetryExecutor::new(&backend, RetryPolicy::default());

    let outcome = executor
        .run("PATCH600", |session: FakeSession| {
            let backend = backend.clone();
            async move {
                assert_eq!(backend.outstanding(), 1);
                session.fetch_metadata("PATCH600").await
            }
        })
        .await;

    assert!(matches!(outcome, RetryOutcome::Fatal { attempts: 3, .. }));
    assert_eq!(backend.acquired(), 3);
    assert_eq!(backend.released(), 3);
    assert_eq!(backend.max_outstanding(), 1);
}

#[tokio::test]
async fn test_local_errors_are_fatal() {
    let backend = FakeBackend::new();
    let executor = RetryExecutor::new(&backend, helpers::quick_policy());

    let outcome: RetryOutcome<(), ProcessError> = executor
        .run("local", |_session: FakeSession| async {
            Err(ProcessError::io(
                "write archive",
                std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            ))
        })
        .await;

    match outcome {
        RetryOutcome::Fatal { attempts, error } => {
            assert_eq!(attempts, 1);
            assert!(error.to_string().contains("write archive"));
        },
        other => panic!("expected fatal, got {:?}", other),
    }
    assert_eq!(backend.released(), 1);
}

#[tokio::test]
async fn test_default_classifier_is_used() {
    let backend = FakeBackend::new();
    let fault = BackendFault::new("ORA-03113: end-of-file on communication channel");
    assert_eq!(
        backend.classify(&fault),
        patchpub_worker::db::FaultClass::Recoverable
    );
    assert_eq!(
        backend.classify(&fatal_fault()),
        patchpub_worker::db::FaultClass::Fatal
    );
}
