//! Process-reuse and teardown guarantees of the connection matrix.

mod common;

use std::sync::{Arc, Mutex};

use common::{MockConnector, WorkerDir, pid_exists};
use vgi_conformance::matrix::{LogRecord, LogSink};
use vgi_conformance::vgi_matrix::{Combination, RuntimeTarget, TransportMode};
use vgi_conformance::{Collected, ConnectionMatrix, Factory, HarnessError, Session};

fn matrix(dir: &WorkerDir) -> ConnectionMatrix<MockConnector> {
    ConnectionMatrix::new(Session::new(dir.config()), MockConnector::default())
}

fn factory(matrix: &ConnectionMatrix<MockConnector>, runtime: RuntimeTarget, transport: TransportMode) -> Factory<MockConnector> {
    matrix
        .factory(Combination::new(runtime, transport))
        .unwrap()
        .ready()
        .expect("mock runtime is available")
}

async fn pid_of(factory: &Factory<MockConnector>) -> u32 {
    factory
        .with_client(None, |client| Box::pin(async move { client.call("pid").await }))
        .await
        .unwrap()
        .unwrap()
        .parse()
        .unwrap()
}

#[tokio::test]
async fn test_every_combination_answers() {
    let dir = WorkerDir::new("matrix-all");
    let matrix = matrix(&dir);
    let collected = matrix.collect();
    assert_eq!(collected.len(), 8);

    for (info, collected) in collected {
        let factory = collected.ready().unwrap_or_else(|| panic!("{} skipped", info.id));
        let reply = factory
            .with_client(None, |client| Box::pin(async move { client.call("ping").await }))
            .await
            .unwrap_or_else(|e| panic!("{}: {e:?}", info.id));
        assert_eq!(reply, Ok("pong".to_string()), "{}", info.id);
    }

    matrix.session().shutdown().await.unwrap();
    let stats = matrix.session().stats();
    // One per-test pipe worker, plus one shared worker for each of the other seven.
    assert_eq!(stats.launched, 8);
    assert_eq!(stats.live(), 0);
    // node and deno each bundle once.
    assert_eq!(stats.builds, 2);
}

#[tokio::test]
async fn test_pipe_gets_a_fresh_worker_per_client() {
    let dir = WorkerDir::new("matrix-pipe");
    let matrix = matrix(&dir);
    let pipe = factory(&matrix, RuntimeTarget::Bun, TransportMode::Pipe);

    let first = pid_of(&pipe).await;
    let second = pid_of(&pipe).await;
    assert_ne!(first, second);
    assert!(!pid_exists(first), "worker {first} outlived its client");
    assert!(!pid_exists(second), "worker {second} outlived its client");

    let stats = matrix.session().stats();
    assert_eq!(stats.launched, 2);
    assert_eq!(stats.live(), 0);
}

#[tokio::test]
async fn test_pipe_worker_is_stopped_when_the_body_fails() {
    let dir = WorkerDir::new("matrix-pipe-err");
    let matrix = matrix(&dir);
    let pipe = factory(&matrix, RuntimeTarget::Bun, TransportMode::Pipe);

    let result = pipe
        .with_client(None, |client| Box::pin(async move { client.call("no_such_method").await }))
        .await
        .unwrap();
    assert!(result.unwrap_err().contains("unknown command"));
    assert_eq!(matrix.session().stats().live(), 0);
}

#[tokio::test]
async fn test_dropped_pipe_handle_does_not_leak_the_worker() {
    let dir = WorkerDir::new("matrix-pipe-drop");
    let matrix = matrix(&dir);
    let pipe = factory(&matrix, RuntimeTarget::Bun, TransportMode::Pipe);

    let handle = pipe.acquire(None).await.unwrap();
    assert!(handle.owns_worker());
    drop(handle);
    assert_eq!(matrix.session().stats().live(), 0);
}

#[tokio::test]
async fn test_subprocess_shares_one_worker() {
    let dir = WorkerDir::new("matrix-subprocess");
    let matrix = matrix(&dir);
    let subprocess = factory(&matrix, RuntimeTarget::Bun, TransportMode::Subprocess);

    let mut pids = Vec::new();
    for _ in 0..3 {
        let mut handle = subprocess.acquire(None).await.unwrap();
        assert!(!handle.owns_worker());
        let pid: u32 = handle.call("pid").await.unwrap().parse().unwrap();
        assert_eq!(handle.worker_pid(), Some(pid));
        pids.push(pid);
        handle.release().await.unwrap();
    }
    assert!(pids.windows(2).all(|w| w[0] == w[1]), "{pids:?}");
    assert!(pid_exists(pids[0]), "shared worker stopped after release");

    let combination = Combination::new(RuntimeTarget::Bun, TransportMode::Subprocess);
    assert_eq!(matrix.session().worker_pid(combination).await, Some(pids[0]));
    assert_eq!(matrix.session().stats().launched, 1);

    matrix.session().shutdown().await.unwrap();
    assert!(!pid_exists(pids[0]));
    assert_eq!(matrix.session().worker_pid(combination).await, None);
}

#[tokio::test]
async fn test_http_clients_share_one_server() {
    let dir = WorkerDir::new("matrix-http");
    let matrix = matrix(&dir);
    let http = factory(&matrix, RuntimeTarget::Bun, TransportMode::Http);

    let first = pid_of(&http).await;
    let second = pid_of(&http).await;
    assert_eq!(first, second);
    assert_eq!(matrix.session().stats().launched, 1);

    matrix.session().shutdown().await.unwrap();
    assert_eq!(matrix.session().stats().live(), 0);
}

#[tokio::test]
async fn test_missing_runtime_is_a_skip() {
    let dir = WorkerDir::new("matrix-skip");
    let session = Session::new(dir.config().with_executable(RuntimeTarget::Deno, "vgi-no-such-deno"));
    let matrix = ConnectionMatrix::new(session, MockConnector::default());

    let skipped: Vec<_> = matrix
        .collect()
        .into_iter()
        .filter_map(|(info, collected)| collected.skip_reason().map(|reason| (info.id, reason.to_string())))
        .collect();
    assert_eq!(skipped.len(), 2);
    assert_eq!(skipped[0].0, "deno-http");
    assert!(skipped[0].1.contains("vgi-no-such-deno"), "{}", skipped[0].1);

    let collected = matrix
        .factory(Combination::new(RuntimeTarget::Deno, TransportMode::HttpZstd))
        .unwrap();
    assert!(matches!(collected, Collected::Skip(_)));
    assert_eq!(matrix.session().stats().launched, 0);
}

#[tokio::test]
async fn test_unsupported_combination_is_rejected() {
    let dir = WorkerDir::new("matrix-unsupported");
    let matrix = matrix(&dir);
    let err = matrix
        .factory(Combination::new(RuntimeTarget::Node, TransportMode::Pipe))
        .err()
        .unwrap();
    assert!(matches!(err, HarnessError::Unsupported { .. }));
}

#[tokio::test]
async fn test_pipe_worker_crashing_on_startup_is_a_launch_failure() {
    let dir = WorkerDir::new("matrix-pipe-crash").with_behavior("examples/conformance.ts", "crash");
    let matrix = matrix(&dir);

    let pipe = factory(&matrix, RuntimeTarget::Bun, TransportMode::Pipe);
    match pipe.acquire(None).await.err().unwrap() {
        HarnessError::EarlyExit { command, status, stderr } => {
            assert!(command.contains("conformance.ts"), "{command}");
            assert!(status.contains('3'), "{status}");
            assert!(stderr.contains("simulated crash"), "{stderr}");
        }
        other => panic!("expected EarlyExit, got {other:?}"),
    }

    let subprocess = factory(&matrix, RuntimeTarget::Bun, TransportMode::Subprocess);
    let err = subprocess.acquire(None).await.err().unwrap();
    assert!(matches!(err, HarnessError::Setup { ref fixture, .. } if fixture == "subprocess"), "{err:?}");
    assert!(matches!(err.root_cause(), HarnessError::EarlyExit { .. }), "{err:?}");

    assert!(matrix.connector().subscriptions().is_empty());
    assert_eq!(matrix.session().stats().live(), 0);
}

#[tokio::test]
async fn test_failed_fixture_fails_every_dependent_test_the_same_way() {
    let dir = WorkerDir::new("matrix-setup").with_behavior("examples/conformance-http.ts", "crash");
    let matrix = matrix(&dir);
    let http = factory(&matrix, RuntimeTarget::Bun, TransportMode::Http);

    let first = http.acquire(None).await.err().unwrap();
    let second = http.acquire(None).await.err().unwrap();
    for err in [&first, &second] {
        assert!(err.is_setup_failure());
        assert!(matches!(err, HarnessError::Setup { fixture, .. } if fixture == "http"));
        assert!(matches!(err.root_cause(), HarnessError::EarlyExit { .. }), "{err:?}");
    }
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(matrix.session().stats().launched, 1);
    assert_eq!(matrix.session().stats().live(), 0);

    // Unrelated combinations are unaffected.
    let zstd = factory(&matrix, RuntimeTarget::Bun, TransportMode::HttpZstd);
    assert!(pid_of(&zstd).await > 0);
    matrix.session().shutdown().await.unwrap();
}

#[tokio::test]
async fn test_log_delivery_stops_on_release() {
    let dir = WorkerDir::new("matrix-logs");
    let matrix = matrix(&dir);
    let received: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink_received = Arc::clone(&received);
    let sink: LogSink = Arc::new(move |record: LogRecord| sink_received.lock().unwrap().push(record.message));

    for transport in [TransportMode::Pipe, TransportMode::Http] {
        let factory = factory(&matrix, RuntimeTarget::Bun, transport);
        let mut handle = factory.acquire(Some(Arc::clone(&sink))).await.unwrap();
        assert_eq!(handle.call("log hello from worker").await.unwrap(), "ok");
        handle.release().await.unwrap();
    }

    assert_eq!(*received.lock().unwrap(), vec!["hello from worker".to_string(); 2]);
    let subscriptions = matrix.connector().subscriptions();
    assert_eq!(subscriptions.len(), 2);
    assert!(subscriptions.iter().all(|logs| !logs.is_active()));
    matrix.session().shutdown().await.unwrap();
}

#[tokio::test]
async fn test_compression_reaches_worker_and_client() {
    let dir = WorkerDir::new("matrix-zstd");
    let matrix = matrix(&dir);

    for (transport, expected) in [(TransportMode::Http, 0), (TransportMode::HttpZstd, 3)] {
        let node = factory(&matrix, RuntimeTarget::Node, transport);
        let mut handle = node.acquire(None).await.unwrap();
        assert_eq!(handle.compression_level(), Some(expected));
        assert_eq!(handle.call("compression").await.unwrap(), expected.to_string());
        handle.release().await.unwrap();
    }

    // Bun's zstd entry point configures compression itself.
    let bun = factory(&matrix, RuntimeTarget::Bun, TransportMode::HttpZstd);
    let mut handle = bun.acquire(None).await.unwrap();
    assert_eq!(handle.compression_level(), Some(3));
    assert_eq!(handle.call("compression").await.unwrap(), "0");
    handle.release().await.unwrap();

    matrix.session().shutdown().await.unwrap();
}
