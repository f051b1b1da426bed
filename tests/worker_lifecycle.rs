//! Worker launch, readiness and teardown against the mock worker.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use common::{MOCK_WORKER, WorkerDir, pid_exists};
use vgi_conformance::readiness::{MAX_READINESS_LINE, ProbeSettings, ReadinessKind, await_ready};
use vgi_conformance::vgi_matrix::TransportMode;
use vgi_conformance::{HarnessError, SessionStats, WorkerCommand, WorkerLauncher};

const HTTP_ENTRY: &str = "examples/conformance-http.ts";
const PIPE_ENTRY: &str = "examples/conformance.ts";

fn launcher() -> WorkerLauncher {
    WorkerLauncher::new(Arc::new(SessionStats::default()))
}

fn mock(dir: &WorkerDir, entry: &str, behavior: &str) -> WorkerCommand {
    WorkerCommand::new(MOCK_WORKER)
        .arg("run")
        .arg(dir.path().join(entry).display().to_string())
        .env("VGI_MOCK_BEHAVIOR", behavior)
        .current_dir(dir.path())
}

fn http_ready() -> ReadinessKind {
    ReadinessKind::for_transport(TransportMode::Http).unwrap()
}

// =============================================================================
// Readiness
// =============================================================================

#[tokio::test]
async fn test_endpoint_accepts_connections_once_ready() {
    let dir = WorkerDir::new("ready-slow");
    let launcher = launcher();
    let mut process = launcher
        .start(mock(&dir, HTTP_ENTRY, "slow"), TransportMode::Http)
        .await
        .unwrap();

    let endpoint = await_ready(&mut process, &http_ready(), ProbeSettings::new(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(process.endpoint(), Some(&endpoint));

    // The worker announced its port before listening; readiness must have waited it out.
    let response = reqwest::Client::builder()
        .no_proxy()
        .build()
        .unwrap()
        .get(endpoint.url("/ping"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "pong");

    process.stop(Duration::from_secs(2)).await.unwrap();
    assert_eq!(launcher.stats().snapshot().live(), 0);
}

#[tokio::test]
async fn test_silent_worker_times_out_after_the_deadline() {
    let dir = WorkerDir::new("ready-silent");
    let mut process = launcher()
        .start(mock(&dir, HTTP_ENTRY, "silent"), TransportMode::Http)
        .await
        .unwrap();

    let timeout = Duration::from_millis(800);
    let start = Instant::now();
    let err = await_ready(&mut process, &http_ready(), ProbeSettings::new(timeout))
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(
        matches!(err, HarnessError::ReadinessTimeout { stage: "readiness line", .. }),
        "{err:?}"
    );
    assert!(elapsed >= timeout, "failed early after {elapsed:?}");
    assert!(elapsed < timeout + Duration::from_secs(3), "took {elapsed:?}");
    assert!(err.to_string().contains("vgi-mock-worker"));

    process.stop(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn test_malformed_readiness_line_is_rejected() {
    let dir = WorkerDir::new("ready-garbage");
    let mut process = launcher()
        .start(mock(&dir, HTTP_ENTRY, "garbage"), TransportMode::Http)
        .await
        .unwrap();

    let err = await_ready(&mut process, &http_ready(), ProbeSettings::new(Duration::from_secs(5)))
        .await
        .unwrap_err();
    match err {
        HarnessError::MalformedReadiness { line, .. } => {
            assert_eq!(line, "Listening on http://localhost:3000");
        }
        other => panic!("expected MalformedReadiness, got {other:?}"),
    }

    process.stop(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn test_crash_during_startup_reports_stderr() {
    let dir = WorkerDir::new("ready-crash");
    let launcher = launcher();
    let result = match launcher
        .start(mock(&dir, HTTP_ENTRY, "crash"), TransportMode::Http)
        .await
    {
        Ok(mut process) => {
            let result = await_ready(&mut process, &http_ready(), ProbeSettings::new(Duration::from_secs(5))).await;
            let _ = process.stop(Duration::from_secs(2)).await;
            result.map(|_| ())
        }
        Err(err) => Err(err),
    };

    match result.unwrap_err() {
        HarnessError::EarlyExit { command, stderr, .. } => {
            assert!(command.contains("conformance-http.ts"), "{command}");
            assert!(stderr.contains("simulated crash"), "{stderr}");
        }
        other => panic!("expected EarlyExit, got {other:?}"),
    }
}

#[tokio::test]
async fn test_line_readiness_skips_the_liveness_request() {
    let dir = WorkerDir::new("ready-line");
    let mut process = launcher()
        .start(mock(&dir, HTTP_ENTRY, "normal"), TransportMode::Http)
        .await
        .unwrap();

    let endpoint = await_ready(&mut process, &ReadinessKind::Line, ProbeSettings::new(Duration::from_secs(5)))
        .await
        .unwrap();
    assert!(endpoint.port > 0);
    assert_eq!(process.endpoint(), Some(&endpoint));

    process.stop(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn test_unterminated_first_line_is_cut_off() {
    let dir = WorkerDir::new("ready-flood");
    let mut process = launcher()
        .start(mock(&dir, HTTP_ENTRY, "flood"), TransportMode::Http)
        .await
        .unwrap();

    let err = await_ready(&mut process, &http_ready(), ProbeSettings::new(Duration::from_secs(5)))
        .await
        .unwrap_err();
    match err {
        HarnessError::MalformedReadiness { line, .. } => {
            assert_eq!(line.len() as u64, MAX_READINESS_LINE);
            assert!(line.bytes().all(|b| b == b'x'));
        }
        other => panic!("expected MalformedReadiness, got {other:?}"),
    }

    process.stop(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn test_pipe_worker_crash_is_caught_by_the_startup_grace() {
    let dir = WorkerDir::new("ready-pipe-crash");
    let mut process = launcher()
        .start(mock(&dir, PIPE_ENTRY, "crash"), TransportMode::Pipe)
        .await
        .unwrap();

    match process.await_startup(Duration::from_secs(2)).await.unwrap_err() {
        HarnessError::EarlyExit { command, stderr, .. } => {
            assert!(command.contains("conformance.ts"), "{command}");
            assert!(stderr.contains("simulated crash"), "{stderr}");
        }
        other => panic!("expected EarlyExit, got {other:?}"),
    }
    assert!(!process.is_running());
}

#[tokio::test]
async fn test_pipe_worker_outlives_the_startup_grace() {
    let dir = WorkerDir::new("ready-pipe-up");
    let launcher = launcher();
    let mut process = launcher
        .start(mock(&dir, PIPE_ENTRY, "normal"), TransportMode::Pipe)
        .await
        .unwrap();

    process.await_startup(Duration::from_millis(200)).await.unwrap();
    assert!(process.is_running());

    process.stop(Duration::from_secs(2)).await.unwrap();
    assert!(!process.is_running());
    assert_eq!(launcher.stats().snapshot().live(), 0);
}

#[tokio::test]
async fn test_missing_worker_file_fails_fast() {
    let dir = WorkerDir::new("ready-missing");
    let command = WorkerCommand::new(MOCK_WORKER)
        .arg("run")
        .arg(dir.path().join("examples/nope-http.ts").display().to_string());
    let start = Instant::now();
    let result = match launcher().start(command, TransportMode::Http).await {
        Ok(mut process) => {
            let result = await_ready(&mut process, &http_ready(), ProbeSettings::new(Duration::from_secs(10))).await;
            let _ = process.stop(Duration::from_secs(2)).await;
            result.map(|_| ())
        }
        Err(err) => Err(err),
    };

    let err = result.unwrap_err();
    assert!(matches!(err, HarnessError::EarlyExit { ref stderr, .. } if stderr.contains("Module not found")));
    assert!(start.elapsed() < Duration::from_secs(5));
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn test_pipe_worker_exits_on_end_of_input() {
    let dir = WorkerDir::new("stop-pipe");
    let launcher = launcher();
    let mut process = launcher
        .start(mock(&dir, PIPE_ENTRY, "normal"), TransportMode::Pipe)
        .await
        .unwrap();
    let pid = process.pid();

    process.stop(Duration::from_secs(2)).await.unwrap();
    assert!(!pid_exists(pid));
    assert_eq!(launcher.stats().snapshot().stopped, 1);

    // Stopping twice is a no-op.
    process.stop(Duration::from_secs(2)).await.unwrap();
    assert_eq!(launcher.stats().snapshot().stopped, 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_worker_ignoring_sigterm_is_killed_after_timeout() {
    let dir = WorkerDir::new("stop-hang");
    let launcher = launcher();
    let mut process = launcher
        .start(mock(&dir, PIPE_ENTRY, "hang"), TransportMode::Pipe)
        .await
        .unwrap();
    let pid = process.pid();

    // One round trip guarantees the SIGTERM handler is installed.
    let (mut input, output) = process.take_pipe().unwrap();
    input.write_all(b"ping\n").await.unwrap();
    let mut reply = String::new();
    BufReader::new(output).read_line(&mut reply).await.unwrap();
    assert_eq!(reply, "pong\n");
    drop(input);

    let timeout = Duration::from_millis(500);
    let start = Instant::now();
    let err = process.stop(timeout).await.unwrap_err();
    assert!(matches!(err, HarnessError::TeardownTimeout { pid: p, .. } if p == pid), "{err:?}");
    assert!(start.elapsed() >= timeout);
    assert!(!pid_exists(pid), "worker {pid} survived teardown");
    assert_eq!(launcher.stats().snapshot().live(), 0);
}

#[tokio::test]
async fn test_dropped_worker_is_killed() {
    let dir = WorkerDir::new("stop-drop");
    let launcher = launcher();
    let process = launcher
        .start(mock(&dir, PIPE_ENTRY, "normal"), TransportMode::Pipe)
        .await
        .unwrap();
    drop(process);
    assert_eq!(launcher.stats().snapshot().live(), 0);
}
