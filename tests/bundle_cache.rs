//! Bundling for runtimes that cannot execute the worker source directly.

mod common;

use std::sync::Arc;

use common::WorkerDir;
use vgi_conformance::vgi_matrix::{Combination, RuntimeTarget, TransportMode};
use vgi_conformance::{BundleBuilder, HarnessError, Session, SessionStats};

fn info(runtime: RuntimeTarget, transport: TransportMode) -> &'static vgi_conformance::vgi_matrix::CombinationInfo {
    Combination::new(runtime, transport).info().unwrap()
}

#[tokio::test]
async fn test_bundle_is_built_once_per_session() {
    let dir = WorkerDir::new("bundle-once");
    let session = Session::new(dir.config());
    let node_http = info(RuntimeTarget::Node, TransportMode::Http);
    let node_zstd = info(RuntimeTarget::Node, TransportMode::HttpZstd);

    let first = session.worker_file(node_http).await.unwrap();
    let again = session.worker_file(node_http).await.unwrap();
    let shared = session.worker_file(node_zstd).await.unwrap();

    assert_eq!(first, again);
    assert_eq!(first, shared, "node http and http-zstd run the same bundle");
    assert_eq!(first, dir.path().join(".conformance-bundles/conformance-http-node.js"));
    assert_eq!(session.stats().builds, 1);

    let bundle = std::fs::read_to_string(&first).unwrap();
    assert!(bundle.starts_with("// mock bundle of "), "{bundle}");
    assert!(bundle.contains("target=node, format=esm"), "{bundle}");
}

#[tokio::test]
async fn test_each_bundled_runtime_gets_its_own_bundle() {
    let dir = WorkerDir::new("bundle-per-runtime");
    let session = Session::new(dir.config());

    let node = session
        .worker_file(info(RuntimeTarget::Node, TransportMode::Http))
        .await
        .unwrap();
    let deno = session
        .worker_file(info(RuntimeTarget::Deno, TransportMode::HttpZstd))
        .await
        .unwrap();
    let bun = session
        .worker_file(info(RuntimeTarget::Bun, TransportMode::Http))
        .await
        .unwrap();

    assert_ne!(node, deno);
    assert_eq!(bun, dir.path().join("examples/conformance-http.ts"));
    assert_eq!(session.stats().builds, 2);

    let artifacts = session.builder().artifacts().await;
    let runtimes: Vec<_> = artifacts.iter().map(|a| a.runtime).collect();
    assert_eq!(runtimes, vec![RuntimeTarget::Deno, RuntimeTarget::Node]);
}

#[tokio::test]
async fn test_output_directory_is_created() {
    let dir = WorkerDir::new("bundle-mkdir");
    let builder = BundleBuilder::new(common::MOCK_WORKER, Arc::new(SessionStats::default()));
    let out = dir.path().join("deep/nested/bundles/worker.js");

    let artifact = builder
        .build(&dir.path().join("examples/conformance-http-node.ts"), RuntimeTarget::Node, &out)
        .await
        .unwrap();
    assert_eq!(artifact.path, out);
    assert!(out.is_file());
}

#[tokio::test]
async fn test_bundler_failure_carries_its_output() {
    let dir = WorkerDir::new("bundle-fail").with_behavior("examples/conformance-http-deno.ts", "build-fail");
    let session = Session::new(dir.config());

    let err = session
        .worker_file(info(RuntimeTarget::Deno, TransportMode::Http))
        .await
        .unwrap_err();
    match err {
        HarnessError::Build { command, output, .. } => {
            assert!(command.contains("--target node --format esm"), "{command}");
            assert!(output.contains("bundling"), "{output}");
            assert!(output.contains("Could not resolve: \"./missing-module\""), "{output}");
        }
        other => panic!("expected Build, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_bundler_is_a_launch_error() {
    let dir = WorkerDir::new("bundle-no-bundler");
    let session = Session::new(dir.config().with_bundler("vgi-no-such-bundler"));

    let err = session
        .worker_file(info(RuntimeTarget::Node, TransportMode::Http))
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::BuildLaunch { .. }), "{err:?}");
}

#[tokio::test]
async fn test_output_path_is_not_shared_across_entries() {
    let dir = WorkerDir::new("bundle-collide");
    let builder = BundleBuilder::new(common::MOCK_WORKER, Arc::new(SessionStats::default()));
    let out = dir.path().join(".conformance-bundles/worker.js");
    let node_entry = dir.path().join("examples/conformance-http-node.ts");
    let deno_entry = dir.path().join("examples/conformance-http-deno.ts");

    builder.build(&node_entry, RuntimeTarget::Node, &out).await.unwrap();

    let err = builder
        .build(&deno_entry, RuntimeTarget::Node, &out)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Config { key: "bundle", .. }), "{err:?}");
    assert!(err.to_string().contains("conformance-http-node.ts"), "{err}");

    let err = builder
        .build(&node_entry, RuntimeTarget::Deno, &out)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Config { key: "bundle", .. }), "{err:?}");

    let artifacts = builder.artifacts().await;
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].entry, node_entry);
}
