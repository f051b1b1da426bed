//! CLI command implementations
//!
//! All command functions return `CliResult<ExitCode>` instead of calling
//! `process::exit`. Error handling and exits happen in the top-level `run()`.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use vgi_matrix::{
    Combination, OverrideRegistry, RuntimeTarget, ScenarioId, TransportMode, WorkerSource, runtimes,
};

use super::reporter::{CaseInfo, CaseResult, MatrixReporter, MatrixSummary};
use super::{CliError, CliResult, ExitCode};
use crate::config::HarnessConfig;
use crate::matrix::{Collected, ConnectionMatrix, LivenessConnector, Session};

fn block_on<F: Future>(future: F) -> CliResult<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::failure(format!("Error starting async runtime: {e}")))?;
    Ok(runtime.block_on(future))
}

// ============================================================================
// matrix
// ============================================================================

/// One row of `vgi-conformance matrix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixRow {
    pub id: &'static str,
    pub runtime: RuntimeTarget,
    pub transport: TransportMode,
    pub worker_file: String,
    pub skip_reason: Option<String>,
}

pub fn matrix_rows(session: &Session) -> Vec<MatrixRow> {
    let config = session.config();
    ConnectionMatrix::<LivenessConnector>::combinations()
        .map(|info| MatrixRow {
            id: info.id,
            runtime: info.combination.runtime,
            transport: info.combination.transport,
            worker_file: config
                .bundle_path(info)
                .unwrap_or_else(|| config.entry_path(info))
                .display()
                .to_string(),
            skip_reason: session.availability(info.combination).err(),
        })
        .collect()
}

pub fn render_matrix_table(rows: &[MatrixRow]) -> String {
    let id_width = rows.iter().map(|r| r.id.len()).max().unwrap_or(2).max("ID".len());
    let mut out = format!(
        "{:<id_width$}  {:<7}  {:<10}  {:<12}  {:<8}  {}\n",
        "ID", "RUNTIME", "TRANSPORT", "CLASS", "SCOPE", "STATUS"
    );
    for row in rows {
        let scope = match row.transport.scope() {
            vgi_matrix::ProcessScope::PerTest => "per-test",
            vgi_matrix::ProcessScope::Session => "session",
        };
        let status = match &row.skip_reason {
            None => "ready".to_string(),
            Some(reason) => format!("skip: {reason}"),
        };
        out.push_str(&format!(
            "{:<id_width$}  {:<7}  {:<10}  {:<12}  {:<8}  {}\n",
            row.id,
            row.runtime.as_str(),
            row.transport.as_str(),
            row.transport.class().as_str(),
            scope,
            status
        ));
    }
    out
}

pub fn render_matrix_json(rows: &[MatrixRow]) -> serde_json::Value {
    serde_json::Value::Array(
        rows.iter()
            .map(|row| {
                serde_json::json!({
                    "id": row.id,
                    "runtime": row.runtime.as_str(),
                    "transport": row.transport.as_str(),
                    "class": row.transport.class().as_str(),
                    "compressed": row.transport.is_compressed(),
                    "worker_file": row.worker_file,
                    "available": row.skip_reason.is_none(),
                    "skip_reason": row.skip_reason,
                })
            })
            .collect(),
    )
}

pub fn list_matrix(config: &HarnessConfig, json: bool) -> CliResult<ExitCode> {
    let session = Session::new(config.clone());
    let rows = matrix_rows(&session);
    if json {
        let text = serde_json::to_string_pretty(&render_matrix_json(&rows))
            .map_err(|e| CliError::failure(format!("Error encoding JSON: {e}")))?;
        println!("{text}");
    } else {
        print!("{}", render_matrix_table(&rows));
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// bundle
// ============================================================================

pub fn build_bundles(config: HarnessConfig, runtime: Option<&str>) -> CliResult<ExitCode> {
    let selected = match runtime {
        Some(name) => {
            let runtime = runtimes::from_str(name)
                .ok_or_else(|| CliError::usage(format!("Error: unknown runtime '{name}' (expected bun, node or deno)")))?;
            if matches!(runtimes::info_for(runtime).source, WorkerSource::Native) {
                println!("{runtime} runs the worker source directly; nothing to build");
                return Ok(ExitCode::SUCCESS);
            }
            Some(runtime)
        }
        None => None,
    };

    let session = Session::new(config);
    block_on(async {
        let mut seen = BTreeSet::new();
        for info in ConnectionMatrix::<LivenessConnector>::combinations() {
            let runtime = info.combination.runtime;
            if selected.is_some_and(|r| r != runtime) || !runtime.needs_bundle() {
                continue;
            }
            let path = session.worker_file(info).await?;
            if seen.insert(path.clone()) {
                println!("built {} ({runtime})", path.display());
            }
        }
        let builds = session.stats().builds;
        println!("{builds} bundle(s) built");
        Ok::<_, CliError>(ExitCode::SUCCESS)
    })?
}

// ============================================================================
// check
// ============================================================================

/// Launch, probe and release one client per combination, then shut the session down.
pub async fn run_check<R: MatrixReporter>(
    session: Arc<Session>,
    reporter: &mut R,
    stop_on_fail: bool,
    filter: Option<&str>,
) -> MatrixSummary {
    let start = Instant::now();
    let matrix = ConnectionMatrix::new(Arc::clone(&session), LivenessConnector);
    let cases: Vec<_> = matrix
        .collect()
        .into_iter()
        .filter(|(info, _)| filter.is_none_or(|keyword| info.id.contains(keyword)))
        .collect();
    reporter.on_collection_complete(cases.len());

    let mut summary = MatrixSummary::default();
    for (info, collected) in cases {
        let case = CaseInfo {
            id: info.id.to_string(),
            runtime: info.combination.runtime.to_string(),
            transport: info.combination.transport.to_string(),
        };
        reporter.on_case_start(&case);
        let case_start = Instant::now();
        let result = match collected {
            Collected::Skip(reason) => CaseResult::Skipped(reason),
            Collected::Ready(factory) => match check_one(&factory).await {
                Ok(()) => CaseResult::Passed(case_start.elapsed()),
                Err(message) => CaseResult::Failed(case_start.elapsed(), message),
            },
        };
        reporter.on_case_complete(&case, &result);
        summary.record(&result);
        if stop_on_fail && matches!(result, CaseResult::Failed(..)) {
            break;
        }
    }

    if let Err(err) = session.shutdown().await {
        summary.teardown_error = Some(format!("{:?}", miette::Report::new(err)));
    }
    summary.duration = start.elapsed();
    reporter.on_run_complete(&summary);
    summary
}

async fn check_one(factory: &crate::matrix::Factory<LivenessConnector>) -> Result<(), String> {
    let render = |err| format!("{:?}", miette::Report::new(err));
    let handle = factory.acquire(None).await.map_err(render)?;
    let checked = handle.check().await;
    handle.release().await.map_err(render)?;
    checked.map(|_| ()).map_err(|e| e.to_string())
}

pub fn check_matrix<R: MatrixReporter>(
    config: HarnessConfig,
    reporter: &mut R,
    stop_on_fail: bool,
    filter: Option<&str>,
) -> CliResult<ExitCode> {
    let session = Session::new(config);
    let summary = block_on(run_check(session, reporter, stop_on_fail, filter))?;
    if summary.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

// ============================================================================
// overrides
// ============================================================================

pub fn render_overrides(registry: &OverrideRegistry) -> String {
    let mut out = String::new();
    for scenario in ScenarioId::ALL {
        out.push_str(&format!("{scenario}\n"));
        for transport in TransportMode::ALL {
            let expectation = registry.expectation(scenario, transport);
            let behaviour = if !expectation.applies() {
                "skipped".to_string()
            } else {
                match (expectation.message, expectation.surfacing) {
                    (Some(message), Some(surfacing)) => format!("{message:?} once, {surfacing}"),
                    (Some(message), None) => format!("{message:?} once"),
                    (None, _) => "no error".to_string(),
                }
            };
            let note = expectation
                .overridden_by
                .map(|rule| format!("  [override: {}]", rule.reason))
                .unwrap_or_default();
            out.push_str(&format!("  {:<10}  {behaviour}{note}\n", transport.as_str()));
        }
    }
    out
}

pub fn show_overrides() -> CliResult<ExitCode> {
    print!("{}", render_overrides(&OverrideRegistry::default()));
    Ok(ExitCode::SUCCESS)
}
