//! Pytest-style reporting for `vgi-conformance check`.
//!
//! Checking is separated from reporting by the [`MatrixReporter`] trait; [`ConsoleReporter`] is
//! the default and prints one status mark per combination.

use std::time::Duration;

/// One parametrised case of the run.
#[derive(Debug, Clone)]
pub struct CaseInfo {
    /// Parametrisation id, e.g. `node-http`.
    pub id: String,
    pub runtime: String,
    pub transport: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseResult {
    Passed(Duration),
    Failed(Duration, String),
    Skipped(String),
}

/// Totals for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatrixSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Session teardown failure, reported after all cases.
    pub teardown_error: Option<String>,
    pub duration: Duration,
}

impl MatrixSummary {
    pub fn record(&mut self, result: &CaseResult) {
        self.total += 1;
        match result {
            CaseResult::Passed(_) => self.passed += 1,
            CaseResult::Failed(..) => self.failed += 1,
            CaseResult::Skipped(_) => self.skipped += 1,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.teardown_error.is_none()
    }

    /// `2 passed, 1 skipped`, without colors.
    pub fn plain_counts(&self) -> String {
        let mut parts = Vec::new();
        if self.passed > 0 {
            parts.push(format!("{} passed", self.passed));
        }
        if self.failed > 0 {
            parts.push(format!("{} failed", self.failed));
        }
        if self.skipped > 0 {
            parts.push(format!("{} skipped", self.skipped));
        }
        if parts.is_empty() {
            parts.push("no cases".to_string());
        }
        parts.join(", ")
    }
}

/// Receives progress events from a matrix check.
pub trait MatrixReporter {
    fn on_collection_complete(&mut self, case_count: usize);

    fn on_case_start(&mut self, case: &CaseInfo);

    fn on_case_complete(&mut self, case: &CaseInfo, result: &CaseResult);

    fn on_run_complete(&mut self, summary: &MatrixSummary);
}

#[derive(Default)]
pub struct ConsoleReporter {
    pub verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl MatrixReporter for ConsoleReporter {
    fn on_collection_complete(&mut self, case_count: usize) {
        if case_count == 0 {
            eprintln!("No combinations collected");
        } else if self.verbose {
            eprintln!("collected {case_count} combination(s)\n");
        }
    }

    fn on_case_start(&mut self, case: &CaseInfo) {
        if self.verbose {
            eprint!("check[{}] ({} / {}) ... ", case.id, case.runtime, case.transport);
        }
    }

    fn on_case_complete(&mut self, case: &CaseInfo, result: &CaseResult) {
        let status = match result {
            CaseResult::Passed(d) if self.verbose => format!("\x1b[32mPASSED\x1b[0m ({}ms)", d.as_millis()),
            CaseResult::Passed(_) => "\x1b[32m.\x1b[0m".to_string(),
            CaseResult::Failed(d, _) if self.verbose => format!("\x1b[31mFAILED\x1b[0m ({}ms)", d.as_millis()),
            CaseResult::Failed(..) => "\x1b[31mF\x1b[0m".to_string(),
            CaseResult::Skipped(reason) if self.verbose => format!("\x1b[33mSKIPPED\x1b[0m ({reason})"),
            CaseResult::Skipped(_) => "\x1b[33ms\x1b[0m".to_string(),
        };

        if self.verbose {
            eprintln!("{status}");
        } else {
            eprint!("{status}");
        }

        if let CaseResult::Failed(_, error) = result {
            eprintln!("\n\x1b[31m{}\x1b[0m", case.id);
            eprintln!("{error}");
        }
    }

    fn on_run_complete(&mut self, summary: &MatrixSummary) {
        if !self.verbose {
            eprintln!();
        }
        eprintln!();
        if let Some(error) = &summary.teardown_error {
            eprintln!("\x1b[31msession teardown failed\x1b[0m\n{error}\n");
        }

        let mut parts = Vec::new();
        if summary.passed > 0 {
            parts.push(format!("\x1b[32m{} passed\x1b[0m", summary.passed));
        }
        if summary.failed > 0 {
            parts.push(format!("\x1b[31m{} failed\x1b[0m", summary.failed));
        }
        if summary.skipped > 0 {
            parts.push(format!("\x1b[33m{} skipped\x1b[0m", summary.skipped));
        }
        eprintln!("====== {} in {:.2}s ======", parts.join(", "), summary.duration.as_secs_f64());
    }
}

/// Reporter that keeps every event, for tests and machine-readable output.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    pub collected: Option<usize>,
    pub results: Vec<(String, CaseResult)>,
    pub summary: Option<MatrixSummary>,
}

impl MatrixReporter for RecordingReporter {
    fn on_collection_complete(&mut self, case_count: usize) {
        self.collected = Some(case_count);
    }

    fn on_case_start(&mut self, _case: &CaseInfo) {}

    fn on_case_complete(&mut self, case: &CaseInfo, result: &CaseResult) {
        self.results.push((case.id.clone(), result.clone()));
    }

    fn on_run_complete(&mut self, summary: &MatrixSummary) {
        self.summary = Some(summary.clone());
    }
}
