//! QA report builder.
//!
//! Extracts counts from raw check output and assembles the report the
//! promotion gate later reads from `reports/qa.json`.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::info;

use maestro_core::{PerfMetrics, QaReport, TestRun};

use crate::gate::{determine_status, generate_next_actions, QaChecks};

/// File name of the report inside the reports directory.
pub const QA_REPORT_FILE: &str = "qa.json";

/// Test counts parsed from test-runner output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestResults {
    pub passed: u64,
    pub failed: u64,
    pub tests_run: Vec<TestRun>,
}

fn capture_number(pattern: &str, output: &str) -> Option<u64> {
    let re = regex::Regex::new(pattern).ok()?;
    re.captures(output)?.get(1)?.as_str().parse().ok()
}

/// Total coverage percentage from a `TOTAL <stmts> <miss> <pct>%` line.
/// `0.0` when absent.
pub fn extract_coverage(output: &str) -> f64 {
    capture_number(r"TOTAL\s+\d+\s+\d+\s+(\d+)%", output)
        .map(|pct| pct as f64)
        .unwrap_or(0.0)
}

/// Passed/failed counts from `N passed` / `N failed` fragments.
pub fn extract_test_results(output: &str) -> TestResults {
    let passed = capture_number(r"(\d+) passed", output).unwrap_or(0);
    let failed = capture_number(r"(\d+) failed", output).unwrap_or(0);

    let mut tests_run = Vec::new();
    if passed > 0 {
        tests_run.push(TestRun {
            name: "unit_tests".to_string(),
            status: "pass".to_string(),
        });
    }
    if failed > 0 {
        tests_run.push(TestRun {
            name: "unit_tests".to_string(),
            status: "fail".to_string(),
        });
    }

    TestResults {
        passed,
        failed,
        tests_run,
    }
}

/// Lines mentioning "error" in any case.
pub fn count_error_lines(output: &str) -> u64 {
    output
        .lines()
        .filter(|line| line.to_lowercase().contains("error"))
        .count() as u64
}

/// Artifacts a QA run is expected to leave behind for `task`.
pub fn artifacts_for(task: &str) -> Vec<String> {
    vec![
        "handoff/plan.json".to_string(),
        "handoff/spec.md".to_string(),
        format!("logs/{task}.lint.out"),
        format!("logs/{task}.types.out"),
        format!("logs/{task}.tests.out"),
    ]
}

/// Assemble the full report for `task` from raw check results.
pub fn build_report(
    task: &str,
    checks: &QaChecks,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> QaReport {
    let tests = extract_test_results(&checks.tests_out);
    let elapsed_sec = (end - start).num_milliseconds() as f64 / 1000.0;

    QaReport {
        task_id: task.to_string(),
        tests_run: tests.tests_run,
        passed: tests.passed,
        failed: tests.failed,
        coverage: extract_coverage(&checks.tests_out),
        lint_errors: count_error_lines(&checks.lint_out),
        type_errors: count_error_lines(&checks.types_out),
        security_findings: 0,
        perf_metrics: Some(PerfMetrics {
            elapsed_sec_total: elapsed_sec,
            timestamp_start: start,
            timestamp_end: end,
        }),
        status: determine_status(&checks.lint_rc, &checks.types_rc, &checks.tests_rc),
        next_actions: generate_next_actions(checks),
        artifacts: artifacts_for(task),
        timestamp_start: start,
        timestamp_end: end,
        elapsed_sec,
    }
}

/// Write `report` to `<dir>/qa.json`, pretty-printed. Returns the path.
pub fn write_report(dir: &Path, report: &QaReport) -> maestro_core::Result<PathBuf> {
    let path = dir.join(QA_REPORT_FILE);
    report.save(&path)?;
    info!(
        task = %report.task_id,
        status = %report.status,
        path = %path.display(),
        elapsed_sec = report.elapsed_sec,
        "QA report written"
    );
    Ok(path)
}
