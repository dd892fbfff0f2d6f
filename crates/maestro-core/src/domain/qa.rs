//! Structured quality report produced after a pipeline run.
//!
//! The report is external input to the promotion gate: it is loaded once and
//! treated as immutable afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use super::error::{MaestroError, Result};

/// Overall QA verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum QaStatus {
    /// Lint, type and test checks all returned zero.
    #[serde(rename = "pass")]
    Pass,
    /// Lint and type checks are clean but tests failed.
    #[serde(rename = "soft-fail")]
    SoftFail,
    /// Lint or type checks failed.
    #[serde(rename = "fail")]
    Fail,
}

impl QaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QaStatus::Pass => "pass",
            QaStatus::SoftFail => "soft-fail",
            QaStatus::Fail => "fail",
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, QaStatus::Pass)
    }
}

impl fmt::Display for QaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the coarse executed-tests list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestRun {
    pub name: String,
    pub status: String,
}

/// Timing block of the report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerfMetrics {
    pub elapsed_sec_total: f64,
    pub timestamp_start: DateTime<Utc>,
    pub timestamp_end: DateTime<Utc>,
}

/// QA report as written to `reports/qa.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QaReport {
    pub task_id: String,
    #[serde(default)]
    pub tests_run: Vec<TestRun>,
    pub passed: u64,
    pub failed: u64,
    pub coverage: f64,
    pub lint_errors: u64,
    pub type_errors: u64,
    #[serde(default)]
    pub security_findings: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perf_metrics: Option<PerfMetrics>,
    pub status: QaStatus,
    pub next_actions: Vec<String>,
    #[serde(default)]
    pub artifacts: Vec<String>,
    pub timestamp_start: DateTime<Utc>,
    pub timestamp_end: DateTime<Utc>,
    #[serde(default)]
    pub elapsed_sec: f64,
}

impl QaReport {
    /// Load a report from disk.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MaestroError::QaReport(format!(
                "QA report not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            MaestroError::QaReport(format!("invalid QA report {}: {e}", path.display()))
        })
    }

    /// Write the report as pretty-printed JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_report() -> QaReport {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 3, 1, 10, 2, 5).unwrap();
        QaReport {
            task_id: "t-42".to_string(),
            tests_run: vec![TestRun {
                name: "unit_tests".to_string(),
                status: "pass".to_string(),
            }],
            passed: 12,
            failed: 0,
            coverage: 87.35,
            lint_errors: 0,
            type_errors: 0,
            security_findings: 0,
            perf_metrics: None,
            status: QaStatus::Pass,
            next_actions: vec!["b".to_string(), "a".to_string(), "c".to_string()],
            artifacts: vec![],
            timestamp_start: start,
            timestamp_end: end,
            elapsed_sec: 125.0,
        }
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_string(&QaStatus::SoftFail).unwrap(), "\"soft-fail\"");
        let parsed: QaStatus = serde_json::from_str("\"pass\"").unwrap();
        assert_eq!(parsed, QaStatus::Pass);
        assert!(serde_json::from_str::<QaStatus>("\"unknown\"").is_err());
    }

    #[test]
    fn test_report_file_roundtrip_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("qa.json");
        let report = sample_report();

        report.save(&path).unwrap();
        let loaded = QaReport::load(&path).unwrap();

        assert_eq!(loaded, report);
        assert_eq!(loaded.coverage, 87.35);
        assert_eq!(loaded.next_actions, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_load_missing_report() {
        let dir = tempfile::tempdir().unwrap();
        let err = QaReport::load(&dir.path().join("qa.json")).unwrap_err();
        assert!(err.to_string().contains("QA report not found"));
    }

    #[test]
    fn test_load_accepts_external_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qa.json");
        std::fs::write(
            &path,
            r#"{
                "task_id": "ext",
                "passed": 3,
                "failed": 1,
                "coverage": 60.0,
                "lint_errors": 0,
                "type_errors": 0,
                "status": "soft-fail",
                "next_actions": ["Corrigir testes falhando"],
                "timestamp_start": "2025-03-01T10:00:00.123456Z",
                "timestamp_end": "2025-03-01T10:00:00.123456Z"
            }"#,
        )
        .unwrap();

        let report = QaReport::load(&path).unwrap();
        assert_eq!(report.status, QaStatus::SoftFail);
        assert!(report.tests_run.is_empty());
        assert_eq!(report.security_findings, 0);
    }
}
