//! Aggregate pipeline metrics shown on the dashboard.

use serde::{Deserialize, Serialize};

use super::qa::QaReport;

/// Aggregate counters for the active task.
///
/// Only ever replaced or merged from external input (a QA report or an
/// explicit patch); the core never computes these itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PipelineMetrics {
    pub total_time: f64,
    pub tests_passed: u64,
    pub coverage: f64,
    pub files_touched: u64,
}

/// Partial metrics update. `None` fields leave the current value untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MetricsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests_passed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_touched: Option<u64>,
}

impl PipelineMetrics {
    /// Merge a patch into the current metrics.
    pub fn apply(&mut self, patch: &MetricsPatch) {
        if let Some(v) = patch.total_time {
            self.total_time = v;
        }
        if let Some(v) = patch.tests_passed {
            self.tests_passed = v;
        }
        if let Some(v) = patch.coverage {
            self.coverage = v;
        }
        if let Some(v) = patch.files_touched {
            self.files_touched = v;
        }
    }
}

impl From<&QaReport> for MetricsPatch {
    fn from(report: &QaReport) -> Self {
        Self {
            total_time: Some(report.elapsed_sec),
            tests_passed: Some(report.passed),
            coverage: Some(report.coverage),
            files_touched: None,
        }
    }
}
