//! Structured observability hooks for Maestro pipeline and promotion events.
//!
//! This module provides:
//! - Task-scoped tracing spans via the `PipelineSpan` RAII guard
//! - Emission functions for lifecycle events: pipeline start, stage transition,
//!   pipeline finish, QA gate evaluation
//! - Operation records for promotion steps, optionally mirrored to a JSON-lines file
//!
//! Events are emitted at `info!` level; filter with `RUST_LOG`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::config::LoggingConfig;
use crate::domain::{QaStatus, StageName, StageStatus};

/// Task-scoped span. Attach it to futures with `tracing::Instrument`.
pub fn pipeline_span(task: &str) -> tracing::Span {
    tracing::info_span!("maestro.pipeline", task = %task)
}

/// RAII guard that enters a task-scoped tracing span for the duration of a run.
///
/// The guard is `!Send`; inside async code prefer instrumenting the future
/// with [`pipeline_span`].
///
/// ```ignore
/// let _span = PipelineSpan::enter("task-42");
/// // every tracing call below carries task = "task-42"
/// ```
pub struct PipelineSpan {
    _span: tracing::span::EnteredSpan,
}

impl PipelineSpan {
    pub fn enter(task: &str) -> Self {
        Self {
            _span: pipeline_span(task).entered(),
        }
    }
}

/// Emit event: pipeline run started.
pub fn emit_pipeline_started(task: &str) {
    info!(event = "pipeline.started", task = %task);
}

/// Emit event: one stage changed status.
pub fn emit_stage_transition(task: &str, stage: StageName, status: StageStatus) {
    info!(event = "stage.transition", task = %task, stage = %stage, status = %status);
}

/// Emit event: pipeline run finished.
pub fn emit_pipeline_finished(task: &str, duration_ms: u64, success: bool) {
    info!(
        event = "pipeline.finished",
        task = %task,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: QA gate decided a status.
pub fn emit_gate_evaluated(task: &str, status: QaStatus, next_actions: usize) {
    info!(
        event = "gate.evaluated",
        task = %task,
        status = %status,
        next_actions = next_actions,
    );
}

/// One promotion step outcome: `{timestamp, task_id, operation, status, ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationRecord {
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub operation: String,
    pub status: String,
    #[serde(flatten)]
    pub details: BTreeMap<String, Value>,
}

impl OperationRecord {
    pub fn new(task_id: &str, operation: &str, status: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            task_id: task_id.to_string(),
            operation: operation.to_string(),
            status: status.to_string(),
            details: BTreeMap::new(),
        }
    }

    /// Attach an extra field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Sink for operation records.
///
/// Records always go to `tracing`; when a log file is configured they are
/// also appended to it as JSON lines. File errors are logged and swallowed.
#[derive(Debug, Default)]
pub struct OperationLog {
    file: Option<PathBuf>,
    history: Mutex<Vec<OperationRecord>>,
}

impl OperationLog {
    /// Log that only emits tracing events.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log that also appends to `path`.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(path.into()),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        match &config.log_file {
            Some(path) => Self::with_file(path),
            None => Self::new(),
        }
    }

    pub fn record(&self, record: OperationRecord) {
        info!(
            event = "operation",
            task = %record.task_id,
            operation = %record.operation,
            status = %record.status,
            details = %serde_json::to_string(&record.details).unwrap_or_default(),
        );

        if let Some(path) = &self.file {
            if let Err(e) = append_json_line(path, &record) {
                warn!(path = %path.display(), error = %e, "Failed to write operation log");
            }
        }

        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
    }

    /// Records written through this log, oldest first.
    pub fn history(&self) -> Vec<OperationRecord> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

fn append_json_line(path: &Path, record: &OperationRecord) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let line = serde_json::to_string(record)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}
