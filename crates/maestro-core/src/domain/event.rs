//! Wire messages exchanged with live-status observers.
//!
//! Outbound messages are [`PipelineEvent`]s serialised as JSON objects with a
//! `type` discriminator. Inbound messages are parsed into [`InboundMessage`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::metrics::PipelineMetrics;
use super::qa::QaReport;
use super::stage::{StageName, StageRecord, StageStatus};

/// Latest documentation status pushed by external documentation tooling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DocStatus {
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub passed: Option<u64>,
    #[serde(default)]
    pub failed: Option<u64>,
    #[serde(default)]
    pub coverage: Option<f64>,
    #[serde(default)]
    pub lint_errors: Option<u64>,
    #[serde(default)]
    pub type_errors: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl From<&QaReport> for DocStatus {
    fn from(report: &QaReport) -> Self {
        Self {
            task: Some(report.task_id.clone()),
            status: Some(report.status.as_str().to_string()),
            passed: Some(report.passed),
            failed: Some(report.failed),
            coverage: Some(report.coverage),
            lint_errors: Some(report.lint_errors),
            type_errors: Some(report.type_errors),
            timestamp: Some(report.timestamp_end.to_rfc3339()),
        }
    }
}

/// Events broadcast to observers.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Full snapshot, sent to newly joining observers and on `get_status`.
    StatusUpdate {
        task: String,
        pipeline: BTreeMap<StageName, StageRecord>,
        metrics: PipelineMetrics,
        doc_status: Option<DocStatus>,
        timestamp: DateTime<Utc>,
    },
    PipelineStart {
        task: String,
        timestamp: DateTime<Utc>,
    },
    NodeUpdate {
        node: StageName,
        status: StageStatus,
        progress: Option<String>,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    MetricsUpdate {
        metrics: PipelineMetrics,
        timestamp: DateTime<Utc>,
    },
    Log {
        level: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    DocUpdate(DocStatus),
    /// Reply to a sender whose message could not be handled.
    Error { message: String },
}

impl PipelineEvent {
    /// The `type` discriminator as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::StatusUpdate { .. } => "status_update",
            PipelineEvent::PipelineStart { .. } => "pipeline_start",
            PipelineEvent::NodeUpdate { .. } => "node_update",
            PipelineEvent::MetricsUpdate { .. } => "metrics_update",
            PipelineEvent::Log { .. } => "log",
            PipelineEvent::DocUpdate(_) => "doc_update",
            PipelineEvent::Error { .. } => "error",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        PipelineEvent::Error {
            message: message.into(),
        }
    }
}

/// Messages observers may send to the status hub.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    GetStatus,
    StartPipeline {
        #[serde(default)]
        task: Option<String>,
    },
    UpdateTask {
        #[serde(default)]
        task: Option<String>,
    },
    DocUpdate(DocStatus),
}

/// Why an inbound message was rejected. The display text is what the sender
/// receives in the `error` reply.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InboundError {
    #[error("Invalid JSON")]
    InvalidJson,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Malformed {kind} message: {reason}")]
    Malformed { kind: String, reason: String },
}

const INBOUND_TYPES: [&str; 4] = ["get_status", "start_pipeline", "update_task", "doc_update"];

impl InboundMessage {
    /// Parse a raw text frame.
    pub fn parse(raw: &str) -> Result<Self, InboundError> {
        let value: Value = serde_json::from_str(raw).map_err(|_| InboundError::InvalidJson)?;
        let kind = match value.get("type") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "null".to_string(),
        };
        if !INBOUND_TYPES.contains(&kind.as_str()) {
            return Err(InboundError::UnknownType(kind));
        }
        serde_json::from_value(value).map_err(|e| InboundError::Malformed {
            kind,
            reason: e.to_string(),
        })
    }
}
