//! Domain-level error taxonomy for Maestro.

/// Maestro domain errors.
///
/// Validation declines (excluded files, oversized diffs) are not errors; they
/// come back as a [`crate::git::ChangeValidation`] verdict.
#[derive(Debug, thiserror::Error)]
pub enum MaestroError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("stage {stage} failed: {message}")]
    StageFailed { stage: String, message: String },

    #[error("unknown stage: {0}")]
    UnknownStage(String),

    #[error("tool not available: {0}")]
    ToolUnavailable(String),

    #[error("{tool} failed during {operation}: {stderr}")]
    ToolFailed {
        tool: String,
        operation: String,
        stderr: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("qa report error: {0}")]
    QaReport(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Maestro domain operations.
pub type Result<T> = std::result::Result<T, MaestroError>;
