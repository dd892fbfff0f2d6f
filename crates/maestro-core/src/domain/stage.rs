//! Pipeline stage identity and per-stage status records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::MaestroError;

/// The five stages of the development pipeline, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Planner,
    Coder,
    Integrator,
    Tester,
    Reporter,
}

impl StageName {
    /// All stages in execution order.
    pub const ALL: [StageName; 5] = [
        StageName::Planner,
        StageName::Coder,
        StageName::Integrator,
        StageName::Tester,
        StageName::Reporter,
    ];

    /// Get the stage name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Planner => "planner",
            StageName::Coder => "coder",
            StageName::Integrator => "integrator",
            StageName::Tester => "tester",
            StageName::Reporter => "reporter",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = MaestroError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageName::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| MaestroError::UnknownStage(s.to_string()))
    }
}

/// Lifecycle status of a single stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Waiting,
    Running,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Waiting => "waiting",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        }
    }

    /// Whether the stage has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status record for one stage. Fresh records are `waiting` with no progress
/// and no error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StageRecord {
    pub status: StageStatus,
    pub progress: Option<String>,
    pub error: Option<String>,
}

impl StageRecord {
    pub fn new(status: StageStatus, progress: Option<String>, error: Option<String>) -> Self {
        Self {
            status,
            progress,
            error,
        }
    }
}
