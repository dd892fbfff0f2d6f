//! Runs one stage and reports its transitions to the pipeline state.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use maestro_core::{
    emit_stage_transition, Counter, MaestroError, PipelineState, StageName, StageStatus, COUNTERS,
};

use crate::stage::StageOperation;

/// Result of a stage execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageName,

    /// Terminal status: `completed` or `failed`.
    pub status: StageStatus,

    /// Failure description, when the stage failed.
    pub error: Option<String>,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl StageResult {
    pub fn passed(&self) -> bool {
        self.status == StageStatus::Completed
    }
}

/// Moves a stage `running -> completed | failed` around its operation.
#[derive(Clone)]
pub struct StageRunner {
    state: Arc<PipelineState>,
}

impl StageRunner {
    pub fn new(state: Arc<PipelineState>) -> Self {
        Self { state }
    }

    /// Execute `operation` as `stage`.
    ///
    /// Publishes `running` with progress `0%` before the operation and
    /// `completed` with `100%` or `failed` with the error afterwards. A
    /// failed stage keeps its `0%` progress.
    /// Never fails itself; inspect the returned [`StageResult`].
    pub async fn execute(
        &self,
        task: &str,
        stage: StageName,
        operation: &dyn StageOperation,
    ) -> StageResult {
        let start = Instant::now();
        info!(task = %task, stage = %stage, op = %operation.describe(), "Executing stage");

        self.state
            .set_stage(stage, StageStatus::Running, Some("0%".to_string()), None)
            .await;
        emit_stage_transition(task, stage, StageStatus::Running);

        let outcome = operation.execute(task).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        COUNTERS.inc(Counter::StagesRun);

        match outcome {
            Ok(()) => {
                self.state
                    .set_stage(stage, StageStatus::Completed, Some("100%".to_string()), None)
                    .await;
                emit_stage_transition(task, stage, StageStatus::Completed);
                StageResult {
                    stage,
                    status: StageStatus::Completed,
                    error: None,
                    duration_ms,
                }
            }
            Err(e) => {
                COUNTERS.inc(Counter::StagesFailed);
                let message = format!("{e:#}");
                error!(task = %task, stage = %stage, error = %message, "Stage failed");
                self.state
                    .set_stage(
                        stage,
                        StageStatus::Failed,
                        Some("0%".to_string()),
                        Some(message.clone()),
                    )
                    .await;
                emit_stage_transition(task, stage, StageStatus::Failed);
                StageResult {
                    stage,
                    status: StageStatus::Failed,
                    error: Some(message),
                    duration_ms,
                }
            }
        }
    }

    /// Like [`execute`](Self::execute), but a failed stage is an error.
    pub async fn run(
        &self,
        task: &str,
        stage: StageName,
        operation: &dyn StageOperation,
    ) -> maestro_core::Result<StageResult> {
        let result = self.execute(task, stage, operation).await;
        match &result.error {
            Some(message) => Err(MaestroError::StageFailed {
                stage: stage.to_string(),
                message: message.clone(),
            }),
            None => Ok(result),
        }
    }
}
