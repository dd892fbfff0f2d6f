//! Pipeline sequencing across the five stages.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn, Instrument};

use maestro_core::{
    emit_pipeline_finished, emit_pipeline_started, pipeline_span, Counter, PipelineState,
    StageName, COUNTERS,
};

use crate::precondition::Precondition;
use crate::runner::{StageResult, StageRunner};
use crate::stage::StagePlan;

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub task: String,

    /// Whether every stage completed.
    pub success: bool,

    /// Results of the stages that ran, in order.
    pub stages: Vec<StageResult>,

    /// The stage that halted the run.
    pub failed_stage: Option<StageName>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl PipelineResult {
    /// Number of stages that passed.
    pub fn passed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.passed()).count()
    }

    /// Number of stages that failed.
    pub fn failed_count(&self) -> usize {
        self.stages.iter().filter(|s| !s.passed()).count()
    }

    /// `pipeline failed at stage <stage>: <error>` for a failed run.
    pub fn failure_message(&self) -> Option<String> {
        let stage = self.failed_stage?;
        let error = self
            .stages
            .iter()
            .find(|s| s.stage == stage)
            .and_then(|s| s.error.clone())
            .unwrap_or_default();
        Some(format!("pipeline failed at stage {stage}: {error}"))
    }
}

/// Drives planner, coder, integrator, tester and reporter in order.
///
/// Not reentrant: running two tasks concurrently against the same
/// [`PipelineState`] interleaves their stage updates.
pub struct PipelineSequencer {
    state: Arc<PipelineState>,
    runner: StageRunner,
    plan: StagePlan,
    preconditions: Vec<Box<dyn Precondition>>,
}

impl PipelineSequencer {
    pub fn new(state: Arc<PipelineState>, plan: StagePlan) -> Self {
        Self {
            runner: StageRunner::new(state.clone()),
            state,
            plan,
            preconditions: Vec::new(),
        }
    }

    /// Add a check evaluated before the run starts.
    pub fn with_precondition(mut self, precondition: impl Precondition + 'static) -> Self {
        self.preconditions.push(Box::new(precondition));
        self
    }

    pub fn state(&self) -> &Arc<PipelineState> {
        &self.state
    }

    /// Run the pipeline for `task`.
    ///
    /// A failed precondition returns `Err` before any stage changes. A stage
    /// failure halts the run; later stages stay `waiting` and the result
    /// reports `success == false`.
    pub async fn run(&self, task: &str) -> maestro_core::Result<PipelineResult> {
        self.run_stages(task).instrument(pipeline_span(task)).await
    }

    async fn run_stages(&self, task: &str) -> maestro_core::Result<PipelineResult> {
        let start = Instant::now();

        for precondition in &self.preconditions {
            if let Err(e) = precondition.check(task) {
                warn!(
                    task = %task, check = %precondition.name(), error = %e,
                    "Precondition failed"
                );
                return Err(e);
            }
        }

        emit_pipeline_started(task);
        COUNTERS.inc(Counter::PipelinesRun);
        self.state.start_pipeline(task).await;

        let mut stages = Vec::with_capacity(StageName::ALL.len());
        let mut failed_stage = None;
        for stage in StageName::ALL {
            let operation = self.plan.operation(stage);
            let result = self.runner.execute(task, stage, operation.as_ref()).await;
            let passed = result.passed();
            stages.push(result);
            if !passed {
                failed_stage = Some(stage);
                break;
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let result = PipelineResult {
            task: task.to_string(),
            success: failed_stage.is_none(),
            stages,
            failed_stage,
            duration_ms,
        };

        match result.failure_message() {
            Some(message) => self.state.log("ERROR", &message).await,
            None => {
                self.state
                    .log("INFO", &format!("Pipeline completed for task: {task}"))
                    .await
            }
        }
        info!(
            task = %task,
            passed = result.passed_count(),
            failed = result.failed_count(),
            duration_ms,
            "Pipeline finished"
        );
        emit_pipeline_finished(task, duration_ms, result.success);
        COUNTERS.log_snapshot(task);

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::FnStage;
    use maestro_core::StageStatus;

    #[tokio::test]
    async fn test_all_noop_stages_complete() {
        let state = Arc::new(PipelineState::standalone());
        let sequencer = PipelineSequencer::new(state.clone(), StagePlan::new());

        let result = sequencer.run("t1").await.unwrap();
        assert!(result.success);
        assert_eq!(result.passed_count(), 5);
        assert_eq!(result.failure_message(), None);
        assert_eq!(state.task().await, "t1");
        for stage in StageName::ALL {
            assert_eq!(state.stage(stage).await.status, StageStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_failure_halts_and_leaves_rest_waiting() {
        let state = Arc::new(PipelineState::standalone());
        let plan = StagePlan::new().with(
            StageName::Integrator,
            Arc::new(FnStage::new("merge", |_: &str| anyhow::bail!("conflict"))),
        );
        let sequencer = PipelineSequencer::new(state.clone(), plan);

        let result = sequencer.run("t1").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.failed_stage, Some(StageName::Integrator));
        assert_eq!(result.stages.len(), 3);
        assert_eq!(
            result.failure_message().as_deref(),
            Some("pipeline failed at stage integrator: conflict")
        );
        assert_eq!(state.stage(StageName::Tester).await.status, StageStatus::Waiting);
        assert_eq!(state.stage(StageName::Reporter).await.status, StageStatus::Waiting);
    }
}
