//! The single mutable source of truth for a pipeline run.
//!
//! [`PipelineState`] owns the active task id, one [`StageRecord`] per stage,
//! the aggregate metrics and the latest documentation status. Every mutation
//! goes through its methods and is mirrored to observers through the shared
//! [`StatusBroadcaster`].

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::broadcaster::{Observer, ObserverId, StatusBroadcaster};
use crate::domain::{
    DocStatus, InboundError, InboundMessage, MetricsPatch, PipelineEvent,
    PipelineMetrics, Result, StageName, StageRecord, StageStatus,
};

/// Task shown before any run has started, and used when `start_pipeline`
/// arrives without a task.
pub const DEFAULT_TASK: &str = "demo";

/// Point-in-time copy of the pipeline state.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSnapshot {
    pub task: String,
    pub stages: BTreeMap<StageName, StageRecord>,
    pub metrics: PipelineMetrics,
    pub doc_status: Option<DocStatus>,
}

impl PipelineSnapshot {
    /// The `status_update` event for this snapshot.
    pub fn to_event(&self) -> PipelineEvent {
        PipelineEvent::StatusUpdate {
            task: self.task.clone(),
            pipeline: self.stages.clone(),
            metrics: self.metrics.clone(),
            doc_status: self.doc_status.clone(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug)]
struct Inner {
    task: String,
    stages: BTreeMap<StageName, StageRecord>,
    metrics: PipelineMetrics,
    doc_status: Option<DocStatus>,
}

fn fresh_stages() -> BTreeMap<StageName, StageRecord> {
    StageName::ALL
        .into_iter()
        .map(|stage| (stage, StageRecord::default()))
        .collect()
}

/// Pipeline state shared between the sequencer and the status hub.
pub struct PipelineState {
    broadcaster: Arc<StatusBroadcaster>,
    inner: RwLock<Inner>,
}

impl PipelineState {
    pub fn new(broadcaster: Arc<StatusBroadcaster>) -> Self {
        Self {
            broadcaster,
            inner: RwLock::new(Inner {
                task: DEFAULT_TASK.to_string(),
                stages: fresh_stages(),
                metrics: PipelineMetrics::default(),
                doc_status: None,
            }),
        }
    }

    /// State with its own private broadcaster.
    pub fn standalone() -> Self {
        Self::new(Arc::new(StatusBroadcaster::new()))
    }

    pub fn broadcaster(&self) -> &Arc<StatusBroadcaster> {
        &self.broadcaster
    }

    /// Reset every stage to `waiting`, make `task` the active task and
    /// broadcast `pipeline_start`.
    pub async fn start_pipeline(&self, task: &str) {
        {
            let mut inner = self.inner.write().await;
            inner.task = task.to_string();
            inner.stages = fresh_stages();
        }
        info!(task = %task, "Pipeline state reset");
        self.broadcaster
            .broadcast(&PipelineEvent::PipelineStart {
                task: task.to_string(),
                timestamp: Utc::now(),
            })
            .await;
    }

    /// Set the named stage's record and broadcast `node_update`.
    ///
    /// An unrecognised stage name changes nothing, logs a warning and
    /// returns [`MaestroError::UnknownStage`](crate::domain::MaestroError::UnknownStage).
    pub async fn update_stage(
        &self,
        stage: &str,
        status: StageStatus,
        progress: Option<String>,
        error: Option<String>,
    ) -> Result<()> {
        let name: StageName = match stage.parse() {
            Ok(name) => name,
            Err(e) => {
                warn!(stage = %stage, "Ignoring update for unknown stage");
                return Err(e);
            }
        };
        self.set_stage(name, status, progress, error).await;
        Ok(())
    }

    /// Typed variant of [`update_stage`](Self::update_stage).
    pub async fn set_stage(
        &self,
        stage: StageName,
        status: StageStatus,
        progress: Option<String>,
        error: Option<String>,
    ) {
        {
            let mut inner = self.inner.write().await;
            inner.stages.insert(
                stage,
                StageRecord::new(status, progress.clone(), error.clone()),
            );
        }
        debug!(stage = %stage, status = %status, "Stage updated");
        self.broadcaster
            .broadcast(&PipelineEvent::NodeUpdate {
                node: stage,
                status,
                progress,
                error,
                timestamp: Utc::now(),
            })
            .await;
    }

    /// Merge `patch` into the metrics and broadcast the merged result.
    pub async fn update_metrics(&self, patch: &MetricsPatch) {
        let metrics = {
            let mut inner = self.inner.write().await;
            inner.metrics.apply(patch);
            inner.metrics.clone()
        };
        self.broadcaster
            .broadcast(&PipelineEvent::MetricsUpdate {
                metrics,
                timestamp: Utc::now(),
            })
            .await;
    }

    /// Broadcast a `log` event.
    pub async fn log(&self, level: &str, message: &str) {
        info!(level = %level, "{message}");
        self.broadcaster
            .broadcast(&PipelineEvent::Log {
                level: level.to_string(),
                message: message.to_string(),
                timestamp: Utc::now(),
            })
            .await;
    }

    /// Change the active task without touching stage records.
    pub async fn set_task(&self, task: &str) {
        self.inner.write().await.task = task.to_string();
        self.log("INFO", &format!("Switched to task: {task}")).await;
    }

    /// Store the latest documentation status and broadcast it. A missing
    /// timestamp is set to the current time.
    pub async fn record_doc_update(&self, mut doc: DocStatus) {
        if doc.timestamp.is_none() {
            doc.timestamp = Some(Utc::now().to_rfc3339());
        }
        self.inner.write().await.doc_status = Some(doc.clone());
        self.broadcaster.broadcast(&PipelineEvent::DocUpdate(doc)).await;
    }

    pub async fn snapshot(&self) -> PipelineSnapshot {
        let inner = self.inner.read().await;
        PipelineSnapshot {
            task: inner.task.clone(),
            stages: inner.stages.clone(),
            metrics: inner.metrics.clone(),
            doc_status: inner.doc_status.clone(),
        }
    }

    pub async fn task(&self) -> String {
        self.inner.read().await.task.clone()
    }

    pub async fn stage(&self, stage: StageName) -> StageRecord {
        self.inner
            .read()
            .await
            .stages
            .get(&stage)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn metrics(&self) -> PipelineMetrics {
        self.inner.read().await.metrics.clone()
    }

    /// Register an observer; it immediately receives a `status_update`.
    pub async fn register_observer(&self, observer: Arc<dyn Observer>) -> ObserverId {
        let snapshot = self.snapshot().await.to_event();
        self.broadcaster.register(observer, &snapshot).await
    }

    pub async fn unregister_observer(&self, id: ObserverId) -> bool {
        self.broadcaster.unregister(id).await
    }

    /// Handle one raw text message from observer `from`.
    ///
    /// Rejected messages are answered with an `error` event sent to `from`
    /// only; the error is also returned to the caller.
    pub async fn handle_inbound(
        &self,
        from: ObserverId,
        raw: &str,
    ) -> std::result::Result<(), InboundError> {
        let message = match InboundMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                debug!(observer = %from, error = %e, "Rejected inbound message");
                self.broadcaster
                    .send_to(from, &PipelineEvent::error(e.to_string()))
                    .await;
                return Err(e);
            }
        };

        match message {
            InboundMessage::GetStatus => {
                let snapshot = self.snapshot().await.to_event();
                self.broadcaster.send_to(from, &snapshot).await;
            }
            InboundMessage::StartPipeline { task } => {
                let task = task.unwrap_or_else(|| DEFAULT_TASK.to_string());
                self.log("INFO", &format!("Starting pipeline for task: {task}"))
                    .await;
                self.start_pipeline(&task).await;
            }
            InboundMessage::UpdateTask { task } => match task {
                Some(task) => self.set_task(&task).await,
                None => debug!(observer = %from, "update_task without task ignored"),
            },
            InboundMessage::DocUpdate(doc) => self.record_doc_update(doc).await,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::ChannelObserver;
    use crate::domain::MaestroError;
    use serde_json::Value;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    async fn observed_state() -> (PipelineState, ObserverId, UnboundedReceiver<String>) {
        let state = PipelineState::standalone();
        let (obs, rx) = ChannelObserver::new();
        let id = state.register_observer(Arc::new(obs)).await;
        (state, id, rx)
    }

    #[tokio::test]
    async fn fresh_state_has_all_stages_waiting() {
        let state = PipelineState::standalone();
        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.task, DEFAULT_TASK);
        assert_eq!(snapshot.stages.len(), 5);
        for stage in StageName::ALL {
            assert_eq!(snapshot.stages[&stage], StageRecord::default());
        }
    }

    #[tokio::test]
    async fn start_pipeline_resets_stages() {
        let state = PipelineState::standalone();
        state
            .set_stage(StageName::Planner, StageStatus::Completed, Some("100%".into()), None)
            .await;
        state
            .set_stage(StageName::Coder, StageStatus::Failed, None, Some("boom".into()))
            .await;

        state.start_pipeline("task-2").await;

        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.task, "task-2");
        assert!(snapshot
            .stages
            .values()
            .all(|record| *record == StageRecord::default()));
    }

    #[tokio::test]
    async fn unknown_stage_is_rejected_without_change() {
        let (state, _id, mut rx) = observed_state().await;
        drain(&mut rx);

        let err = state
            .update_stage("deployer", StageStatus::Running, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MaestroError::UnknownStage(_)));
        assert!(drain(&mut rx).is_empty());
        assert!(state
            .snapshot()
            .await
            .stages
            .values()
            .all(|r| r.status == StageStatus::Waiting));
    }

    #[tokio::test]
    async fn update_stage_emits_node_update() {
        let (state, _id, mut rx) = observed_state().await;
        drain(&mut rx);

        state
            .update_stage("tester", StageStatus::Running, Some("0%".into()), None)
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "node_update");
        assert_eq!(events[0]["node"], "tester");
        assert_eq!(events[0]["status"], "running");
        assert_eq!(events[0]["progress"], "0%");
        assert_eq!(state.stage(StageName::Tester).await.status, StageStatus::Running);
    }

    #[tokio::test]
    async fn update_metrics_merges_and_broadcasts() {
        let (state, _id, mut rx) = observed_state().await;
        drain(&mut rx);

        state
            .update_metrics(&MetricsPatch {
                tests_passed: Some(7),
                ..Default::default()
            })
            .await;
        state
            .update_metrics(&MetricsPatch {
                coverage: Some(81.0),
                ..Default::default()
            })
            .await;

        let metrics = state.metrics().await;
        assert_eq!(metrics.tests_passed, 7);
        assert_eq!(metrics.coverage, 81.0);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1]["type"], "metrics_update");
        assert_eq!(events[1]["metrics"]["testsPassed"], 7);
    }

    #[tokio::test]
    async fn register_sends_status_snapshot() {
        let (_state, _id, mut rx) = observed_state().await;
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "status_update");
        assert_eq!(events[0]["task"], DEFAULT_TASK);
        assert_eq!(events[0]["pipeline"]["planner"]["status"], "waiting");
    }

    #[tokio::test]
    async fn inbound_get_status_replies_to_sender_only() {
        let (state, id, mut rx) = observed_state().await;
        let (other, mut other_rx) = ChannelObserver::new();
        state.register_observer(Arc::new(other)).await;
        drain(&mut rx);
        drain(&mut other_rx);

        state
            .handle_inbound(id, r#"{"type":"get_status"}"#)
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "status_update");
        assert!(drain(&mut other_rx).is_empty());
    }

    #[tokio::test]
    async fn inbound_start_pipeline_resets_and_logs() {
        let (state, id, mut rx) = observed_state().await;
        drain(&mut rx);

        state
            .handle_inbound(id, r#"{"type":"start_pipeline","task":"t-42"}"#)
            .await
            .unwrap();

        assert_eq!(state.task().await, "t-42");
        let events = drain(&mut rx);
        let kinds: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["log", "pipeline_start"]);
        assert_eq!(events[0]["message"], "Starting pipeline for task: t-42");
        assert_eq!(events[0]["level"], "INFO");
        assert_eq!(events[1]["task"], "t-42");
    }

    #[tokio::test]
    async fn inbound_start_pipeline_defaults_task() {
        let (state, id, _rx) = observed_state().await;
        state.set_task("other").await;
        state
            .handle_inbound(id, r#"{"type":"start_pipeline"}"#)
            .await
            .unwrap();
        assert_eq!(state.task().await, DEFAULT_TASK);
    }

    #[tokio::test]
    async fn inbound_update_task_switches_task() {
        let (state, id, mut rx) = observed_state().await;
        drain(&mut rx);
        state
            .handle_inbound(id, r#"{"type":"update_task","task":"t-9"}"#)
            .await
            .unwrap();
        assert_eq!(state.task().await, "t-9");
        let events = drain(&mut rx);
        assert_eq!(events[0]["message"], "Switched to task: t-9");
    }

    #[tokio::test]
    async fn inbound_doc_update_is_stored_and_included_in_snapshot() {
        let (state, id, mut rx) = observed_state().await;
        drain(&mut rx);
        state
            .handle_inbound(
                id,
                r#"{"type":"doc_update","task":"t1","status":"pass","passed":5,"coverage":90.0}"#,
            )
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert_eq!(events[0]["type"], "doc_update");
        assert_eq!(events[0]["passed"], 5);
        assert!(events[0]["timestamp"].is_string());

        let snapshot = state.snapshot().await;
        let doc = snapshot.doc_status.clone().unwrap();
        assert_eq!(doc.status.as_deref(), Some("pass"));
        let stamped = doc.timestamp.unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&stamped).is_ok());
        let value = serde_json::to_value(snapshot.to_event()).unwrap();
        assert_eq!(value["doc_status"]["coverage"], 90.0);
    }

    #[tokio::test]
    async fn doc_update_keeps_supplied_timestamp() {
        let state = PipelineState::standalone();
        state
            .record_doc_update(DocStatus {
                timestamp: Some("2025-03-01T10:01:00+00:00".to_string()),
                ..Default::default()
            })
            .await;
        let doc = state.snapshot().await.doc_status.unwrap();
        assert_eq!(doc.timestamp.as_deref(), Some("2025-03-01T10:01:00+00:00"));
    }

    #[tokio::test]
    async fn inbound_errors_reply_with_error_event() {
        let (state, id, mut rx) = observed_state().await;
        drain(&mut rx);

        let err = state.handle_inbound(id, "not json").await.unwrap_err();
        assert_eq!(err, InboundError::InvalidJson);
        let err = state
            .handle_inbound(id, r#"{"type":"shutdown"}"#)
            .await
            .unwrap_err();
        assert_eq!(err, InboundError::UnknownType("shutdown".to_string()));

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                serde_json::json!({"type": "error", "message": "Invalid JSON"}),
                serde_json::json!({"type": "error", "message": "Unknown message type: shutdown"}),
            ]
        );
    }
}
