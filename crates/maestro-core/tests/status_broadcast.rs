//! Pipeline state mutations fan out to every connected observer.

use std::sync::Arc;

use maestro_core::{ChannelObserver, PipelineState, StageName, StageStatus, StatusBroadcaster};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(text) = rx.try_recv() {
        out.push(serde_json::from_str(&text).unwrap());
    }
    out
}

#[tokio::test]
async fn every_observer_sees_the_same_event_stream() {
    let broadcaster = Arc::new(StatusBroadcaster::new());
    let state = PipelineState::new(broadcaster.clone());

    let mut receivers = Vec::new();
    for _ in 0..4 {
        let (obs, rx) = ChannelObserver::new();
        state.register_observer(Arc::new(obs)).await;
        receivers.push(rx);
    }
    assert_eq!(broadcaster.observer_count().await, 4);

    state.start_pipeline("t-1").await;
    state
        .set_stage(StageName::Planner, StageStatus::Running, Some("0%".into()), None)
        .await;
    state
        .set_stage(StageName::Planner, StageStatus::Completed, Some("100%".into()), None)
        .await;

    for rx in receivers.iter_mut() {
        let kinds: Vec<String> = drain(rx)
            .iter()
            .map(|e| e["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            kinds,
            vec!["status_update", "pipeline_start", "node_update", "node_update"]
        );
    }
}

#[tokio::test]
async fn disconnected_observer_is_pruned_on_next_broadcast() {
    let state = PipelineState::standalone();
    let (keep, mut keep_rx) = ChannelObserver::new();
    let (gone, gone_rx) = ChannelObserver::new();
    state.register_observer(Arc::new(keep)).await;
    state.register_observer(Arc::new(gone)).await;
    drop(gone_rx);

    state.log("INFO", "first").await;
    assert_eq!(state.broadcaster().observer_count().await, 1);

    state.log("INFO", "second").await;
    let messages: Vec<Value> = drain(&mut keep_rx);
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2]["message"], "second");
}

#[tokio::test]
async fn concurrent_observers_and_updates_do_not_corrupt_the_set() {
    let state = Arc::new(PipelineState::standalone());
    let mut tasks = Vec::new();
    for i in 0..8 {
        let state = Arc::clone(&state);
        tasks.push(tokio::spawn(async move {
            let (obs, rx) = ChannelObserver::new();
            let id = state.register_observer(Arc::new(obs)).await;
            state
                .update_stage("coder", StageStatus::Running, None, None)
                .await
                .unwrap();
            if i % 2 == 0 {
                state.unregister_observer(id).await;
            }
            rx
        }));
    }
    let mut kept = Vec::new();
    for task in tasks {
        kept.push(task.await.unwrap());
    }
    assert_eq!(state.broadcaster().observer_count().await, 4);
    drop(kept);
}
