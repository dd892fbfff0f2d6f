//! Fan-out of pipeline events to live-status observers.
//!
//! The [`StatusBroadcaster`] owns the set of connected observers. Each
//! broadcast serialises the event once and attempts delivery to every
//! observer; an observer whose send fails is dropped from the set. Delivery
//! is at-most-once per observer per event with no retry and no buffering, and
//! there is no ordering guarantee across observers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::counters::{Counter, COUNTERS};
use crate::domain::PipelineEvent;

/// Delivery to an observer failed; the observer is considered gone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("observer send failed: {0}")]
pub struct ObserverError(pub String);

/// A connected live-status subscriber.
#[async_trait]
pub trait Observer: Send + Sync {
    /// Deliver one serialised event.
    async fn send(&self, text: &str) -> Result<(), ObserverError>;
}

/// Handle identifying a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl ObserverId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Observer backed by an unbounded channel. Sends fail once the receiver
/// has been dropped.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Observer for ChannelObserver {
    async fn send(&self, text: &str) -> Result<(), ObserverError> {
        self.tx
            .send(text.to_string())
            .map_err(|_| ObserverError("channel closed".to_string()))
    }
}

/// Thread-safe observer registry with fan-out delivery.
#[derive(Default)]
pub struct StatusBroadcaster {
    observers: RwLock<HashMap<ObserverId, Arc<dyn Observer>>>,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer and immediately send it `snapshot`.
    ///
    /// If the snapshot cannot be delivered the observer is removed again.
    pub async fn register(
        &self,
        observer: Arc<dyn Observer>,
        snapshot: &PipelineEvent,
    ) -> ObserverId {
        let id = ObserverId::new();
        let total = {
            let mut observers = self.observers.write().await;
            observers.insert(id, observer);
            observers.len()
        };
        info!(observer = %id, total, "Observer connected");
        self.send_to(id, snapshot).await;
        id
    }

    /// Remove an observer. Returns whether it was present.
    pub async fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().await;
        let removed = observers.remove(&id).is_some();
        if removed {
            info!(observer = %id, total = observers.len(), "Observer disconnected");
        }
        removed
    }

    /// Deliver `event` to every registered observer.
    ///
    /// Observers whose send fails are unregistered. Returns the number of
    /// successful deliveries; failures never propagate to the caller.
    pub async fn broadcast(&self, event: &PipelineEvent) -> usize {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, kind = event.kind(), "Failed to serialize event");
                return 0;
            }
        };

        let targets: Vec<(ObserverId, Arc<dyn Observer>)> = {
            let observers = self.observers.read().await;
            observers
                .iter()
                .map(|(id, obs)| (*id, Arc::clone(obs)))
                .collect()
        };
        if targets.is_empty() {
            return 0;
        }
        COUNTERS.inc(Counter::EventsBroadcast);

        let text = text.as_str();
        let results = join_all(targets.into_iter().map(|(id, obs)| async move {
            (id, obs.send(text).await)
        }))
        .await;

        let mut delivered = 0;
        let mut dropped = Vec::new();
        for (id, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(observer = %id, error = %e, "Dropping observer after failed send");
                    dropped.push(id);
                }
            }
        }
        for id in dropped {
            COUNTERS.inc(Counter::ObserversDropped);
            self.unregister(id).await;
        }
        delivered
    }

    /// Deliver `event` to a single observer. Returns whether it was delivered;
    /// an observer whose send fails is unregistered.
    pub async fn send_to(&self, id: ObserverId, event: &PipelineEvent) -> bool {
        let observer = match self.observers.read().await.get(&id) {
            Some(obs) => Arc::clone(obs),
            None => return false,
        };
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, kind = event.kind(), "Failed to serialize event");
                return false;
            }
        };
        match observer.send(&text).await {
            Ok(()) => true,
            Err(e) => {
                debug!(observer = %id, error = %e, "Dropping observer after failed send");
                COUNTERS.inc(Counter::ObserversDropped);
                self.unregister(id).await;
                false
            }
        }
    }

    /// Number of currently registered observers.
    pub async fn observer_count(&self) -> usize {
        self.observers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Records every message; can be switched into a failing state.
    #[derive(Default)]
    struct RecordingObserver {
        received: Mutex<Vec<String>>,
        broken: AtomicBool,
    }

    impl RecordingObserver {
        fn received(&self) -> Vec<String> {
            self.received.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Observer for RecordingObserver {
        async fn send(&self, text: &str) -> Result<(), ObserverError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(ObserverError("connection closed".to_string()));
            }
            self.received.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn log_event(message: &str) -> PipelineEvent {
        PipelineEvent::Log {
            level: "INFO".to_string(),
            message: message.to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn register_sends_snapshot_first() {
        let broadcaster = StatusBroadcaster::new();
        let obs = Arc::new(RecordingObserver::default());
        broadcaster
            .register(obs.clone(), &log_event("snapshot"))
            .await;

        let received = obs.received();
        assert_eq!(received.len(), 1);
        assert!(received[0].contains("snapshot"));
        assert_eq!(broadcaster.observer_count().await, 1);
    }

    #[tokio::test]
    async fn failed_observer_is_pruned_and_others_keep_receiving() {
        let broadcaster = StatusBroadcaster::new();
        let observers: Vec<Arc<RecordingObserver>> =
            (0..3).map(|_| Arc::new(RecordingObserver::default())).collect();
        for obs in &observers {
            broadcaster.register(obs.clone(), &log_event("hello")).await;
        }

        observers[1].broken.store(true, Ordering::SeqCst);
        let delivered = broadcaster.broadcast(&log_event("first")).await;
        assert_eq!(delivered, 2);
        assert_eq!(broadcaster.observer_count().await, 2);

        observers[1].broken.store(false, Ordering::SeqCst);
        let delivered = broadcaster.broadcast(&log_event("second")).await;
        assert_eq!(delivered, 2);

        for idx in [0, 2] {
            let received = observers[idx].received();
            assert_eq!(received.len(), 3);
            assert!(received[2].contains("second"));
        }
        assert_eq!(observers[1].received().len(), 1);
    }

    #[tokio::test]
    async fn unregister_unknown_is_noop() {
        let broadcaster = StatusBroadcaster::new();
        let obs = Arc::new(RecordingObserver::default());
        let id = broadcaster.register(obs, &log_event("x")).await;
        assert!(broadcaster.unregister(id).await);
        assert!(!broadcaster.unregister(id).await);
        assert_eq!(broadcaster.broadcast(&log_event("nobody")).await, 0);
    }

    #[tokio::test]
    async fn broadcast_serializes_event_as_json() {
        let broadcaster = StatusBroadcaster::new();
        let (obs, mut rx) = ChannelObserver::new();
        broadcaster.register(Arc::new(obs), &log_event("hi")).await;
        broadcaster.broadcast(&PipelineEvent::error("bad")).await;

        let _snapshot = rx.recv().await.unwrap();
        let text = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "bad");
    }

    #[tokio::test]
    async fn dropped_channel_receiver_prunes_observer() {
        let broadcaster = StatusBroadcaster::new();
        let (obs, rx) = ChannelObserver::new();
        broadcaster.register(Arc::new(obs), &log_event("hi")).await;
        drop(rx);

        assert_eq!(broadcaster.broadcast(&log_event("gone")).await, 0);
        assert_eq!(broadcaster.observer_count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_register_and_broadcast() {
        let broadcaster = Arc::new(StatusBroadcaster::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let b = Arc::clone(&broadcaster);
            handles.push(tokio::spawn(async move {
                let obs = Arc::new(RecordingObserver::default());
                let id = b.register(obs, &log_event("snap")).await;
                b.broadcast(&log_event(&format!("msg-{i}"))).await;
                if i % 2 == 0 {
                    b.unregister(id).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(broadcaster.observer_count().await, 8);
    }
}
