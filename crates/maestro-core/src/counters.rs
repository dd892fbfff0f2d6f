//! Process-wide run counters.
//!
//! Call sites bump a [`Counter`] on [`COUNTERS`]. The pipeline sequencer
//! logs a [`CounterSnapshot`] when a run finishes.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Events serialised and fanned out to at least one observer.
    EventsBroadcast,
    ObserversDropped,
    StagesRun,
    StagesFailed,
    PipelinesRun,
}

impl Counter {
    pub const ALL: [Counter; 5] = [
        Counter::EventsBroadcast,
        Counter::ObserversDropped,
        Counter::StagesRun,
        Counter::StagesFailed,
        Counter::PipelinesRun,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Counter::EventsBroadcast => "events_broadcast",
            Counter::ObserversDropped => "observers_dropped",
            Counter::StagesRun => "stages_run",
            Counter::StagesFailed => "stages_failed",
            Counter::PipelinesRun => "pipelines_run",
        }
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub events_broadcast: u64,
    pub observers_dropped: u64,
    pub stages_run: u64,
    pub stages_failed: u64,
    pub pipelines_run: u64,
}

pub static COUNTERS: Counters = Counters::new();

pub struct Counters {
    values: [AtomicU64; 5],
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

impl Counters {
    pub const fn new() -> Self {
        Self {
            values: [
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
            ],
        }
    }

    fn slot(&self, counter: Counter) -> &AtomicU64 {
        &self.values[counter as usize]
    }

    pub fn inc(&self, counter: Counter) {
        self.slot(counter).fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = counter.as_str(), "counter incremented");
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.slot(counter).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            events_broadcast: self.get(Counter::EventsBroadcast),
            observers_dropped: self.get(Counter::ObserversDropped),
            stages_run: self.get(Counter::StagesRun),
            stages_failed: self.get(Counter::StagesFailed),
            pipelines_run: self.get(Counter::PipelinesRun),
        }
    }

    /// Log the current values against `task`.
    pub fn log_snapshot(&self, task: &str) {
        let s = self.snapshot();
        tracing::info!(
            task = %task,
            events_broadcast = s.events_broadcast,
            observers_dropped = s.observers_dropped,
            stages_run = s.stages_run,
            stages_failed = s.stages_failed,
            pipelines_run = s.pipelines_run,
            "Run counters"
        );
    }

    pub fn reset(&self) {
        for counter in Counter::ALL {
            self.slot(counter).store(0, Ordering::Relaxed);
        }
    }
}
