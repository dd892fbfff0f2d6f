//! Maestro domain model: stages, events, metrics, QA reports, step outcomes and errors.

pub mod error;
pub mod event;
pub mod metrics;
pub mod qa;
pub mod stage;
pub mod step;

pub use error::{MaestroError, Result};
pub use event::{DocStatus, InboundError, InboundMessage, PipelineEvent};
pub use metrics::{MetricsPatch, PipelineMetrics};
pub use qa::{PerfMetrics, QaReport, QaStatus, TestRun};
pub use stage::{StageName, StageRecord, StageStatus};
pub use step::StepOutcome;
