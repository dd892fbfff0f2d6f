//! Maestro Core Library
//!
//! Pipeline state, live-status broadcasting and the QA-gated promotion
//! workflow, plus the configuration, tool execution and logging plumbing
//! they share.

pub mod broadcaster;
pub mod config;
pub mod counters;
pub mod deploy;
pub mod domain;
pub mod exec;
pub mod fakes;
pub mod git;
pub mod obs;
pub mod promotion;
pub mod state;
pub mod telemetry;

pub use broadcaster::{ChannelObserver, Observer, ObserverError, ObserverId, StatusBroadcaster};
pub use config::{
    AutomationConfig, CiCdConfig, GitConfig, LoggingConfig, PipelineConfig, SecurityConfig,
    StageCommandConfig, DEFAULT_CONFIG_PATH,
};
pub use deploy::{parse_run_list, DeployAgent, DeployStatus, DeployWait, MonitorOutcome};
pub use domain::{
    DocStatus, InboundError, InboundMessage, MaestroError, MetricsPatch, PerfMetrics,
    PipelineEvent, PipelineMetrics, QaReport, QaStatus, Result, StageName, StageRecord,
    StageStatus, StepOutcome, TestRun,
};
pub use exec::{command_exists, SystemToolRunner, ToolError, ToolOutput, ToolRunner};
pub use git::{matches_excluded, parse_numstat_insertions, ChangeValidation, GitAgent};
pub use promotion::{
    PromotionReport, PromotionWorkflow, AUTOMATED_COMMIT_DESCRIPTION, DEFAULT_QA_REPORT_PATH,
};
pub use state::{PipelineSnapshot, PipelineState, DEFAULT_TASK};

pub use counters::{Counter, CounterSnapshot, COUNTERS};
pub use obs::{
    emit_gate_evaluated, emit_pipeline_finished, emit_pipeline_started, emit_stage_transition,
    pipeline_span, OperationLog, OperationRecord, PipelineSpan,
};
pub use telemetry::init_tracing;

/// Maestro version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
