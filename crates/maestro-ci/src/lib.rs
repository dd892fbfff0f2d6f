//! Maestro CI - stage execution and quality gating
//!
//! Provides the pipeline side of Maestro:
//! - Runs the five stages (planner, coder, integrator, tester, reporter) in order
//! - Publishes every stage transition through the shared pipeline state
//! - Evaluates QA check results and writes the QA report

pub mod gate;
pub mod pipeline;
pub mod precondition;
pub mod report;
pub mod runner;
pub mod stage;

// Re-export key types
pub use gate::{determine_status, generate_next_actions, GateVerdict, QaChecks, QaGate};
pub use pipeline::{PipelineResult, PipelineSequencer};
pub use precondition::{IssueExists, Precondition, ToolsResolvable};
pub use report::{
    build_report, count_error_lines, extract_coverage, extract_test_results, write_report,
    TestResults, QA_REPORT_FILE,
};
pub use runner::{StageResult, StageRunner};
pub use stage::{CommandStage, FnStage, NoopStage, StageError, StageOperation, StagePlan};
