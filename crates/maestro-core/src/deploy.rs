//! Deployment automation through GitHub Actions.
//!
//! Deploys, rollbacks and status checks go through the `gh` CLI. When `gh`
//! is not installed every action degrades to a logged skip; when it is
//! installed and a call fails the step fails with the tool's error text.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::config::{AutomationConfig, CiCdConfig, SecurityConfig};
use crate::domain::{Result, StepOutcome};
use crate::exec::{ToolError, ToolOutput, ToolRunner};
use crate::obs::{OperationLog, OperationRecord};

/// Status of the most recent workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    Success,
    Failed,
    Running,
    NotFound,
    Unknown,
}

impl DeployStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStatus::Success => "success",
            DeployStatus::Failed => "failed",
            DeployStatus::Running => "running",
            DeployStatus::NotFound => "not_found",
            DeployStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeployStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of waiting for a deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployWait {
    Success,
    Failed,
    Timeout,
}

impl DeployWait {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployWait::Success => "success",
            DeployWait::Failed => "failed",
            DeployWait::Timeout => "timeout",
        }
    }
}

/// What a deploy-and-monitor run did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorOutcome {
    pub environment: String,
    pub deploy: StepOutcome,
    /// `None` when the deploy was skipped and nothing was polled.
    pub status: Option<DeployWait>,
    /// Rollback triggered after a failed deploy.
    pub rollback: Option<StepOutcome>,
}

impl MonitorOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, None | Some(DeployWait::Success))
    }
}

/// Interpret `gh run list --json status,conclusion` output.
pub fn parse_run_list(stdout: &str) -> DeployStatus {
    let runs: Vec<Value> = match serde_json::from_str(stdout) {
        Ok(runs) => runs,
        Err(e) => {
            error!(error = %e, "Failed to parse workflow runs");
            return DeployStatus::Unknown;
        }
    };
    let Some(latest) = runs.first() else {
        return DeployStatus::NotFound;
    };
    match latest.get("status").and_then(Value::as_str) {
        Some("completed") => match latest.get("conclusion").and_then(Value::as_str) {
            Some("success") => DeployStatus::Success,
            _ => DeployStatus::Failed,
        },
        _ => DeployStatus::Running,
    }
}

/// Triggers and monitors GitHub Actions deploy workflows.
pub struct DeployAgent {
    runner: Arc<dyn ToolRunner>,
    ci_cd: CiCdConfig,
    security: SecurityConfig,
    log: Arc<OperationLog>,
}

impl DeployAgent {
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        config: &AutomationConfig,
        log: Arc<OperationLog>,
    ) -> Self {
        Self {
            runner,
            ci_cd: config.ci_cd.clone(),
            security: config.security.clone(),
            log,
        }
    }

    pub fn config(&self) -> &CiCdConfig {
        &self.ci_cd
    }

    /// Run the deploy workflow with `action`. `None` when `gh` is absent.
    async fn run_workflow(
        &self,
        task_id: &str,
        action: &str,
        operation: &str,
    ) -> Result<Option<ToolOutput>> {
        let task_field = format!("task_id={task_id}");
        let action_field = format!("action={action}");
        let args = [
            "workflow",
            "run",
            self.ci_cd.github_actions_workflow.as_str(),
            "--field",
            task_field.as_str(),
            "--field",
            action_field.as_str(),
        ];
        match self.runner.run("gh", &args).await {
            Ok(output) => match output.check("gh", operation) {
                Ok(output) => Ok(Some(output)),
                Err(e) => {
                    error!(
                        task = %task_id, action = %action, error = %e,
                        "Workflow trigger failed"
                    );
                    self.log.record(
                        OperationRecord::new(task_id, operation, "error")
                            .with("error", e.to_string()),
                    );
                    Err(e)
                }
            },
            Err(ToolError::NotFound(_)) => {
                warn!(task = %task_id, action = %action, "GitHub CLI not available, skipping");
                self.log.record(
                    OperationRecord::new(task_id, operation, "skipped")
                        .with("reason", "gh not available"),
                );
                Ok(None)
            }
            Err(e) => {
                let err = e.into_domain("gh", operation);
                self.log.record(
                    OperationRecord::new(task_id, operation, "error")
                        .with("error", err.to_string()),
                );
                Err(err)
            }
        }
    }

    /// Trigger the staging deploy for `branch`.
    pub async fn deploy_staging(&self, task_id: &str, branch: &str) -> Result<StepOutcome> {
        info!(task = %task_id, "Starting staging deployment");
        if !self.ci_cd.auto_deploy_staging {
            info!("Auto deploy staging is disabled");
            self.log.record(
                OperationRecord::new(task_id, "deploy_staging", "skipped")
                    .with("reason", "disabled"),
            );
            return Ok(StepOutcome::skipped("auto_deploy_staging disabled"));
        }
        match self
            .run_workflow(task_id, "deploy-staging", "deploy_staging")
            .await?
        {
            Some(_) => {
                info!(task = %task_id, "Staging deployment triggered");
                self.log.record(
                    OperationRecord::new(task_id, "deploy_staging", "triggered")
                        .with("branch", branch)
                        .with("workflow", self.ci_cd.github_actions_workflow.as_str()),
                );
                Ok(StepOutcome::done("deploy-staging triggered"))
            }
            None => Ok(StepOutcome::skipped("gh not available")),
        }
    }

    /// Latest workflow run status. Never fails: problems yield `Unknown`.
    pub async fn check_deploy_status(&self, task_id: &str) -> DeployStatus {
        let workflow = self.ci_cd.github_actions_workflow.as_str();
        let args = [
            "run",
            "list",
            "--workflow",
            workflow,
            "--limit",
            "1",
            "--json",
            "status,conclusion",
        ];
        match self.runner.run("gh", &args).await {
            Ok(output) if output.success() => parse_run_list(&output.stdout),
            Ok(output) => {
                error!(
                    task = %task_id, stderr = %output.stderr.trim(),
                    "Failed to get workflow runs"
                );
                DeployStatus::Unknown
            }
            Err(ToolError::NotFound(_)) => {
                warn!(task = %task_id, "GitHub CLI not available, cannot check deploy status");
                DeployStatus::Unknown
            }
            Err(e) => {
                error!(task = %task_id, error = %e, "Error checking deploy status");
                DeployStatus::Unknown
            }
        }
    }

    /// Poll the deploy status every `poll_interval_secs` until it is
    /// terminal or `timeout` has elapsed.
    pub async fn wait_for_deploy(&self, task_id: &str, timeout: Duration) -> DeployWait {
        info!(task = %task_id, timeout_secs = timeout.as_secs(), "Waiting for deployment");
        let interval = Duration::from_secs(self.ci_cd.poll_interval_secs.max(1));
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            match self.check_deploy_status(task_id).await {
                DeployStatus::Success => return DeployWait::Success,
                DeployStatus::Failed => return DeployWait::Failed,
                status => info!(task = %task_id, status = %status, "Deployment still running"),
            }
            sleep(interval).await;
        }

        warn!(task = %task_id, "Deployment timeout");
        DeployWait::Timeout
    }

    /// Trigger the rollback workflow.
    pub async fn rollback_deploy(&self, task_id: &str) -> Result<StepOutcome> {
        info!(task = %task_id, "Starting rollback");
        if !self.ci_cd.rollback_on_failure {
            info!("Rollback on failure is disabled");
            self.log.record(
                OperationRecord::new(task_id, "rollback_deploy", "skipped")
                    .with("reason", "disabled"),
            );
            return Ok(StepOutcome::skipped("rollback_on_failure disabled"));
        }
        match self.run_workflow(task_id, "rollback", "rollback_deploy").await? {
            Some(_) => {
                info!(task = %task_id, "Rollback triggered");
                self.log
                    .record(OperationRecord::new(task_id, "rollback_deploy", "triggered"));
                Ok(StepOutcome::done("rollback triggered"))
            }
            None => Ok(StepOutcome::skipped("gh not available")),
        }
    }

    /// React to a failed deploy by rolling it back.
    pub async fn handle_qa_failure(&self, task_id: &str) -> Result<StepOutcome> {
        info!(task = %task_id, "Handling deploy failure");
        match self.rollback_deploy(task_id).await {
            Ok(outcome) => {
                self.log
                    .record(OperationRecord::new(task_id, "qa_failure_handling", "success"));
                Ok(outcome)
            }
            Err(e) => {
                error!(task = %task_id, error = %e, "Rollback failed");
                self.log.record(
                    OperationRecord::new(task_id, "qa_failure_handling", "error")
                        .with("error", e.to_string()),
                );
                Err(e)
            }
        }
    }

    /// Trigger the production deploy.
    ///
    /// With manual approval required this is a successful no-op: the deploy
    /// is left to a human.
    pub async fn trigger_production_deploy(&self, task_id: &str) -> Result<StepOutcome> {
        info!(task = %task_id, "Triggering production deployment");
        if self.ci_cd.auto_deploy_production {
            warn!("Auto deploy production is enabled; it should stay disabled");
        }
        if self.security.require_manual_approval {
            info!(task = %task_id, "Production deployment requires manual approval");
            self.log.record(OperationRecord::new(
                task_id,
                "production_deploy",
                "manual_approval_required",
            ));
            return Ok(StepOutcome::skipped("manual approval required"));
        }
        match self
            .run_workflow(task_id, "deploy-production", "production_deploy")
            .await?
        {
            Some(_) => {
                info!(task = %task_id, "Production deployment triggered");
                self.log
                    .record(OperationRecord::new(task_id, "production_deploy", "triggered"));
                Ok(StepOutcome::done("deploy-production triggered"))
            }
            None => Ok(StepOutcome::skipped("gh not available")),
        }
    }

    /// Staging deploy, then wait, then roll back on failure.
    pub async fn auto_deploy_and_monitor(
        &self,
        task_id: &str,
        branch: &str,
    ) -> Result<MonitorOutcome> {
        let deploy = self.deploy_staging(task_id, branch).await?;
        self.monitor(task_id, "staging", deploy).await
    }

    /// Production deploy, then wait, then roll back on failure. Short-circuits
    /// when manual approval is required.
    pub async fn production_deploy_and_monitor(&self, task_id: &str) -> Result<MonitorOutcome> {
        let deploy = self.trigger_production_deploy(task_id).await?;
        self.monitor(task_id, "production", deploy).await
    }

    async fn monitor(
        &self,
        task_id: &str,
        environment: &str,
        deploy: StepOutcome,
    ) -> Result<MonitorOutcome> {
        let mut outcome = MonitorOutcome {
            environment: environment.to_string(),
            deploy,
            status: None,
            rollback: None,
        };
        if outcome.deploy.is_skipped() {
            info!(task = %task_id, environment, "Deploy skipped, nothing to monitor");
            return Ok(outcome);
        }

        let timeout = Duration::from_secs(self.ci_cd.deploy_timeout);
        let status = self.wait_for_deploy(task_id, timeout).await;
        outcome.status = Some(status);
        match status {
            DeployWait::Success => {
                info!(task = %task_id, environment, "Deployment successful");
            }
            DeployWait::Failed => {
                error!(task = %task_id, environment, "Deployment failed");
                outcome.rollback = Some(self.handle_qa_failure(task_id).await?);
            }
            DeployWait::Timeout => {
                warn!(task = %task_id, environment, "Deployment timed out");
            }
        }
        self.log.record(
            OperationRecord::new(task_id, "deploy_monitor", status.as_str())
                .with("environment", environment),
        );
        Ok(outcome)
    }
}
