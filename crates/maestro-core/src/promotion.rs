//! QA-gated promotion: commit, push, pull request and deploy.
//!
//! [`PromotionWorkflow`] only acts on a task whose QA report says `pass`.
//! Every step is a public method on [`GitAgent`] or [`DeployAgent`], so a
//! failed step can be retried on its own; the workflow just runs them in
//! order and stops at the first hard failure or decline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::AutomationConfig;
use crate::deploy::{DeployAgent, MonitorOutcome};
use crate::domain::{QaReport, QaStatus, Result, StepOutcome};
use crate::exec::ToolRunner;
use crate::git::{ChangeValidation, GitAgent};
use crate::obs::OperationLog;

/// Default location of the QA report, relative to the project root.
pub const DEFAULT_QA_REPORT_PATH: &str = "reports/qa.json";

/// Commit description used for automated commits.
pub const AUTOMATED_COMMIT_DESCRIPTION: &str = "Automated commit from Maestro pipeline";

/// Step-by-step account of one promotion attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionReport {
    pub task_id: String,
    /// `None` when the report was missing or unreadable.
    pub qa_status: Option<QaStatus>,
    pub promoted: bool,
    /// Why the workflow stopped without promoting.
    pub declined: Option<String>,
    pub validation: Option<ChangeValidation>,
    pub branch: Option<String>,
    pub commit: Option<StepOutcome>,
    pub push: Option<StepOutcome>,
    pub pull_request: Option<StepOutcome>,
    pub deploy: Option<MonitorOutcome>,
}

impl PromotionReport {
    fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            qa_status: None,
            promoted: false,
            declined: None,
            validation: None,
            branch: None,
            commit: None,
            push: None,
            pull_request: None,
            deploy: None,
        }
    }

    fn decline(mut self, reason: String) -> Self {
        warn!(task = %self.task_id, reason = %reason, "Promotion declined");
        self.declined = Some(reason);
        self
    }
}

pub struct PromotionWorkflow {
    git: GitAgent,
    deploy: DeployAgent,
    require_qa_pass: bool,
    report_path: PathBuf,
}

impl PromotionWorkflow {
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        config: &AutomationConfig,
        log: Arc<OperationLog>,
    ) -> Self {
        Self {
            git: GitAgent::new(runner.clone(), config, log.clone()),
            deploy: DeployAgent::new(runner, config, log),
            require_qa_pass: config.security.require_qa_pass,
            report_path: PathBuf::from(DEFAULT_QA_REPORT_PATH),
        }
    }

    /// Read the QA report from `path` instead of the default location.
    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = path.into();
        self
    }

    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    pub fn git(&self) -> &GitAgent {
        &self.git
    }

    pub fn deploy(&self) -> &DeployAgent {
        &self.deploy
    }

    /// QA status from the report. Missing or malformed reports yield `None`.
    pub fn check_qa_status(&self, task_id: &str) -> Option<QaStatus> {
        match QaReport::load(&self.report_path) {
            Ok(report) => {
                info!(task = %task_id, status = %report.status, "QA status loaded");
                Some(report.status)
            }
            Err(e) => {
                warn!(task = %task_id, error = %e, "QA status unknown");
                None
            }
        }
    }

    /// QA check, validate, branch, commit, push, pull request.
    ///
    /// A QA status other than `pass` or a rejected change set is a decline
    /// (`promoted == false`), not an error.
    pub async fn run(&self, task_id: &str) -> Result<PromotionReport> {
        let mut report = PromotionReport::new(task_id);
        report.qa_status = self.check_qa_status(task_id);

        if self.require_qa_pass && report.qa_status != Some(QaStatus::Pass) {
            let status = report
                .qa_status
                .map(|s| s.as_str())
                .unwrap_or("unknown");
            return Ok(report.decline(format!("QA status is {status}, skipping git automation")));
        }

        let validation = self.git.validate_changes(task_id).await?;
        let accepted = validation.accepted;
        let violations = validation.violations.join("; ");
        report.validation = Some(validation);
        if !accepted {
            return Ok(report.decline(format!("changes rejected: {violations}")));
        }

        let branch = self.git.create_feature_branch(task_id).await?;
        report.branch = Some(branch.clone());
        report.commit = Some(
            self.git
                .commit_changes(task_id, AUTOMATED_COMMIT_DESCRIPTION)
                .await?,
        );
        report.push = Some(self.git.push_branch(task_id, &branch).await?);
        report.pull_request = Some(self.git.create_pull_request(task_id, &branch).await?);

        report.promoted = true;
        info!(task = %task_id, branch = %branch, "Git automation completed");
        Ok(report)
    }

    /// [`run`](Self::run), then deploy to staging and monitor it.
    pub async fn promote_and_deploy(&self, task_id: &str) -> Result<PromotionReport> {
        let mut report = self.run(task_id).await?;
        if !report.promoted {
            return Ok(report);
        }
        let branch = report.branch.clone().unwrap_or_default();
        let monitor = self.deploy.auto_deploy_and_monitor(task_id, &branch).await?;
        if !monitor.succeeded() {
            error!(task = %task_id, "Staging deployment did not succeed");
            report.promoted = false;
            report.declined = Some(format!(
                "staging deploy {}",
                monitor.status.map(|s| s.as_str()).unwrap_or("skipped")
            ));
        }
        report.deploy = Some(monitor);
        Ok(report)
    }

    /// Production deploy. With manual approval required this succeeds
    /// without deploying and without touching any branch.
    pub async fn production(&self, task_id: &str) -> Result<MonitorOutcome> {
        self.deploy.production_deploy_and_monitor(task_id).await
    }
}
