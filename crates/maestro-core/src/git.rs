//! Git automation for promoting a QA-approved task.
//!
//! Every step shells out through the [`ToolRunner`] seam and leaves an
//! [`OperationRecord`] behind. Git itself is required; the `gh` CLI is
//! optional and steps that need it are skipped when it is absent.

use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{AutomationConfig, GitConfig, SecurityConfig};
use crate::domain::{MaestroError, Result, StepOutcome};
use crate::exec::{ToolError, ToolOutput, ToolRunner};
use crate::obs::{OperationLog, OperationRecord};

/// Verdict of [`GitAgent::validate_changes`]. A decline is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeValidation {
    pub accepted: bool,
    /// Paths in the pending change set.
    pub files: Vec<String>,
    /// Pending paths matching an exclude pattern.
    pub excluded: Vec<String>,
    /// Inserted lines across the staged change set.
    pub insertions: u64,
    pub violations: Vec<String>,
}

/// Whether `path` matches any of `patterns` (shell-style, `*` spans `/`).
///
/// Invalid patterns never match.
pub fn matches_excluded(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|raw| match Pattern::new(raw) {
        Ok(pattern) => pattern.matches(path),
        Err(e) => {
            warn!(pattern = %raw, error = %e, "Ignoring invalid exclude pattern");
            false
        }
    })
}

/// Sum the insertion column of `git diff --numstat` output.
///
/// Binary files report `-` and count as zero.
pub fn parse_numstat_insertions(numstat: &str) -> u64 {
    numstat
        .lines()
        .filter_map(|line| line.split('\t').next())
        .filter_map(|added| added.trim().parse::<u64>().ok())
        .sum()
}

/// URL from `gh pr view --json url,state` output when the pull request is
/// still open.
pub fn parse_open_pr_url(json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    if value.get("state")?.as_str()? != "OPEN" {
        return None;
    }
    let url = value.get("url")?.as_str()?.trim();
    (!url.is_empty()).then(|| url.to_string())
}

/// Automates branch, commit, push and pull request for one task.
pub struct GitAgent {
    runner: Arc<dyn ToolRunner>,
    git: GitConfig,
    security: SecurityConfig,
    base_branch: String,
    log: Arc<OperationLog>,
}

impl GitAgent {
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        config: &AutomationConfig,
        log: Arc<OperationLog>,
    ) -> Self {
        Self {
            runner,
            git: config.git.clone(),
            security: config.security.clone(),
            base_branch: config.pipeline.base_branch.clone(),
            log,
        }
    }

    pub fn config(&self) -> &GitConfig {
        &self.git
    }

    async fn git(&self, operation: &str, args: &[&str]) -> Result<ToolOutput> {
        self.runner
            .run("git", args)
            .await
            .map_err(|e| e.into_domain("git", operation))
    }

    fn record_error(&self, task_id: &str, operation: &str, err: &MaestroError) {
        self.log.record(
            OperationRecord::new(task_id, operation, "error").with("error", err.to_string()),
        );
    }

    /// Stage the working tree and check the result against the exclude
    /// patterns and the insertion limit.
    ///
    /// The checked set is exactly what [`commit_changes`](Self::commit_changes)
    /// would commit. A rejected change set is unstaged again.
    pub async fn validate_changes(&self, task_id: &str) -> Result<ChangeValidation> {
        self.git("validate_changes", &["add", "."])
            .await?
            .check("git", "validate_changes")?;
        let names = self
            .git("validate_changes", &["diff", "--cached", "--name-only"])
            .await?
            .check("git", "validate_changes")?;
        let files: Vec<String> = names
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();

        let excluded: Vec<String> = files
            .iter()
            .filter(|f| matches_excluded(f, &self.security.exclude_patterns))
            .cloned()
            .collect();

        let numstat = self
            .git("validate_changes", &["diff", "--cached", "--numstat"])
            .await?
            .check("git", "validate_changes")?;
        let insertions = parse_numstat_insertions(&numstat.stdout);

        let mut violations: Vec<String> = excluded
            .iter()
            .map(|f| format!("excluded file in change set: {f}"))
            .collect();
        if insertions > self.security.max_diff_lines {
            violations.push(format!(
                "diff too large: {insertions} lines (max {})",
                self.security.max_diff_lines
            ));
        }

        let validation = ChangeValidation {
            accepted: violations.is_empty(),
            files,
            excluded,
            insertions,
            violations,
        };
        if validation.accepted {
            info!(task = %task_id, files = validation.files.len(), insertions, "Changes validated");
        } else {
            warn!(task = %task_id, violations = ?validation.violations, "Changes rejected");
            self.git("validate_changes", &["reset", "--quiet"])
                .await?
                .check("git", "validate_changes")?;
        }
        self.log.record(
            OperationRecord::new(
                task_id,
                "validate_changes",
                if validation.accepted { "success" } else { "rejected" },
            )
            .with("files", validation.files.len())
            .with("insertions", validation.insertions)
            .with("violations", validation.violations.clone()),
        );
        Ok(validation)
    }

    /// Switch to the task branch, creating it first if needed. Returns the
    /// branch name.
    pub async fn create_feature_branch(&self, task_id: &str) -> Result<String> {
        let branch = self.git.branch_name(task_id);
        let result = self.checkout_branch(&branch).await;
        match &result {
            Ok(created) => self.log.record(
                OperationRecord::new(task_id, "create_branch", "success")
                    .with("branch", branch.as_str())
                    .with("created", *created),
            ),
            Err(e) => self.record_error(task_id, "create_branch", e),
        }
        result.map(|_| branch)
    }

    /// Returns whether the branch was newly created.
    async fn checkout_branch(&self, branch: &str) -> Result<bool> {
        let exists = self
            .git("create_branch", &["rev-parse", "--verify", branch])
            .await?
            .success();
        if exists {
            self.git("create_branch", &["checkout", branch])
                .await?
                .check("git", "create_branch")?;
            info!(branch = %branch, "Switched to existing branch");
        } else {
            self.git("create_branch", &["checkout", "-b", branch])
                .await?
                .check("git", "create_branch")?;
            info!(branch = %branch, "Created branch");
        }
        Ok(!exists)
    }

    /// Stage everything and commit with the templated message.
    ///
    /// Nothing staged is a successful skip. `Done` carries the new HEAD sha.
    pub async fn commit_changes(&self, task_id: &str, description: &str) -> Result<StepOutcome> {
        if !self.git.auto_commit {
            self.log.record(
                OperationRecord::new(task_id, "commit", "skipped").with("reason", "disabled"),
            );
            return Ok(StepOutcome::skipped("auto_commit disabled"));
        }
        let message = self.git.commit_message(task_id, description);
        let result = self.commit(&message).await;
        match &result {
            Ok(StepOutcome::Done { detail }) => self.log.record(
                OperationRecord::new(task_id, "commit", "success")
                    .with("commit_sha", detail.as_str())
                    .with("message", message.as_str()),
            ),
            Ok(StepOutcome::Skipped { reason }) => self.log.record(
                OperationRecord::new(task_id, "commit", "skipped").with("reason", reason.as_str()),
            ),
            Err(e) => self.record_error(task_id, "commit", e),
        }
        result
    }

    async fn commit(&self, message: &str) -> Result<StepOutcome> {
        self.git("commit", &["add", "."])
            .await?
            .check("git", "commit")?;
        let staged = self.git("commit", &["diff", "--cached", "--quiet"]).await?;
        if staged.success() {
            info!("No changes to commit");
            return Ok(StepOutcome::skipped("no changes to commit"));
        }
        self.git("commit", &["commit", "-m", message])
            .await?
            .check("git", "commit")?;
        let sha = self.capture_head_sha().await?;
        info!(sha = %sha, "Committed changes");
        Ok(StepOutcome::done(sha))
    }

    /// Push `branch` to `origin`. Failures are reported, never retried.
    pub async fn push_branch(&self, task_id: &str, branch: &str) -> Result<StepOutcome> {
        if !self.git.auto_push {
            self.log.record(
                OperationRecord::new(task_id, "push", "skipped").with("reason", "disabled"),
            );
            return Ok(StepOutcome::skipped("auto_push disabled"));
        }
        let result: Result<ToolOutput> = async {
            self.git("push", &["push", "origin", branch])
                .await?
                .check("git", "push")
        }
        .await;
        match result {
            Ok(_) => {
                info!(branch = %branch, "Pushed branch");
                self.log.record(
                    OperationRecord::new(task_id, "push", "success").with("branch", branch),
                );
                Ok(StepOutcome::done(branch))
            }
            Err(e) => {
                self.record_error(task_id, "push", &e);
                Err(e)
            }
        }
    }

    /// Open a pull request with `gh`. Skipped when disabled or when `gh` is
    /// not installed. An open pull request for `branch` is reused. `Done`
    /// carries the PR URL.
    pub async fn create_pull_request(&self, task_id: &str, branch: &str) -> Result<StepOutcome> {
        if !self.git.auto_pr {
            self.log.record(
                OperationRecord::new(task_id, "create_pr", "skipped").with("reason", "disabled"),
            );
            return Ok(StepOutcome::skipped("auto_pr disabled"));
        }

        let result = match self.open_pull_request(branch).await {
            Ok(Some(url)) => {
                info!(task = %task_id, url = %url, "Pull request already open");
                self.log.record(
                    OperationRecord::new(task_id, "create_pr", "success")
                        .with("pr_url", url.as_str())
                        .with("existing", true),
                );
                return Ok(StepOutcome::done(url));
            }
            Ok(None) => self.gh_pr_create(task_id, branch).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(Some(url)) => {
                info!(task = %task_id, url = %url, "Created pull request");
                self.log.record(
                    OperationRecord::new(task_id, "create_pr", "success")
                        .with("pr_url", url.as_str()),
                );
                Ok(StepOutcome::done(url))
            }
            Ok(None) => {
                warn!(task = %task_id, "GitHub CLI not available, skipping PR creation");
                self.log.record(
                    OperationRecord::new(task_id, "create_pr", "skipped")
                        .with("reason", "gh not available"),
                );
                Ok(StepOutcome::skipped("gh not available"))
            }
            Err(e) => {
                self.record_error(task_id, "create_pr", &e);
                Err(e)
            }
        }
    }

    /// URL of the open pull request whose head is `branch`, if any.
    ///
    /// `gh pr view` exits non-zero when the branch has no pull request.
    /// An absent `gh` is left for the create step to report.
    async fn open_pull_request(&self, branch: &str) -> Result<Option<String>> {
        match self
            .runner
            .run("gh", &["pr", "view", branch, "--json", "url,state"])
            .await
        {
            Ok(output) if output.success() => Ok(parse_open_pr_url(&output.stdout)),
            Ok(_) | Err(ToolError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into_domain("gh", "create_pr")),
        }
    }

    /// `Ok(None)` when `gh` is not installed.
    async fn gh_pr_create(&self, task_id: &str, branch: &str) -> Result<Option<String>> {
        let title = format!("feat: {task_id} - Automated PR from Maestro");
        let body = format!(
            "Automated Pull Request created by Maestro\n\n\
             **Task ID:** {task_id}\n\
             **Branch:** {branch}\n\
             **Status:** QA Passed\n\n\
             This PR was automatically created after successful QA validation."
        );
        let args: [&str; 10] = [
            "pr",
            "create",
            "--title",
            &title,
            "--body",
            &body,
            "--base",
            &self.base_branch,
            "--head",
            branch,
        ];

        match self.runner.run("gh", &args).await {
            Ok(output) => {
                let output = output.check("gh", "create_pr")?;
                Ok(Some(output.stdout_trimmed().to_string()))
            }
            Err(ToolError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into_domain("gh", "create_pr")),
        }
    }

    /// Discard local modifications and untracked files.
    pub async fn rollback_changes(&self, task_id: &str) -> Result<()> {
        info!(task = %task_id, "Rolling back local changes");
        let result: Result<()> = async {
            self.git("rollback", &["reset", "--hard", "HEAD"])
                .await?
                .check("git", "rollback")?;
            self.git("rollback", &["clean", "-fd"])
                .await?
                .check("git", "rollback")?;
            Ok(())
        }
        .await;
        match &result {
            Ok(()) => self
                .log
                .record(OperationRecord::new(task_id, "rollback", "success")),
            Err(e) => self.record_error(task_id, "rollback", e),
        }
        result
    }

    /// HEAD commit sha of the working repository.
    pub async fn capture_head_sha(&self) -> Result<String> {
        let output = self
            .git("rev_parse", &["rev-parse", "HEAD"])
            .await?
            .check("git", "rev_parse")?;
        let sha = output.stdout_trimmed().to_string();
        if sha.is_empty() {
            return Err(MaestroError::ToolFailed {
                tool: "git".to_string(),
                operation: "rev_parse".to_string(),
                stderr: "git rev-parse HEAD returned empty output".to_string(),
            });
        }
        Ok(sha)
    }

    /// Whether the working directory is inside a git work tree.
    pub async fn is_git_repo(&self) -> bool {
        self.runner
            .run("git", &["rev-parse", "--is-inside-work-tree"])
            .await
            .map(|o| o.success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedToolRunner;

    fn agent_with(
        runner: ScriptedToolRunner,
        config: AutomationConfig,
    ) -> (GitAgent, Arc<ScriptedToolRunner>, Arc<OperationLog>) {
        let runner = Arc::new(runner);
        let log = Arc::new(OperationLog::new());
        let agent = GitAgent::new(runner.clone(), &config, log.clone());
        (agent, runner, log)
    }

    fn agent(runner: ScriptedToolRunner) -> (GitAgent, Arc<ScriptedToolRunner>, Arc<OperationLog>) {
        agent_with(runner, AutomationConfig::default())
    }

    #[test]
    fn test_exclude_patterns() {
        let patterns = crate::config::SecurityConfig::default().exclude_patterns;
        assert!(matches_excluded("secrets/api.txt", &patterns));
        assert!(matches_excluded("prod.env", &patterns));
        assert!(matches_excluded("config/deploy.key", &patterns));
        assert!(matches_excluded("logs/run.log", &patterns));
        assert!(!matches_excluded("src/main.rs", &patterns));
        assert!(!matches_excluded("environment.md", &patterns));
    }

    #[test]
    fn test_invalid_pattern_never_matches() {
        assert!(!matches_excluded("a[b", &["a[".to_string()]));
    }

    #[test]
    fn test_numstat_sum_skips_binary() {
        let numstat = "10\t2\tsrc/lib.rs\n-\t-\tassets/logo.png\n5\t0\tREADME.md\n";
        assert_eq!(parse_numstat_insertions(numstat), 15);
        assert_eq!(parse_numstat_insertions(""), 0);
    }

    #[tokio::test]
    async fn test_validate_rejects_secrets_even_with_clean_files() {
        let (agent, _, log) = agent(
            ScriptedToolRunner::new()
                .respond(
                    "git diff --cached --name-only",
                    ToolOutput::ok("src/main.rs\nsecrets/token.txt\n"),
                )
                .respond("git diff --cached --numstat", ToolOutput::ok("3\t0\tsrc/main.rs\n")),
        );
        let verdict = agent.validate_changes("t1").await.unwrap();
        assert!(!verdict.accepted);
        assert_eq!(verdict.excluded, vec!["secrets/token.txt"]);
        assert_eq!(log.history()[0].status, "rejected");
    }

    #[tokio::test]
    async fn test_validate_stages_first_and_unstages_on_rejection() {
        let (agent, runner, _) = agent(
            ScriptedToolRunner::new()
                .respond("git diff --cached --name-only", ToolOutput::ok("prod.env\n"))
                .respond("git diff --cached --numstat", ToolOutput::ok("1\t0\tprod.env\n")),
        );
        let verdict = agent.validate_changes("t1").await.unwrap();
        assert!(!verdict.accepted);
        assert_eq!(
            runner.calls(),
            vec![
                "git add .",
                "git diff --cached --name-only",
                "git diff --cached --numstat",
                "git reset --quiet",
            ]
        );
    }

    #[tokio::test]
    async fn test_validate_rejects_oversized_diff() {
        let (agent, _, _) = agent(
            ScriptedToolRunner::new()
                .respond("git diff --cached --name-only", ToolOutput::ok("src/big.rs\n"))
                .respond("git diff --cached --numstat", ToolOutput::ok("1001\t0\tsrc/big.rs\n")),
        );
        let verdict = agent.validate_changes("t1").await.unwrap();
        assert!(!verdict.accepted);
        assert_eq!(verdict.insertions, 1001);
        assert!(verdict.violations[0].contains("diff too large"));
    }

    #[tokio::test]
    async fn test_validate_accepts_clean_changes() {
        let (agent, runner, _) = agent(
            ScriptedToolRunner::new()
                .respond("git diff --cached --name-only", ToolOutput::ok("src/lib.rs\n"))
                .respond("git diff --cached --numstat", ToolOutput::ok("40\t3\tsrc/lib.rs\n")),
        );
        let verdict = agent.validate_changes("t1").await.unwrap();
        assert!(verdict.accepted);
        assert!(verdict.violations.is_empty());
        assert_eq!(runner.calls()[0], "git add .");
        assert!(!runner.called("git reset"));
    }

    #[tokio::test]
    async fn test_branch_switches_when_existing() {
        let (agent, runner, _) = agent(ScriptedToolRunner::new());
        let branch = agent.create_feature_branch("t1").await.unwrap();
        assert_eq!(branch, "feature/t1");
        assert!(runner.called("git checkout feature/t1"));
        assert!(!runner.called("git checkout -b"));
    }

    #[tokio::test]
    async fn test_branch_created_when_missing() {
        let (agent, runner, log) = agent(ScriptedToolRunner::new().respond(
            "git rev-parse --verify",
            ToolOutput::failed(128, "fatal: Needed a single revision"),
        ));
        agent.create_feature_branch("t1").await.unwrap();
        assert!(runner.called("git checkout -b feature/t1"));
        assert_eq!(log.history()[0].details["created"], true);
    }

    #[tokio::test]
    async fn test_commit_nothing_staged_is_skip() {
        let (agent, runner, _) = agent(ScriptedToolRunner::new());
        let outcome = agent.commit_changes("t1", "desc").await.unwrap();
        assert!(outcome.is_skipped());
        assert!(!runner.called("git commit"));
    }

    #[tokio::test]
    async fn test_commit_uses_template_and_returns_sha() {
        let (agent, runner, _) = agent(
            ScriptedToolRunner::new()
                .respond("git diff --cached --quiet", ToolOutput::failed(1, ""))
                .respond("git rev-parse HEAD", ToolOutput::ok("abc123\n")),
        );
        let outcome = agent
            .commit_changes("t1", "Automated commit from Maestro pipeline")
            .await
            .unwrap();
        assert_eq!(outcome.detail(), Some("abc123"));
        assert!(runner.called(
            "git commit -m feat: t1 - Automated commit from Maestro pipeline"
        ));
    }

    #[tokio::test]
    async fn test_commit_disabled_is_skip() {
        let mut config = AutomationConfig::default();
        config.git.auto_commit = false;
        let (agent, runner, _) = agent_with(ScriptedToolRunner::new(), config);
        assert!(agent.commit_changes("t1", "d").await.unwrap().is_skipped());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_push_failure_is_reported() {
        let (agent, _, log) = agent(
            ScriptedToolRunner::new()
                .respond("git push", ToolOutput::failed(1, "remote: Permission denied")),
        );
        let err = agent.push_branch("t1", "feature/t1").await.unwrap_err();
        assert!(err.to_string().contains("Permission denied"));
        assert_eq!(log.history()[0].status, "error");
    }

    #[tokio::test]
    async fn test_pr_skipped_without_gh() {
        let (agent, _, _) = agent(ScriptedToolRunner::new().absent("gh"));
        let outcome = agent.create_pull_request("t1", "feature/t1").await.unwrap();
        assert_eq!(outcome, StepOutcome::skipped("gh not available"));
    }

    #[tokio::test]
    async fn test_pr_error_from_present_gh_fails() {
        let (agent, _, _) = agent(
            ScriptedToolRunner::new().respond("gh pr create", ToolOutput::failed(1, "no remote")),
        );
        let err = agent.create_pull_request("t1", "feature/t1").await.unwrap_err();
        assert!(matches!(err, MaestroError::ToolFailed { ref tool, .. } if tool == "gh"));
    }

    #[tokio::test]
    async fn test_pr_returns_url() {
        let (agent, runner, _) = agent(ScriptedToolRunner::new().respond(
            "gh pr create",
            ToolOutput::ok("https://github.com/acme/app/pull/7\n"),
        ));
        let outcome = agent.create_pull_request("t1", "feature/t1").await.unwrap();
        assert_eq!(outcome.detail(), Some("https://github.com/acme/app/pull/7"));
        let calls = runner.calls();
        assert_eq!(calls[0], "gh pr view feature/t1 --json url,state");
        assert!(calls[1].contains("--title feat: t1 - Automated PR from Maestro"));
        assert!(calls[1].contains("--base main"));
    }

    #[tokio::test]
    async fn test_pr_reuses_open_pull_request() {
        let open = r#"{"url":"https://github.com/acme/app/pull/7","state":"OPEN"}"#;
        let exists = "a pull request for branch \"feature/t1\" already exists";
        let (agent, runner, log) = agent(
            ScriptedToolRunner::new()
                .respond("gh pr view", ToolOutput::ok(open))
                .respond("gh pr create", ToolOutput::failed(1, exists)),
        );
        let outcome = agent.create_pull_request("t1", "feature/t1").await.unwrap();
        assert_eq!(outcome.detail(), Some("https://github.com/acme/app/pull/7"));
        assert!(!runner.called("gh pr create"));
        assert_eq!(log.history()[0].details["existing"], true);
    }

    #[tokio::test]
    async fn test_pr_created_when_no_pull_request_found() {
        let (agent, runner, _) = agent(
            ScriptedToolRunner::new()
                .respond(
                    "gh pr view",
                    ToolOutput::failed(1, "no pull requests found for branch \"feature/t1\""),
                )
                .respond("gh pr create", ToolOutput::ok("https://github.com/acme/app/pull/8\n")),
        );
        let outcome = agent.create_pull_request("t1", "feature/t1").await.unwrap();
        assert_eq!(outcome.detail(), Some("https://github.com/acme/app/pull/8"));
        assert!(runner.called("gh pr create"));
    }

    #[test]
    fn test_only_open_pull_requests_are_reused() {
        assert_eq!(
            parse_open_pr_url(r#"{"url":"https://x/pull/1","state":"OPEN"}"#).as_deref(),
            Some("https://x/pull/1")
        );
        assert_eq!(parse_open_pr_url(r#"{"url":"https://x/pull/1","state":"MERGED"}"#), None);
        assert_eq!(parse_open_pr_url(""), None);
    }

    #[tokio::test]
    async fn test_git_absent_is_unavailable() {
        let (agent, _, _) = agent(ScriptedToolRunner::new().absent("git"));
        let err = agent.validate_changes("t1").await.unwrap_err();
        assert!(matches!(err, MaestroError::ToolUnavailable(_)));
        assert!(!agent.is_git_repo().await);
    }

    #[tokio::test]
    async fn test_rollback_runs_reset_and_clean() {
        let (agent, runner, _) = agent(ScriptedToolRunner::new());
        agent.rollback_changes("t1").await.unwrap();
        assert_eq!(
            runner.calls(),
            vec!["git reset --hard HEAD", "git clean -fd"]
        );
    }
}
