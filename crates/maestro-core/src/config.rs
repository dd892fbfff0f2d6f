//! Automation configuration.
//!
//! Loaded once per agent instance from a JSON file
//! (default `config/git-automation.json`). Every known key has a default
//! that applies when the key is absent; unknown keys are kept in `extra`
//! maps, both at the top level and inside each section, so they survive a
//! load/save round trip.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::domain::{MaestroError, Result};

/// Default location of the automation config, relative to the project root.
pub const DEFAULT_CONFIG_PATH: &str = "config/git-automation.json";

/// Git automation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GitConfig {
    pub auto_commit: bool,
    pub auto_push: bool,
    pub auto_pr: bool,
    pub branch_prefix: String,
    pub commit_message_template: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            auto_commit: true,
            auto_push: true,
            auto_pr: true,
            branch_prefix: "feature/".to_string(),
            commit_message_template: "feat: {task_id} - {description}".to_string(),
            extra: BTreeMap::new(),
        }
    }
}

impl GitConfig {
    /// Branch name for a task: prefix followed by the task id.
    pub fn branch_name(&self, task_id: &str) -> String {
        format!("{}{}", self.branch_prefix, task_id)
    }

    /// Render the commit message template.
    pub fn commit_message(&self, task_id: &str, description: &str) -> String {
        self.commit_message_template
            .replace("{task_id}", task_id)
            .replace("{description}", description)
    }
}

/// Deployment settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CiCdConfig {
    pub auto_deploy_staging: bool,
    pub auto_deploy_production: bool,
    pub rollback_on_failure: bool,
    /// Upper bound for deploy-status polling, in seconds.
    pub deploy_timeout: u64,
    pub github_actions_workflow: String,
    pub poll_interval_secs: u64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for CiCdConfig {
    fn default() -> Self {
        Self {
            auto_deploy_staging: true,
            auto_deploy_production: false,
            rollback_on_failure: true,
            deploy_timeout: 300,
            github_actions_workflow: "maestro-automation.yml".to_string(),
            poll_interval_secs: 30,
            extra: BTreeMap::new(),
        }
    }
}

/// Change-validation and approval settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    pub exclude_patterns: Vec<String>,
    pub max_diff_lines: u64,
    pub require_manual_approval: bool,
    pub require_qa_pass: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            exclude_patterns: ["*.env", "secrets/*", "*.key", "*.log", "*.tmp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_diff_lines: 1000,
            require_manual_approval: true,
            require_qa_pass: true,
            extra: BTreeMap::new(),
        }
    }
}

/// Operation-record sink settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// When set, operation records are appended to this file as JSON lines.
    pub log_file: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// External command backing one stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageCommandConfig {
    /// Command to execute (first element is executable). `{task_id}` is
    /// substituted in every element.
    pub command: Vec<String>,
    /// Timeout in seconds; 0 disables it.
    #[serde(default)]
    pub timeout_secs: u64,
}

/// Pipeline execution settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding one `<task>.md` issue per task.
    pub issues_dir: PathBuf,
    /// Tools that must resolve on `PATH` before a run starts.
    pub required_tools: Vec<String>,
    /// Stage name to command. Stages without an entry complete immediately.
    pub stages: BTreeMap<String, StageCommandConfig>,
    /// Base branch for pull requests.
    pub base_branch: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            issues_dir: PathBuf::from("issues"),
            required_tools: vec!["gemini".into(), "codex".into(), "cursor".into()],
            stages: BTreeMap::new(),
            base_branch: "main".to_string(),
            extra: BTreeMap::new(),
        }
    }
}

/// Complete automation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AutomationConfig {
    pub git: GitConfig,
    pub ci_cd: CiCdConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
    pub pipeline: PipelineConfig,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl AutomationConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults. A file that exists but is not a
    /// JSON object, or whose known keys have the wrong type, is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
            .map_err(|e| MaestroError::Config(format!("{}: {e}", path.display())))
    }

    /// Parse configuration from JSON text, layering defaults under it.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| MaestroError::Config(format!("invalid JSON: {e}")))?;
        if !value.is_object() {
            return Err(MaestroError::Config(
                "top-level configuration must be a JSON object".to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|e| MaestroError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = AutomationConfig::default();
        assert!(config.git.auto_commit);
        assert!(config.git.auto_push);
        assert!(config.git.auto_pr);
        assert_eq!(config.git.branch_prefix, "feature/");
        assert!(config.ci_cd.auto_deploy_staging);
        assert!(!config.ci_cd.auto_deploy_production);
        assert!(config.ci_cd.rollback_on_failure);
        assert_eq!(config.ci_cd.deploy_timeout, 300);
        assert_eq!(config.security.max_diff_lines, 1000);
        assert!(config.security.require_manual_approval);
        assert_eq!(
            config.security.exclude_patterns,
            vec!["*.env", "secrets/*", "*.key", "*.log", "*.tmp"]
        );
    }

    #[test]
    fn test_missing_keys_fall_back_per_key() {
        let config = AutomationConfig::from_json_str(
            r#"{"git": {"branch_prefix": "task/"}, "ci_cd": {"deploy_timeout": 60}}"#,
        )
        .unwrap();
        assert_eq!(config.git.branch_prefix, "task/");
        assert!(config.git.auto_pr);
        assert_eq!(config.ci_cd.deploy_timeout, 60);
        assert_eq!(config.ci_cd.poll_interval_secs, 30);
        assert_eq!(config.security, SecurityConfig::default());
    }

    #[test]
    fn test_unknown_keys_preserved() {
        let config = AutomationConfig::from_json_str(
            r#"{"notifications": {"slack": true}, "git": {"max_commit_size": 200}}"#,
        )
        .unwrap();
        assert_eq!(config.extra["notifications"], json!({"slack": true}));
        assert_eq!(config.git.extra["max_commit_size"], json!(200));

        let reserialized = serde_json::to_value(&config).unwrap();
        assert_eq!(reserialized["notifications"]["slack"], json!(true));
        assert_eq!(reserialized["git"]["max_commit_size"], json!(200));
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let err = AutomationConfig::from_json_str(r#"{"ci_cd": {"deploy_timeout": "soon"}}"#)
            .unwrap_err();
        assert!(matches!(err, MaestroError::Config(_)));

        let err = AutomationConfig::from_json_str("[1, 2]").unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AutomationConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, AutomationConfig::default());
    }

    #[test]
    fn test_commit_message_template() {
        let git = GitConfig::default();
        assert_eq!(
            git.commit_message("t-7", "Automated commit"),
            "feat: t-7 - Automated commit"
        );
        assert_eq!(git.branch_name("t-7"), "feature/t-7");
    }

    #[test]
    fn test_stage_commands_parse() {
        let config = AutomationConfig::from_json_str(
            r#"{"pipeline": {"stages": {
                "planner": {"command": ["gemini", "plan", "{task_id}"]}
            }}}"#,
        )
        .unwrap();
        let planner = &config.pipeline.stages["planner"];
        assert_eq!(planner.command[2], "{task_id}");
        assert_eq!(planner.timeout_secs, 0);
        assert_eq!(config.pipeline.required_tools.len(), 3);
    }
}
