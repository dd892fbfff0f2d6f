//! Checks that must hold before a pipeline run starts.

use std::path::PathBuf;
use std::sync::Arc;

use maestro_core::{MaestroError, ToolRunner};

/// A check evaluated before any stage transition.
pub trait Precondition: Send + Sync {
    fn name(&self) -> &str;

    /// `Err(MaestroError::Precondition)` when the check does not hold.
    fn check(&self, task: &str) -> maestro_core::Result<()>;
}

/// The task's issue file `<issues_dir>/<task>.md` must exist.
#[derive(Debug, Clone)]
pub struct IssueExists {
    issues_dir: PathBuf,
}

impl IssueExists {
    pub fn new(issues_dir: impl Into<PathBuf>) -> Self {
        Self {
            issues_dir: issues_dir.into(),
        }
    }

    pub fn issue_path(&self, task: &str) -> PathBuf {
        self.issues_dir.join(format!("{task}.md"))
    }
}

impl Precondition for IssueExists {
    fn name(&self) -> &str {
        "issue_exists"
    }

    fn check(&self, task: &str) -> maestro_core::Result<()> {
        let path = self.issue_path(task);
        if path.is_file() {
            Ok(())
        } else {
            Err(MaestroError::Precondition(format!(
                "issue file not found: {}",
                path.display()
            )))
        }
    }
}

/// Every listed tool must resolve.
pub struct ToolsResolvable {
    tools: Vec<String>,
    runner: Arc<dyn ToolRunner>,
}

impl ToolsResolvable {
    pub fn new(tools: Vec<String>, runner: Arc<dyn ToolRunner>) -> Self {
        Self { tools, runner }
    }
}

impl Precondition for ToolsResolvable {
    fn name(&self) -> &str {
        "tools_resolvable"
    }

    fn check(&self, _task: &str) -> maestro_core::Result<()> {
        let missing: Vec<&str> = self
            .tools
            .iter()
            .filter(|tool| !self.runner.is_available(tool))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MaestroError::Precondition(format!(
                "required tools not found: {}",
                missing.join(", ")
            )))
        }
    }
}
