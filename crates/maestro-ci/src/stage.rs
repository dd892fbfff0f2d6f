//! Stage operations and the plan mapping each pipeline stage to one.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use maestro_core::{
    MaestroError, PipelineConfig, StageCommandConfig, StageName, ToolError, ToolRunner,
};

/// Why a command-backed stage failed.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("stage has an empty command")]
    EmptyCommand,

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("{program} exited with code {exit_code}: {stderr}")]
    NonZeroExit {
        program: String,
        exit_code: i32,
        stderr: String,
    },
}

/// The external work behind one stage.
///
/// Implementations are opaque tool invocations; any error marks the stage
/// failed.
#[async_trait]
pub trait StageOperation: Send + Sync {
    /// Short human-readable description for logs.
    fn describe(&self) -> String;

    async fn execute(&self, task: &str) -> anyhow::Result<()>;
}

/// Stage without configured work; completes immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStage;

#[async_trait]
impl StageOperation for NoopStage {
    fn describe(&self) -> String {
        "noop".to_string()
    }

    async fn execute(&self, _task: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Stage backed by an external command.
///
/// `{task_id}` in any argument is replaced with the task id. A non-zero exit
/// fails the stage with the command's stderr.
pub struct CommandStage {
    runner: Arc<dyn ToolRunner>,
    command: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandStage {
    pub fn new(runner: Arc<dyn ToolRunner>, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            runner,
            command,
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        }
    }

    pub fn from_config(runner: Arc<dyn ToolRunner>, config: &StageCommandConfig) -> Self {
        Self::new(runner, config.command.clone(), config.timeout_secs)
    }

    /// Command line with `{task_id}` substituted.
    pub fn render(&self, task: &str) -> Vec<String> {
        self.command
            .iter()
            .map(|part| part.replace("{task_id}", task))
            .collect()
    }
}

impl fmt::Debug for CommandStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandStage")
            .field("command", &self.command)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl StageOperation for CommandStage {
    fn describe(&self) -> String {
        self.command.join(" ")
    }

    async fn execute(&self, task: &str) -> anyhow::Result<()> {
        let rendered = self.render(task);
        let (program, args) = rendered.split_first().ok_or(StageError::EmptyCommand)?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = self
            .runner
            .run_with_timeout(program, &args, self.timeout)
            .await
            .map_err(StageError::from)?;
        if !output.success() {
            return Err(StageError::NonZeroExit {
                program: program.clone(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Stage backed by a closure. Handy for embedding and tests.
pub struct FnStage<F> {
    name: String,
    f: F,
}

impl<F> FnStage<F>
where
    F: Fn(&str) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> StageOperation for FnStage<F>
where
    F: Fn(&str) -> anyhow::Result<()> + Send + Sync,
{
    fn describe(&self) -> String {
        self.name.clone()
    }

    async fn execute(&self, task: &str) -> anyhow::Result<()> {
        (self.f)(task)
    }
}

/// Operation per stage. Stages without an explicit operation are no-ops.
#[derive(Clone, Default)]
pub struct StagePlan {
    operations: BTreeMap<StageName, Arc<dyn StageOperation>>,
}

impl StagePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `operation` to `stage`.
    pub fn with(mut self, stage: StageName, operation: Arc<dyn StageOperation>) -> Self {
        self.operations.insert(stage, operation);
        self
    }

    /// Build a plan from `pipeline.stages`. Unknown stage names are rejected.
    pub fn from_config(
        config: &PipelineConfig,
        runner: Arc<dyn ToolRunner>,
    ) -> maestro_core::Result<Self> {
        let mut plan = Self::new();
        for (name, command) in &config.stages {
            let stage: StageName = name.parse()?;
            if command.command.is_empty() {
                return Err(MaestroError::Config(format!(
                    "stage {name} has an empty command"
                )));
            }
            plan = plan.with(
                stage,
                Arc::new(CommandStage::from_config(runner.clone(), command)),
            );
        }
        Ok(plan)
    }

    pub fn operation(&self, stage: StageName) -> Arc<dyn StageOperation> {
        self.operations
            .get(&stage)
            .cloned()
            .unwrap_or_else(|| Arc::new(NoopStage))
    }
}

impl fmt::Debug for StagePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for stage in StageName::ALL {
            map.entry(&stage.as_str(), &self.operation(stage).describe());
        }
        map.finish()
    }
}
