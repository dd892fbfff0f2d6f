//! Maestro - multi-stage development pipeline CLI
//!
//! The `maestro` command drives the pipeline and the QA-gated promotion flow.
//!
//! ## Commands
//!
//! - `run`: Run planner, coder, integrator, tester and reporter for a task
//! - `qa`: Build the QA report from raw check results
//! - `promote`: Branch, commit, push and open a PR when QA passed
//! - `deploy`: Staging / production deploys and rollbacks via GitHub Actions
//! - `git-rollback`: Discard local changes for a task
//! - `dashboard`: Serve live pipeline status over WebSocket
//! - `doc-notify`: Push a QA summary to a running dashboard

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use futures::SinkExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{info, warn, Level};

use maestro_ci::{
    build_report, write_report, IssueExists, PipelineResult, PipelineSequencer, QaChecks, QaGate,
    StagePlan, ToolsResolvable,
};
use maestro_core::{
    AutomationConfig, DeployAgent, DocStatus, GitAgent, MetricsPatch, MonitorOutcome,
    OperationLog, PipelineEvent, PipelineState, PromotionReport, PromotionWorkflow, QaReport,
    SystemToolRunner, ToolRunner, DEFAULT_CONFIG_PATH, DEFAULT_QA_REPORT_PATH,
};
use maestro_dashboard::{DEFAULT_HOST, DEFAULT_PORT};

#[derive(Parser)]
#[command(name = "maestro")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-stage development pipeline orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Automation config file (defaults apply when it does not exist)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the five-stage pipeline for a task
    Run {
        /// Task id (expects <issues_dir>/<task>.md)
        task: String,

        /// Project root the stages run in
        #[arg(long, default_value = ".")]
        project_root: PathBuf,

        /// Also serve the live dashboard on this address while running
        #[arg(long)]
        serve: Option<String>,
    },

    /// Build reports/qa.json from lint, type-check and test results
    Qa {
        #[arg(long)]
        task: String,

        #[arg(long, allow_hyphen_values = true)]
        lint_rc: String,

        #[arg(long, default_value = "")]
        lint_out: String,

        #[arg(long, allow_hyphen_values = true)]
        types_rc: String,

        #[arg(long, default_value = "")]
        types_out: String,

        #[arg(long, allow_hyphen_values = true)]
        tests_rc: String,

        #[arg(long, default_value = "")]
        tests_out: String,

        /// Directory the report is written to
        #[arg(long, default_value = "reports")]
        reports_dir: PathBuf,
    },

    /// Promote a task whose QA status is pass
    Promote {
        task: String,

        /// QA report to gate on
        #[arg(long, default_value = DEFAULT_QA_REPORT_PATH)]
        report: PathBuf,

        /// Deploy to staging and monitor after promoting
        #[arg(long)]
        deploy: bool,
    },

    /// CI/CD deploy actions
    Deploy {
        #[arg(value_enum)]
        action: DeployAction,

        task: String,

        /// Branch to deploy (staging only; defaults to the task's feature branch)
        #[arg(long)]
        branch: Option<String>,
    },

    /// Discard uncommitted local changes (reset --hard, clean -fd)
    GitRollback { task: String },

    /// Serve the live status dashboard
    Dashboard {
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Send a QA summary to a running dashboard as a doc_update
    DocNotify {
        #[arg(long, default_value = DEFAULT_QA_REPORT_PATH)]
        report: PathBuf,

        #[arg(long, default_value = "ws://localhost:8765/ws")]
        dashboard_url: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DeployAction {
    Staging,
    Production,
    Rollback,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    maestro_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            task,
            project_root,
            serve,
        } => {
            let config = load_config(&cli.config)?;
            cmd_run(&config, &task, &project_root, serve.as_deref())
                .await
                .map(|_| ())
        }
        Commands::Qa {
            task,
            lint_rc,
            lint_out,
            types_rc,
            types_out,
            tests_rc,
            tests_out,
            reports_dir,
        } => {
            let checks = QaChecks {
                lint_rc,
                lint_out,
                types_rc,
                types_out,
                tests_rc,
                tests_out,
            };
            let report = cmd_qa(&task, &checks, &reports_dir)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Promote {
            task,
            report,
            deploy,
        } => {
            let config = load_config(&cli.config)?;
            cmd_promote(&config, &task, &report, deploy).await
        }
        Commands::Deploy {
            action,
            task,
            branch,
        } => {
            let config = load_config(&cli.config)?;
            cmd_deploy(&config, action, &task, branch).await
        }
        Commands::GitRollback { task } => {
            let config = load_config(&cli.config)?;
            cmd_git_rollback(&config, &task).await
        }
        Commands::Dashboard { host, port } => cmd_dashboard(&host, port).await,
        Commands::DocNotify {
            report,
            dashboard_url,
        } => cmd_doc_notify(&report, &dashboard_url).await,
    }
}

fn load_config(path: &Path) -> Result<AutomationConfig> {
    AutomationConfig::load(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

fn system_runner(root: &Path) -> Arc<dyn ToolRunner> {
    Arc::new(SystemToolRunner::in_dir(root))
}

/// Run the pipeline; an unsuccessful run is an error.
async fn cmd_run(
    config: &AutomationConfig,
    task: &str,
    project_root: &Path,
    serve: Option<&str>,
) -> Result<PipelineResult> {
    let runner = system_runner(project_root);
    let plan = StagePlan::from_config(&config.pipeline, runner.clone())
        .context("Invalid pipeline.stages configuration")?;
    let state = Arc::new(PipelineState::standalone());

    let server = match serve {
        Some(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind dashboard on {addr}"))?;
            Some(tokio::spawn(maestro_dashboard::serve(listener, state.clone())))
        }
        None => None,
    };

    let sequencer = PipelineSequencer::new(state.clone(), plan)
        .with_precondition(IssueExists::new(
            project_root.join(&config.pipeline.issues_dir),
        ))
        .with_precondition(ToolsResolvable::new(
            config.pipeline.required_tools.clone(),
            runner,
        ));

    println!("Running pipeline for task: {task}");
    let result = sequencer
        .run(task)
        .await
        .context("Pipeline could not start")?;

    println!(
        "Status: {}",
        if result.success { "✓ PASSED" } else { "✗ FAILED" }
    );
    println!("Duration: {}ms", result.duration_ms);
    for stage in &result.stages {
        let mark = if stage.passed() { "✓" } else { "✗" };
        match &stage.error {
            Some(error) => println!("  {mark} {} ({}ms): {error}", stage.stage, stage.duration_ms),
            None => println!("  {mark} {} ({}ms)", stage.stage, stage.duration_ms),
        }
    }

    if result.success {
        let report_path = project_root.join(DEFAULT_QA_REPORT_PATH);
        match QaReport::load(&report_path) {
            Ok(report) => state.update_metrics(&MetricsPatch::from(&report)).await,
            Err(e) => warn!(error = %e, "No QA metrics to publish"),
        }
    }

    if let Some(server) = server {
        server.abort();
    }

    match result.failure_message() {
        Some(message) => bail!(message),
        None => Ok(result),
    }
}

/// Build and write the QA report.
fn cmd_qa(task: &str, checks: &QaChecks, reports_dir: &Path) -> Result<QaReport> {
    let start = Utc::now();
    let verdict = QaGate::evaluate(task, checks);
    let report = build_report(task, checks, start, Utc::now());
    let path = write_report(reports_dir, &report).context("Failed to write QA report")?;

    eprintln!("QA report saved to: {}", path.display());
    eprintln!("{}", verdict.message);
    Ok(report)
}

async fn cmd_promote(
    config: &AutomationConfig,
    task: &str,
    report: &Path,
    deploy: bool,
) -> Result<()> {
    let log = Arc::new(OperationLog::from_config(&config.logging));
    let workflow = PromotionWorkflow::new(system_runner(Path::new(".")), config, log)
        .with_report_path(report);

    let outcome = if deploy {
        workflow.promote_and_deploy(task).await
    } else {
        workflow.run(task).await
    }
    .with_context(|| format!("Promotion failed for task {task}"))?;

    print_promotion(&outcome);
    if outcome.promoted {
        Ok(())
    } else {
        bail!(
            "Promotion declined: {}",
            outcome.declined.unwrap_or_default()
        )
    }
}

fn print_promotion(report: &PromotionReport) {
    println!("Task: {}", report.task_id);
    println!(
        "QA status: {}",
        report.qa_status.map(|s| s.as_str()).unwrap_or("unknown")
    );
    if let Some(branch) = &report.branch {
        println!("Branch: {branch}");
    }
    for (name, step) in [
        ("Commit", &report.commit),
        ("Push", &report.push),
        ("Pull request", &report.pull_request),
    ] {
        if let Some(step) = step {
            println!("{name}: {step}");
        }
    }
    if let Some(monitor) = &report.deploy {
        print_monitor(monitor);
    }
    if let Some(reason) = &report.declined {
        println!("Declined: {reason}");
    }
}

fn print_monitor(outcome: &MonitorOutcome) {
    println!("Deploy ({}): {}", outcome.environment, outcome.deploy);
    if let Some(status) = outcome.status {
        println!("Deploy status: {}", status.as_str());
    }
    if let Some(rollback) = &outcome.rollback {
        println!("Rollback: {rollback}");
    }
}

async fn cmd_deploy(
    config: &AutomationConfig,
    action: DeployAction,
    task: &str,
    branch: Option<String>,
) -> Result<()> {
    let log = Arc::new(OperationLog::from_config(&config.logging));
    let agent = DeployAgent::new(system_runner(Path::new(".")), config, log);

    let outcome = match action {
        DeployAction::Staging => {
            let branch = branch.unwrap_or_else(|| config.git.branch_name(task));
            agent.auto_deploy_and_monitor(task, &branch).await?
        }
        DeployAction::Production => agent.production_deploy_and_monitor(task).await?,
        DeployAction::Rollback => {
            let step = agent.rollback_deploy(task).await?;
            println!("Rollback: {step}");
            return Ok(());
        }
    };

    print_monitor(&outcome);
    if outcome.succeeded() {
        Ok(())
    } else {
        bail!("{} deployment did not succeed", outcome.environment)
    }
}

async fn cmd_git_rollback(config: &AutomationConfig, task: &str) -> Result<()> {
    let log = Arc::new(OperationLog::from_config(&config.logging));
    let agent = GitAgent::new(system_runner(Path::new(".")), config, log);
    agent
        .rollback_changes(task)
        .await
        .with_context(|| format!("Rollback failed for task {task}"))?;
    println!("Local changes discarded for task {task}");
    Ok(())
}

async fn cmd_dashboard(host: &str, port: u16) -> Result<()> {
    let state = Arc::new(PipelineState::standalone());
    maestro_dashboard::bind_and_serve(host, port, state)
        .await
        .with_context(|| format!("Dashboard server failed on {host}:{port}"))
}

/// Push the report summary to a dashboard as an inbound `doc_update`.
async fn cmd_doc_notify(report_path: &Path, dashboard_url: &str) -> Result<()> {
    let report = QaReport::load(report_path)
        .with_context(|| format!("Failed to read QA report {}", report_path.display()))?;
    let payload = serde_json::to_string(&PipelineEvent::DocUpdate(DocStatus::from(&report)))?;

    let (mut ws, _) = tokio_tungstenite::connect_async(dashboard_url)
        .await
        .with_context(|| format!("Failed to connect to dashboard at {dashboard_url}"))?;
    ws.send(Message::Text(payload.into()))
        .await
        .context("Failed to send doc_update")?;
    if let Err(e) = ws.close(None).await {
        warn!(error = %e, "Dashboard connection did not close cleanly");
    }

    info!(task = %report.task_id, url = %dashboard_url, "Documentation status sent");
    println!("Sent doc_update for task {}", report.task_id);
    Ok(())
}
