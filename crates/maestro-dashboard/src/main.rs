//! `maestrod` - standalone dashboard server.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::Level;

use maestro_core::PipelineState;
use maestro_dashboard::{bind_and_serve, DEFAULT_HOST, DEFAULT_PORT};

#[derive(Parser)]
#[command(name = "maestrod")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Maestro live status dashboard server", long_about = None)]
struct Args {
    /// Host to bind
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port to bind
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    maestro_core::init_tracing(args.json, level);

    let state = Arc::new(PipelineState::standalone());
    bind_and_serve(&args.host, args.port, state)
        .await
        .with_context(|| format!("dashboard server failed on {}:{}", args.host, args.port))
}
