use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use task_worker::config::WorkerConfig;
use task_worker::queue::{Credentials, HttpQueue, TaskRef};
use task_worker::runner::TaskRunner;
use task_worker::shutdown::abort_on_shutdown;
use task_worker::worker::ReportStatus;
use task_worker::TaskContext;

#[derive(Parser, Debug)]
#[command(name = "task-worker")]
#[command(version)]
#[command(about = "Run one claimed queue task as a supervised process")]
struct Args {
    /// Path to the worker config (JSON)
    #[arg(long, short = 'c')]
    config: PathBuf,

    /// Queue API root URL
    #[arg(long, env = "TASK_WORKER_QUEUE_URL")]
    queue_url: String,

    /// ID of the claimed task
    #[arg(long)]
    task_id: String,

    /// Run number of the claim
    #[arg(long, default_value = "0")]
    run_id: u32,

    /// Client ID of the temporary credentials issued with the claim
    #[arg(long, env = "TASK_WORKER_CLIENT_ID")]
    client_id: String,

    /// Access token of the temporary credentials issued with the claim
    #[arg(long, env = "TASK_WORKER_ACCESS_TOKEN", hide_env_values = true)]
    access_token: String,
}

async fn run(args: Args) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = WorkerConfig::load(&args.config)?;
    let queue = HttpQueue::new(reqwest::Client::new(), args.queue_url);
    let ctx = Arc::new(TaskContext::new(
        TaskRef::new(args.task_id, args.run_id),
        config,
        Arc::new(queue),
        Credentials::new(args.client_id, args.access_token),
    ));

    let shutdown = abort_on_shutdown(ctx.clone())?;
    let runner = TaskRunner::new(ctx)?;
    let result = runner.run().await;
    shutdown.abort();
    let summary = result?;

    let code = summary.outcome.exit_code();
    match summary.report {
        ReportStatus::Reported(resolution) => {
            tracing::info!(exit_code = code, %resolution, "Task finished");
        }
        ReportStatus::AlreadyResolved(resolution) => {
            tracing::info!(exit_code = code, %resolution, "Task finished, run was already resolved");
        }
    }
    Ok(if summary.outcome.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Task worker failed");
            ExitCode::FAILURE
        }
    }
}
