use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

use crate::job::TaskContext;

/// Abort the running task when the worker receives SIGTERM or SIGINT.
///
/// The task's process group then goes through the normal escalation, its
/// logs are drained, and the run is reported as failed.
pub fn abort_on_shutdown(ctx: Arc<TaskContext>) -> std::io::Result<JoinHandle<()>> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!(task = %ctx.task, "Received SIGTERM, aborting task");
            }
            _ = sigint.recv() => {
                tracing::info!(task = %ctx.task, "Received SIGINT, aborting task");
            }
        }
        ctx.abort();
    }))
}
