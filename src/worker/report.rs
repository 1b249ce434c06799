use crate::error::{QueueError, Result};
use crate::job::TaskContext;
use crate::worker::executor::ExitOutcome;

/// Terminal state reported to the queue.
///
/// Only the two outcomes the exit code can express are reported. Richer
/// exception reasons (malformed payload, resource unavailable, internal
/// error) would be new variants here, each with its own queue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Completed,
    Failed,
}

impl Resolution {
    pub fn for_outcome(outcome: &ExitOutcome) -> Self {
        if outcome.exit_code() == 0 {
            Resolution::Completed
        } else {
            Resolution::Failed
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolution::Completed => write!(f, "completed"),
            Resolution::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Reported(Resolution),
    /// The queue answered with a conflict: the run was already resolved,
    /// expired or handed to another worker.
    AlreadyResolved(Resolution),
}

/// Resolve the task run according to `outcome`.
pub async fn complete_task(ctx: &TaskContext, outcome: &ExitOutcome) -> Result<ReportStatus> {
    let resolution = Resolution::for_outcome(outcome);
    let credentials = ctx.credentials();
    tracing::debug!(task = %ctx.task, exit_code = outcome.exit_code(), %resolution, "Reporting task");

    let result = match resolution {
        Resolution::Completed => ctx.queue.report_completed(&ctx.task, &credentials).await,
        Resolution::Failed => ctx.queue.report_failed(&ctx.task, &credentials).await,
    };

    match result {
        Ok(()) => {
            tracing::info!(task = %ctx.task, %resolution, "Task resolved");
            Ok(ReportStatus::Reported(resolution))
        }
        Err(QueueError::Conflict(message)) => {
            tracing::debug!(task = %ctx.task, %resolution, message = %message, "409: not reporting task");
            Ok(ReportStatus::AlreadyResolved(resolution))
        }
        Err(e) => {
            tracing::error!(task = %ctx.task, %resolution, error = %e, "Reporting task failed");
            Err(e.into())
        }
    }
}
