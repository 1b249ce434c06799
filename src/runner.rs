use std::sync::Arc;

use tracing::Instrument;

use crate::error::Result;
use crate::job::TaskContext;
use crate::worker::executor::{run_task, ExitOutcome};
use crate::worker::{
    complete_task, ArtifactUploader, LeaseHandle, LeaseKeeper, ReportStatus, UploadReport,
};

/// Everything that happened to one task run.
#[derive(Debug)]
pub struct TaskSummary {
    pub outcome: ExitOutcome,
    pub uploads: Vec<UploadReport>,
    pub report: ReportStatus,
}

impl TaskSummary {
    pub fn failed_uploads(&self) -> impl Iterator<Item = &UploadReport> {
        self.uploads.iter().filter(|u| !u.succeeded())
    }
}

/// Runs one claimed task from spawn to resolution.
pub struct TaskRunner {
    ctx: Arc<TaskContext>,
    uploader: ArtifactUploader,
}

impl TaskRunner {
    pub fn new(ctx: Arc<TaskContext>) -> Result<Self> {
        let uploader = ArtifactUploader::from_context(&ctx)?;
        Ok(Self { ctx, uploader })
    }

    pub fn with_uploader(ctx: Arc<TaskContext>, uploader: ArtifactUploader) -> Self {
        Self { ctx, uploader }
    }

    pub fn context(&self) -> &Arc<TaskContext> {
        &self.ctx
    }

    /// Run the task.
    ///
    /// The lease keeper runs from before the spawn until after the report.
    /// If it fails fatally while the process is running, the process is torn
    /// down, its logs drained, and the error returned without reporting.
    pub async fn run(&self) -> Result<TaskSummary> {
        let span = tracing::info_span!(
            "task",
            task_id = %self.ctx.task.task_id,
            run_id = self.ctx.task.run_id
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&self) -> Result<TaskSummary> {
        let ctx = &self.ctx;
        let mut lease = LeaseKeeper::new(ctx.clone()).spawn();

        let process = run_task(ctx);
        tokio::pin!(process);
        let outcome = tokio::select! {
            outcome = &mut process => outcome,
            err = lease.failed() => {
                tracing::error!(error = %err, "Lease lost, aborting task");
                ctx.abort();
                if let Err(e) = process.await {
                    tracing::warn!(error = %e, "Task process ended with an error during abort");
                }
                return Err(err);
            }
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                stop_after_error(lease).await;
                return Err(e);
            }
        };
        if !outcome.error_markers.is_empty() {
            tracing::warn!(markers = ?outcome.error_markers, "Task wrote error markers to stderr");
        }

        let uploads = match self.uploader.upload_all(ctx).await {
            Ok(uploads) => uploads,
            Err(e) => {
                tracing::error!(error = %e, "Artifact upload could not start");
                Vec::new()
            }
        };
        let failed = uploads.iter().filter(|u| !u.succeeded()).count();
        if failed > 0 {
            tracing::warn!(failed, total = uploads.len(), "Some artifacts were not uploaded");
        }

        let report = match complete_task(ctx, &outcome).await {
            Ok(report) => report,
            Err(e) => {
                stop_after_error(lease).await;
                return Err(e);
            }
        };

        lease.stop().await?;
        Ok(TaskSummary {
            outcome,
            uploads,
            report,
        })
    }

    /// Request that the running process be torn down.
    pub fn abort(&self) {
        self.ctx.abort();
    }
}

/// Stop the lease keeper while another error is already being returned.
/// A lease failure is logged rather than replacing that error.
async fn stop_after_error(lease: LeaseHandle) {
    if let Err(e) = lease.stop().await {
        tracing::warn!(error = %e, "Lease keeper also failed");
    }
}
