use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{QueueError, Result, WorkerError};
use crate::job::TaskContext;

/// Keeps the task's lease alive by reclaiming it on a fixed interval.
pub struct LeaseKeeper {
    ctx: Arc<TaskContext>,
}

impl LeaseKeeper {
    pub fn new(ctx: Arc<TaskContext>) -> Self {
        Self { ctx }
    }

    /// Reclaim every `reclaim_interval_ms` until the queue answers with a
    /// conflict (returns `Ok`) or rejects the reclaim otherwise (returns the
    /// error). Renewals are strictly sequential.
    pub async fn run(&self) -> Result<()> {
        let interval = self.ctx.config.reclaim_interval();
        loop {
            tokio::time::sleep(interval).await;
            tracing::debug!(task = %self.ctx.task, "Reclaiming task");

            let credentials = self.ctx.credentials();
            match self.ctx.queue.reclaim_task(&self.ctx.task, &credentials).await {
                Ok(lease) => {
                    tracing::debug!(task = %self.ctx.task, taken_until = ?lease.taken_until, "Task reclaimed");
                    self.ctx.replace_lease(lease);
                }
                Err(QueueError::Conflict(message)) => {
                    tracing::debug!(task = %self.ctx.task, message = %message, "409: not reclaiming task");
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!(task = %self.ctx.task, error = %e, "Reclaim rejected");
                    return Err(e.into());
                }
            }
        }
    }

    /// Start the loop in the background.
    pub fn spawn(self) -> LeaseHandle {
        let token = CancellationToken::new();
        let stop = token.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                result = self.run() => result,
                _ = stop.cancelled() => Ok(()),
            }
        });
        LeaseHandle {
            token,
            task: Some(task),
        }
    }
}

/// Owner's handle on a running [`LeaseKeeper`].
pub struct LeaseHandle {
    token: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
}

impl LeaseHandle {
    /// Resolves only if the loop ends with an error; pends forever if it
    /// ends cleanly. Safe to use as a `select!` branch.
    pub async fn failed(&mut self) -> WorkerError {
        if let Some(task) = self.task.as_mut() {
            let result = task.await;
            self.task = None;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return e,
                Err(e) => return WorkerError::Join(e),
            }
        }
        std::future::pending().await
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Cancel the loop and wait for it, surfacing any error it ended with.
    pub async fn stop(mut self) -> Result<()> {
        self.token.cancel();
        match self.task.take() {
            Some(task) => task.await?,
            None => Ok(()),
        }
    }
}

impl Drop for LeaseHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
