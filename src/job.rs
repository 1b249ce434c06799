use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::queue::{Credentials, Lease, Queue, TaskRef};

pub const OUTPUT_LOG_NAME: &str = "task_output.log";
pub const ERROR_LOG_NAME: &str = "task_error.log";

/// Identity of one spawned child process.
///
/// The generation is unique per spawn within a context, so two handles only
/// compare equal if they refer to the same spawn even when the OS reuses a pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub generation: u64,
    pub pid: i32,
}

/// Paths of the two append-only task logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    /// Combined stdout and stderr
    pub output: PathBuf,
    /// Stderr only
    pub errors: PathBuf,
}

impl LogPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            output: dir.join(OUTPUT_LOG_NAME),
            errors: dir.join(ERROR_LOG_NAME),
        }
    }

    pub fn all(&self) -> [&Path; 2] {
        [&self.output, &self.errors]
    }
}

/// Everything needed to run one claimed task.
///
/// Two fields change while the task runs, each with a single writer:
/// the process handle (written by the executor) and the lease (written by the
/// heartbeat). Readers take snapshots and must tolerate either changing
/// between reads.
pub struct TaskContext {
    pub task: TaskRef,
    pub config: Arc<WorkerConfig>,
    pub queue: Arc<dyn Queue>,
    pub logs: LogPaths,
    lease: watch::Sender<Lease>,
    process: watch::Sender<Option<ProcessHandle>>,
    generation: AtomicU64,
    abort: CancellationToken,
}

impl TaskContext {
    pub fn new(
        task: TaskRef,
        config: WorkerConfig,
        queue: Arc<dyn Queue>,
        credentials: Credentials,
    ) -> Self {
        let logs = LogPaths::in_dir(&config.log_dir);
        let (lease, _) = watch::channel(Lease::new(credentials));
        let (process, _) = watch::channel(None);
        Self {
            task,
            config: Arc::new(config),
            queue,
            logs,
            lease,
            process,
            generation: AtomicU64::new(0),
            abort: CancellationToken::new(),
        }
    }

    /// Latest credentials.
    pub fn credentials(&self) -> Credentials {
        self.lease.borrow().credentials.clone()
    }

    pub fn lease(&self) -> Lease {
        self.lease.borrow().clone()
    }

    /// Subscribe to lease replacements.
    pub fn watch_lease(&self) -> watch::Receiver<Lease> {
        self.lease.subscribe()
    }

    pub(crate) fn replace_lease(&self, lease: Lease) {
        self.lease.send_replace(lease);
    }

    pub fn current_process(&self) -> Option<ProcessHandle> {
        *self.process.borrow()
    }

    pub fn is_current(&self, handle: &ProcessHandle) -> bool {
        self.current_process().as_ref() == Some(handle)
    }

    /// Record a freshly spawned process. Fails if one is already recorded.
    pub fn set_process(&self, pid: i32) -> Result<ProcessHandle> {
        if let Some(existing) = self.current_process() {
            return Err(WorkerError::ProcessAlreadyRunning(existing.pid));
        }
        let handle = ProcessHandle {
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            pid,
        };
        self.process.send_replace(Some(handle));
        Ok(handle)
    }

    /// Clear the recorded process if it is still `handle`.
    pub fn clear_process(&self, handle: &ProcessHandle) -> bool {
        self.process.send_if_modified(|current| {
            if current.as_ref() == Some(handle) {
                *current = None;
                true
            } else {
                false
            }
        })
    }

    /// Ask the running process to be torn down now.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }
}
