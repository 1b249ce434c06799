use std::collections::BTreeSet;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::process::Command;

use crate::error::{Result, WorkerError};
use crate::job::TaskContext;
use crate::worker::output::{capture_output, LogSinks};
use crate::worker::watchdog::{watchdog, ProcessGroupSignaller, Signaller};

/// How the task process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
}

/// Result of a completed task process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitOutcome {
    pub termination: Termination,
    /// Whether the watchdog had to intervene
    pub timed_out: bool,
    pub finished_at: DateTime<Utc>,
    pub error_markers: BTreeSet<String>,
}

impl ExitOutcome {
    pub fn from_status(status: ExitStatus, timed_out: bool) -> Self {
        let termination = match (status.code(), status.signal()) {
            (Some(code), _) => Termination::Exited(code),
            (None, Some(signal)) => Termination::Signaled(signal),
            (None, None) => Termination::Exited(-1),
        };
        Self {
            termination,
            timed_out,
            finished_at: Utc::now(),
            error_markers: BTreeSet::new(),
        }
    }

    /// Numeric exit code; a signal death is reported as the negated signal.
    pub fn exit_code(&self) -> i32 {
        match self.termination {
            Termination::Exited(code) => code,
            Termination::Signaled(signal) => -signal,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code() == 0
    }
}

/// Run the configured task script to completion.
///
/// The child leads its own process group, gets no stdin, and has both output
/// streams captured to the task logs. A watchdog started right after spawn
/// tears the group down if it outlives `task_max_timeout_ms`.
pub async fn run_task(ctx: &Arc<TaskContext>) -> Result<ExitOutcome> {
    run_task_with(ctx, Arc::new(ProcessGroupSignaller)).await
}

pub async fn run_task_with<S>(ctx: &Arc<TaskContext>, signaller: Arc<S>) -> Result<ExitOutcome>
where
    S: Signaller + 'static,
{
    let (program, args) = ctx
        .config
        .task_script
        .split_first()
        .ok_or(WorkerError::EmptyCommand)?;

    let mut sinks = LogSinks::open(&ctx.logs).await?;

    tracing::info!(task = %ctx.task, program = %program, ?args, "Starting task process");
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .map_err(|source| {
            tracing::error!(program = %program, error = %source, "Failed to spawn task process");
            WorkerError::Spawn {
                program: program.clone(),
                source,
            }
        })?;

    let pid = match leader_pid(program, child.id()) {
        Ok(pid) => pid,
        Err(e) => {
            let _ = child.start_kill();
            return Err(e);
        }
    };
    let handle = match ctx.set_process(pid) {
        Ok(handle) => handle,
        Err(e) => {
            let _ = child.start_kill();
            return Err(e);
        }
    };

    let fired = Arc::new(AtomicBool::new(false));
    let timer = tokio::spawn(watchdog(ctx.clone(), handle, signaller, fired.clone()));

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (captured, status) = tokio::join!(
        capture_output(&mut sinks, stdout, stderr, &ctx.config.error_markers),
        child.wait()
    );

    ctx.clear_process(&handle);
    timer.abort();

    let status = status?;
    let report = captured?;

    let mut outcome = ExitOutcome::from_status(status, fired.load(Ordering::SeqCst));
    outcome.error_markers = report.error_markers;

    let status_line = format!("exit code: {}", outcome.exit_code());
    tracing::info!(
        task = %ctx.task,
        pid,
        exit_code = outcome.exit_code(),
        timed_out = outcome.timed_out,
        stdout_lines = report.stdout_lines,
        stderr_lines = report.stderr_lines,
        "Task process finished"
    );
    sinks.write_status(&status_line).await?;
    sinks.flush().await?;

    Ok(outcome)
}

/// Pid of a just-spawned group leader. Zero or a missing pid would make
/// `killpg` target the worker's own group, so both are refused.
fn leader_pid(program: &str, id: Option<u32>) -> Result<i32> {
    match id.and_then(|id| i32::try_from(id).ok()) {
        Some(pid) if pid > 0 => Ok(pid),
        _ => Err(WorkerError::Spawn {
            program: program.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::Other,
                "child has no usable pid after spawn",
            ),
        }),
    }
}
