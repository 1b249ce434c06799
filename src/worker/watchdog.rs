use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

use crate::job::{ProcessHandle, TaskContext};

/// Stages of tearing down an over-time process.
///
/// Each stage sends its signal, waits one step, and moves on only if the
/// process group is still alive. `Gone` is reachable from every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    Interrupting,
    Terminating,
    Killing,
    Gone,
}

impl Escalation {
    pub fn signal(self) -> Option<Signal> {
        match self {
            Escalation::Interrupting => Some(Signal::SIGINT),
            Escalation::Terminating => Some(Signal::SIGTERM),
            Escalation::Killing => Some(Signal::SIGKILL),
            Escalation::Gone => None,
        }
    }

    /// Stage to enter after a step in which the process survived.
    pub fn next(self) -> Self {
        match self {
            Escalation::Interrupting => Escalation::Terminating,
            Escalation::Terminating | Escalation::Killing => Escalation::Killing,
            Escalation::Gone => Escalation::Gone,
        }
    }
}

/// Delivers signals to a spawned process and its group.
pub trait Signaller: Send + Sync {
    /// Send `signal` to the process group led by `target`, then to the
    /// leader itself. An error means the group no longer exists.
    fn send(&self, target: ProcessHandle, signal: Signal) -> nix::Result<()>;

    /// Zero-signal existence probe of the process group.
    fn is_alive(&self, target: ProcessHandle) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessGroupSignaller;

impl Signaller for ProcessGroupSignaller {
    fn send(&self, target: ProcessHandle, signal: Signal) -> nix::Result<()> {
        let pid = Pid::from_raw(target.pid);
        killpg(pid, signal)?;
        // The leader may already be reaped while descendants linger
        let _ = kill(pid, signal);
        Ok(())
    }

    fn is_alive(&self, target: ProcessHandle) -> bool {
        killpg(Pid::from_raw(target.pid), None).is_ok()
    }
}

/// Run the escalation against `target` until the group is gone or the
/// context stops tracking it. Returns the last stage that sent a signal.
pub async fn escalate<S: Signaller + ?Sized>(
    ctx: &TaskContext,
    target: ProcessHandle,
    signaller: &S,
    step: Duration,
) -> Option<Escalation> {
    let mut stage = Escalation::Interrupting;
    let mut last_sent = None;
    while let Some(signal) = stage.signal() {
        if !ctx.is_current(&target) {
            break;
        }
        if let Err(e) = signaller.send(target, signal) {
            tracing::debug!(pid = target.pid, signal = %signal, error = %e, "Process already gone");
            break;
        }
        tracing::info!(pid = target.pid, signal = %signal, "Sent signal to task process group");
        last_sent = Some(stage);

        tokio::time::sleep(step).await;
        stage = if signaller.is_alive(target) {
            stage.next()
        } else {
            Escalation::Gone
        };
    }
    last_sent
}

/// Wait for the timeout (or an abort request), then escalate against
/// `target` if it is still the context's current process.
///
/// `fired` is set once escalation starts, so the executor can tell a
/// timed-out exit from a natural one.
pub async fn watchdog<S: Signaller + ?Sized>(
    ctx: Arc<TaskContext>,
    target: ProcessHandle,
    signaller: Arc<S>,
    fired: Arc<AtomicBool>,
) {
    let timeout = ctx.config.max_timeout();
    let abort = ctx.abort_token();
    tokio::select! {
        _ = tokio::time::sleep(timeout) => {
            tracing::debug!(pid = target.pid, timeout_ms = timeout.as_millis() as u64, "Task timeout elapsed");
        }
        _ = abort.cancelled() => {
            tracing::debug!(pid = target.pid, "Task abort requested");
        }
    }

    if !ctx.is_current(&target) {
        tracing::debug!(pid = target.pid, "Watchdog outlived its process, nothing to do");
        return;
    }

    tracing::warn!(
        task = %ctx.task,
        pid = target.pid,
        timeout_ms = timeout.as_millis() as u64,
        "Task exceeded its time limit, terminating"
    );
    fired.store(true, Ordering::SeqCst);
    escalate(ctx.as_ref(), target, signaller.as_ref(), ctx.config.escalation_step()).await;
}
