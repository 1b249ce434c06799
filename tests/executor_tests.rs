//! Process execution tests against real child processes.


use std::time::{Duration, Instant};

use task_worker::worker::executor::run_task;
use task_worker::worker::Termination;
use task_worker::WorkerError;
use test_harness::{context, sh, test_config, MockQueue, TestWorkspace};

fn script_config(ws: &TestWorkspace, script: &str) -> task_worker::WorkerConfig {
    let mut config = test_config(ws, &[]);
    config.task_script = sh(script);
    config
}

#[tokio::test]
async fn test_echo_command() {
    let ws = TestWorkspace::new();
    let ctx = context(script_config(&ws, "echo hello"), MockQueue::new());

    let outcome = run_task(&ctx).await.unwrap();

    assert_eq!(outcome.termination, Termination::Exited(0));
    assert!(outcome.success());
    assert!(!outcome.timed_out);
    assert_eq!(ws.output_log(), "hello\nexit code: 0\n");
    assert_eq!(ws.error_log(), "");
}

#[tokio::test]
async fn test_exit_code_is_preserved() {
    let ws = TestWorkspace::new();
    let ctx = context(script_config(&ws, "exit 3"), MockQueue::new());

    let outcome = run_task(&ctx).await.unwrap();

    assert_eq!(outcome.exit_code(), 3);
    assert!(!outcome.success());
    assert!(ws.output_log().ends_with("exit code: 3\n"));
}

#[tokio::test]
async fn test_stderr_goes_to_both_logs() {
    let ws = TestWorkspace::new();
    let ctx = context(
        script_config(&ws, "echo out; echo 'ERROR: disk full' >&2; echo more"),
        MockQueue::new(),
    );

    let outcome = run_task(&ctx).await.unwrap();

    let output = ws.output_log();
    assert!(output.contains("out\n"));
    assert!(output.contains("more\n"));
    assert!(output.contains("ERROR: disk full\n"));
    assert_eq!(ws.error_log(), "ERROR: disk full\n");
    assert!(outcome.error_markers.contains("ERROR"));
}

#[tokio::test]
async fn test_partial_final_line_is_kept() {
    let ws = TestWorkspace::new();
    let ctx = context(script_config(&ws, "printf 'no newline'"), MockQueue::new());

    run_task(&ctx).await.unwrap();

    assert!(ws.output_log().starts_with("no newline"));
}

#[tokio::test]
async fn test_large_output() {
    let ws = TestWorkspace::new();
    let ctx = context(
        script_config(&ws, "i=0; while [ $i -lt 2000 ]; do echo line $i; i=$((i+1)); done"),
        MockQueue::new(),
    );

    let outcome = run_task(&ctx).await.unwrap();

    assert!(outcome.success());
    let output = ws.output_log();
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines.len(), 2001);
    assert_eq!(lines[0], "line 0");
    assert_eq!(lines[1999], "line 1999");
    assert_eq!(lines[2000], "exit code: 0");
}

#[tokio::test]
async fn test_stdin_is_empty() {
    let ws = TestWorkspace::new();
    let ctx = context(script_config(&ws, "cat; echo done"), MockQueue::new());

    let outcome = run_task(&ctx).await.unwrap();

    assert!(outcome.success());
    assert_eq!(ws.output_log(), "done\nexit code: 0\n");
}

#[tokio::test]
async fn test_nonexistent_command() {
    let ws = TestWorkspace::new();
    let mut config = test_config(&ws, &["/nonexistent/command-that-does-not-exist"]);
    config.task_max_timeout_ms = 1_000;
    let ctx = context(config, MockQueue::new());

    let result = run_task(&ctx).await;

    assert!(matches!(result, Err(WorkerError::Spawn { .. })));
    assert!(ctx.current_process().is_none());
}

#[tokio::test]
async fn test_empty_script() {
    let ws = TestWorkspace::new();
    let ctx = context(test_config(&ws, &[]), MockQueue::new());

    let result = run_task(&ctx).await;

    assert!(matches!(result, Err(WorkerError::EmptyCommand)));
}

#[tokio::test]
async fn test_process_handle_cleared_after_exit() {
    let ws = TestWorkspace::new();
    let ctx = context(script_config(&ws, "true"), MockQueue::new());

    run_task(&ctx).await.unwrap();
    assert!(ctx.current_process().is_none());

    // A second run of the same context gets a fresh handle
    run_task(&ctx).await.unwrap();
    assert!(ctx.current_process().is_none());
}

#[tokio::test]
async fn test_timeout_interrupts_process() {
    let ws = TestWorkspace::new();
    let mut config = script_config(&ws, "sleep 30");
    config.task_max_timeout_ms = 200;
    let ctx = context(config, MockQueue::new());

    let start = Instant::now();
    let outcome = run_task(&ctx).await.unwrap();

    assert!(outcome.timed_out);
    assert!(!outcome.success());
    assert!(start.elapsed() < Duration::from_secs(10));
    let expected = format!("exit code: {}", outcome.exit_code());
    assert!(ws.output_log().ends_with(&format!("{}\n", expected)));
}

#[tokio::test]
async fn test_timeout_escalates_when_signals_are_trapped() {
    let ws = TestWorkspace::new();
    let trace = ws.path("signals.txt");
    let script = format!(
        "trap 'echo INT >> {0}' INT; trap 'echo TERM >> {0}' TERM; \
         echo ready; while true; do sleep 0.05; done",
        trace.display()
    );
    let mut config = script_config(&ws, &script);
    config.task_max_timeout_ms = 300;
    let ctx = context(config, MockQueue::new());

    let outcome = run_task(&ctx).await.unwrap();

    assert!(outcome.timed_out);
    assert_eq!(outcome.termination, Termination::Signaled(9));
    assert_eq!(outcome.exit_code(), -9);

    let recorded = std::fs::read_to_string(&trace).unwrap();
    let mut seen: Vec<&str> = recorded.lines().collect();
    // The leader may see the interrupt twice: once via the group, once directly
    seen.dedup();
    assert_eq!(seen, vec!["INT", "TERM"]);
    assert!(ws.output_log().ends_with("exit code: -9\n"));
}

#[tokio::test]
async fn test_timeout_waits_for_descendants_holding_output() {
    let ws = TestWorkspace::new();
    // Background jobs of a non-interactive shell ignore SIGINT, so the
    // grandchild keeps stdout open until it is terminated.
    let mut config = script_config(&ws, "sleep 30 & echo started; wait");
    config.task_max_timeout_ms = 200;
    let ctx = context(config, MockQueue::new());

    let start = Instant::now();
    let outcome = run_task(&ctx).await.unwrap();

    assert!(outcome.timed_out);
    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(ws.output_log().starts_with("started\n"));
}

#[tokio::test]
async fn test_process_exiting_early_is_not_signalled() {
    let ws = TestWorkspace::new();
    let trace = ws.path("signals.txt");
    let script = format!(
        "trap 'echo INT >> {0}' INT; trap 'echo TERM >> {0}' TERM; sleep 0.1",
        trace.display()
    );
    let mut config = script_config(&ws, &script);
    config.task_max_timeout_ms = 500;
    let ctx = context(config, MockQueue::new());

    let outcome = run_task(&ctx).await.unwrap();
    // Give a stale watchdog time to misfire
    tokio::time::sleep(Duration::from_millis(800)).await;

    assert!(!outcome.timed_out);
    assert!(outcome.success());
    assert!(!trace.exists());
}

#[tokio::test]
async fn test_abort_stops_process_early() {
    let ws = TestWorkspace::new();
    let ctx = context(script_config(&ws, "sleep 30"), MockQueue::new());

    let aborter = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            ctx.abort();
        })
    };

    let start = Instant::now();
    let outcome = run_task(&ctx).await.unwrap();
    aborter.await.unwrap();

    assert!(outcome.timed_out);
    assert!(!outcome.success());
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_logs_are_appended_across_runs() {
    let ws = TestWorkspace::new();
    let ctx = context(script_config(&ws, "echo run"), MockQueue::new());

    run_task(&ctx).await.unwrap();
    run_task(&ctx).await.unwrap();

    assert_eq!(
        ws.output_log(),
        "run\nexit code: 0\nrun\nexit code: 0\n"
    );
}
