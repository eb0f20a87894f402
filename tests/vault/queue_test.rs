//! Tests for FIFO serialization, failure isolation and timeouts.

use std::sync::Arc;
use std::time::Duration;

use switchboard::vault::queue::interpret;
use switchboard::vault::{CommandQueue, ExecResult, VaultCommand, VaultError};

use crate::support::{fail, ok, FakeRunner};

fn queue_over(runner: &Arc<FakeRunner>, timeout: Duration) -> CommandQueue {
    let runner: Arc<FakeRunner> = Arc::clone(runner);
    CommandQueue::new(runner, timeout)
}

#[tokio::test(start_paused = true)]
async fn calls_run_in_submission_order_one_at_a_time() {
    let runner = Arc::new(
        FakeRunner::new(|cmd| ok(cmd.subcommand())).with_delay(|_| Duration::from_millis(20)),
    );
    let queue = queue_over(&runner, Duration::from_secs(5));

    let pending: Vec<_> = (0..5)
        .map(|i| queue.submit(VaultCommand::new([format!("c{i}")])))
        .collect();
    let mut outputs = Vec::new();
    for call in pending.into_iter().rev() {
        outputs.push(call.await.expect("call succeeds"));
    }
    outputs.reverse();

    assert_eq!(outputs, vec!["c0", "c1", "c2", "c3", "c4"]);
    assert_eq!(runner.subcommands(), vec!["c0", "c1", "c2", "c3", "c4"]);
    assert_eq!(runner.max_active(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_never_overlap() {
    let runner =
        Arc::new(FakeRunner::new(|_| ok("done")).with_delay(|_| Duration::from_millis(5)));
    let queue = Arc::new(queue_over(&runner, Duration::from_secs(5)));

    let mut tasks = Vec::new();
    for i in 0..10 {
        let queue = Arc::clone(&queue);
        tasks.push(tokio::spawn(async move {
            queue.exec(VaultCommand::new([format!("task{i}")])).await
        }));
    }
    for task in tasks {
        task.await.expect("join").expect("call succeeds");
    }

    assert_eq!(runner.calls().len(), 10);
    assert_eq!(runner.max_active(), 1);
}

#[tokio::test(start_paused = true)]
async fn failing_call_does_not_block_the_next() {
    let runner = Arc::new(FakeRunner::new(|cmd| match cmd.subcommand() {
        "bad" => fail("boom"),
        _ => ok("fine"),
    }));
    let queue = queue_over(&runner, Duration::from_secs(5));

    let first = queue.submit(VaultCommand::new(["bad"]));
    let second = queue.submit(VaultCommand::new(["good"]));

    match first.await {
        Err(VaultError::CommandFailed { subcommand, detail }) => {
            assert_eq!(subcommand, "bad");
            assert_eq!(detail, "boom");
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }
    assert_eq!(second.await.expect("second succeeds"), "fine");
}

#[tokio::test(start_paused = true)]
async fn timed_out_call_fails_alone() {
    let runner = Arc::new(
        FakeRunner::new(|_| ok("late or not")).with_delay(|cmd| match cmd.subcommand() {
            "hang" => Duration::from_secs(600),
            _ => Duration::ZERO,
        }),
    );
    let queue = queue_over(&runner, Duration::from_secs(1));

    let hung = queue.submit(VaultCommand::new(["hang"]));
    let next = queue.submit(VaultCommand::new(["after"]));

    match hung.await {
        Err(VaultError::Timeout { subcommand, seconds }) => {
            assert_eq!(subcommand, "hang");
            assert_eq!(seconds, 1);
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
    assert_eq!(next.await.expect("next succeeds"), "late or not");
    assert_eq!(runner.max_active(), 1);
}

#[tokio::test(start_paused = true)]
async fn runner_errors_are_returned_to_the_caller() {
    let runner = Arc::new(FakeRunner::new(|cmd| {
        Err(VaultError::Spawn {
            subcommand: cmd.subcommand().to_owned(),
            detail: "no such file".to_owned(),
        })
    }));
    let queue = queue_over(&runner, Duration::from_secs(5));

    let err = queue
        .exec(VaultCommand::new(["status"]))
        .await
        .expect_err("spawn failure");
    assert!(matches!(err, VaultError::Spawn { .. }));
}

#[tokio::test]
async fn dropped_caller_does_not_stall_the_queue() {
    let runner = Arc::new(FakeRunner::new(|cmd| ok(cmd.subcommand())));
    let queue = queue_over(&runner, Duration::from_secs(5));

    drop(queue.submit(VaultCommand::new(["abandoned"])));
    let out = queue.exec(VaultCommand::new(["kept"])).await.expect("runs");

    assert_eq!(out, "kept");
    assert_eq!(runner.subcommands(), vec!["abandoned", "kept"]);
}

fn result(code: i32, stdout: &str, stderr: &str) -> ExecResult {
    ExecResult {
        exit_code: Some(code),
        stdout: stdout.to_owned(),
        stderr: stderr.to_owned(),
        duration: Duration::ZERO,
    }
}

#[test]
fn interpret_returns_stdout_on_success() {
    let out = interpret("list", result(0, "[]\n", "")).expect("success");
    assert_eq!(out, "[]\n");
}

#[test]
fn interpret_keeps_stdout_when_stderr_has_warnings() {
    let out = interpret("list", result(0, "[]", "deprecation warning")).expect("success");
    assert_eq!(out, "[]");
}

#[test]
fn interpret_treats_stderr_only_output_as_failure() {
    let err = interpret("get", result(0, "  ", "Not found.")).expect_err("failure");
    match err {
        VaultError::CommandFailed { subcommand, detail } => {
            assert_eq!(subcommand, "get");
            assert_eq!(detail, "Not found.");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn interpret_reports_stdout_when_failing_silently_on_stderr() {
    let err = interpret("unlock", result(2, "Invalid master password.", "")).expect_err("failure");
    assert!(err.to_string().contains("Invalid master password."));
}

#[test]
fn interpret_reports_exit_code_without_output() {
    let err = interpret("sync", result(3, "", "")).expect_err("failure");
    assert!(err.to_string().contains("exit code"));
}
