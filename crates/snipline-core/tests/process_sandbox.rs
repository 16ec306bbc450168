//! Process sandbox behavior, exercised with bash only.

use std::time::Duration;

use snipline_core::sandbox::{
    ExecutionLimits, ProcessSandbox, SandboxBackend, SandboxError, Toolchain,
};
use snipline_core::{verify, Engine, SnippetSpec, SpecResult};
use snipline_state::{Language, Snippet};

fn bash(source: &str) -> Snippet {
    Snippet {
        language: Language::Bash,
        source: source.into(),
        label: "test".into(),
    }
}

fn engine() -> Engine {
    Engine::for_language("n", Language::Bash, 16)
}

fn limits(wall_time_ms: u64) -> ExecutionLimits {
    ExecutionLimits {
        wall_time_ms,
        ..ExecutionLimits::default()
    }
}

#[tokio::test]
async fn echo_is_captured() {
    let outcome = ProcessSandbox::new()
        .execute(&bash("echo hello\necho oops >&2\n"), &engine(), &limits(5_000))
        .await
        .unwrap();
    assert_eq!(outcome.stdout, "hello\n");
    assert_eq!(outcome.stderr, "oops\n");
    assert_eq!(outcome.exit_status, Some(0));
    assert!(!outcome.timed_out);
    assert!(!outcome.output_truncated);
}

#[tokio::test]
async fn exit_code_is_reported() {
    let outcome = ProcessSandbox::new()
        .execute(&bash("exit 7"), &engine(), &limits(5_000))
        .await
        .unwrap();
    assert_eq!(outcome.exit_status, Some(7));
    let v = verify(&outcome, &SnippetSpec::default().expect_exit_code(7));
    assert_eq!(v.result, SpecResult::Pass);
}

#[tokio::test]
async fn wall_clock_ceiling_kills_the_child() {
    let outcome = ProcessSandbox::new()
        .execute(&bash("echo done\nsleep 30\n"), &engine(), &limits(300))
        .await
        .unwrap();
    assert!(outcome.timed_out);
    assert_eq!(outcome.exit_status, None);
    assert!(outcome.wall_time < Duration::from_secs(10));

    let v = verify(&outcome, &SnippetSpec::default().expect_stdout("done"));
    assert_eq!(v.result, SpecResult::Fail);
}

#[tokio::test]
async fn output_is_capped() {
    let outcome = ProcessSandbox::new()
        .execute(
            &bash("for i in $(seq 1 5000); do echo 0123456789; done"),
            &engine(),
            &ExecutionLimits {
                max_output_bytes: 100,
                ..limits(10_000)
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.stdout.len(), 100);
    assert!(outcome.output_truncated);
    assert_eq!(outcome.exit_status, Some(0));
}

#[tokio::test]
async fn environment_is_cleared_and_home_is_scratch() {
    std::env::set_var("SNIPLINE_TEST_SECRET", "leak");
    let outcome = ProcessSandbox::new()
        .execute(
            &bash("echo \"[$SNIPLINE_TEST_SECRET]\"\n[ \"$HOME\" = \"$PWD\" ] && echo home-ok\n[ \"$TMPDIR\" = \"$PWD\" ] && echo tmp-ok\n"),
            &engine(),
            &limits(5_000),
        )
        .await
        .unwrap();
    assert_eq!(outcome.stdout, "[]\nhome-ok\ntmp-ok\n");
}

#[tokio::test]
async fn stdin_is_closed() {
    let outcome = ProcessSandbox::new()
        .execute(&bash("read line || echo eof"), &engine(), &limits(5_000))
        .await
        .unwrap();
    assert_eq!(outcome.stdout, "eof\n");
}

#[tokio::test]
async fn scratch_directory_is_removed_afterwards() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = ProcessSandbox::new().with_scratch_root(root.path());
    let outcome = sandbox
        .execute(&bash("touch artifact; ls"), &engine(), &limits(5_000))
        .await
        .unwrap();
    assert!(outcome.stdout.contains("main.sh"));
    assert!(outcome.stdout.contains("artifact"));
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn compile_failure_is_an_outcome() {
    let sandbox = ProcessSandbox::new().with_toolchain(
        Language::Bash,
        Toolchain::compiled(
            "main.sh",
            &["bash", "-c", "echo 'main.sh:1: syntax error' >&2; exit 3"],
            &["bash", "main.sh"],
        ),
    );
    let outcome = sandbox
        .execute(&bash("echo never"), &engine(), &limits(5_000))
        .await
        .unwrap();
    assert_eq!(outcome.exit_status, Some(3));
    assert!(outcome.stderr.contains("syntax error"));
    assert!(outcome.stdout.is_empty());
}

#[tokio::test]
async fn compile_then_run() {
    let sandbox = ProcessSandbox::new().with_toolchain(
        Language::Bash,
        Toolchain::compiled(
            "main.sh",
            &["bash", "-c", "cp main.sh built.sh"],
            &["bash", "built.sh"],
        ),
    );
    let outcome = sandbox
        .execute(&bash("echo built"), &engine(), &limits(5_000))
        .await
        .unwrap();
    assert_eq!(outcome.stdout, "built\n");
}

#[tokio::test]
async fn missing_toolchain_is_infrastructure() {
    let sandbox = ProcessSandbox::new().with_path_env("/snipline/does/not/exist");
    let err = sandbox
        .execute(&bash("echo hi"), &engine(), &limits(5_000))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::ToolchainMissing { ref program } if program == "bash"));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn background_job_does_not_hold_the_step_open() {
    let outside = tempfile::tempdir().unwrap();
    let marker = outside.path().join("marker");
    let source = format!(
        "(sleep 1; echo alive > '{}') &\necho done\n",
        marker.display()
    );

    let outcome = ProcessSandbox::new()
        .execute(&bash(&source), &engine(), &limits(3_000))
        .await
        .unwrap();
    assert!(!outcome.timed_out);
    assert_eq!(outcome.exit_status, Some(0));
    assert_eq!(outcome.stdout, "done\n");
    assert!(outcome.wall_time < Duration::from_secs(1));

    let v = verify(&outcome, &SnippetSpec::default().expect_stdout("done"));
    assert_eq!(v.result, SpecResult::Pass);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(!marker.exists(), "background job outlived its step");
}

#[tokio::test]
async fn timeout_kills_the_whole_process_group() {
    let outside = tempfile::tempdir().unwrap();
    let marker = outside.path().join("marker");
    let source = format!(
        "(sleep 1; echo alive > '{}') &\nsleep 30\n",
        marker.display()
    );

    let outcome = ProcessSandbox::new()
        .execute(&bash(&source), &engine(), &limits(300))
        .await
        .unwrap();
    assert!(outcome.timed_out);
    assert_eq!(outcome.exit_status, None);
    assert!(outcome.wall_time < Duration::from_secs(1));

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(!marker.exists(), "background job survived the timeout");
}
