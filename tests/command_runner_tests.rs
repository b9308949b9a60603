//! Command runner integration tests
//!
//! These tests spawn real processes and verify that:
//! 1. Exit status and both output streams are reported exactly
//! 2. A command that outlives its timeout is killed and reaped
//! 3. Launch failures come back as the sentinel result, never a panic

use std::time::{Duration, Instant};
use tempfile::TempDir;

use gentootui::command_runner::{
    CommandRunner, CommandSpec, NON_UTF8_REASON, Runner, SENTINEL_STATUS, run_command,
};
use gentootui::process_guard::is_process_alive;

// =============================================================================
// Helpers
// =============================================================================

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new(["sh", "-c", script])
}

fn read_pid(path: &std::path::Path) -> u32 {
    std::fs::read_to_string(path)
        .expect("pid file written")
        .trim()
        .parse()
        .expect("pid is numeric")
}

// =============================================================================
// Exit status and output
// =============================================================================

#[tokio::test]
async fn test_exit_status_and_streams_reported() {
    let result = run_command(&sh("printf out; printf err >&2; exit 7")).await;

    assert_eq!(result.status, 7);
    assert_eq!(result.stdout, "out");
    assert_eq!(result.stderr, "err");
    assert!(!result.success());
    assert!(!result.is_sentinel());
}

#[tokio::test]
async fn test_successful_command() {
    let result = run_command(&CommandSpec::new(["echo", "hello"])).await;
    assert!(result.success());
    assert_eq!(result.stdout.trim(), "hello");
    assert!(result.stderr.is_empty());
}

#[tokio::test]
async fn test_working_dir_and_env_applied() {
    let dir = TempDir::new().unwrap();
    let spec = sh("pwd; printf '%s' \"$GENTOOTUI_TEST\"")
        .with_working_dir(dir.path())
        .with_env("GENTOOTUI_TEST", "portage");

    let result = run_command(&spec).await;

    assert!(result.success());
    let canonical = dir.path().canonicalize().unwrap();
    let mut lines = result.stdout.lines();
    assert_eq!(
        std::path::Path::new(lines.next().unwrap()).canonicalize().unwrap(),
        canonical
    );
    assert_eq!(lines.next(), Some("portage"));
}

#[tokio::test]
async fn test_env_merges_with_inherited_environment() {
    let spec = sh("test -n \"$PATH\" && printf '%s' \"$EXTRA\"").with_env("EXTRA", "1");
    let result = run_command(&spec).await;
    assert!(result.success());
    assert_eq!(result.stdout, "1");
}

#[tokio::test]
async fn test_signal_death_is_not_sentinel() {
    let result = run_command(&sh("printf real-output >&2; kill -HUP $$")).await;

    assert_eq!(result.status, 129);
    assert!(!result.is_sentinel());
    assert!(!result.success());
    assert_eq!(result.stderr, "real-output");
}

#[tokio::test]
async fn test_non_utf8_output_is_not_rewritten() {
    let result = run_command(&sh("printf '\\377\\376'")).await;

    assert!(result.is_sentinel());
    assert!(result.stdout.is_empty());
    assert!(result.stderr.starts_with(NON_UTF8_REASON));
    assert!(result.stderr.contains("exit status 0"));
    assert!(!result.stderr.contains('\u{FFFD}'));
}

#[tokio::test]
async fn test_non_utf8_stderr_is_not_rewritten() {
    let result = run_command(&sh("printf ok; printf '\\377' >&2; exit 3")).await;

    assert!(result.is_sentinel());
    assert!(result.stderr.contains("exit status 3"));
}

// =============================================================================
// Launch failures
// =============================================================================

#[tokio::test]
async fn test_missing_executable_returns_sentinel() {
    let result = run_command(&CommandSpec::new(["/nonexistent/gentootui-tool", "--help"])).await;

    assert_eq!(result.status, SENTINEL_STATUS);
    assert!(result.is_sentinel());
    assert!(result.stdout.is_empty());
    assert!(result.stderr.contains("Failed to launch"));
    assert!(!result.timed_out());
}

#[tokio::test]
async fn test_empty_command_returns_sentinel() {
    let result = run_command(&CommandSpec::new(Vec::<String>::new())).await;
    assert!(result.is_sentinel());
}

// =============================================================================
// Timeouts
// =============================================================================

#[tokio::test]
async fn test_timeout_kills_and_reaps_child() {
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("child.pid");
    let script = format!("echo $$ > '{}'; exec sleep 30", pid_file.display());

    let started = Instant::now();
    let result = run_command(&sh(&script).with_timeout(Duration::from_millis(300))).await;
    let elapsed = started.elapsed();

    assert!(result.timed_out(), "expected timeout, got {:?}", result);
    assert_eq!(result.status, SENTINEL_STATUS);
    assert!(
        elapsed < Duration::from_secs(5),
        "timeout took too long: {:?}",
        elapsed
    );

    let pid = read_pid(&pid_file);
    assert!(!is_process_alive(pid), "child {} survived its timeout", pid);
}

#[tokio::test]
async fn test_timeout_kills_grandchildren() {
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("grandchild.pid");
    let script = format!(
        "sleep 30 & echo $! > '{}'; wait",
        pid_file.display()
    );

    let result = run_command(&sh(&script).with_timeout(Duration::from_millis(300))).await;
    assert!(result.timed_out());

    // The grandchild is reparented to init once killed; give it a moment
    let pid = read_pid(&pid_file);
    let deadline = Instant::now() + Duration::from_secs(2);
    while is_process_alive(pid) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!is_process_alive(pid), "grandchild {} survived", pid);
}

#[tokio::test]
async fn test_fast_command_within_timeout() {
    let result = run_command(&sh("exit 0").with_timeout(Duration::from_secs(10))).await;
    assert!(result.success());
    assert!(!result.timed_out());
}

// =============================================================================
// Dry run
// =============================================================================

#[tokio::test]
async fn test_dry_run_runner_spawns_nothing() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("touched");
    let runner = CommandRunner::dry_run();
    assert!(runner.is_dry_run());

    let result = runner
        .run(&CommandSpec::new(["touch", marker.to_str().unwrap()]))
        .await;

    assert!(result.success());
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_real_runner_spawns() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("touched");

    let result = CommandRunner::new()
        .run(&CommandSpec::new(["touch", marker.to_str().unwrap()]))
        .await;

    assert!(result.success());
    assert!(marker.exists());
}
