// ClaudeBackend against a scripted stand-in for the `claude` CLI.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use tempfile::TempDir;
use tracing_test::traced_test;

use patchwright_agent::ClaudeBackend;
use patchwright_core::{
    agent::{AgentEventStream, AgentRequest, AgentRunner, LogSink, PermissionMode, RunRef},
    event::AgentEvent,
    outcome::{interpret, Outcome},
    Destination, Task,
};

fn fake_claude(dir: &Path, body: &str) -> String {
    let path = dir.join("claude");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

async fn reduce(stream: AgentEventStream) -> anyhow::Result<Outcome> {
    let task = Task {
        id: 7,
        token: "abcdef".into(),
        title: "Fix a minor bug".into(),
        items: vec![],
    };
    let destination = Destination::new("https://api.automa.app");
    interpret(RunRef::new(&task, &destination), stream, &LogSink).await
}

fn request(cwd: PathBuf) -> AgentRequest {
    AgentRequest {
        task_id: 7,
        prompt: "<title>Fix a minor bug</title>".into(),
        cwd,
        permission_mode: PermissionMode::BypassPermissions,
    }
}

#[tokio::test]
async fn streams_events_in_order_and_skips_noise() {
    let bin_dir = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let bin = fake_claude(
        bin_dir.path(),
        r#"cat <<'EOF'
{"type":"system","subtype":"init","session_id":"s1"}
not json at all

{"type":"assistant","message":{"content":[{"type":"text","text":"Working on it"}]}}
{"type":"rate_limit","retry_after":3}
{"type":"result","subtype":"success","result":"Task completed successfully","total_cost_usd":0.1}
EOF
echo "some diagnostics" >&2"#,
    );

    let stream = ClaudeBackend::new(bin)
        .run(request(work.path().to_path_buf()))
        .await
        .unwrap();
    let events: Vec<AgentEvent> = stream.map(|e| e.unwrap()).collect().await;

    let kinds: Vec<&str> = events.iter().map(AgentEvent::kind).collect();
    assert_eq!(kinds, vec!["system", "assistant", "unknown", "result"]);
}

#[tokio::test]
async fn runs_in_the_working_copy_with_prompt_and_permission_mode() {
    let bin_dir = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let bin = fake_claude(
        bin_dir.path(),
        r#"printf '%s\n' "$@" > args.txt
echo '{"type":"result","subtype":"success","result":"ok"}'"#,
    );

    let stream = ClaudeBackend::new(bin)
        .with_model("claude-sonnet-4-0")
        .run(request(work.path().to_path_buf()))
        .await
        .unwrap();
    let outcome = reduce(stream).await.unwrap();
    assert!(outcome.is_completed());

    let args = fs::read_to_string(work.path().join("args.txt")).unwrap();
    let args: Vec<&str> = args.lines().collect();
    assert_eq!(
        args,
        vec![
            "--print",
            "<title>Fix a minor bug</title>",
            "--output-format",
            "stream-json",
            "--verbose",
            "--permission-mode",
            "bypassPermissions",
            "--model",
            "claude-sonnet-4-0",
        ]
    );
}

#[tokio::test]
#[traced_test]
async fn failing_exit_without_result_ends_with_an_error() {
    let bin_dir = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let bin = fake_claude(bin_dir.path(), "echo 'auth failed' >&2\nexit 1");

    let stream = ClaudeBackend::new(bin)
        .run(request(work.path().to_path_buf()))
        .await
        .unwrap();
    let err = reduce(stream).await.unwrap_err();
    assert!(err.to_string().contains("before reporting a result"), "got: {err}");
    assert!(logs_contain("claude stderr: auth failed"));
}

#[tokio::test]
async fn failing_exit_after_a_result_keeps_the_result() {
    let bin_dir = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let bin = fake_claude(
        bin_dir.path(),
        r#"echo '{"type":"result","subtype":"error_max_turns","is_error":true}'
exit 1"#,
    );

    let stream = ClaudeBackend::new(bin)
        .run(request(work.path().to_path_buf()))
        .await
        .unwrap();
    let outcome = reduce(stream).await.unwrap();
    let Outcome::Incomplete { last: Some(last) } = outcome else {
        panic!("expected the failing result to be kept, got {outcome:?}");
    };
    assert_eq!(last.subtype.as_deref(), Some("error_max_turns"));
}

#[tokio::test]
async fn missing_binary_fails_to_start() {
    let work = TempDir::new().unwrap();
    let result = ClaudeBackend::new("/nonexistent/claude")
        .run(request(work.path().to_path_buf()))
        .await;
    let Err(err) = result else {
        panic!("spawning a missing binary must fail");
    };
    assert!(err.to_string().contains("failed to spawn claude"));
}

#[tokio::test]
async fn dropping_the_stream_stops_the_agent() {
    let bin_dir = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let bin = fake_claude(
        bin_dir.path(),
        r#"echo '{"type":"system","subtype":"init"}'
sleep 30
touch finished.txt"#,
    );

    let mut stream = ClaudeBackend::new(bin)
        .run(request(work.path().to_path_buf()))
        .await
        .unwrap();
    assert!(matches!(stream.next().await, Some(Ok(AgentEvent::System(_)))));
    drop(stream);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!work.path().join("finished.txt").exists());
}
