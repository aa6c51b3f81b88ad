use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use patchwright_core::{
    agent::{AgentEventStream, AgentRequest, AgentRunner},
    event::AgentEvent,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 64;

/// Runs Claude Code as a subprocess and streams its `stream-json` output.
pub struct ClaudeBackend {
    /// Path to the `claude` CLI binary.
    pub claude_bin: String,
    /// Passed as `--model` when set.
    pub model: Option<String>,
}

impl ClaudeBackend {
    pub fn new(claude_bin: impl Into<String>) -> Self {
        Self {
            claude_bin: claude_bin.into(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.model = if model.is_empty() { None } else { Some(model) };
        self
    }

    pub fn args(&self, request: &AgentRequest) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            request.prompt.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--permission-mode".to_string(),
            request.permission_mode.as_cli_arg().to_string(),
        ];
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args
    }
}

#[async_trait]
impl AgentRunner for ClaudeBackend {
    async fn run(&self, request: AgentRequest) -> Result<AgentEventStream> {
        let args = self.args(&request);

        info!(
            task_id = request.task_id,
            cwd = %request.cwd.display(),
            permission_mode = request.permission_mode.as_cli_arg(),
            prompt_len = request.prompt.len(),
            "spawning claude subprocess"
        );

        let path = std::env::var("PATH").unwrap_or_default();
        let augmented_path = match std::env::var("HOME") {
            Ok(home) => format!("{path}:{home}/.local/bin:/usr/local/bin"),
            Err(_) => format!("{path}:/usr/local/bin"),
        };

        let mut child = Command::new(&self.claude_bin)
            .args(&args)
            .kill_on_drop(true)
            .current_dir(&request.cwd)
            .env("PATH", &augmented_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn claude: {}", self.claude_bin))?;

        let stdout = child.stdout.take().context("failed to take stdout")?;
        let stderr = child.stderr.take().context("failed to take stderr")?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(pump_output(request.task_id, child, stdout, stderr, tx));

        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// Reads the subprocess until it exits, sending each parsed event. Dropping
/// the receiving stream stops the pump, which drops (and kills) the child.
async fn pump_output(
    task_id: i64,
    mut child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    tx: mpsc::Sender<Result<AgentEvent>>,
) {
    let mut stdout_reader = BufReader::new(stdout).lines();
    let mut stderr_reader = BufReader::new(stderr).lines();
    let mut stderr_open = true;
    let mut saw_result = false;

    loop {
        tokio::select! {
            line = stdout_reader.next_line() => {
                match line {
                    Ok(Some(l)) => match AgentEvent::parse_line(&l) {
                        None => {}
                        Some(Ok(event)) => {
                            saw_result |= matches!(event, AgentEvent::Result(_));
                            if tx.send(Ok(event)).await.is_err() {
                                debug!(task_id, "event stream dropped, stopping claude");
                                return;
                            }
                        }
                        Some(Err(e)) => debug!(task_id, "skipping unparseable claude output: {e}"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(anyhow!(e).context("error reading claude stdout"))).await;
                        return;
                    }
                }
            }
            line = stderr_reader.next_line(), if stderr_open => {
                match line {
                    Ok(Some(l)) => {
                        if !l.is_empty() {
                            warn!(task_id, "claude stderr: {}", l);
                        }
                    }
                    _ => stderr_open = false,
                }
            }
            _ = tx.closed() => {
                debug!(task_id, "event stream dropped, stopping claude");
                return;
            }
        }
    }

    while stderr_open {
        match stderr_reader.next_line().await {
            Ok(Some(l)) if !l.is_empty() => warn!(task_id, "claude stderr: {}", l),
            Ok(Some(_)) => {}
            _ => stderr_open = false,
        }
    }

    match child.wait().await {
        Ok(status) if status.success() => {
            info!(task_id, saw_result, "claude subprocess finished");
        }
        Ok(status) if saw_result => {
            warn!(task_id, %status, "claude exited unsuccessfully after reporting a result");
        }
        Ok(status) => {
            let _ = tx
                .send(Err(anyhow!("claude exited with {status} before reporting a result")))
                .await;
        }
        Err(e) => {
            let _ = tx.send(Err(anyhow!(e).context("failed to wait for claude"))).await;
        }
    }
}
