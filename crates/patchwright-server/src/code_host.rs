use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use patchwright_core::{
    agent::{EventSink, RunRef},
    code_host::CodeHost,
    event::AgentEvent,
    git::Git,
    Destination, Proposal, Task, WorkingCopy,
};
use serde::Serialize;
use tracing::{debug, info, warn};

pub const PROPOSAL_TOKEN_HEADER: &str = "x-automa-proposal-token";
const BASELINE_AUTHOR: (&str, &str) = ("patchwright", "bot@patchwright.dev");
const TASK_LOG_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct TaskRef<'a> {
    id: i64,
    token: &'a str,
}

impl<'a> From<&'a Task> for TaskRef<'a> {
    fn from(task: &'a Task) -> Self {
        Self {
            id: task.id,
            token: &task.token,
        }
    }
}

#[derive(Serialize)]
struct DownloadRequest<'a> {
    task: TaskRef<'a>,
}

#[derive(Serialize)]
struct TaskLogRequest<'a> {
    task: TaskRef<'a>,
    event: &'a AgentEvent,
}

#[derive(Serialize)]
struct ProposeRequest<'a> {
    task: TaskRef<'a>,
    proposal: ProposalPayload<'a>,
}

#[derive(Serialize)]
struct ProposalPayload<'a> {
    token: &'a str,
    diff: String,
    title: &'a str,
    body: &'a str,
}

/// Automa code and task-log endpoints.
///
/// Each acquired working copy gets its own directory under `data_dir`, so
/// two runs of the same task never touch each other's files.
pub struct AutomaClient {
    http: reqwest::Client,
    data_dir: PathBuf,
    next_copy: AtomicU64,
}

impl AutomaClient {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            data_dir: data_dir.into(),
            next_copy: AtomicU64::new(0),
        })
    }

    /// A directory no other run of this process has used:
    /// `{data_dir}/{task_id}-{millis}-{seq}`.
    pub fn fresh_working_dir(&self, task_id: i64) -> PathBuf {
        let seq = self.next_copy.fetch_add(1, Ordering::Relaxed);
        let millis = chrono::Utc::now().timestamp_millis();
        self.data_dir.join(format!("{task_id}-{millis}-{seq}"))
    }

    async fn post_task_log(&self, run: RunRef<'_>, event: &AgentEvent) -> Result<()> {
        let url = run.destination.url("/task/log");
        let response = self
            .http
            .post(&url)
            .timeout(TASK_LOG_TIMEOUT)
            .json(&TaskLogRequest {
                task: run.task.into(),
                event,
            })
            .send()
            .await
            .with_context(|| format!("task log to {url} failed"))?;
        ensure_success(response, "task log").await?;
        Ok(())
    }
}

async fn ensure_success(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(status = %status, "automa {what} returned non-200: {}", body);
    bail!("Automa {what} failed with {status}: {body}")
}

fn git_for(path: &Path) -> Git {
    Git::new(path.to_string_lossy().into_owned())
}

/// Unpack a gzip'd tarball into `dest`.
pub fn unpack_archive(archive: &[u8], dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(GzDecoder::new(archive));
    archive
        .unpack(dest)
        .with_context(|| format!("failed to unpack code archive into {}", dest.display()))
}

/// Fresh directory holding the archive contents on top of a baseline commit.
pub fn prepare_working_copy(dir: &Path, archive: &[u8]) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => warn!(path = %dir.display(), "replaced stale working copy"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("failed to clear {}", dir.display())),
    }
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    unpack_archive(archive, dir)?;

    let git = git_for(dir);
    git.init()?;
    git.commit_all("baseline", BASELINE_AUTHOR)?;
    Ok(())
}

#[async_trait]
impl CodeHost for AutomaClient {
    async fn acquire(&self, task: &Task, destination: &Destination) -> Result<WorkingCopy> {
        let url = destination.url("/code/download");
        info!(task_id = task.id, url = %url, "downloading code");

        let response = self
            .http
            .post(&url)
            .json(&DownloadRequest { task: task.into() })
            .send()
            .await
            .with_context(|| format!("code download from {url} failed"))?;
        let response = ensure_success(response, "download").await?;

        let proposal_token = response
            .headers()
            .get(PROPOSAL_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .with_context(|| format!("code download response is missing {PROPOSAL_TOKEN_HEADER}"))?;
        let archive = response
            .bytes()
            .await
            .context("failed to read code archive")?;

        let path = self.fresh_working_dir(task.id);
        let dir = path.clone();
        tokio::task::spawn_blocking(move || prepare_working_copy(&dir, &archive))
            .await
            .context("working copy preparation panicked")??;

        info!(task_id = task.id, path = %path.display(), "working copy ready");
        Ok(WorkingCopy {
            task_id: task.id,
            path,
            proposal_token,
        })
    }

    async fn track_all_changes(&self, working_copy: &WorkingCopy) -> Result<()> {
        let git = git_for(&working_copy.path);
        tokio::task::spawn_blocking(move || git.add_all())
            .await
            .context("git add panicked")?
    }

    async fn propose(
        &self,
        task: &Task,
        destination: &Destination,
        working_copy: &WorkingCopy,
        proposal: &Proposal,
    ) -> Result<()> {
        let git = git_for(&working_copy.path);
        let (diff, changed) = tokio::task::spawn_blocking(move || -> Result<_> {
            Ok((git.diff_cached()?, git.diff_cached_names()?))
        })
        .await
        .context("git diff panicked")??;
        if changed.is_empty() {
            warn!(task_id = task.id, "proposing an empty diff");
        }

        let url = destination.url("/code/propose");
        info!(
            task_id = task.id,
            url = %url,
            files_changed = changed.len(),
            diff_len = diff.len(),
            title = %proposal.title,
            "proposing code"
        );

        let response = self
            .http
            .post(&url)
            .json(&ProposeRequest {
                task: task.into(),
                proposal: ProposalPayload {
                    token: &working_copy.proposal_token,
                    diff,
                    title: &proposal.title,
                    body: &proposal.body,
                },
            })
            .send()
            .await
            .with_context(|| format!("code proposal to {url} failed"))?;
        ensure_success(response, "propose").await?;
        Ok(())
    }

    async fn cleanup(&self, task: &Task, working_copy: &WorkingCopy) -> Result<()> {
        let path = &working_copy.path;
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => {
                debug!(task_id = task.id, path = %path.display(), "removed working copy");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
        }
    }
}

/// Mirrors every agent event to the platform's task log. Failures are
/// logged and otherwise ignored.
#[async_trait]
impl EventSink for AutomaClient {
    async fn forward(&self, run: RunRef<'_>, event: &AgentEvent) {
        if let Err(e) = self.post_task_log(run, event).await {
            warn!(task_id = run.task_id(), kind = event.kind(), "task log failed: {e:#}");
        }
    }
}
