use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};

use crate::{
    agent::{EventSink, RunRef},
    event::AgentEvent,
};

/// Sent as the last line of every finished run.
pub const STREAM_END_LINE: &str = r#"{"type":"stream_end"}"#;

const MAX_LINES_PER_RUN: usize = 10_000;
const LIVE_BUFFER: usize = 512;
const DEFAULT_FINISHED_RETAINED: usize = 64;

struct RunStream {
    live: broadcast::Sender<String>,
    lines: VecDeque<String>,
    finished: bool,
}

impl RunStream {
    fn new() -> Self {
        let (live, _) = broadcast::channel(LIVE_BUFFER);
        Self {
            live,
            lines: VecDeque::new(),
            finished: false,
        }
    }

    fn append(&mut self, line: String) {
        // No live subscribers is fine.
        let _ = self.live.send(line.clone());
        if self.lines.len() == MAX_LINES_PER_RUN {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }
}

#[derive(Default)]
struct Streams {
    runs: HashMap<i64, RunStream>,
    /// Finished task ids, oldest first.
    finished_order: VecDeque<i64>,
}

/// What a late joiner gets: everything recorded so far, and a live tail
/// while the run is still going.
#[derive(Debug)]
pub struct Subscription {
    pub history: Vec<String>,
    pub live: Option<broadcast::Receiver<String>>,
}

/// Agent events of each run as JSON lines, for replay and live tailing.
///
/// Streams of finished runs are kept until `finished_retained` newer runs
/// have finished.
pub struct TaskStreamManager {
    inner: Mutex<Streams>,
    finished_retained: usize,
}

impl TaskStreamManager {
    pub fn new() -> Arc<Self> {
        Self::with_retention(DEFAULT_FINISHED_RETAINED)
    }

    pub fn with_retention(finished_retained: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Streams::default()),
            finished_retained,
        })
    }

    /// Open a fresh stream for a run, discarding any earlier one for the task.
    pub async fn start_task(&self, task_id: i64) {
        let mut inner = self.inner.lock().await;
        inner.finished_order.retain(|id| *id != task_id);
        inner.runs.insert(task_id, RunStream::new());
    }

    /// Lines for tasks without an open stream are dropped.
    pub async fn push_line(&self, task_id: i64, line: String) {
        let mut inner = self.inner.lock().await;
        if let Some(run) = inner.runs.get_mut(&task_id) {
            if !run.finished {
                run.append(line);
            }
        }
    }

    /// Append the end marker and close the live tail. Idempotent.
    pub async fn end_task(&self, task_id: i64) {
        let mut inner = self.inner.lock().await;
        let Some(run) = inner.runs.get_mut(&task_id) else {
            return;
        };
        if run.finished {
            return;
        }
        run.append(STREAM_END_LINE.to_string());
        run.finished = true;

        inner.finished_order.push_back(task_id);
        while inner.finished_order.len() > self.finished_retained {
            if let Some(evicted) = inner.finished_order.pop_front() {
                inner.runs.remove(&evicted);
            }
        }
    }

    pub async fn subscribe(&self, task_id: i64) -> Subscription {
        let inner = self.inner.lock().await;
        match inner.runs.get(&task_id) {
            Some(run) => Subscription {
                history: run.lines.iter().cloned().collect(),
                live: (!run.finished).then(|| run.live.subscribe()),
            },
            None => Subscription {
                history: Vec::new(),
                live: None,
            },
        }
    }
}

#[async_trait]
impl EventSink for TaskStreamManager {
    async fn start(&self, run: RunRef<'_>) {
        self.start_task(run.task_id()).await;
    }

    async fn forward(&self, run: RunRef<'_>, event: &AgentEvent) {
        match serde_json::to_string(event) {
            Ok(line) => self.push_line(run.task_id(), line).await,
            Err(e) => tracing::debug!(task_id = run.task_id(), "event not serializable: {e}"),
        }
    }

    async fn finish(&self, run: RunRef<'_>) {
        self.end_task(run.task_id()).await;
    }
}
