use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use tracing::{debug, info};

use crate::{
    event::AgentEvent,
    types::{Destination, Task},
};

/// Lazily produced, non-restartable sequence of agent events. An `Err`
/// item means the agent itself failed and the run cannot continue.
pub type AgentEventStream = BoxStream<'static, Result<AgentEvent>>;

/// How the agent treats tool calls that would normally need confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionMode {
    /// Ask before editing files or running commands.
    #[default]
    Default,
    /// Never ask: the agent runs unattended and may modify anything in `cwd`.
    BypassPermissions,
}

impl PermissionMode {
    pub fn as_cli_arg(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

/// One invocation of the code-modification agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRequest {
    pub task_id: i64,
    pub prompt: String,
    pub cwd: PathBuf,
    pub permission_mode: PermissionMode,
}

#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Start the agent. Spawn failures are returned here; failures while
    /// the agent is running arrive as `Err` items on the stream.
    async fn run(&self, request: AgentRequest) -> Result<AgentEventStream>;
}

/// The run an agent event belongs to.
#[derive(Debug, Clone, Copy)]
pub struct RunRef<'a> {
    pub task: &'a Task,
    pub destination: &'a Destination,
}

impl<'a> RunRef<'a> {
    pub fn new(task: &'a Task, destination: &'a Destination) -> Self {
        Self { task, destination }
    }

    pub fn task_id(&self) -> i64 {
        self.task.id
    }
}

/// Observability hook fed every agent event as it is seen. Sinks swallow
/// their own failures; they never change the outcome of a run.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Called before the agent is started.
    async fn start(&self, _run: RunRef<'_>) {}

    async fn forward(&self, run: RunRef<'_>, event: &AgentEvent);

    /// Called once the run is over, whatever its outcome.
    async fn finish(&self, _run: RunRef<'_>) {}
}

/// Writes each event to the log.
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn forward(&self, run: RunRef<'_>, event: &AgentEvent) {
        let task_id = run.task_id();
        match event {
            AgentEvent::Result(r) => info!(
                task_id,
                subtype = r.subtype.as_deref().unwrap_or(""),
                cost_usd = r.total_cost_usd.unwrap_or(0.0),
                num_turns = r.num_turns.unwrap_or(0),
                "agent result"
            ),
            other => debug!(task_id, kind = other.kind(), "agent event"),
        }
    }
}

/// Fans each event out to several sinks in order.
pub struct FanoutSink(pub Vec<std::sync::Arc<dyn EventSink>>);

#[async_trait]
impl EventSink for FanoutSink {
    async fn start(&self, run: RunRef<'_>) {
        for sink in &self.0 {
            sink.start(run).await;
        }
    }

    async fn forward(&self, run: RunRef<'_>, event: &AgentEvent) {
        for sink in &self.0 {
            sink.forward(run, event).await;
        }
    }

    async fn finish(&self, run: RunRef<'_>) {
        for sink in &self.0 {
            sink.finish(run).await;
        }
    }
}
