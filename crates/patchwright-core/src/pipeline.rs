use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::FutureExt;
use tracing::{error, info, warn};

use crate::{
    agent::{AgentRequest, AgentRunner, EventSink, LogSink, PermissionMode, RunRef},
    code_host::CodeHost,
    error::PipelineError,
    outcome::{interpret, Outcome},
    prompt::compose_prompt,
    proposal::ProposalSynthesizer,
    types::{Destination, RunState, Task, TaskRun, WorkingCopy},
};

/// Drives one task from download to proposal.
///
/// Once a working copy has been acquired, `cleanup` runs exactly once no
/// matter how the rest of the run ends: success, an error from any step,
/// the agent deadline, or a panic (re-raised after cleanup).
pub struct Pipeline {
    pub code_host: Arc<dyn CodeHost>,
    pub agent: Arc<dyn AgentRunner>,
    pub synthesizer: ProposalSynthesizer,
    pub sink: Arc<dyn EventSink>,
    /// Upper bound on consuming the agent's event stream (`None` = no limit).
    pub agent_timeout: Option<Duration>,
}

impl Pipeline {
    pub fn new(
        code_host: Arc<dyn CodeHost>,
        agent: Arc<dyn AgentRunner>,
        synthesizer: ProposalSynthesizer,
    ) -> Self {
        Self {
            code_host,
            agent,
            synthesizer,
            sink: Arc::new(LogSink),
            agent_timeout: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// A zero duration disables the deadline.
    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    fn transition(task: &Task, state: RunState) {
        info!(task_id = task.id, state = %state, "pipeline state");
    }

    pub async fn run(&self, destination: &Destination, task: &Task) -> Result<TaskRun> {
        Self::transition(task, RunState::Idle);
        Self::transition(task, RunState::Acquiring);

        let working_copy = match self.code_host.acquire(task, destination).await {
            Ok(wc) => wc,
            Err(e) => {
                error!(task_id = task.id, "download failed: {e:#}");
                Self::transition(task, RunState::Failed);
                return Err(e);
            }
        };
        info!(
            task_id = task.id,
            path = %working_copy.path.display(),
            "working copy ready"
        );

        let guarded = AssertUnwindSafe(self.process(task, destination, &working_copy))
            .catch_unwind()
            .await;
        if !matches!(guarded, Ok(Ok(_))) {
            Self::transition(task, RunState::Failed);
        }

        self.sink.finish(RunRef::new(task, destination)).await;
        if let Err(e) = self.code_host.cleanup(task, &working_copy).await {
            // Never masks the run's own result.
            warn!(task_id = task.id, "cleanup failed: {e:#}");
        }
        Self::transition(task, RunState::Cleaned);

        match guarded {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn process(
        &self,
        task: &Task,
        destination: &Destination,
        working_copy: &WorkingCopy,
    ) -> Result<TaskRun> {
        let prompt = compose_prompt(task);
        let run = RunRef::new(task, destination);

        Self::transition(task, RunState::Running);
        self.sink.start(run).await;
        let events = self
            .agent
            .run(AgentRequest {
                task_id: task.id,
                prompt,
                cwd: working_copy.path.clone(),
                permission_mode: PermissionMode::BypassPermissions,
            })
            .await?;

        let interpreting = interpret(run, events, self.sink.as_ref());
        let outcome = match self.agent_timeout {
            Some(after) => tokio::time::timeout(after, interpreting)
                .await
                .map_err(|_| PipelineError::AgentTimedOut { after })??,
            None => interpreting.await?,
        };

        let (message, cost) = match outcome {
            Outcome::Completed { result, cost } => (result, cost),
            Outcome::Incomplete { last } => {
                error!(task_id = task.id, result = ?last, "Claude Code did not complete the task");
                return Err(PipelineError::TaskNotCompleted { last }.into());
            }
        };
        info!(task_id = task.id, cost_usd = cost, "agent finished");

        self.code_host.track_all_changes(working_copy).await?;

        Self::transition(task, RunState::Synthesizing);
        let proposal = self.synthesizer.synthesize(&message).await?;

        Self::transition(task, RunState::Proposing);
        self.code_host
            .propose(task, destination, working_copy, &proposal)
            .await?;
        info!(task_id = task.id, title = %proposal.title, "change proposed");

        Ok(TaskRun { message, cost })
    }
}
