use std::time::Duration;

use serde_json::Value;

use crate::event::ResultEvent;

/// Failures raised by the pipeline itself. Errors from the code host,
/// the agent stream or the completion transport pass through untouched
/// as `anyhow::Error`; these variants can be recovered with `downcast_ref`.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The agent stream ended without a successful `result` event.
    #[error("Claude Code did not complete the task")]
    TaskNotCompleted { last: Option<ResultEvent> },

    /// The completion service answered without the forced tool invocation.
    #[error("Expected tool use response when generating PR fields, got: {content}")]
    UnexpectedCompletion { content: Value },

    #[error("agent did not finish within {after:?}")]
    AgentTimedOut { after: Duration },
}
