use anyhow::Result;
use futures::{Stream, StreamExt};

use crate::{
    agent::{EventSink, RunRef},
    event::{AgentEvent, ResultEvent},
};

/// Verdict reduced from a full agent event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The most recent `result` event had subtype `success`.
    Completed { result: String, cost: f64 },
    /// No `result` event was seen, or the most recent one was not a success.
    Incomplete { last: Option<ResultEvent> },
}

impl Outcome {
    pub fn from_last_result(last: Option<ResultEvent>) -> Self {
        match last {
            Some(r) if r.is_success() => Outcome::Completed {
                result: r.result.unwrap_or_default(),
                cost: r.total_cost_usd.unwrap_or(0.0),
            },
            last => Outcome::Incomplete { last },
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }
}

/// Drain `events` to the end and reduce them to an [`Outcome`].
///
/// Every event is handed to `sink` before it is considered. A later
/// `result` event replaces an earlier one. An `Err` item aborts the
/// traversal and is returned as-is.
pub async fn interpret<S>(run: RunRef<'_>, events: S, sink: &dyn EventSink) -> Result<Outcome>
where
    S: Stream<Item = Result<AgentEvent>>,
{
    futures::pin_mut!(events);
    let mut last: Option<ResultEvent> = None;

    while let Some(event) = events.next().await {
        let event = event?;
        sink.forward(run, &event).await;
        if let AgentEvent::Result(r) = event {
            last = Some(r);
        }
    }

    Ok(Outcome::from_last_result(last))
}
