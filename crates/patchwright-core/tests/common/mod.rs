// Test doubles for the pipeline's capability traits. Every double records
// how often (and with what) it was called so tests can assert on it.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

use patchwright_core::{
    agent::{AgentEventStream, AgentRequest, AgentRunner},
    code_host::CodeHost,
    event::{AgentEvent, ResultEvent},
    proposal::{CompletionClient, MessageRequest, MessageResponse, ResponseBlock},
    Destination, Proposal, Task, WorkingCopy,
};

pub fn task() -> Task {
    Task {
        id: 1,
        token: "abcdef".into(),
        title: "Fix a minor bug".into(),
        items: vec![],
    }
}

pub fn destination() -> Destination {
    Destination::new("https://api.automa.app")
}

pub fn result_event(subtype: &str, result: &str, cost: f64) -> AgentEvent {
    AgentEvent::Result(ResultEvent {
        subtype: Some(subtype.into()),
        result: Some(result.into()),
        total_cost_usd: Some(cost),
        ..ResultEvent::default()
    })
}

pub fn success_event() -> AgentEvent {
    result_event("success", "Task completed successfully", 0.1)
}

// ── Code host ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeCodeHost {
    pub fail_acquire: Option<&'static str>,
    pub fail_propose: Option<&'static str>,
    pub fail_cleanup: Option<&'static str>,
    pub panic_on_track: bool,
    pub acquires: AtomicUsize,
    pub tracks: AtomicUsize,
    pub proposes: AtomicUsize,
    pub cleanups: AtomicUsize,
    pub cleaned_tasks: Mutex<Vec<Task>>,
    pub cleaned_paths: Mutex<Vec<PathBuf>>,
    pub proposals: Mutex<Vec<Proposal>>,
}

impl FakeCodeHost {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodeHost for FakeCodeHost {
    async fn acquire(&self, task: &Task, _destination: &Destination) -> Result<WorkingCopy> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = self.fail_acquire {
            return Err(anyhow!(msg));
        }
        Ok(WorkingCopy {
            task_id: task.id,
            path: PathBuf::from(format!("/tmp/patchwright-test/{}", task.id)),
            proposal_token: "ghijkl".into(),
        })
    }

    async fn track_all_changes(&self, _working_copy: &WorkingCopy) -> Result<()> {
        self.tracks.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_track {
            panic!("tracking blew up");
        }
        Ok(())
    }

    async fn propose(
        &self,
        _task: &Task,
        _destination: &Destination,
        _working_copy: &WorkingCopy,
        proposal: &Proposal,
    ) -> Result<()> {
        self.proposes.fetch_add(1, Ordering::SeqCst);
        self.proposals.lock().unwrap().push(proposal.clone());
        if let Some(msg) = self.fail_propose {
            return Err(anyhow!(msg));
        }
        Ok(())
    }

    async fn cleanup(&self, task: &Task, working_copy: &WorkingCopy) -> Result<()> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        self.cleaned_tasks.lock().unwrap().push(task.clone());
        self.cleaned_paths.lock().unwrap().push(working_copy.path.clone());
        if let Some(msg) = self.fail_cleanup {
            return Err(anyhow!(msg));
        }
        Ok(())
    }
}

// ── Agent ────────────────────────────────────────────────────────────────

pub enum Script {
    Events(Vec<Result<AgentEvent, &'static str>>),
    /// Never yields and never ends.
    Hang,
}

pub struct FakeAgent {
    script: Mutex<Option<Script>>,
    pub requests: Mutex<Vec<AgentRequest>>,
}

impl FakeAgent {
    pub fn new(script: Script) -> Self {
        Self {
            script: Mutex::new(Some(script)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn yielding(events: Vec<AgentEvent>) -> Self {
        Self::new(Script::Events(events.into_iter().map(Ok).collect()))
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentRunner for FakeAgent {
    async fn run(&self, request: AgentRequest) -> Result<AgentEventStream> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .script
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow!("agent stream already consumed"))?;
        Ok(match script {
            Script::Events(items) => {
                futures::stream::iter(items.into_iter().map(|r| r.map_err(|m| anyhow!(m)))).boxed()
            }
            Script::Hang => futures::stream::pending().boxed(),
        })
    }
}

// ── Completion service ───────────────────────────────────────────────────

pub struct FakeCompletion {
    pub response: MessageResponse,
    pub requests: Mutex<Vec<MessageRequest>>,
}

impl FakeCompletion {
    pub fn with_blocks(blocks: Vec<serde_json::Value>) -> Self {
        Self {
            response: MessageResponse {
                id: "msg_1".into(),
                content: blocks
                    .into_iter()
                    .map(|b| serde_json::from_value::<ResponseBlock>(b).unwrap())
                    .collect(),
                stop_reason: Some("tool_use".into()),
            },
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn tool_use(title: &str, body: &str) -> Self {
        Self::with_blocks(vec![json!({
            "type": "tool_use",
            "id": "toolu_1",
            "name": "create_pull_request",
            "input": { "title": title, "body": body },
        })])
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionClient for FakeCompletion {
    async fn create_message(&self, request: &MessageRequest) -> Result<MessageResponse> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.response.clone())
    }
}
