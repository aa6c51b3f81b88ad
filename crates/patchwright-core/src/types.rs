use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Task ─────────────────────────────────────────────────────────────────

/// A unit of requested work, as delivered by the `task.created` webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    /// Opaque token; only forwarded to code-host calls.
    pub token: String,
    pub title: String,
    #[serde(default)]
    pub items: Vec<TaskItem>,
}

/// One entry in a task's item list. The payload shape depends on `kind`,
/// so it is kept as raw JSON and read through the typed accessors below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskItem {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

/// A comment attached to the issue a task originated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueComment {
    #[serde(default)]
    pub body: String,
    #[serde(default, rename = "userName")]
    pub user_name: String,
}

impl TaskItem {
    pub const MESSAGE: &'static str = "message";
    pub const ORIGIN: &'static str = "origin";

    pub fn message(content: impl Into<String>) -> Self {
        Self {
            id: None,
            kind: Self::MESSAGE.into(),
            data: serde_json::json!({ "content": content.into() }),
        }
    }

    pub fn is_message(&self) -> bool {
        self.kind == Self::MESSAGE
    }

    pub fn is_origin(&self) -> bool {
        self.kind == Self::ORIGIN
    }

    /// Text of a `message` item. `None` for any other item type.
    pub fn message_content(&self) -> Option<&str> {
        if !self.is_message() {
            return None;
        }
        Some(self.data.get("content").and_then(Value::as_str).unwrap_or(""))
    }

    /// Issue comments carried by an `origin` item. Malformed entries are skipped.
    pub fn origin_comments(&self) -> Vec<IssueComment> {
        if !self.is_origin() {
            return Vec::new();
        }
        self.data
            .get("issueComments")
            .and_then(Value::as_array)
            .map(|comments| {
                comments
                    .iter()
                    .filter_map(|c| serde_json::from_value(c.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Task {
    /// The single `origin` item consulted for comments (first one wins).
    pub fn origin(&self) -> Option<&TaskItem> {
        self.items.iter().find(|i| i.is_origin())
    }
}

// ── Routing / Resources ──────────────────────────────────────────────────

/// Where acquisition and proposal calls for a task are routed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub base_url: String,
}

impl Destination {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

/// Filesystem checkout of the target repository, owned by exactly one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingCopy {
    pub task_id: i64,
    pub path: PathBuf,
    /// Handed out by the code host at download time; required when proposing.
    pub proposal_token: String,
}

// ── Results ──────────────────────────────────────────────────────────────

/// Pull request metadata synthesized from the agent's result text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub title: String,
    pub body: String,
}

/// Success value of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRun {
    pub message: String,
    pub cost: f64,
}

/// Lifecycle of a single run, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Acquiring,
    Running,
    Synthesizing,
    Proposing,
    Cleaned,
    /// Acquisition failed; nothing to clean up.
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Acquiring => "acquiring",
            Self::Running => "running",
            Self::Synthesizing => "synthesizing",
            Self::Proposing => "proposing",
            Self::Cleaned => "cleaned",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
