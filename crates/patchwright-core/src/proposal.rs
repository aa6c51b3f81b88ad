use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::{error::PipelineError, types::Proposal};

pub const PROPOSAL_TOOL_NAME: &str = "create_pull_request";
pub const PROPOSAL_TITLE_MAX_CHARS: usize = 72;
const PROPOSAL_TOOL_DESCRIPTION: &str = "Create a pull request with a title and body";
const PROPOSAL_SYSTEM_PROMPT: &str = "Generate a github pull request title (should be short) and body (using markdown) based on the description given by the user. Make sure to not include any diffs in pull request body.";
const PROPOSAL_MAX_TOKENS: u32 = 2048;

// ── Messages API wire types ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRequest {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    Any,
    Tool { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub content: Vec<ResponseBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// A response content block. Anything that is not a tool invocation is
/// kept as raw JSON so it can be reported verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBlock {
    ToolUse(ToolUseBlock),
    Other(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseBlock {
    #[serde(rename = "type")]
    pub kind: ToolUseTag,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolUseTag {
    ToolUse,
}

/// Transport to a structured-completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn create_message(&self, request: &MessageRequest) -> Result<MessageResponse>;
}

// ── Synthesizer ──────────────────────────────────────────────────────────

/// JSON schema of the `create_pull_request` tool input.
pub fn proposal_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "properties": {
            "title": { "type": "string", "maxLength": PROPOSAL_TITLE_MAX_CHARS },
            "body": { "type": "string" },
        },
        "required": ["title", "body"],
        "additionalProperties": false,
    })
}

/// Turns the agent's free-text summary into pull request metadata with a
/// single forced tool call.
#[derive(Clone)]
pub struct ProposalSynthesizer {
    client: Arc<dyn CompletionClient>,
    model: String,
}

impl ProposalSynthesizer {
    pub fn new(client: Arc<dyn CompletionClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn build_request(&self, description: &str) -> MessageRequest {
        MessageRequest {
            model: self.model.clone(),
            max_tokens: PROPOSAL_MAX_TOKENS,
            system: Some(PROPOSAL_SYSTEM_PROMPT.to_string()),
            messages: vec![Message {
                role: "user".into(),
                content: description.to_string(),
            }],
            tools: vec![ToolDefinition {
                name: PROPOSAL_TOOL_NAME.into(),
                description: PROPOSAL_TOOL_DESCRIPTION.into(),
                input_schema: proposal_schema(),
            }],
            tool_choice: Some(ToolChoice::Tool {
                name: PROPOSAL_TOOL_NAME.into(),
            }),
        }
    }

    pub async fn synthesize(&self, description: &str) -> Result<Proposal> {
        let request = self.build_request(description);
        let response = self.client.create_message(&request).await?;

        let input = match response.content.into_iter().next() {
            Some(ResponseBlock::ToolUse(block)) => block.input,
            Some(ResponseBlock::Other(content)) => {
                return Err(PipelineError::UnexpectedCompletion { content }.into())
            }
            None => {
                return Err(PipelineError::UnexpectedCompletion {
                    content: Value::Null,
                }
                .into())
            }
        };

        let proposal: Proposal = serde_json::from_value(input)
            .context("create_pull_request input does not match the proposal schema")?;

        info!(
            title_len = proposal.title.chars().count(),
            body_len = proposal.body.len(),
            "synthesized proposal"
        );
        Ok(proposal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_use_block_is_recognised_by_its_tag() {
        let response: MessageResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "content": [
                { "type": "tool_use", "id": "toolu_1", "name": "create_pull_request",
                  "input": { "title": "t", "body": "b" } },
                { "type": "text", "text": "extra" }
            ]
        }))
        .unwrap();

        assert!(matches!(response.content[0], ResponseBlock::ToolUse(_)));
        assert!(matches!(response.content[1], ResponseBlock::Other(_)));
    }

    #[test]
    fn text_block_with_name_and_input_is_not_a_tool_use() {
        let block: ResponseBlock = serde_json::from_value(json!({
            "type": "text", "text": "no", "name": "create_pull_request", "input": {}
        }))
        .unwrap();
        assert!(matches!(block, ResponseBlock::Other(_)));
    }

    #[test]
    fn tool_choice_serializes_as_forced_tool() {
        assert_eq!(
            serde_json::to_value(ToolChoice::Tool { name: "x".into() }).unwrap(),
            json!({ "type": "tool", "name": "x" })
        );
    }
}
