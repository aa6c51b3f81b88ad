use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use patchwright_core::proposal::{CompletionClient, MessageRequest, MessageResponse};
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Calls the Anthropic Messages API.
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into(),
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    async fn create_message(&self, request: &MessageRequest) -> Result<MessageResponse> {
        let url = self.messages_url();
        info!(
            model = %request.model,
            tools = request.tools.len(),
            "calling anthropic messages API"
        );

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .with_context(|| format!("anthropic request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "anthropic returned non-200: {}", body);
            bail!("Anthropic error {status}: {body}");
        }

        let parsed: MessageResponse = response
            .json()
            .await
            .context("failed to parse anthropic response")?;

        debug!(
            id = %parsed.id,
            stop_reason = ?parsed.stop_reason,
            blocks = parsed.content.len(),
            "anthropic response received"
        );
        Ok(parsed)
    }
}
