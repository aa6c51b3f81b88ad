use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};

/// Full application configuration, read from the process environment with
/// a `.env` file in the working directory as fallback.
#[derive(Debug, Clone)]
pub struct Config {
    // Anthropic (proposal synthesis)
    pub anthropic_api_key: String,
    pub anthropic_model: String,
    pub anthropic_base_url: String,
    pub completion_timeout_s: u64,

    // Webhook ingestion
    pub webhook_secret: String,
    pub bind: String,
    pub port: u16,
    pub max_concurrent_tasks: usize,

    // Agent
    pub claude_bin: String,
    /// Passed as `--model` when non-empty; otherwise the CLI default is used.
    pub agent_model: String,
    /// 0 = no deadline.
    pub agent_timeout_s: u64,

    /// Parent directory for downloaded working copies.
    pub data_dir: String,
}

fn parse_dotenv(path: &Path) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(path) else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            let v = v.trim().trim_matches('"');
            map.insert(k.trim().to_string(), v.to_string());
        }
    }
    map
}

fn get(key: &str, dotenv: &HashMap<String, String>) -> Option<String> {
    std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
}

fn get_str(key: &str, dotenv: &HashMap<String, String>, default: &str) -> String {
    get(key, dotenv).unwrap_or_else(|| default.to_string())
}

fn get_parsed<T: std::str::FromStr>(key: &str, dotenv: &HashMap<String, String>, default: T) -> T {
    get(key, dotenv)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(Path::new(".env"))
    }

    pub fn from_env_with(dotenv_path: &Path) -> Result<Self> {
        let dotenv = parse_dotenv(dotenv_path);

        let config = Config {
            anthropic_api_key: get_str("ANTHROPIC_API_KEY", &dotenv, ""),
            anthropic_model: get_str("ANTHROPIC_MODEL", &dotenv, "claude-sonnet-4-0"),
            anthropic_base_url: get_str("ANTHROPIC_BASE_URL", &dotenv, "https://api.anthropic.com"),
            completion_timeout_s: get_parsed("COMPLETION_TIMEOUT_S", &dotenv, 120),
            webhook_secret: get_str("AUTOMA_WEBHOOK_SECRET", &dotenv, "atma_whsec_claude-code"),
            bind: get_str("BIND", &dotenv, "0.0.0.0"),
            port: get_parsed("PORT", &dotenv, 5008),
            max_concurrent_tasks: get_parsed("MAX_CONCURRENT_TASKS", &dotenv, 4),
            claude_bin: get_str("CLAUDE_BIN", &dotenv, "claude"),
            agent_model: get_str("AGENT_MODEL", &dotenv, ""),
            agent_timeout_s: get_parsed("AGENT_TIMEOUT_S", &dotenv, 0),
            data_dir: get_str("DATA_DIR", &dotenv, "/tmp/patchwright"),
        };

        if config.max_concurrent_tasks == 0 {
            bail!("MAX_CONCURRENT_TASKS must be at least 1");
        }
        if config.webhook_secret.is_empty() {
            bail!("AUTOMA_WEBHOOK_SECRET must not be empty");
        }
        Ok(config)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_s)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_s)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
