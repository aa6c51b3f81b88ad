pub mod anthropic;
pub mod claude;

pub use anthropic::AnthropicClient;
pub use claude::ClaudeBackend;
