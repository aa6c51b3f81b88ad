pub mod agent;
pub mod code_host;
pub mod config;
pub mod error;
pub mod event;
pub mod git;
pub mod outcome;
pub mod pipeline;
pub mod prompt;
pub mod proposal;
pub mod stream;
pub mod types;

pub use error::PipelineError;
pub use types::*;
