//! Error Types for Web Tools

use codeact_core::AgentError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WebToolError>;

#[derive(Error, Debug)]
pub enum WebToolError {
    /// Search ran but matched nothing
    #[error("No results found! Try a less restrictive/shorter query.")]
    NoResults,

    #[error("Search service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Could not parse search response: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<WebToolError> for AgentError {
    fn from(err: WebToolError) -> Self {
        match err {
            WebToolError::Config(msg) => Self::Config(msg),
            other => Self::ToolExecution(other.to_string()),
        }
    }
}
