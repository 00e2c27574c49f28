//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
///
/// Only errors the model cannot fix by reading them on the next turn live
/// here. Parse failures and code faults are recorded as step outcomes
/// instead (see [`crate::memory::ExecutionOutcome`]).
#[derive(Error, Debug)]
pub enum AgentError {
    /// LLM provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Rate limited
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Provider kept failing after all retries were spent
    #[error("Provider failed after {attempts} attempts: {last}")]
    ProviderExhausted {
        attempts: u32,
        #[source]
        last: Box<AgentError>,
    },

    /// Two tools registered under the same name
    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    /// Registry has no termination tool
    #[error("Tool registry has no '{0}' tool")]
    MissingFinalAnswerTool(String),

    /// Tool not found in registry
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool arguments did not match the declared parameters
    #[error("Tool validation error: {0}")]
    ToolValidation(String),

    /// Tool execution failed
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Execution engine itself broke (not a fault in the executed code)
    #[error("Execution engine error: {0}")]
    Engine(String),

    /// A step was recorded after the run had already finished
    #[error("Run already terminated after {0} steps")]
    RunTerminated(usize),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(_)
                | Self::ProviderUnavailable(_)
                | Self::RateLimited(_)
                | Self::Io(_)
        )
    }

    /// Check if error is a configuration problem detected before any step runs
    pub const fn is_config(&self) -> bool {
        matches!(
            self,
            Self::DuplicateTool(_) | Self::MissingFinalAnswerTool(_) | Self::Config(_)
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Provider(msg) => format!("The AI service encountered an error: {msg}"),
            Self::ProviderUnavailable(_) => "The AI service is currently unavailable. Please try again.".into(),
            Self::ProviderExhausted { attempts, .. } => {
                format!("The AI service failed {attempts} times in a row. Please try again later.")
            }
            Self::RateLimited(_) => "You've made too many requests. Please wait a moment.".into(),
            Self::Auth(_) => "Authentication failed. Please check your credentials.".into(),
            Self::ToolNotFound(name) => format!("The tool '{name}' is not available."),
            Self::Engine(_) => "The code execution environment is unavailable.".into(),
            Self::DuplicateTool(_) | Self::MissingFinalAnswerTool(_) | Self::Config(_) => {
                format!("The agent is misconfigured: {self}")
            }
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AgentError::RateLimited("slow down".into()).is_retryable());
        assert!(AgentError::ProviderUnavailable("503".into()).is_retryable());
        assert!(!AgentError::Auth("bad key".into()).is_retryable());
        assert!(!AgentError::DuplicateTool("web_search".into()).is_retryable());
    }

    #[test]
    fn test_exhausted_keeps_last_error() {
        let err = AgentError::ProviderExhausted {
            attempts: 4,
            last: Box::new(AgentError::ProviderUnavailable("connection refused".into())),
        };
        assert!(err.to_string().contains("4 attempts"));
        assert!(err.to_string().contains("connection refused"));
        assert!(!err.is_retryable());
    }
}
