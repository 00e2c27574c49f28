//! # codeact-runtime
//!
//! Concrete backends for the codeact agent loop.
//!
//! ## Providers
//!
//! - **Ollama** (default): Local LLM inference via Ollama
//! - **OpenAI-compatible** (default): any `/chat/completions` endpoint
//!
//! ## Engines
//!
//! - **Python**: one `python3` subprocess per code snippet
//!
//! ## Usage
//!
//! ```rust,ignore
//! use codeact_runtime::{OllamaProvider, PythonEngine};
//!
//! let agent = AgentBuilder::new()
//!     .provider(Arc::new(OllamaProvider::from_env()))
//!     .engine(Arc::new(PythonEngine::from_env()))
//!     .build()?;
//! ```

use std::sync::Arc;

use codeact_core::LlmProvider;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

pub mod python;

#[cfg(feature = "ollama")]
pub use ollama::OllamaProvider;

#[cfg(feature = "openai")]
pub use openai::OpenAiProvider;

pub use python::{PythonConfig, PythonEngine};

// Re-export core types for convenience
pub use codeact_core::{Agent, AgentBuilder, AgentError, Message, Result, Role, Tool, ToolRegistry};

/// Model prefix that routes to the Ollama provider
pub const OLLAMA_PREFIX: &str = "ollama/";

/// Pick a provider from a model id and return it with the bare model name
///
/// `ollama/qwen2.5-coder` goes to Ollama as `qwen2.5-coder`; anything else
/// goes to the OpenAI-compatible endpoint unchanged.
pub fn provider_for_model(model: &str) -> Result<(Arc<dyn LlmProvider>, String)> {
    if let Some(name) = model.strip_prefix(OLLAMA_PREFIX) {
        #[cfg(feature = "ollama")]
        {
            tracing::info!(model = name, "Using Ollama provider");
            return Ok((Arc::new(OllamaProvider::from_env()), name.to_string()));
        }
        #[cfg(not(feature = "ollama"))]
        {
            return Err(AgentError::Config(format!(
                "model '{name}' needs the `ollama` feature"
            )));
        }
    }

    #[cfg(feature = "openai")]
    {
        tracing::info!(model, "Using OpenAI-compatible provider");
        Ok((Arc::new(OpenAiProvider::from_env()?), model.to_string()))
    }
    #[cfg(not(feature = "openai"))]
    {
        Err(AgentError::Config(format!(
            "model '{model}' needs the `openai` feature"
        )))
    }
}
