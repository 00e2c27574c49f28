//! Settings
//!
//! Everything the binaries read from the environment, gathered in one place.
//! Both binaries call `dotenvy::dotenv()` first, so a `.env` file works too.

use codeact_core::reasoning::DEFAULT_MAX_STEPS;
use codeact_core::{AgentError, DEFAULT_MAX_OUTPUT_CHARS, Result};

/// Page text cap for `visit_webpage` when nothing is configured
pub const DEFAULT_VISIT_MAX_OUTPUT_CHARS: usize = 1000;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// Binary settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Model id; `ollama/<name>` selects Ollama
    pub model: String,
    pub max_steps: usize,
    /// Switches web search from DuckDuckGo to Tavily when set
    pub tavily_api_key: Option<String>,
    pub visit_max_output_chars: usize,
    /// Cap on printed output and error text kept from each step
    pub max_output_chars: usize,
    /// Modules allowed on top of the base list
    pub extra_imports: Vec<String>,
    pub bind_addr: String,
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let model = var("MODEL").ok_or_else(|| {
            AgentError::Config("MODEL is not set (e.g. MODEL=ollama/qwen2.5-coder)".into())
        })?;

        Ok(Self {
            model,
            max_steps: parse_or(var("AGENT_MAX_STEPS"), "AGENT_MAX_STEPS", DEFAULT_MAX_STEPS)?,
            tavily_api_key: var("TAVILY_API_KEY"),
            visit_max_output_chars: parse_or(
                var("VISIT_MAX_OUTPUT_CHARS"),
                "VISIT_MAX_OUTPUT_CHARS",
                DEFAULT_VISIT_MAX_OUTPUT_CHARS,
            )?,
            max_output_chars: parse_or(
                var("AGENT_MAX_OUTPUT_CHARS"),
                "AGENT_MAX_OUTPUT_CHARS",
                DEFAULT_MAX_OUTPUT_CHARS,
            )?,
            extra_imports: var("AGENT_EXTRA_IMPORTS")
                .map(|list| split_list(&list))
                .unwrap_or_default(),
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
        })
    }
}

fn parse_or(value: Option<String>, key: &str, default: usize) -> Result<usize> {
    value.map_or(Ok(default), |v| {
        v.parse()
            .map_err(|_| AgentError::Config(format!("{key} must be a non-negative integer, got '{v}'")))
    })
}

/// Split a comma separated list, dropping blanks
pub fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(ToString::to_string)
        .collect()
}
