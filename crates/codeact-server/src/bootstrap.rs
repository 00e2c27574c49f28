//! Agent Bootstrap
//!
//! Turns [`Settings`] into a ready [`Agent`]: provider picked from the model
//! id, a Python engine, and the web tools.

use std::sync::Arc;

use codeact_core::{Agent, AgentBuilder, BASE_BUILTIN_MODULES, Result, ToolRegistry};
use codeact_runtime::{PythonConfig, PythonEngine, provider_for_model};
use web_tools::tools::{DuckDuckGoSearchTool, TavilySearchTool, VisitWebpageTool};

use crate::config::Settings;

/// Build the tool registry
///
/// Tavily replaces DuckDuckGo when a key is configured; `visit_webpage` is
/// always present.
pub fn build_tools(settings: &Settings) -> Result<ToolRegistry> {
    let mut tools = ToolRegistry::new();

    match &settings.tavily_api_key {
        Some(key) => tools.register(TavilySearchTool::new(key.clone(), web_tools::DEFAULT_MAX_RESULTS)?)?,
        None => tools.register(DuckDuckGoSearchTool::with_defaults()?)?,
    }
    tools.register(VisitWebpageTool::new(settings.visit_max_output_chars)?)?;

    Ok(tools)
}

/// Build an agent, optionally for a different model than configured
pub fn build_agent(settings: &Settings, model: Option<&str>) -> Result<Agent> {
    let model_id = model.unwrap_or(settings.model.as_str());
    let (provider, model_name) = provider_for_model(model_id)?;

    let mut python = PythonConfig::from_env();
    python.authorized_imports = BASE_BUILTIN_MODULES
        .iter()
        .map(ToString::to_string)
        .chain(settings.extra_imports.iter().cloned())
        .collect();

    let tools = build_tools(settings)?;
    tracing::info!("Registered {} tools:", tools.len());
    for name in tools.names() {
        tracing::info!("  • {}", name);
    }

    AgentBuilder::new()
        .provider(provider)
        .engine(Arc::new(PythonEngine::new(python)))
        .tools(tools)
        .model(model_name)
        .max_steps(settings.max_steps)
        .max_output_chars(settings.max_output_chars)
        .additional_imports(settings.extra_imports.iter().cloned())
        .build()
}

/// Log whether the provider answers, the way an operator wants to see it at startup
pub async fn report_provider(agent: &Agent) {
    match agent.provider().health_check().await {
        Ok(true) => {
            tracing::info!("✓ LLM provider reachable");
            if let Ok(models) = agent.provider().list_models().await {
                for model in models {
                    tracing::info!("  Model: {}", model.id);
                }
            }
        }
        Ok(false) | Err(_) => {
            tracing::warn!("⚠ LLM provider not reachable - runs will fail");
            tracing::warn!("  Check MODEL, OPENAI_BASE_URL or that `ollama serve` is running");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeact_core::FINAL_ANSWER_TOOL;

    fn settings(tavily: Option<&str>) -> Settings {
        Settings {
            model: "ollama/qwen2.5-coder".into(),
            max_steps: 3,
            tavily_api_key: tavily.map(Into::into),
            visit_max_output_chars: 1000,
            max_output_chars: 2000,
            extra_imports: vec!["numpy".into()],
            bind_addr: "127.0.0.1:0".into(),
        }
    }

    #[test]
    fn test_duckduckgo_without_key() {
        let tools = build_tools(&settings(None)).unwrap();
        let names = tools.names();
        assert!(names.contains(&"web_search"));
        assert!(names.contains(&"visit_webpage"));
        assert!(!names.contains(&"tavily_search"));
    }

    #[test]
    fn test_tavily_with_key() {
        let tools = build_tools(&settings(Some("tvly-123"))).unwrap();
        let names = tools.names();
        assert!(names.contains(&"tavily_search"));
        assert!(!names.contains(&"web_search"));
    }

    #[test]
    fn test_build_agent() {
        let agent = build_agent(&settings(None), None).unwrap();

        assert_eq!(agent.config().max_steps, 3);
        assert_eq!(agent.config().generation.model, "qwen2.5-coder");
        assert!(agent.config().authorized_imports.iter().any(|m| m == "numpy"));
        assert!(agent.tools().spec_of(FINAL_ANSWER_TOOL).is_some());
        assert!(agent.system_prompt().contains("visit_webpage"));
    }

    #[test]
    fn test_model_override() {
        let agent = build_agent(&settings(None), Some("ollama/llama3.2")).unwrap();
        assert_eq!(agent.config().generation.model, "llama3.2");
    }
}
