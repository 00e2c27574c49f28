//! Application State

use std::sync::Arc;

use codeact_core::Agent;

use crate::config::Settings;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Agent for the configured model; per-request models build their own
    pub agent: Arc<Agent>,

    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(agent: Agent, settings: Settings) -> Self {
        Self {
            agent: Arc::new(agent),
            settings: Arc::new(settings),
        }
    }

    /// Agent to use for a request, honoring a model override
    pub fn agent_for(&self, model: Option<&str>) -> codeact_core::Result<Arc<Agent>> {
        match model {
            Some(m) if m != self.settings.model => {
                Ok(Arc::new(crate::bootstrap::build_agent(&self.settings, Some(m))?))
            }
            _ => Ok(Arc::clone(&self.agent)),
        }
    }
}
