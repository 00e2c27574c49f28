//! Run Events
//!
//! Progress notifications emitted while a run is in flight, for CLIs and
//! streaming endpoints that want to show steps as they happen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::memory::StepRecord;
use crate::state::RunOutcome;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    RunStarted {
        run_id: Uuid,
        task: String,
        max_steps: usize,
    },

    /// About to call the provider for this step
    StepStarted { index: usize },

    /// Step finished and was appended to memory
    StepRecorded { record: StepRecord },

    /// A provider call failed and will be retried after `backoff_ms`
    ProviderRetry {
        attempt: u32,
        backoff_ms: u64,
        error: String,
    },

    RunFinished { run_id: Uuid, outcome: RunOutcome, steps: usize },

    /// Run aborted with an error the loop cannot recover from
    RunFailed { run_id: Uuid, error: String },
}
