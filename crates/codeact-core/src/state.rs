//! Run State
//!
//! Mutable state of one run. Created empty at run start, updated once per
//! step by the agent, and turned into a [`RunReport`] when the run ends.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::executor::Bindings;
use crate::memory::{ExecutionOutcome, StepMemory, StepRecord};

/// State owned by a single run
#[derive(Debug)]
pub struct RunState {
    run_id: Uuid,
    task: String,
    max_steps: usize,
    memory: StepMemory,

    /// Bindings from the most recent successful step
    bindings: Bindings,

    terminal: bool,
    final_value: Option<Value>,

    /// Provider attempts that failed and were retried
    provider_retries: u32,
}

impl RunState {
    pub fn new(task: impl Into<String>, max_steps: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            task: task.into(),
            max_steps,
            memory: StepMemory::new(),
            bindings: Bindings::new(),
            terminal: max_steps == 0,
            final_value: None,
            provider_retries: 0,
        }
    }

    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub const fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub const fn memory(&self) -> &StepMemory {
        &self.memory
    }

    pub const fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Always equal to the number of recorded steps
    pub fn step_count(&self) -> usize {
        self.memory.len()
    }

    pub const fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub const fn final_value(&self) -> Option<&Value> {
        self.final_value.as_ref()
    }

    pub const fn provider_retries(&self) -> u32 {
        self.provider_retries
    }

    pub fn note_provider_retry(&mut self) {
        self.provider_retries += 1;
    }

    /// Record a finished step
    ///
    /// A final answer makes the state terminal at this step, as does
    /// reaching the step budget. New bindings replace the old ones only
    /// when the step supplies them.
    pub fn record(&mut self, record: StepRecord, bindings: Option<Bindings>) -> Result<()> {
        if self.terminal {
            return Err(AgentError::RunTerminated(self.step_count()));
        }

        if let ExecutionOutcome::FinalAnswer { value } = &record.outcome {
            self.final_value = Some(value.clone());
            self.terminal = true;
        }

        self.memory.append(record)?;

        if let Some(bindings) = bindings {
            self.bindings = bindings;
        }
        if self.step_count() >= self.max_steps {
            self.terminal = true;
        }

        Ok(())
    }

    /// Consume the state into the caller-facing report
    pub fn into_report(self) -> RunReport {
        let outcome = match self.final_value {
            Some(value) => RunOutcome::FinalAnswer(value),
            None => RunOutcome::StepLimitExceeded {
                max_steps: self.max_steps,
            },
        };

        RunReport {
            run_id: self.run_id,
            task: self.task,
            outcome,
            memory: self.memory,
            bindings: self.bindings,
            provider_retries: self.provider_retries,
        }
    }
}

/// How a run ended, when it did not fail
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The code called the final answer tool
    FinalAnswer(Value),

    /// The step budget ran out first
    StepLimitExceeded { max_steps: usize },
}

/// Everything a finished run leaves behind
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,

    pub task: String,

    pub outcome: RunOutcome,

    /// Full step history
    pub memory: StepMemory,

    /// Bindings as of the last successful step
    pub bindings: Bindings,

    pub provider_retries: u32,
}

impl RunReport {
    pub const fn final_answer(&self) -> Option<&Value> {
        match &self.outcome {
            RunOutcome::FinalAnswer(value) => Some(value),
            RunOutcome::StepLimitExceeded { .. } => None,
        }
    }

    pub const fn is_step_limit_exceeded(&self) -> bool {
        matches!(self.outcome, RunOutcome::StepLimitExceeded { .. })
    }

    pub fn steps(&self) -> usize {
        self.memory.len()
    }
}
