//! Step Memory
//!
//! Append-only log of everything that happened in a run. It is the audit
//! trail of the run and the only source the prompt builder serializes into
//! conversation history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};

/// Message prefix for steps where no executable code was found
pub const NO_CODE_PRODUCED: &str = "No code produced";

/// Why a step failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Response had zero, several, or an empty code block
    NoCode,
    /// The execution engine reported a fault in the code
    Execution,
}

/// Result of one step, as seen by the model on the next turn
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Code ran to completion
    Success {
        /// Value of the last expression (null if none)
        value: Value,
        /// Captured print output
        output: String,
    },

    /// Nothing ran, or the code raised
    Failure {
        kind: FailureKind,
        /// Error text, verbatim up to the executor's output cap
        message: String,
        /// Output printed before the fault
        #[serde(default)]
        output: String,
    },

    /// Code invoked the final answer tool
    FinalAnswer { value: Value },
}

impl ExecutionOutcome {
    pub fn no_code(message: impl Into<String>) -> Self {
        Self::Failure {
            kind: FailureKind::NoCode,
            message: message.into(),
            output: String::new(),
        }
    }

    pub fn execution_failure(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Failure {
            kind: FailureKind::Execution,
            message: message.into(),
            output: output.into(),
        }
    }

    pub const fn is_final(&self) -> bool {
        matches!(self, Self::FinalAnswer { .. })
    }

    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }
}

/// One recorded step
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepRecord {
    /// 0-based position in the run
    pub index: usize,

    /// Model output, exactly as received
    pub raw_response: String,

    /// Text preceding the code block
    pub reasoning: String,

    /// `Summary:` line from the reasoning, if the model wrote one
    pub summary: Option<String>,

    /// Extracted code; `None` when parsing failed
    pub code: Option<String>,

    pub outcome: ExecutionOutcome,

    pub started_at: DateTime<Utc>,

    pub duration_ms: u64,
}

/// Ordered, append-only sequence of step records
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StepMemory {
    records: Vec<StepRecord>,
}

impl StepMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next appended record must carry
    pub fn next_index(&self) -> usize {
        self.records.len()
    }

    /// Append a record; its index must be the next in sequence
    pub fn append(&mut self, record: StepRecord) -> Result<()> {
        if record.index != self.records.len() {
            return Err(AgentError::Other(format!(
                "step record index {} out of sequence (expected {})",
                record.index,
                self.records.len()
            )));
        }
        self.records.push(record);
        Ok(())
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StepRecord> {
        self.records.iter()
    }

    pub fn get(&self, index: usize) -> Option<&StepRecord> {
        self.records.get(index)
    }

    pub fn last(&self) -> Option<&StepRecord> {
        self.records.last()
    }

    /// Step summaries, in order; steps without one are skipped
    pub fn summaries(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter_map(|r| r.summary.as_deref())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<'a> IntoIterator for &'a StepMemory {
    type Item = &'a StepRecord;
    type IntoIter = std::slice::Iter<'a, StepRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
