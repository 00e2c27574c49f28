//! Code Executor Adapter
//!
//! The sandbox is a capability boundary: anything that implements
//! [`ExecutionEngine`] (a subprocess interpreter, a WASM runtime, a
//! container) can run the model's code. The adapter hands it the source,
//! the bindings carried over from earlier steps and a [`ToolDispatch`]
//! through which the code reaches the registered tools, then maps the
//! engine's reply onto an [`ExecutionOutcome`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::memory::ExecutionOutcome;
use crate::text::truncate_content;
use crate::tool::{FINAL_ANSWER_TOOL, ToolRegistry};

/// Default cap on output kept from one execution
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 20_000;

/// Named values that persist between steps of one run
pub type Bindings = Map<String, Value>;

/// Source plus the environment it runs in
#[derive(Clone, Copy, Debug)]
pub struct ExecutionRequest<'a> {
    pub code: &'a str,
    pub bindings: &'a Bindings,
}

/// What the engine reports back
#[derive(Clone, Debug, PartialEq)]
pub enum EngineReply {
    /// Code ran to the end
    Completed {
        /// Value of the trailing expression, or null
        value: Value,
        stdout: String,
        /// Bindings as they stand after the code ran
        bindings: Bindings,
    },

    /// Code raised (syntax error, runtime error, disallowed import, timeout)
    Raised {
        /// Engine message, e.g. `ZeroDivisionError: division by zero`
        error: String,
        stdout: String,
    },
}

/// Sandbox that runs one code snippet
///
/// Faults in the executed code come back as [`EngineReply::Raised`]. An
/// `Err` means the engine itself could not do its job and aborts the run.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(
        &self,
        request: ExecutionRequest<'_>,
        tools: &mut ToolDispatch<'_>,
    ) -> Result<EngineReply>;
}

/// Tool access handed to the engine for the duration of one execution
///
/// Calls to the final answer tool are recorded so the adapter can tell how
/// many times the code asked to terminate.
pub struct ToolDispatch<'a> {
    registry: &'a ToolRegistry,
    final_answers: Vec<Value>,
}

impl<'a> ToolDispatch<'a> {
    pub fn new(registry: &'a ToolRegistry) -> Self {
        Self {
            registry,
            final_answers: Vec::new(),
        }
    }

    /// Callable names to expose inside the sandbox
    pub fn tool_names(&self) -> Vec<&str> {
        self.registry.names()
    }

    /// Call a tool from inside executed code
    ///
    /// Errors are returned as text so the engine can raise them in the
    /// executed code, where the model sees them like any other exception.
    pub async fn call(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> std::result::Result<Value, String> {
        tracing::debug!(tool = %name, "Tool call from executed code");

        match self.registry.invoke(name, args, kwargs).await {
            Ok(value) => {
                if name == FINAL_ANSWER_TOOL {
                    self.final_answers.push(value.clone());
                }
                Ok(value)
            }
            Err(e) => {
                tracing::debug!(tool = %name, error = %e, "Tool call failed");
                Err(e.to_string())
            }
        }
    }

    pub fn final_answers(&self) -> &[Value] {
        &self.final_answers
    }

    fn into_final_answers(self) -> Vec<Value> {
        self.final_answers
    }
}

/// Result of one adapter call
#[derive(Clone, Debug)]
pub struct Execution {
    pub outcome: ExecutionOutcome,

    /// Bindings to carry into the next step; `None` leaves them unchanged
    pub bindings: Option<Bindings>,
}

/// Runs model code through an engine and classifies the result
#[derive(Clone)]
pub struct CodeExecutor {
    engine: Arc<dyn ExecutionEngine>,
    tools: Arc<ToolRegistry>,
    max_output_chars: usize,
}

impl CodeExecutor {
    pub fn new(engine: Arc<dyn ExecutionEngine>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            engine,
            tools,
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
        }
    }

    /// Cap on captured output, error text and string values kept per step
    #[must_use]
    pub const fn with_max_output_chars(mut self, max_chars: usize) -> Self {
        self.max_output_chars = max_chars;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Execute one snippet against the current bindings
    pub async fn execute(&self, code: &str, bindings: &Bindings) -> Result<Execution> {
        let mut dispatch = ToolDispatch::new(&self.tools);
        let reply = self
            .engine
            .execute(ExecutionRequest { code, bindings }, &mut dispatch)
            .await?;

        Ok(classify(
            self.cap_output(reply),
            dispatch.into_final_answers(),
        ))
    }

    /// Truncate whatever would be replayed into later prompts
    fn cap_output(&self, reply: EngineReply) -> EngineReply {
        let max = self.max_output_chars;
        match reply {
            EngineReply::Completed {
                value,
                stdout,
                bindings,
            } => EngineReply::Completed {
                value: match value {
                    Value::String(s) => Value::String(truncate_content(&s, max)),
                    other => other,
                },
                stdout: truncate_content(&stdout, max),
                bindings,
            },
            EngineReply::Raised { error, stdout } => EngineReply::Raised {
                error: truncate_content(&error, max),
                stdout: truncate_content(&stdout, max),
            },
        }
    }
}

fn classify(reply: EngineReply, mut final_answers: Vec<Value>) -> Execution {
    match reply {
        // A raise wins over any final answer recorded before it
        EngineReply::Raised { error, stdout } => Execution {
            outcome: ExecutionOutcome::execution_failure(error, stdout),
            bindings: None,
        },
        EngineReply::Completed { .. } if final_answers.len() == 1 => Execution {
            outcome: ExecutionOutcome::FinalAnswer {
                value: final_answers.remove(0),
            },
            bindings: None,
        },
        EngineReply::Completed { stdout, .. } if final_answers.len() > 1 => Execution {
            outcome: ExecutionOutcome::execution_failure(
                format!(
                    "{FINAL_ANSWER_TOOL} was called {} times in a single code block; call it exactly once",
                    final_answers.len()
                ),
                stdout,
            ),
            bindings: None,
        },
        EngineReply::Completed {
            value,
            stdout,
            bindings,
        } => Execution {
            outcome: ExecutionOutcome::Success {
                value,
                output: stdout,
            },
            bindings: Some(bindings),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::FailureKind;
    use serde_json::json;

    /// Calls final_answer once per line of code and echoes the bindings
    struct FinalAnswerPerLine;

    #[async_trait]
    impl ExecutionEngine for FinalAnswerPerLine {
        async fn execute(
            &self,
            request: ExecutionRequest<'_>,
            tools: &mut ToolDispatch<'_>,
        ) -> Result<EngineReply> {
            for line in request.code.lines() {
                let value: Value = serde_json::from_str(line).unwrap_or(Value::Null);
                if let Err(error) = tools.call(FINAL_ANSWER_TOOL, vec![value], Map::new()).await {
                    return Ok(EngineReply::Raised { error, stdout: String::new() });
                }
            }
            Ok(EngineReply::Completed {
                value: Value::Null,
                stdout: String::new(),
                bindings: request.bindings.clone(),
            })
        }
    }

    struct AlwaysRaises;

    #[async_trait]
    impl ExecutionEngine for AlwaysRaises {
        async fn execute(
            &self,
            _request: ExecutionRequest<'_>,
            tools: &mut ToolDispatch<'_>,
        ) -> Result<EngineReply> {
            tools
                .call(FINAL_ANSWER_TOOL, vec![json!("early")], Map::new())
                .await
                .ok();
            Ok(EngineReply::Raised {
                error: "NameError: name 'y' is not defined".into(),
                stdout: "partial\n".into(),
            })
        }
    }

    fn executor(engine: impl ExecutionEngine + 'static) -> CodeExecutor {
        CodeExecutor::new(Arc::new(engine), Arc::new(ToolRegistry::new()))
    }

    #[tokio::test]
    async fn test_single_final_answer() {
        let execution = executor(FinalAnswerPerLine)
            .execute("4", &Bindings::new())
            .await
            .unwrap();

        assert_eq!(execution.outcome, ExecutionOutcome::FinalAnswer { value: json!(4) });
        assert!(execution.bindings.is_none());
    }

    #[tokio::test]
    async fn test_several_final_answers_fail_the_step() {
        let execution = executor(FinalAnswerPerLine)
            .execute("1\n2", &Bindings::new())
            .await
            .unwrap();

        match execution.outcome {
            ExecutionOutcome::Failure { kind, message, .. } => {
                assert_eq!(kind, FailureKind::Execution);
                assert!(message.contains("called 2 times"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_final_answer_is_success_with_new_bindings() {
        let mut bindings = Bindings::new();
        bindings.insert("x".into(), json!(3));

        let execution = executor(FinalAnswerPerLine)
            .execute("", &bindings)
            .await
            .unwrap();

        assert!(matches!(execution.outcome, ExecutionOutcome::Success { .. }));
        assert_eq!(execution.bindings.unwrap()["x"], json!(3));
    }

    #[tokio::test]
    async fn test_raise_wins_over_recorded_final_answer() {
        let execution = executor(AlwaysRaises)
            .execute("final_answer('early'); y", &Bindings::new())
            .await
            .unwrap();

        assert_eq!(
            execution.outcome,
            ExecutionOutcome::execution_failure("NameError: name 'y' is not defined", "partial\n")
        );
        assert!(execution.bindings.is_none());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_reported_as_text() {
        let registry = ToolRegistry::new();
        let mut dispatch = ToolDispatch::new(&registry);
        let err = dispatch
            .call("missing_tool", Vec::new(), Map::new())
            .await
            .unwrap_err();

        assert!(err.contains("missing_tool"));
        assert!(dispatch.final_answers().is_empty());
    }

    /// Prints a lot and returns a long string
    struct Chatty;

    #[async_trait]
    impl ExecutionEngine for Chatty {
        async fn execute(
            &self,
            request: ExecutionRequest<'_>,
            _tools: &mut ToolDispatch<'_>,
        ) -> Result<EngineReply> {
            Ok(EngineReply::Completed {
                value: json!("y".repeat(5_000)),
                stdout: "x".repeat(100_000),
                bindings: request.bindings.clone(),
            })
        }
    }

    #[tokio::test]
    async fn test_large_output_is_truncated() {
        let execution = executor(Chatty)
            .with_max_output_chars(1_000)
            .execute("print('x' * 100_000)", &Bindings::new())
            .await
            .unwrap();

        let ExecutionOutcome::Success { value, output } = execution.outcome else {
            panic!("expected success");
        };
        assert!(output.contains("truncated to stay below 1000 characters"));
        assert!(output.chars().count() < 1_200);
        assert!(value.as_str().unwrap().chars().count() < 1_200);
    }

    #[tokio::test]
    async fn test_default_cap_applies() {
        let execution = executor(Chatty)
            .execute("print('x' * 100_000)", &Bindings::new())
            .await
            .unwrap();

        let ExecutionOutcome::Success { output, .. } = execution.outcome else {
            panic!("expected success");
        };
        assert!(output.chars().count() < DEFAULT_MAX_OUTPUT_CHARS + 200);
    }
}
