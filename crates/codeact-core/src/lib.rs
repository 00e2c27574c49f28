//! # codeact-core
//!
//! Code-acting agent loop with a provider-agnostic LLM abstraction and a
//! pluggable execution engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                             Agent                                │
//! │  ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌───────────────┐  │
//! │  │  Prompt  │──▶│   LLM    │──▶│ Response │──▶│ Code Executor │  │
//! │  │ Builder  │   │ Provider │   │  Parser  │   │  (+ Registry) │  │
//! │  └────▲─────┘   └──────────┘   └──────────┘   └───────┬───────┘  │
//! │       │                 ┌─────────────┐               │          │
//! │       └─────────────────│ Step Memory │◀──────────────┘          │
//! │                         └─────────────┘                          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait enables swapping between Ollama, OpenAI or any
//! other backend, and the `ExecutionEngine` trait does the same for the
//! sandbox that runs the model's code.

pub mod error;
pub mod events;
pub mod executor;
pub mod memory;
pub mod message;
pub mod parser;
pub mod prompt;
pub mod provider;
pub mod reasoning;
pub mod state;
pub mod text;
pub mod tool;

pub use error::{AgentError, Result};
pub use events::AgentEvent;
pub use executor::{Bindings, CodeExecutor, DEFAULT_MAX_OUTPUT_CHARS, EngineReply, ExecutionEngine, ExecutionRequest, ToolDispatch};
pub use memory::{ExecutionOutcome, FailureKind, StepMemory, StepRecord};
pub use message::{Message, Role};
pub use parser::{ParsedResponse, parse_response};
pub use prompt::PromptBuilder;
pub use provider::{Completion, GenerationOptions, LlmProvider};
pub use reasoning::{Agent, AgentBuilder, AgentConfig, BASE_BUILTIN_MODULES, RetryPolicy};
pub use state::{RunOutcome, RunReport, RunState};
pub use tool::{FINAL_ANSWER_TOOL, ParameterSchema, Tool, ToolCall, ToolRegistry, ToolSpec};
