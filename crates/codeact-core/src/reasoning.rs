//! Reasoning Loop
//!
//! Implements the code-acting ReAct pattern. Each step the agent prompts
//! the model with the task and every earlier step, takes the single code
//! block out of the reply, runs it, and records what happened. The run ends
//! when the code calls `final_answer` or the step budget is spent.
//!
//! Only provider failures that outlast the retry policy and a broken
//! execution engine abort a run. Everything the model could fix by reading
//! the error (missing code, exceptions, bad tool arguments) is recorded as
//! a failed step and shown to it on the next turn.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{AgentError, Result};
use crate::events::AgentEvent;
use crate::executor::{Bindings, CodeExecutor, DEFAULT_MAX_OUTPUT_CHARS, ExecutionEngine};
use crate::memory::{ExecutionOutcome, StepRecord};
use crate::message::Message;
use crate::parser::{Action, parse_response};
use crate::prompt::PromptBuilder;
use crate::provider::{Completion, GenerationOptions, LlmProvider};
use crate::state::{RunOutcome, RunReport, RunState};
use crate::tool::{Tool, ToolRegistry};

/// Modules the generated code may always import
pub const BASE_BUILTIN_MODULES: &[&str] = &[
    "collections",
    "datetime",
    "itertools",
    "math",
    "queue",
    "random",
    "re",
    "stat",
    "statistics",
    "time",
    "unicodedata",
];

/// Default step budget per run
pub const DEFAULT_MAX_STEPS: usize = 10;

// ============================================================================
// Configuration
// ============================================================================

/// Bounded exponential backoff for provider calls
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_backoff: Duration,

    /// Upper bound on any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Fail on the first error
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Step budget used by [`Agent::run`]
    pub max_steps: usize,

    /// Generation options
    pub generation: GenerationOptions,

    /// Provider retry policy
    pub retry: RetryPolicy,

    /// Modules listed as importable in the system prompt
    pub authorized_imports: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            generation: GenerationOptions::default(),
            retry: RetryPolicy::default(),
            authorized_imports: BASE_BUILTIN_MODULES.iter().map(ToString::to_string).collect(),
        }
    }
}

// ============================================================================
// Agent
// ============================================================================

/// The main Agent struct
///
/// Holds only shared, immutable collaborators. Every run gets its own
/// [`RunState`], so one agent can serve concurrent runs.
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    executor: CodeExecutor,
    prompt: PromptBuilder,
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent; the executor's registry must hold `final_answer`
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        executor: CodeExecutor,
        config: AgentConfig,
    ) -> Result<Self> {
        executor.tools().ensure_final_answer()?;
        let prompt = PromptBuilder::new(executor.tools(), &config.authorized_imports);

        Ok(Self {
            provider,
            executor,
            prompt,
            config,
        })
    }

    /// Run a task with the configured step budget
    pub async fn run(&self, task: &str) -> Result<RunReport> {
        self.run_with_max_steps(task, self.config.max_steps).await
    }

    /// Run a task with an explicit step budget
    pub async fn run_with_max_steps(&self, task: &str, max_steps: usize) -> Result<RunReport> {
        self.execute_run(task, max_steps, None).await
    }

    /// Run a task, sending progress events as steps complete
    ///
    /// The sender is dropped when the run returns, which closes the channel.
    pub async fn run_with_events(
        &self,
        task: &str,
        max_steps: usize,
        events: UnboundedSender<AgentEvent>,
    ) -> Result<RunReport> {
        self.execute_run(task, max_steps, Some(&events)).await
    }

    async fn execute_run(
        &self,
        task: &str,
        max_steps: usize,
        events: Option<&UnboundedSender<AgentEvent>>,
    ) -> Result<RunReport> {
        let mut state = RunState::new(task, max_steps);
        let run_id = state.run_id();

        tracing::info!(%run_id, max_steps, "Starting run");
        emit(
            events,
            AgentEvent::RunStarted {
                run_id,
                task: task.to_string(),
                max_steps,
            },
        );

        if let Err(e) = self.drive(&mut state, events).await {
            tracing::error!(%run_id, steps = state.step_count(), error = %e, "Run aborted");
            emit(
                events,
                AgentEvent::RunFailed {
                    run_id,
                    error: e.to_string(),
                },
            );
            return Err(e);
        }

        let report = state.into_report();
        match &report.outcome {
            RunOutcome::FinalAnswer(_) => {
                tracing::info!(%run_id, steps = report.steps(), "Run finished with a final answer");
            }
            RunOutcome::StepLimitExceeded { max_steps } => {
                tracing::warn!(%run_id, max_steps, "Run hit the step limit without a final answer");
            }
        }
        emit(
            events,
            AgentEvent::RunFinished {
                run_id,
                outcome: report.outcome.clone(),
                steps: report.steps(),
            },
        );

        Ok(report)
    }

    async fn drive(
        &self,
        state: &mut RunState,
        events: Option<&UnboundedSender<AgentEvent>>,
    ) -> Result<()> {
        while !state.is_terminal() {
            let index = state.step_count();
            emit(events, AgentEvent::StepStarted { index });

            let (record, bindings) = self.step(state, index, events).await?;
            emit(
                events,
                AgentEvent::StepRecorded {
                    record: record.clone(),
                },
            );
            state.record(record, bindings)?;
        }
        Ok(())
    }

    /// One prompt, parse, execute cycle; the caller records the result
    async fn step(
        &self,
        state: &mut RunState,
        index: usize,
        events: Option<&UnboundedSender<AgentEvent>>,
    ) -> Result<(StepRecord, Option<Bindings>)> {
        let started_at = Utc::now();
        let timer = Instant::now();

        let messages = self.prompt.build(state.task(), state.memory());
        tracing::debug!(
            step = index,
            messages = messages.len(),
            est_tokens = crate::message::estimate_tokens(&messages),
            "Prompt built"
        );
        let completion = self.complete_with_retry(&messages, state, events).await?;
        if completion.truncated {
            tracing::warn!(step = index, "Model output hit the token limit and was cut off");
        }
        if let Some(usage) = completion.usage {
            tracing::debug!(
                step = index,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Token usage"
            );
        }
        let parsed = parse_response(&completion.content);

        let (code, outcome, bindings) = match parsed.action {
            Action::Code(code) => {
                tracing::debug!(step = index, "Executing code block");
                let execution = self.executor.execute(&code, state.bindings()).await?;
                (Some(code), execution.outcome, execution.bindings)
            }
            Action::Missing(issue) => {
                tracing::warn!(step = index, ?issue, "No usable code block in response");
                (None, ExecutionOutcome::no_code(issue.message()), None)
            }
        };

        match &outcome {
            ExecutionOutcome::Success { .. } => tracing::debug!(step = index, "Step succeeded"),
            ExecutionOutcome::Failure { kind, message, .. } => {
                tracing::info!(step = index, ?kind, error = %message, "Step failed");
            }
            ExecutionOutcome::FinalAnswer { .. } => {
                tracing::debug!(step = index, "Final answer produced");
            }
        }

        let record = StepRecord {
            index,
            raw_response: completion.content,
            reasoning: parsed.reasoning,
            summary: parsed.summary,
            code,
            outcome,
            started_at,
            duration_ms: u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        Ok((record, bindings))
    }

    /// Call the provider, retrying transient errors per the retry policy
    async fn complete_with_retry(
        &self,
        messages: &[Message],
        state: &mut RunState,
        events: Option<&UnboundedSender<AgentEvent>>,
    ) -> Result<Completion> {
        let policy = &self.config.retry;
        let mut attempt = 0u32;

        loop {
            match self.provider.complete(messages, &self.config.generation).await {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                    let backoff = policy.backoff(attempt);
                    let backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
                    attempt += 1;
                    state.note_provider_retry();

                    tracing::warn!(attempt, backoff_ms, error = %e, "Provider call failed, retrying");
                    emit(
                        events,
                        AgentEvent::ProviderRetry {
                            attempt,
                            backoff_ms,
                            error: e.to_string(),
                        },
                    );

                    tokio::time::sleep(backoff).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(AgentError::ProviderExhausted {
                        attempts: attempt + 1,
                        last: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Get the tool registry
    pub fn tools(&self) -> &ToolRegistry {
        self.executor.tools()
    }

    /// Get configuration
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn system_prompt(&self) -> &str {
        self.prompt.system_prompt()
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }
}

fn emit(events: Option<&UnboundedSender<AgentEvent>>, event: AgentEvent) {
    if let Some(tx) = events {
        // Nobody listening is fine
        let _ = tx.send(event);
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for Agent configuration
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    engine: Option<Arc<dyn ExecutionEngine>>,
    tools: ToolRegistry,
    config: AgentConfig,
    max_output_chars: usize,
    registration_error: Option<AgentError>,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            engine: None,
            tools: ToolRegistry::new(),
            config: AgentConfig::default(),
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            registration_error: None,
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn ExecutionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Register a tool; a failed registration is reported by [`Self::build`]
    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        if let Err(e) = self.tools.register(tool) {
            self.registration_error.get_or_insert(e);
        }
        self
    }

    /// Replace the whole registry
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    pub const fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = temp;
        self
    }

    pub fn generation(mut self, generation: GenerationOptions) -> Self {
        self.config.generation = generation;
        self
    }

    pub const fn max_steps(mut self, max: usize) -> Self {
        self.config.max_steps = max;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Cap on printed output and error text kept from each step
    pub const fn max_output_chars(mut self, max: usize) -> Self {
        self.max_output_chars = max;
        self
    }

    /// Modules added on top of [`BASE_BUILTIN_MODULES`]
    pub fn additional_imports<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for module in modules {
            let module = module.into();
            if !self.config.authorized_imports.contains(&module) {
                self.config.authorized_imports.push(module);
            }
        }
        self
    }

    pub fn build(self) -> Result<Agent> {
        if let Some(e) = self.registration_error {
            return Err(e);
        }
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;
        let engine = self
            .engine
            .ok_or_else(|| AgentError::Config("Execution engine is required".into()))?;

        let executor = CodeExecutor::new(engine, Arc::new(self.tools))
            .with_max_output_chars(self.max_output_chars);
        Agent::new(provider, executor, self.config)
    }
}
