//! Prompt Building
//!
//! Renders the system prompt once per agent and serializes step memory into
//! the message list sent to the provider on every step.

use std::fmt::Write;

use serde_json::Value;

use crate::memory::{ExecutionOutcome, StepMemory};
use crate::message::Message;
use crate::parser::END_CODE;
use crate::tool::{FINAL_ANSWER_TOOL, ToolRegistry, ToolSpec};

const SYSTEM_PROMPT_INTRO: &str = r#"You are an expert assistant who can solve any task using code blobs. You will be given a task to solve as best you can.
To do so, you have been given access to a list of tools: these tools are basically Python functions which you can call with code.
To solve the task, you must plan forward to proceed in a series of steps, in a cycle of 'Thought:', 'Code:', and 'Observation:' sequences.

At each step, in the 'Thought:' sequence, you should first explain your reasoning towards solving the task and the tools that you want to use.
End every thought with a single line 'Summary: <one short sentence describing this step>'.
Then in the 'Code:' sequence, you should write the code in simple Python. The code sequence must end with '```<end_code>' sequence.
During each intermediate step, you can use 'print()' to save whatever important information you will then need.
These print outputs will then appear in the 'Observation:' field, which will be available as input for the next step.
In the end you have to return a final answer using the `final_answer` tool.

Here is an example:
---
Task: "What is the result of the following operation: 5 + 3 + 1294.678?"

Thought: I will use python code to compute the result of the operation and then return the final answer using the `final_answer` tool.
Summary: Compute the sum and return it.
Code:
```py
result = 5 + 3 + 1294.678
final_answer(result)
```<end_code>
---

Above example was using a tool that might not exist for you. On top of performing computations in the Python code snippets that you create, you only have access to these tools:"#;

/// Builds the message list for each provider call
#[derive(Clone, Debug)]
pub struct PromptBuilder {
    system_prompt: String,
}

impl PromptBuilder {
    /// Render the system prompt for a tool set and import allowlist
    pub fn new(tools: &ToolRegistry, authorized_imports: &[String]) -> Self {
        Self {
            system_prompt: render_system_prompt(tools.describe(), authorized_imports),
        }
    }

    /// Use a fully custom system prompt
    pub fn with_system_prompt(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// System message, the task, then one assistant/user pair per step
    pub fn build(&self, task: &str, memory: &StepMemory) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2 + 2 * memory.len());
        messages.push(Message::system(&self.system_prompt));
        messages.push(Message::user(format!("Task: {task}")));

        for record in memory {
            messages.push(Message::assistant(&record.raw_response));
            messages.push(Message::user(render_observation(&record.outcome)));
        }

        messages
    }
}

/// Render a system prompt listing the given tools
pub fn render_system_prompt<'a>(
    tools: impl IntoIterator<Item = &'a ToolSpec>,
    authorized_imports: &[String],
) -> String {
    let mut prompt = String::from(SYSTEM_PROMPT_INTRO);
    prompt.push('\n');

    for spec in tools {
        prompt.push_str(&render_tool(spec));
    }

    let imports = if authorized_imports.is_empty() {
        "none (only builtins are available)".to_string()
    } else {
        authorized_imports.join(", ")
    };

    let _ = write!(
        prompt,
        r#"
Here are the rules you should always follow to solve your task:
1. Always provide a 'Thought:' sequence, and a 'Code:' + '```py' sequence ending with '```{END_CODE}' sequence, else you will fail.
2. Write exactly one code block per step. Several code blocks in one response count as no code at all.
3. Use only variables that you have defined!
4. Always use the right arguments for the tools. Call tools positionally or with keywords, as in `web_search(query="...")`, never with a single dict.
5. Call `{FINAL_ANSWER_TOOL}` exactly once, in the step where you have the answer. Nothing else ends the task, and calling it twice in one block is an error.
6. The state persists between code executions: variables, imports and top-level functions and classes from a step that ran without error are still there in the next one. A step that raised leaves the state as it was before it.
7. Don't name any new variable with the same name as a tool: for instance don't name a variable '{FINAL_ANSWER_TOOL}'.
8. Never create any notional variables in your code, as having these in your logs will derail you from the true variables.
9. You can use imports in your code, but only from the following list of modules: {imports}
10. Don't give up! You're in charge of solving the task, not providing directions to solve it.

Now Begin!"#
    );

    prompt
}

fn render_tool(spec: &ToolSpec) -> String {
    let mut out = format!("- {}: {}\n", spec.signature(), spec.description);
    if !spec.parameters.is_empty() {
        out.push_str("    Takes inputs:\n");
        for param in &spec.parameters {
            let optional = if param.optional { ", optional" } else { "" };
            let _ = writeln!(
                out,
                "        {} ({}{optional}): {}",
                param.name, param.param_type, param.description
            );
        }
    }
    let _ = writeln!(out, "    Returns an output of type: {}", spec.output_type);
    out
}

/// Render an outcome as the observation the model reads next turn
pub fn render_observation(outcome: &ExecutionOutcome) -> String {
    let mut text = String::from("Observation:\n");

    match outcome {
        ExecutionOutcome::Success { value, output } => {
            text.push_str("Execution logs:\n");
            if output.trim().is_empty() {
                text.push_str("(no output)\n");
            } else {
                text.push_str(output);
                if !output.ends_with('\n') {
                    text.push('\n');
                }
            }
            if !value.is_null() {
                let _ = write!(text, "Last output from code snippet:\n{}", render_value(value));
            }
        }
        ExecutionOutcome::Failure { message, output, .. } => {
            if !output.trim().is_empty() {
                let _ = writeln!(text, "Execution logs:\n{}", output.trim_end());
            }
            let _ = write!(
                text,
                "Error: {message}\nNow let's retry: take care not to repeat previous errors! If you have retried several times, try a completely different approach."
            );
        }
        ExecutionOutcome::FinalAnswer { value } => {
            let _ = write!(text, "Final answer: {}", render_value(value));
        }
    }

    text
}

/// Strings render bare, everything else as JSON
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{StepRecord, NO_CODE_PRODUCED};
    use crate::message::{Role, is_well_ordered};
    use chrono::Utc;
    use serde_json::json;

    fn record(index: usize, outcome: ExecutionOutcome) -> StepRecord {
        StepRecord {
            index,
            raw_response: format!("response {index}"),
            reasoning: String::new(),
            summary: None,
            code: Some("print(1)".into()),
            outcome,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    #[test]
    fn test_system_prompt_lists_tools_and_imports() {
        let tools = ToolRegistry::new();
        let builder = PromptBuilder::new(&tools, &["math".into(), "re".into()]);
        let prompt = builder.system_prompt();

        assert!(prompt.contains("- final_answer(answer: any) -> any: Provides a final answer"));
        assert!(prompt.contains("answer (any): The final answer"));
        assert!(prompt.contains("modules: math, re"));
        assert!(prompt.contains("```<end_code>"));
    }

    #[test]
    fn test_first_prompt_is_system_then_task() {
        let builder = PromptBuilder::with_system_prompt("sys");
        let messages = builder.build("compute 2+2", &StepMemory::new());

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "Task: compute 2+2");
        assert!(is_well_ordered(&messages));
    }

    #[test]
    fn test_every_step_is_rendered_in_order() {
        let mut memory = StepMemory::new();
        memory
            .append(record(0, ExecutionOutcome::no_code(format!("{NO_CODE_PRODUCED}: none"))))
            .unwrap();
        memory
            .append(record(
                1,
                ExecutionOutcome::Success { value: json!(null), output: "hello\n".into() },
            ))
            .unwrap();

        let messages = PromptBuilder::with_system_prompt("sys").build("t", &memory);

        assert_eq!(messages.len(), 6);
        assert!(is_well_ordered(&messages));
        assert_eq!(messages[2].content, "response 0");
        assert!(messages[3].content.contains("Error: No code produced: none"));
        assert_eq!(messages[4].content, "response 1");
        assert_eq!(messages[5].content, "Observation:\nExecution logs:\nhello\n");
    }

    #[test]
    fn test_success_observation_shows_last_value() {
        let outcome = ExecutionOutcome::Success { value: json!([1, 2]), output: String::new() };
        let text = render_observation(&outcome);
        assert_eq!(
            text,
            "Observation:\nExecution logs:\n(no output)\nLast output from code snippet:\n[1,2]"
        );
    }

    #[test]
    fn test_failure_observation_keeps_message_verbatim() {
        let outcome = ExecutionOutcome::execution_failure(
            "ZeroDivisionError: division by zero",
            "before\n",
        );
        let text = render_observation(&outcome);
        assert!(text.starts_with("Observation:\nExecution logs:\nbefore\nError: ZeroDivisionError: division by zero\n"));
    }
}
