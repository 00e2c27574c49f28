//! Tool System
//!
//! Tools are the capabilities generated code may call as ordinary Python
//! functions. Each tool declares an ordered parameter schema which is used
//! both for prompt rendering and for binding positional/keyword arguments.
//! The registry preserves registration order so prompts are reproducible.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AgentError, Result};

/// Name of the designated termination tool
pub const FINAL_ANSWER_TOOL: &str = "final_answer";

/// A bound tool invocation: arguments keyed by parameter name
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool identifier
    pub name: String,

    /// Arguments as key-value pairs
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Map::new(),
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    /// Get a raw argument
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }

    /// Get a required string argument
    pub fn str_arg(&self, name: &str) -> Result<&str> {
        self.arguments
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AgentError::ToolValidation(format!(
                    "{}() expects a string for argument '{name}'",
                    self.name
                ))
            })
    }

    /// Get an optional non-negative integer argument
    pub fn usize_arg_or(&self, name: &str, default: usize) -> usize {
        self.arguments
            .get(name)
            .and_then(Value::as_u64)
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(default)
    }
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// Type name shown to the model (string, integer, number, boolean, any, ...)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether the parameter may be omitted
    #[serde(default)]
    pub optional: bool,
}

impl ParameterSchema {
    pub fn required(
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            optional: false,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            optional: true,
            ..Self::required(name, param_type, description)
        }
    }
}

/// Tool definition schema, rendered into the system prompt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique tool identifier (must be a valid Python identifier)
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// Parameter definitions, in positional order
    pub parameters: Vec<ParameterSchema>,

    /// Type name of the returned value
    pub output_type: String,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        output_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            output_type: output_type.into(),
        }
    }

    pub fn parameter(mut self, parameter: ParameterSchema) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Python-style signature, e.g. `web_search(query: string) -> string`
    pub fn signature(&self) -> String {
        let params = self
            .parameters
            .iter()
            .map(|p| {
                if p.optional {
                    format!("{}: {} = None", p.name, p.param_type)
                } else {
                    format!("{}: {}", p.name, p.param_type)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({params}) -> {}", self.name, self.output_type)
    }

    /// Check the spec can be exposed as a Python callable
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.name) {
            return Err(AgentError::Config(format!(
                "tool name '{}' is not a valid identifier",
                self.name
            )));
        }

        let mut seen_optional = false;
        for (i, param) in self.parameters.iter().enumerate() {
            if !is_identifier(&param.name) {
                return Err(AgentError::Config(format!(
                    "parameter '{}' of tool '{}' is not a valid identifier",
                    param.name, self.name
                )));
            }
            if self.parameters[..i].iter().any(|p| p.name == param.name) {
                return Err(AgentError::Config(format!(
                    "tool '{}' declares parameter '{}' twice",
                    self.name, param.name
                )));
            }
            if seen_optional && !param.optional {
                return Err(AgentError::Config(format!(
                    "tool '{}' declares required parameter '{}' after an optional one",
                    self.name, param.name
                )));
            }
            seen_optional |= param.optional;
        }

        Ok(())
    }

    /// Bind positional and keyword arguments to the declared parameters
    pub fn bind(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<ToolCall> {
        if args.len() > self.parameters.len() {
            return Err(AgentError::ToolValidation(format!(
                "{}() takes {} positional arguments but {} were given",
                self.name,
                self.parameters.len(),
                args.len()
            )));
        }

        let mut call = ToolCall::new(&self.name);
        for (param, value) in self.parameters.iter().zip(args) {
            call.arguments.insert(param.name.clone(), value);
        }

        for (key, value) in kwargs {
            if !self.parameters.iter().any(|p| p.name == key) {
                return Err(AgentError::ToolValidation(format!(
                    "{}() got an unexpected keyword argument '{key}'",
                    self.name
                )));
            }
            if call.arguments.contains_key(&key) {
                return Err(AgentError::ToolValidation(format!(
                    "{}() got multiple values for argument '{key}'",
                    self.name
                )));
            }
            call.arguments.insert(key, value);
        }

        if let Some(missing) = self
            .parameters
            .iter()
            .find(|p| !p.optional && !call.arguments.contains_key(&p.name))
        {
            return Err(AgentError::ToolValidation(format!(
                "{}() missing required argument '{}'",
                self.name, missing.name
            )));
        }

        Ok(call)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool's schema
    fn spec(&self) -> ToolSpec;

    /// Run the tool with bound arguments
    ///
    /// An `Err` is raised as an exception inside the executed code.
    async fn call(&self, call: &ToolCall) -> Result<Value>;
}

struct RegisteredTool {
    spec: ToolSpec,
    implementation: Arc<dyn Tool>,
}

/// Registry for available tools
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Registry holding only the [`FinalAnswerTool`]
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.tools.push(RegisteredTool {
            spec: FinalAnswerTool.spec(),
            implementation: Arc::new(FinalAnswerTool),
        });
        registry.index.insert(FINAL_ANSWER_TOOL.into(), 0);
        registry
    }

    /// Registry with no tools at all, not even the termination tool
    pub fn empty() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a new tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    /// Register a shared tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let spec = tool.spec();
        spec.validate()?;

        if self.index.contains_key(&spec.name) {
            return Err(AgentError::DuplicateTool(spec.name));
        }

        tracing::debug!(tool = %spec.name, "Registered tool");
        self.index.insert(spec.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool {
            spec,
            implementation: tool,
        });
        Ok(())
    }

    /// Tool specs in registration order
    pub fn describe(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.iter().map(|t| &t.spec)
    }

    /// Get a tool's spec by name
    pub fn spec_of(&self, name: &str) -> Option<&ToolSpec> {
        self.index.get(name).map(|&i| &self.tools[i].spec)
    }

    /// Get a tool implementation by name
    pub fn implementation_of(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index
            .get(name)
            .map(|&i| Arc::clone(&self.tools[i].implementation))
    }

    /// Fail unless the termination tool is registered
    pub fn ensure_final_answer(&self) -> Result<()> {
        if self.index.contains_key(FINAL_ANSWER_TOOL) {
            Ok(())
        } else {
            Err(AgentError::MissingFinalAnswerTool(FINAL_ANSWER_TOOL.into()))
        }
    }

    /// Bind arguments and call a tool by name
    pub async fn invoke(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value> {
        let (Some(spec), Some(tool)) = (self.spec_of(name), self.implementation_of(name)) else {
            return Err(AgentError::ToolNotFound(name.to_string()));
        };

        let call = spec.bind(args, kwargs)?;
        tool.call(&call).await
    }

    /// Get tool names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.spec.name.as_str()).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ============================================================================
// Built-in Tools
// ============================================================================

/// Termination tool: returns its argument, which becomes the run's result
pub struct FinalAnswerTool;

#[async_trait]
impl Tool for FinalAnswerTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            FINAL_ANSWER_TOOL,
            "Provides a final answer to the given problem. The answer supports full Markdown formatting including bold/italic text, lists, code blocks, tables, headers, and links.",
            "any",
        )
        .parameter(ParameterSchema::required(
            "answer",
            "any",
            "The final answer to the problem. Can include Markdown formatting for better presentation.",
        ))
    }

    async fn call(&self, call: &ToolCall) -> Result<Value> {
        Ok(call.get("answer").cloned().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("echo", "Echo text back", "string")
                .parameter(ParameterSchema::required("text", "string", "Text to echo"))
                .parameter(ParameterSchema::optional("times", "integer", "Repeat count"))
        }

        async fn call(&self, call: &ToolCall) -> Result<Value> {
            let text = call.str_arg("text")?;
            Ok(Value::String(text.repeat(call.usize_arg_or("times", 1))))
        }
    }

    #[test]
    fn test_registry_starts_with_final_answer() {
        let registry = ToolRegistry::new();
        assert_eq!(registry.names(), vec![FINAL_ANSWER_TOOL]);
        assert!(registry.ensure_final_answer().is_ok());
        assert!(ToolRegistry::empty().ensure_final_answer().is_err());
    }

    #[test]
    fn test_registration_order_is_preserved() {
        let mut registry = ToolRegistry::empty();
        registry.register(EchoTool).unwrap();
        registry.register(FinalAnswerTool).unwrap();

        let names: Vec<_> = registry.describe().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["echo", FINAL_ANSWER_TOOL]);
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();

        let err = registry.register(EchoTool).unwrap_err();
        assert!(matches!(err, AgentError::DuplicateTool(name) if name == "echo"));

        let err = registry.register(FinalAnswerTool).unwrap_err();
        assert!(err.is_config());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_signature() {
        assert_eq!(
            EchoTool.spec().signature(),
            "echo(text: string, times: integer = None) -> string"
        );
    }

    #[test]
    fn test_bind_positional_and_keyword() {
        let spec = EchoTool.spec();

        let call = spec.bind(vec![json!("hi")], Map::new()).unwrap();
        assert_eq!(call.get("text"), Some(&json!("hi")));

        let mut kwargs = Map::new();
        kwargs.insert("times".into(), json!(2));
        let call = spec.bind(vec![json!("hi")], kwargs).unwrap();
        assert_eq!(call.usize_arg_or("times", 1), 2);
    }

    #[test]
    fn test_bind_errors() {
        let spec = EchoTool.spec();

        let err = spec.bind(vec![], Map::new()).unwrap_err();
        assert!(err.to_string().contains("missing required argument 'text'"));

        let err = spec
            .bind(vec![json!("a"), json!(1), json!(2)], Map::new())
            .unwrap_err();
        assert!(err.to_string().contains("takes 2 positional arguments but 3 were given"));

        let mut kwargs = Map::new();
        kwargs.insert("colour".into(), json!("red"));
        let err = spec.bind(vec![json!("a")], kwargs).unwrap_err();
        assert!(err.to_string().contains("unexpected keyword argument 'colour'"));

        let mut kwargs = Map::new();
        kwargs.insert("text".into(), json!("b"));
        let err = spec.bind(vec![json!("a")], kwargs).unwrap_err();
        assert!(err.to_string().contains("multiple values for argument 'text'"));
    }

    #[test]
    fn test_invalid_spec_is_rejected() {
        struct BadName;

        #[async_trait]
        impl Tool for BadName {
            fn spec(&self) -> ToolSpec {
                ToolSpec::new("web-search", "dash is not allowed", "string")
            }

            async fn call(&self, _call: &ToolCall) -> Result<Value> {
                Ok(Value::Null)
            }
        }

        let mut registry = ToolRegistry::new();
        assert!(matches!(registry.register(BadName), Err(AgentError::Config(_))));
    }

    #[tokio::test]
    async fn test_invoke() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();

        let value = registry
            .invoke("echo", vec![json!("ab"), json!(3)], Map::new())
            .await
            .unwrap();
        assert_eq!(value, json!("ababab"));

        let answer = registry
            .invoke(FINAL_ANSWER_TOOL, vec![json!(4)], Map::new())
            .await
            .unwrap();
        assert_eq!(answer, json!(4));

        let err = registry.invoke("nope", vec![], Map::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolNotFound(_)));
    }

    #[test]
    fn test_tool_call_is_name_and_arguments() {
        let call = ToolCall::new("echo").with_argument("text", "a");
        assert_eq!(
            serde_json::to_value(&call).unwrap(),
            json!({"name": "echo", "arguments": {"text": "a"}})
        );
    }

    #[tokio::test]
    async fn test_implementation_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();

        let echo = registry.implementation_of("echo").unwrap();
        assert_eq!(echo.spec().name, "echo");
        let call = ToolCall::new("echo").with_argument("text", "hey");
        assert_eq!(echo.call(&call).await.unwrap(), json!("hey"));

        assert!(registry.implementation_of("nope").is_none());
        assert!(registry.spec_of("nope").is_none());
    }
}
