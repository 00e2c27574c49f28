//! Python Execution Engine
//!
//! Runs each code snippet in a fresh `python3` subprocess driven by a small
//! harness over JSON lines on stdin/stdout:
//!
//! ```text
//! host → python   {"type":"exec", code, bindings, tools, authorized_imports}
//! python → host   {"type":"tool_call", name, args, kwargs}      (0..n times)
//! host → python   {"type":"tool_result", ok, value | error}
//! python → host   {"type":"completed", value, stdout, bindings}
//!               | {"type":"raised", error, stdout}
//! ```
//!
//! Tools are exposed inside Python as plain functions that forward to the
//! host. Imports go through a guarded `__import__` that only admits the
//! authorized modules. Arguments headed for a tool are reduced to JSON:
//! containers stay containers and anything else is sent as its `str()`.
//!
//! Every non-underscore variable comes back as a binding and is restored
//! with its Python type on the next step:
//!
//! - values JSON carries without loss (`str`, `bool`, `None`, 64-bit `int`,
//!   finite `float`, and `list`/`dict` of those with string keys) as is,
//! - imported modules as `{"$py": "module", "name"}`, re-imported through
//!   the guard,
//! - top-level `def`/`class` as `{"$py": "source", "code"}`, replayed,
//! - anything else picklable as `{"$py": "pickle", "data", "repr"}`.
//!
//! Values that fit none of these (lambdas, generators, instances of classes
//! defined in the code) are dropped.
//!
//! This is process isolation with an import allowlist, not a security
//! sandbox: run it inside a container when the model is untrusted.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use codeact_core::{
    AgentError, BASE_BUILTIN_MODULES, Bindings, EngineReply, ExecutionEngine, ExecutionRequest,
    Result, ToolDispatch,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

const HARNESS: &str = r#"
import ast
import base64
import builtins
import contextlib
import io
import json
import math
import pickle
import sys
import types

_HOST_OUT = sys.stdout
_HOST_IN = sys.stdin

_MARK = "$py"
_INT_MIN, _INT_MAX = -(2 ** 63), 2 ** 64 - 1
_SKIP = object()
_PICKLE_MODULES = {"builtins", "copyreg", "_codecs"}


def _send(obj):
    _HOST_OUT.write(json.dumps(obj, ensure_ascii=False, default=repr) + "\n")
    _HOST_OUT.flush()


def _receive():
    line = _HOST_IN.readline()
    if not line:
        raise EOFError("host closed the channel")
    return json.loads(line)


class ToolError(Exception):
    pass


def _wire(value):
    kind = type(value)
    if value is None or kind is bool or kind is str:
        return value
    if kind is int:
        return value if _INT_MIN <= value <= _INT_MAX else str(value)
    if kind is float:
        return value if math.isfinite(value) else str(value)
    if isinstance(value, (list, tuple, set, frozenset)):
        return [_wire(v) for v in value]
    if isinstance(value, dict):
        return {k if type(k) is str else str(k): _wire(v) for k, v in value.items()}
    return str(value)


def _host_call(name, args, kwargs):
    args = [_wire(a) for a in args]
    kwargs = {k: _wire(v) for k, v in kwargs.items()}
    _send({"type": "tool_call", "name": name, "args": args, "kwargs": kwargs})
    reply = _receive()
    if reply.get("type") != "tool_result":
        raise RuntimeError("unexpected reply from host")
    if reply.get("ok"):
        return reply.get("value")
    raise ToolError(reply.get("error") or f"{name}() failed")


def _make_tool(name):
    def tool(*args, **kwargs):
        return _host_call(name, list(args), kwargs)

    tool.__name__ = name
    return tool


def _guarded_import(allowed):
    real_import = builtins.__import__

    def guarded(name, globals=None, locals=None, fromlist=(), level=0):
        root = name.split(".")[0]
        if "*" not in allowed and (level != 0 or root not in allowed):
            raise ImportError(
                f"Import of {name} is not allowed. Authorized imports are: {sorted(allowed)}"
            )
        return real_import(name, globals, locals, fromlist, level)

    return guarded


# JSON carries a value as-is only when decoding gives back the same types
def _plain(value):
    kind = type(value)
    if value is None or kind is bool or kind is str:
        return True
    if kind is int:
        return _INT_MIN <= value <= _INT_MAX
    if kind is float:
        return math.isfinite(value)
    if kind is list:
        return all(_plain(v) for v in value)
    if kind is dict:
        return _MARK not in value and all(type(k) is str and _plain(v) for k, v in value.items())
    return False


def _short_repr(value):
    try:
        text = repr(value)
    except Exception:
        text = f"<{type(value).__name__}>"
    return text if len(text) <= 200 else text[:200] + "..."


def _encode(name, value, sources):
    try:
        if _plain(value):
            return value
    except RecursionError:
        pass
    if isinstance(value, types.ModuleType):
        return {_MARK: "module", "name": value.__name__}
    if isinstance(value, (types.FunctionType, type)) and name in sources and value.__name__ == name:
        return {_MARK: "source", "code": sources[name]}
    try:
        data = pickle.dumps(value, protocol=pickle.HIGHEST_PROTOCOL)
    except Exception:
        return _SKIP
    return {
        _MARK: "pickle",
        "data": base64.b64encode(data).decode("ascii"),
        "repr": _short_repr(value),
    }


def _export(namespace, tools, sources):
    exported = {}
    for name, value in namespace.items():
        if name.startswith("_") or name in tools:
            continue
        encoded = _encode(name, value, sources)
        if encoded is not _SKIP:
            exported[name] = encoded
    return exported


class _Unpickler(pickle.Unpickler):
    def __init__(self, data, allowed):
        super().__init__(io.BytesIO(data))
        self._allowed = allowed

    def find_class(self, module, name):
        root = module.split(".")[0]
        if "*" in self._allowed or root in self._allowed or root in _PICKLE_MODULES:
            return super().find_class(module, name)
        raise pickle.UnpicklingError(f"{module}.{name} is not importable here")


# Returns the definitions replayed from source, keyed by name
def _restore(namespace, bindings, allowed, importer):
    pending = {}
    for name, value in bindings.items():
        kind = value.get(_MARK) if type(value) is dict else None
        try:
            if kind == "pickle":
                namespace[name] = _Unpickler(base64.b64decode(value["data"]), allowed).load()
            elif kind == "module":
                importer(value["name"])
                namespace[name] = sys.modules[value["name"]]
            elif kind == "source":
                pending[name] = value["code"]
            else:
                namespace[name] = value
        except Exception:
            continue

    sources = {}
    # A definition that hits a NameError waits for the others to load
    while pending:
        progress = False
        for name, code in list(pending.items()):
            try:
                exec(compile(code, "<restored>", "exec"), namespace)
            except NameError:
                continue
            except Exception:
                pass
            else:
                sources[name] = code
            del pending[name]
            progress = True
        if not progress:
            break
    return sources


def _definitions(tree):
    return {
        node.name: ast.unparse(node)
        for node in tree.body
        if isinstance(node, (ast.FunctionDef, ast.AsyncFunctionDef, ast.ClassDef))
    }


def _run(request):
    tools = list(request.get("tools") or [])
    allowed = set(request.get("authorized_imports") or [])

    safe_builtins = dict(vars(builtins))
    safe_builtins["__import__"] = _guarded_import(allowed)

    namespace = {"__builtins__": safe_builtins, "__name__": "__main__"}
    for name in tools:
        namespace[name] = _make_tool(name)

    quiet = io.StringIO()
    with contextlib.redirect_stdout(quiet), contextlib.redirect_stderr(quiet):
        sources = _restore(
            namespace, request.get("bindings") or {}, allowed, safe_builtins["__import__"]
        )

    output = io.StringIO()
    value = None
    try:
        tree = ast.parse(request.get("code", ""), filename="<code>", mode="exec")
        sources.update(_definitions(tree))
        last = None
        if tree.body and isinstance(tree.body[-1], ast.Expr):
            last = ast.Expression(tree.body.pop().value)
        with contextlib.redirect_stdout(output), contextlib.redirect_stderr(output):
            exec(compile(tree, "<code>", "exec"), namespace)
            if last is not None:
                value = eval(compile(last, "<code>", "eval"), namespace)
    except BaseException as e:
        return {"type": "raised", "error": f"{type(e).__name__}: {e}", "stdout": output.getvalue()}

    return {
        "type": "completed",
        "value": _wire(value),
        "stdout": output.getvalue(),
        "bindings": _export(namespace, tools, sources),
    }


request = _receive()
if request.get("type") == "exec":
    _send(_run(request))
else:
    _send({"type": "raised", "error": "RuntimeError: expected an exec request", "stdout": ""})
"#;

/// Python engine configuration
#[derive(Clone, Debug)]
pub struct PythonConfig {
    /// Interpreter command, split on whitespace (e.g. `python3`, `uv run python`)
    pub command: String,

    /// Wall-clock limit for one snippet, tool calls included
    pub timeout: Duration,

    /// Top-level modules the code may import; `*` allows everything
    pub authorized_imports: Vec<String>,
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            command: "python3".into(),
            timeout: Duration::from_secs(60),
            authorized_imports: BASE_BUILTIN_MODULES.iter().map(ToString::to_string).collect(),
        }
    }
}

impl PythonConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            command: std::env::var("PYTHON_COMMAND").unwrap_or(defaults.command),
            timeout: std::env::var("EXEC_TIMEOUT_SECS")
                .ok()
                .and_then(|t| t.parse().ok())
                .map_or(defaults.timeout, Duration::from_secs),
            authorized_imports: defaults.authorized_imports,
        }
    }
}

/// Messages the harness writes to stdout
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HarnessEvent {
    ToolCall {
        name: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        kwargs: Map<String, Value>,
    },
    Completed {
        #[serde(default)]
        value: Value,
        #[serde(default)]
        stdout: String,
        #[serde(default)]
        bindings: Bindings,
    },
    Raised {
        error: String,
        #[serde(default)]
        stdout: String,
    },
}

/// One stdout line: a protocol message, or text that leaked past the
/// harness's redirection
#[derive(Debug, PartialEq)]
enum Frame {
    Event(HarnessEvent),
    Stray(String),
}

fn parse_frame(line: &str) -> Frame {
    serde_json::from_str(line.trim())
        .map_or_else(|_| Frame::Stray(line.to_string()), Frame::Event)
}

fn tool_result_frame(result: std::result::Result<Value, String>) -> Value {
    match result {
        Ok(value) => json!({ "type": "tool_result", "ok": true, "value": value }),
        Err(error) => json!({ "type": "tool_result", "ok": false, "error": error }),
    }
}

fn engine_error(context: &str, e: impl std::fmt::Display) -> AgentError {
    AgentError::Engine(format!("{context}: {e}"))
}

// ============================================================================
// Harness Process
// ============================================================================

struct HarnessProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl HarnessProcess {
    fn spawn(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| AgentError::Config("python command is empty".into()))?;

        let mut child = Command::new(program)
            .args(parts)
            .arg("-u")
            .arg("-c")
            .arg(HARNESS)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| engine_error(&format!("failed to spawn `{command_line}`"), e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Engine("failed to capture python stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Engine("failed to capture python stdout".into()))?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    async fn send(&mut self, value: &Value) -> Result<()> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        self.stdin
            .write_all(&line)
            .await
            .map_err(|e| engine_error("failed to write to python", e))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| engine_error("failed to write to python", e))
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        let mut line = String::new();
        let read = self
            .stdout
            .read_line(&mut line)
            .await
            .map_err(|e| engine_error("failed to read from python", e))?;

        if read == 0 {
            let stderr = self.drain_stderr().await;
            return Err(AgentError::Engine(format!(
                "python interpreter exited unexpectedly{}",
                if stderr.is_empty() { String::new() } else { format!(": {stderr}") }
            )));
        }
        Ok(parse_frame(&line))
    }

    async fn drain_stderr(&mut self) -> String {
        let Some(mut stderr) = self.child.stderr.take() else {
            return String::new();
        };
        let mut text = String::new();
        let _ = tokio::time::timeout(Duration::from_secs(1), stderr.read_to_string(&mut text)).await;
        text.trim().to_string()
    }

    async fn shutdown(mut self) {
        let _ = self.stdin.shutdown().await;
        let _ = self.child.kill().await;
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Execution engine backed by a local Python interpreter
#[derive(Clone, Debug, Default)]
pub struct PythonEngine {
    config: PythonConfig,
}

impl PythonEngine {
    pub const fn new(config: PythonConfig) -> Self {
        Self { config }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::new(PythonConfig::from_env())
    }

    pub const fn config(&self) -> &PythonConfig {
        &self.config
    }

    /// Relay tool calls until the harness reports how the code ended
    async fn converse(
        process: &mut HarnessProcess,
        tools: &mut ToolDispatch<'_>,
    ) -> Result<EngineReply> {
        let mut stray = String::new();

        loop {
            match process.read_frame().await? {
                Frame::Stray(line) => stray.push_str(&line),
                Frame::Event(HarnessEvent::ToolCall { name, args, kwargs }) => {
                    let result = tools.call(&name, args, kwargs).await;
                    process.send(&tool_result_frame(result)).await?;
                }
                Frame::Event(HarnessEvent::Completed {
                    value,
                    stdout,
                    bindings,
                }) => {
                    return Ok(EngineReply::Completed {
                        value,
                        stdout: stray + &stdout,
                        bindings,
                    });
                }
                Frame::Event(HarnessEvent::Raised { error, stdout }) => {
                    return Ok(EngineReply::Raised {
                        error,
                        stdout: stray + &stdout,
                    });
                }
            }
        }
    }
}

#[async_trait]
impl ExecutionEngine for PythonEngine {
    async fn execute(
        &self,
        request: ExecutionRequest<'_>,
        tools: &mut ToolDispatch<'_>,
    ) -> Result<EngineReply> {
        let mut process = HarnessProcess::spawn(&self.config.command)?;
        process
            .send(&json!({
                "type": "exec",
                "code": request.code,
                "bindings": request.bindings,
                "tools": tools.tool_names(),
                "authorized_imports": self.config.authorized_imports,
            }))
            .await?;

        let reply = tokio::time::timeout(self.config.timeout, Self::converse(&mut process, tools)).await;
        process.shutdown().await;

        match reply {
            Ok(reply) => reply,
            Err(_) => {
                tracing::warn!(timeout_secs = self.config.timeout.as_secs(), "Code execution timed out");
                Ok(EngineReply::Raised {
                    error: format!(
                        "TimeoutError: code execution exceeded {} seconds",
                        self.config.timeout.as_secs()
                    ),
                    stdout: String::new(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeact_core::{CodeExecutor, ExecutionOutcome, ToolRegistry};
    use std::sync::Arc;

    #[test]
    fn test_parse_tool_call_frame() {
        let frame = parse_frame(r#"{"type":"tool_call","name":"web_search","args":["rust"],"kwargs":{}}"#);
        assert_eq!(
            frame,
            Frame::Event(HarnessEvent::ToolCall {
                name: "web_search".into(),
                args: vec![json!("rust")],
                kwargs: Map::new(),
            })
        );
    }

    #[test]
    fn test_parse_result_frames() {
        let completed = parse_frame(r#"{"type":"completed","value":4,"stdout":"hi\n","bindings":{"x":1}}"#);
        match completed {
            Frame::Event(HarnessEvent::Completed { value, bindings, .. }) => {
                assert_eq!(value, json!(4));
                assert_eq!(bindings["x"], json!(1));
            }
            other => panic!("unexpected frame {other:?}"),
        }

        let raised = parse_frame(r#"{"type":"raised","error":"ZeroDivisionError: division by zero"}"#);
        assert!(matches!(raised, Frame::Event(HarnessEvent::Raised { .. })));
    }

    #[test]
    fn test_non_protocol_lines_are_stray() {
        assert_eq!(parse_frame("hello\n"), Frame::Stray("hello\n".into()));
        assert!(matches!(parse_frame(r#"{"type":"mystery"}"#), Frame::Stray(_)));
    }

    #[test]
    fn test_tool_result_frame() {
        assert_eq!(tool_result_frame(Ok(json!(1)))["ok"], json!(true));
        assert_eq!(tool_result_frame(Err("boom".into()))["error"], json!("boom"));
    }

    // ------------------------------------------------------------------------
    // Against a real interpreter; skipped when python3 is not installed
    // ------------------------------------------------------------------------

    async fn python_available() -> bool {
        Command::new("python3")
            .arg("--version")
            .output()
            .await
            .is_ok_and(|o| o.status.success())
    }

    fn executor(timeout: Duration) -> CodeExecutor {
        let engine = PythonEngine::new(PythonConfig {
            timeout,
            ..PythonConfig::default()
        });
        CodeExecutor::new(Arc::new(engine), Arc::new(ToolRegistry::new()))
    }

    #[tokio::test]
    async fn test_python_final_answer_and_bindings() {
        if !python_available().await {
            return;
        }
        let executor = executor(Duration::from_secs(30));

        let first = executor
            .execute("import math\nx = math.sqrt(16)\nprint('x is', x)\nx * 2", &Bindings::new())
            .await
            .unwrap();
        assert_eq!(
            first.outcome,
            ExecutionOutcome::Success {
                value: json!(8.0),
                output: "x is 4.0\n".into()
            }
        );
        let bindings = first.bindings.unwrap();
        assert_eq!(bindings["x"], json!(4.0));
        assert_eq!(bindings["math"], json!({"$py": "module", "name": "math"}));

        let second = executor.execute("final_answer(x + 1)", &bindings).await.unwrap();
        assert_eq!(second.outcome, ExecutionOutcome::FinalAnswer { value: json!(5.0) });
    }

    #[tokio::test]
    async fn test_python_bindings_keep_their_types() {
        if !python_available().await {
            return;
        }
        let executor = executor(Duration::from_secs(30));

        let code = "import math\n\
                    d = {1: 'a'}\n\
                    n = 2 ** 70\n\
                    t = (1, 2)\n\
                    s = {3}\n\
                    def double(v):\n    return v * 2\n\
                    class Box:\n    def __init__(self, v):\n        self.v = v\n";
        let first = executor.execute(code, &Bindings::new()).await.unwrap();
        assert!(matches!(first.outcome, ExecutionOutcome::Success { .. }), "{:?}", first.outcome);
        let bindings = first.bindings.unwrap();
        for name in ["math", "d", "n", "t", "s", "double", "Box"] {
            assert!(bindings.contains_key(name), "{name} was not carried over");
        }
        assert_eq!(bindings["d"]["$py"], json!("pickle"));
        assert_eq!(bindings["double"]["$py"], json!("source"));

        let second = executor
            .execute(
                "final_answer([d[1], type(n).__name__, n == 2 ** 70, type(t).__name__, \
                 3 in s, double(21), math.sqrt(16), Box(5).v])",
                &bindings,
            )
            .await
            .unwrap();
        assert_eq!(
            second.outcome,
            ExecutionOutcome::FinalAnswer {
                value: json!(["a", "int", true, "tuple", true, 42, 4.0, 5])
            }
        );
    }

    #[tokio::test]
    async fn test_python_plain_values_cross_as_json() {
        if !python_available().await {
            return;
        }
        let executor = executor(Duration::from_secs(30));

        let first = executor
            .execute("ratio = 0.1 + 0.2\nconfig = {'b': 1, 'a': [2, None]}", &Bindings::new())
            .await
            .unwrap();
        let bindings = first.bindings.unwrap();
        assert_eq!(bindings["config"], json!({"b": 1, "a": [2, null]}));

        let second = executor
            .execute("final_answer([list(config), ratio == 0.1 + 0.2])", &bindings)
            .await
            .unwrap();
        assert_eq!(
            second.outcome,
            ExecutionOutcome::FinalAnswer {
                value: json!([["b", "a"], true])
            }
        );
    }

    #[tokio::test]
    async fn test_python_tool_arguments_need_not_be_json() {
        if !python_available().await {
            return;
        }
        let executor = executor(Duration::from_secs(30));

        let outcome = executor
            .execute("import datetime\nfinal_answer(datetime.date(2024, 7, 22))", &Bindings::new())
            .await
            .unwrap()
            .outcome;
        assert_eq!(outcome, ExecutionOutcome::FinalAnswer { value: json!("2024-07-22") });

        let outcome = executor
            .execute("final_answer((1, 2 ** 70, {2: 'b'}))", &Bindings::new())
            .await
            .unwrap()
            .outcome;
        assert_eq!(
            outcome,
            ExecutionOutcome::FinalAnswer {
                value: json!([1, "1180591620717411303424", {"2": "b"}])
            }
        );
    }

    #[tokio::test]
    async fn test_python_errors_are_reported_verbatim() {
        if !python_available().await {
            return;
        }
        let executor = executor(Duration::from_secs(30));

        let outcome = executor
            .execute("print('before')\n1/0", &Bindings::new())
            .await
            .unwrap()
            .outcome;
        assert_eq!(
            outcome,
            ExecutionOutcome::execution_failure("ZeroDivisionError: division by zero", "before\n")
        );
    }

    #[tokio::test]
    async fn test_python_unauthorized_import() {
        if !python_available().await {
            return;
        }
        let outcome = executor(Duration::from_secs(30))
            .execute("import os", &Bindings::new())
            .await
            .unwrap()
            .outcome;

        match outcome {
            ExecutionOutcome::Failure { message, .. } => {
                assert!(message.starts_with("ImportError: Import of os is not allowed"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_python_bad_tool_arguments_raise_in_code() {
        if !python_available().await {
            return;
        }
        let outcome = executor(Duration::from_secs(30))
            .execute("final_answer(1, 2)", &Bindings::new())
            .await
            .unwrap()
            .outcome;

        match outcome {
            ExecutionOutcome::Failure { message, .. } => {
                assert!(message.starts_with("ToolError:"), "{message}");
                assert!(message.contains("positional"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_python_timeout() {
        if !python_available().await {
            return;
        }
        let outcome = executor(Duration::from_secs(1))
            .execute("while True:\n    pass", &Bindings::new())
            .await
            .unwrap()
            .outcome;

        assert_eq!(
            outcome,
            ExecutionOutcome::execution_failure("TimeoutError: code execution exceeded 1 seconds", "")
        );
    }
}
