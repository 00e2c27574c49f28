//! HTTP/WebSocket Handlers

use axum::{
    Json, Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use codeact_core::{AgentError, AgentEvent, RunOutcome, RunReport, prompt::render_observation};

use crate::state::AppState;

/// Build the API router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/run", post(run_handler))
        .route("/api/run/stream", get(run_stream_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider_connected: bool,
    pub model: String,
    pub tools: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub task: String,
    #[serde(default)]
    pub max_steps: Option<usize>,
    #[serde(default)]
    pub model: Option<String>,
}

/// One step as shown to API clients
#[derive(Debug, Serialize)]
pub struct StepView {
    pub index: usize,
    pub summary: Option<String>,
    pub reasoning: String,
    pub code: Option<String>,
    pub observation: String,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub final_answer: Option<Value>,
    pub steps: Vec<StepView>,
    pub provider_retries: u32,
}

impl From<RunReport> for RunResponse {
    fn from(report: RunReport) -> Self {
        let steps = report
            .memory
            .iter()
            .map(|record| StepView {
                index: record.index,
                summary: record.summary.clone(),
                reasoning: record.reasoning.clone(),
                code: record.code.clone(),
                observation: render_observation(&record.outcome),
                duration_ms: record.duration_ms,
            })
            .collect();

        Self {
            run_id: report.run_id,
            final_answer: report.final_answer().cloned(),
            outcome: report.outcome,
            steps,
            provider_retries: report.provider_retries,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Errors returned by the API
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Agent(e) => match e {
                AgentError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
                AgentError::ProviderUnavailable(_) | AgentError::ProviderExhausted { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "PROVIDER_UNAVAILABLE")
                }
                AgentError::Auth(_) | AgentError::Provider(_) => (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR"),
                AgentError::Engine(_) => (StatusCode::SERVICE_UNAVAILABLE, "ENGINE_UNAVAILABLE"),
                e if e.is_config() => (StatusCode::INTERNAL_SERVER_ERROR, "MISCONFIGURED"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "AGENT_ERROR"),
            },
        }
    }

    fn message(&self) -> String {
        match self {
            Self::BadRequest(msg) => msg.clone(),
            Self::Agent(e) => e.user_message(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = ErrorResponse {
            error: self.message(),
            code: code.into(),
        };
        (status, Json(body)).into_response()
    }
}

impl RunRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.task.trim().is_empty() {
            return Err(ApiError::BadRequest("task must not be empty".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider_connected = state.agent.provider().health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        provider_connected,
        model: state.settings.model.clone(),
        tools: state.agent.tools().names().into_iter().map(String::from).collect(),
    })
}

/// Run a task to completion and return the report
pub async fn run_handler(
    State(state): State<AppState>,
    Json(payload): Json<RunRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    payload.validate()?;

    let agent = state.agent_for(payload.model.as_deref())?;
    let max_steps = payload.max_steps.unwrap_or(agent.config().max_steps);

    let report = agent.run_with_max_steps(&payload.task, max_steps).await.map_err(|e| {
        tracing::error!("Agent error: {}", e);
        ApiError::from(e)
    })?;

    Ok(Json(RunResponse::from(report)))
}

/// WebSocket run with step events
///
/// Each text message is a [`RunRequest`]; every [`AgentEvent`] of that run is
/// sent back as JSON, ending with `run_finished` or `run_failed`.
pub async fn run_stream_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

async fn handle_stream(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::error!("WebSocket error: {}", e);
                break;
            }
            _ => continue,
        };

        let request = match serde_json::from_str::<RunRequest>(&msg)
            .map_err(|e| ApiError::BadRequest(e.to_string()))
            .and_then(|r| r.validate().map(|()| r))
        {
            Ok(r) => r,
            Err(e) => {
                if send_error(&mut sender, &e).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let agent = match state.agent_for(request.model.as_deref()) {
            Ok(agent) => agent,
            Err(e) => {
                if send_error(&mut sender, &ApiError::from(e)).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let max_steps = request.max_steps.unwrap_or(agent.config().max_steps);
        let (tx, rx) = mpsc::unbounded_channel();
        let run = tokio::spawn(async move {
            agent.run_with_events(&request.task, max_steps, tx).await
        });

        if !forward_run(&mut sender, rx, run).await {
            break;
        }
    }
}

/// Relay one run's events to the client
///
/// Returns `false` once the client stops accepting frames, after aborting
/// the run. A run task that dies without reporting ends with `run_failed`.
async fn forward_run<S>(
    sender: &mut S,
    mut events: mpsc::UnboundedReceiver<AgentEvent>,
    run: JoinHandle<codeact_core::Result<RunReport>>,
) -> bool
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    let mut run_id = Uuid::nil();
    while let Some(event) = events.recv().await {
        if let AgentEvent::RunStarted { run_id: id, .. } = &event {
            run_id = *id;
        }
        if send_event(sender, &event).await.is_err() {
            tracing::warn!(%run_id, "Client disconnected mid-run, aborting run");
            run.abort();
            return false;
        }
    }

    match run.await {
        Ok(_) => true,
        Err(e) => {
            tracing::error!(%run_id, "Run task failed: {}", e);
            let event = AgentEvent::RunFailed {
                run_id,
                error: format!("run task failed: {e}"),
            };
            send_event(sender, &event).await.is_ok()
        }
    }
}

async fn send_event<S>(sender: &mut S, event: &AgentEvent) -> Result<(), axum::Error>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    let text = serde_json::to_string(event).unwrap_or_else(|e| {
        serde_json::json!({"type": "error", "error": e.to_string()}).to_string()
    });
    sender.send(Message::Text(text.into())).await
}

async fn send_error<S>(sender: &mut S, error: &ApiError) -> Result<(), axum::Error>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    let (_, code) = error.status_and_code();
    let body = serde_json::json!({"type": "error", "error": error.message(), "code": code});
    sender.send(Message::Text(body.to_string().into())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use codeact_core::provider::{Completion, GenerationOptions, LlmProvider, ModelInfo, ProviderInfo};
    use codeact_core::{
        AgentBuilder, EngineReply, ExecutionEngine, ExecutionRequest, Message as ChatMessage, Result,
        ToolDispatch,
    };
    use serde_json::json;
    use tower::ServiceExt;

    use crate::config::Settings;

    /// Always answers with one code block calling `final_answer(42)`
    struct FixedProvider;

    #[async_trait]
    impl LlmProvider for FixedProvider {
        async fn info(&self) -> Result<ProviderInfo> {
            Ok(ProviderInfo {
                name: "fixed".into(),
                version: None,
                models: Vec::new(),
            })
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn complete(&self, _messages: &[ChatMessage], options: &GenerationOptions) -> Result<Completion> {
            Ok(Completion::text(
                "Thought: easy.\nSummary: Answer directly.\nCode:\n```py\nfinal_answer(42)\n```",
                &options.model,
            ))
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(Vec::new())
        }
    }

    /// Treats any code as a call to `final_answer(42)`
    struct AnswerEngine;

    #[async_trait]
    impl ExecutionEngine for AnswerEngine {
        async fn execute(
            &self,
            _request: ExecutionRequest<'_>,
            tools: &mut ToolDispatch<'_>,
        ) -> Result<EngineReply> {
            let value = tools
                .call("final_answer", vec![json!(42)], serde_json::Map::new())
                .await
                .unwrap_or_default();
            Ok(EngineReply::Completed {
                value,
                stdout: String::new(),
                bindings: serde_json::Map::new(),
            })
        }
    }

    fn app() -> Router {
        let agent = AgentBuilder::new()
            .provider(Arc::new(FixedProvider))
            .engine(Arc::new(AnswerEngine))
            .model("fixed")
            .build()
            .unwrap();
        let settings = Settings {
            model: "fixed".into(),
            max_steps: 5,
            tavily_api_key: None,
            visit_max_output_chars: 1000,
            max_output_chars: 2000,
            extra_imports: Vec::new(),
            bind_addr: "127.0.0.1:0".into(),
        };
        router(AppState::new(agent, settings))
    }

    async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["provider_connected"], json!(true));
        assert_eq!(body["tools"], json!(["final_answer"]));
    }

    #[tokio::test]
    async fn test_run_returns_final_answer() {
        let (status, body) = post_json(app(), "/api/run", json!({"task": "what is six times seven?"})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["final_answer"], json!(42));
        assert_eq!(body["outcome"]["status"], json!("final_answer"));
        assert_eq!(body["steps"][0]["summary"], json!("Answer directly."));
        assert_eq!(body["steps"][0]["code"], json!("final_answer(42)"));
    }

    #[tokio::test]
    async fn test_run_with_zero_steps() {
        let (status, body) = post_json(app(), "/api/run", json!({"task": "anything", "max_steps": 0})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"]["status"], json!("step_limit_exceeded"));
        assert_eq!(body["final_answer"], Value::Null);
        assert_eq!(body["steps"], json!([]));
    }

    #[tokio::test]
    async fn test_empty_task_is_rejected() {
        let (status, body) = post_json(app(), "/api/run", json!({"task": "   "})).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], json!("BAD_REQUEST"));
    }

    #[test]
    fn test_error_status_mapping() {
        let err = ApiError::from(AgentError::RateLimited("slow down".into()));
        assert_eq!(err.status_and_code().0, StatusCode::TOO_MANY_REQUESTS);

        let err = ApiError::from(AgentError::ProviderExhausted {
            attempts: 4,
            last: Box::new(AgentError::ProviderUnavailable("down".into())),
        });
        assert_eq!(err.status_and_code().0, StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.message().contains("4 times"));
    }

    fn run_started(run_id: Uuid) -> AgentEvent {
        AgentEvent::RunStarted {
            run_id,
            task: "count".into(),
            max_steps: 1,
        }
    }

    #[tokio::test]
    async fn test_disconnect_aborts_the_run() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
        let run = tokio::spawn(async move {
            let _alive = alive_tx;
            tx.send(run_started(Uuid::new_v4())).ok();
            std::future::pending::<Result<RunReport>>().await
        });

        let mut closed = Box::pin(futures::sink::unfold((), |(), _frame: Message| async {
            Err::<(), axum::Error>(axum::Error::new("connection closed"))
        }));
        assert!(!forward_run(&mut closed, rx, run).await);

        // Aborting drops the task, and with it the oneshot sender
        let dropped = tokio::time::timeout(Duration::from_secs(1), alive_rx).await;
        assert!(matches!(dropped, Ok(Err(_))));
    }

    async fn crashing_run(tx: mpsc::UnboundedSender<AgentEvent>, run_id: Uuid) -> Result<RunReport> {
        tx.send(run_started(run_id)).ok();
        panic!("engine went away");
    }

    #[tokio::test]
    async fn test_crashed_run_ends_with_run_failed() {
        let run_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let run = tokio::spawn(crashing_run(tx, run_id));

        let (frames_tx, frames_rx) = futures::channel::mpsc::unbounded::<Message>();
        let mut sink = frames_tx.sink_map_err(axum::Error::new);
        assert!(forward_run(&mut sink, rx, run).await);
        drop(sink);

        let frames: Vec<Value> = frames_rx
            .map(|frame| match frame {
                Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
                other => panic!("unexpected frame {other:?}"),
            })
            .collect()
            .await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["type"], "run_started");
        assert_eq!(frames[1]["type"], "run_failed");
        assert_eq!(frames[1]["run_id"], json!(run_id));
        assert!(frames[1]["error"].as_str().unwrap().contains("panic"));
    }
}
