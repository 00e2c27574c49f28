//! codeact HTTP Server
//!
//! Axum-based server running agent tasks over REST and WebSocket.

use codeact_server::{AppState, Settings, bootstrap, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    codeact_server::init_tracing("info,tower_http=debug");

    let settings = Settings::from_env()?;
    let agent = bootstrap::build_agent(&settings, None)?;
    bootstrap::report_provider(&agent).await;

    let addr = settings.bind_addr.clone();
    let app = router(AppState::new(agent, settings));

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 codeact server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health         - Health check");
    tracing::info!("  POST /api/run        - Run a task to completion");
    tracing::info!("  GET  /api/run/stream - WebSocket step events");
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
