//! # codeact-server
//!
//! Launch surfaces for the codeact agent:
//!
//! - `codeact`: run one task from the command line and print the answer
//! - `codeact-server`: HTTP and WebSocket API over the same agent
//!
//! Both read [`config::Settings`] from the environment and build the agent
//! through [`bootstrap::build_agent`].

pub mod bootstrap;
pub mod config;
pub mod handlers;
pub mod state;

pub use config::Settings;
pub use handlers::router;
pub use state::AppState;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber, filtered by `RUST_LOG`
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
