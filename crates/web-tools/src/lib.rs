//! # web-tools
//!
//! Tools the agent's code can call to reach the web:
//!
//! - `web_search`: DuckDuckGo search, no key needed
//! - `tavily_search`: Tavily search, needs `TAVILY_API_KEY`
//! - `visit_webpage`: fetch a page and read it as text
//!
//! Each returns a string, so results can be printed, sliced or parsed in
//! the generated Python like any other value.

pub mod error;
pub mod format;
pub mod search;
pub mod tavily;
pub mod visit;

pub use error::{Result, WebToolError};
pub use format::{SearchHit, render_hits, truncate_content};

/// Results returned per search by default
pub const DEFAULT_MAX_RESULTS: usize = 10;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

/// Re-export tools for easy registration
pub mod tools {
    pub use crate::search::DuckDuckGoSearchTool;
    pub use crate::tavily::TavilySearchTool;
    pub use crate::visit::VisitWebpageTool;
}
