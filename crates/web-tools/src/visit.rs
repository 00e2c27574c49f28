//! Visit Webpage Tool
//!
//! Fetches a page and returns it as readable text. Fetch failures come back
//! as the tool's output rather than as errors, so the model can read them
//! and pick another URL.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use codeact_core::{ParameterSchema, Result as CoreResult, Tool, ToolCall, ToolSpec};
use regex::Regex;
use serde_json::Value;

use crate::USER_AGENT;
use crate::error::Result;
use crate::format::truncate_content;

/// Default cap on returned characters
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 40_000;

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);
const TEXT_WIDTH: usize = 120;

static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank line pattern is valid"));

/// Tool for reading a webpage
pub struct VisitWebpageTool {
    client: reqwest::Client,
    max_output_chars: usize,
}

impl VisitWebpageTool {
    pub fn new(max_output_chars: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            max_output_chars,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(DEFAULT_MAX_OUTPUT_CHARS)
    }

    async fn visit(&self, url: &str) -> String {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return "The request timed out. Please try again later or check the URL.".into();
            }
            Err(e) => return format!("Error fetching the webpage: {e}"),
        };

        if let Err(e) = response.error_for_status_ref() {
            return format!("Error fetching the webpage: {e}");
        }

        match response.text().await {
            Ok(html) => {
                tracing::debug!(url, bytes = html.len(), "Fetched webpage");
                render_page(&html, self.max_output_chars)
            }
            Err(e) => format!("Error fetching the webpage: {e}"),
        }
    }
}

/// Convert HTML to text, squeeze blank runs and cap the length
pub fn render_page(html: &str, max_chars: usize) -> String {
    let text = html2text::from_read(html.as_bytes(), TEXT_WIDTH)
        .unwrap_or_else(|_| html.to_string());
    let text = BLANK_RUNS.replace_all(text.trim(), "\n\n");
    truncate_content(&text, max_chars)
}

#[async_trait]
impl Tool for VisitWebpageTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "visit_webpage",
            "Visits a webpage at the given url and reads its content as a markdown string. Use this to browse webpages.",
            "string",
        )
        .parameter(ParameterSchema::required(
            "url",
            "string",
            "The url of the webpage to visit.",
        ))
    }

    async fn call(&self, call: &ToolCall) -> CoreResult<Value> {
        let url = call.str_arg("url")?;
        Ok(Value::String(self.visit(url).await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_page_strips_markup() {
        let html = "<html><body><h1>Title</h1><p>First paragraph.</p><br><br><br><br><p>Second.</p></body></html>";
        let text = render_page(html, 1000);

        assert!(text.contains("Title"));
        assert!(text.contains("First paragraph."));
        assert!(!text.contains("<p>"));
        assert!(!text.contains("\n\n\n"));
    }

    #[test]
    fn test_render_page_truncates() {
        let html = format!("<p>{}</p>", "word ".repeat(500));
        let text = render_page(&html, 100);
        assert!(text.contains("truncated to stay below 100 characters"));
    }

    #[tokio::test]
    async fn test_unreachable_url_is_reported_as_text() {
        let tool = VisitWebpageTool::with_defaults().unwrap();
        let call = ToolCall::new("visit_webpage").with_argument("url", "http://127.0.0.1:9/");
        let value = tool.call(&call).await.unwrap();

        assert!(value.as_str().unwrap().starts_with("Error fetching the webpage"));
    }
}
