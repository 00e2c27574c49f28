//! Tavily Search Tool
//!
//! Search through the Tavily API. Requires `TAVILY_API_KEY`.

use std::time::Duration;

use async_trait::async_trait;
use codeact_core::{ParameterSchema, Result as CoreResult, Tool, ToolCall, ToolSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::DEFAULT_MAX_RESULTS;
use crate::error::{Result, WebToolError};
use crate::format::{SearchHit, render_hits};

const TAVILY_URL: &str = "https://api.tavily.com/search";

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

impl From<TavilyResult> for SearchHit {
    fn from(r: TavilyResult) -> Self {
        Self {
            title: r.title,
            url: r.url,
            snippet: r.content,
        }
    }
}

/// Tool for searching the web through Tavily
pub struct TavilySearchTool {
    client: reqwest::Client,
    api_key: String,
    max_results: usize,
}

impl TavilySearchTool {
    pub fn new(api_key: impl Into<String>, max_results: usize) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(WebToolError::Config("Tavily API key is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_key,
            max_results,
        })
    }

    /// Create from `TAVILY_API_KEY`
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("TAVILY_API_KEY")
            .map_err(|_| WebToolError::Config("TAVILY_API_KEY is not set".into()))?;
        Self::new(key, DEFAULT_MAX_RESULTS)
    }

    async fn search(&self, query: &str) -> Result<String> {
        let response = self
            .client
            .post(TAVILY_URL)
            .bearer_auth(&self.api_key)
            .json(&SearchRequest {
                query,
                max_results: self.max_results,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebToolError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body = response.text().await?;
        let hits = parse_response(&body)?;
        tracing::debug!(query, hits = hits.len(), "Tavily search");

        render_hits(&hits)
    }
}

fn parse_response(body: &str) -> Result<Vec<SearchHit>> {
    let parsed: SearchResponse =
        serde_json::from_str(body).map_err(|e| WebToolError::Parse(e.to_string()))?;
    Ok(parsed.results.into_iter().map(SearchHit::from).collect())
}

#[async_trait]
impl Tool for TavilySearchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "tavily_search",
            "Performs a Tavily web search based on your query (think a Google search) then returns the top search results.",
            "string",
        )
        .parameter(ParameterSchema::required(
            "query",
            "string",
            "The search query to perform.",
        ))
    }

    async fn call(&self, call: &ToolCall) -> CoreResult<Value> {
        let query = call.str_arg("query")?;
        Ok(Value::String(self.search(query).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let body = r#"{"query":"rust","results":[
            {"title":"Rust","url":"https://www.rust-lang.org","content":"Fast and safe.","score":0.9}
        ]}"#;
        let hits = parse_response(body).unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].snippet, "Fast and safe.");
        assert!(render_hits(&hits).unwrap().contains("[Rust](https://www.rust-lang.org)"));
    }

    #[test]
    fn test_empty_results_render_as_error() {
        let hits = parse_response(r#"{"results":[]}"#).unwrap();
        assert!(matches!(render_hits(&hits), Err(WebToolError::NoResults)));
    }

    #[test]
    fn test_empty_key_is_rejected() {
        assert!(matches!(
            TavilySearchTool::new("  ", 5),
            Err(WebToolError::Config(_))
        ));
    }
}
