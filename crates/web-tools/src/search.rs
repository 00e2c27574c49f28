//! DuckDuckGo Search Tool
//!
//! Queries the DuckDuckGo HTML endpoint and scrapes the result list. Needs
//! no API key.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use codeact_core::{ParameterSchema, Result as CoreResult, Tool, ToolCall, ToolSpec};
use scraper::{Html, Selector};
use serde_json::Value;

use crate::error::{Result, WebToolError};
use crate::format::{SearchHit, render_hits};
use crate::{DEFAULT_MAX_RESULTS, USER_AGENT};

const SEARCH_URL: &str = "https://html.duckduckgo.com/html/";

static RESULT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".result").expect("result selector is valid"));
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".result__a").expect("title selector is valid"));
static SNIPPET: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".result__snippet").expect("snippet selector is valid"));

/// Tool for searching the web through DuckDuckGo
pub struct DuckDuckGoSearchTool {
    client: reqwest::Client,
    max_results: usize,
}

impl DuckDuckGoSearchTool {
    pub fn new(max_results: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            max_results,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(DEFAULT_MAX_RESULTS)
    }

    async fn search(&self, query: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{SEARCH_URL}?q={}", urlencoding::encode(query)))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebToolError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let html = response.text().await?;
        let hits = parse_results(&html, self.max_results);
        tracing::debug!(query, hits = hits.len(), "DuckDuckGo search");

        render_hits(&hits)
    }
}

#[async_trait]
impl Tool for DuckDuckGoSearchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "web_search",
            "Performs a duckduckgo web search based on your query (think a Google search) then returns the top search results.",
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

/// Pull titles, target URLs and snippets out of a result page
pub fn parse_results(html: &str, limit: usize) -> Vec<SearchHit> {
    let document = Html::parse_document(html);

    document
        .select(&RESULT)
        .filter_map(|result| {
            let link = result.select(&TITLE).next()?;
            let title = collapse_text(link.text());
            let url = link.value().attr("href").map(unwrap_redirect)?;
            let snippet = result
                .select(&SNIPPET)
                .next()
                .map(|el| collapse_text(el.text()))
                .unwrap_or_default();

            (!title.is_empty() && !url.is_empty()).then_some(SearchHit {
                title,
                url,
                snippet,
            })
        })
        .take(limit)
        .collect()
}

fn collapse_text<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// DuckDuckGo links point at a redirector carrying the target in `uddg=`
fn unwrap_redirect(href: &str) -> String {
    href.split_once("uddg=")
        .map(|(_, rest)| rest.split('&').next().unwrap_or(rest))
        .and_then(|encoded| urlencoding::decode(encoded).ok())
        .map_or_else(|| href.to_string(), std::borrow::Cow::into_owned)
}
