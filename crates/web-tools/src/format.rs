//! Output formatting shared by the web tools

pub use codeact_core::text::truncate_content;

use crate::error::{Result, WebToolError};

/// One search result
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Render hits as a markdown list of links with their snippets
///
/// An empty list is an error so the model is told to rephrase.
pub fn render_hits(hits: &[SearchHit]) -> Result<String> {
    if hits.is_empty() {
        return Err(WebToolError::NoResults);
    }

    let body = hits
        .iter()
        .map(|hit| format!("[{}]({})\n{}", hit.title, hit.url, hit.snippet))
        .collect::<Vec<_>>()
        .join("\n\n");

    Ok(format!("## Search Results\n\n{body}"))
}
