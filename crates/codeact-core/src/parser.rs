//! Response Parsing
//!
//! Extracts the single ```` ```py ```` block the system prompt asks for.
//! Zero blocks, several blocks, or an empty block all yield
//! [`Action::Missing`]; the parser never picks one candidate out of many.

use std::sync::LazyLock;

use regex::Regex;

use crate::memory::NO_CODE_PRODUCED;

/// Stop marker the model is told to emit after its code block
pub const END_CODE: &str = "<end_code>";

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    // The closing fence must sit alone on its line so ``` inside the code is kept
    Regex::new(r"(?sm)```(?:python|py)\b[^\n]*\n(.*?)^[ \t]*```[ \t]*\r?$")
        .expect("code fence pattern is valid")
});

static SUMMARY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*\**Summary\**\s*:\s*\**\s*(.+?)\s*$").expect("summary pattern is valid")
});

/// Why no code could be taken from a response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseIssue {
    NoCodeBlock,
    MultipleCodeBlocks(usize),
    EmptyCodeBlock,
}

impl ParseIssue {
    /// Message recorded in the step and shown to the model
    pub fn message(self) -> String {
        let detail = match self {
            Self::NoCodeBlock => {
                "your response did not contain a ```py code block.".to_string()
            }
            Self::MultipleCodeBlocks(n) => {
                format!("your response contained {n} ```py code blocks, but exactly one is allowed per step.")
            }
            Self::EmptyCodeBlock => "your ```py code block was empty.".to_string(),
        };
        format!(
            "{NO_CODE_PRODUCED}: {detail} Make sure to write your reasoning, then exactly one block of the form:\nCode:\n```py\n# your python code here\n```{END_CODE}"
        )
    }
}

/// What the model asked to do this step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Exactly one non-empty code block
    Code(String),
    Missing(ParseIssue),
}

/// Parsed model response
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedResponse {
    /// Trimmed text before the code block (the whole response if there is none)
    pub reasoning: String,

    /// Value of a `Summary:` line in the reasoning
    pub summary: Option<String>,

    pub action: Action,
}

impl ParsedResponse {
    pub fn code(&self) -> Option<&str> {
        match &self.action {
            Action::Code(code) => Some(code),
            Action::Missing(_) => None,
        }
    }
}

/// Parse a raw model response
pub fn parse_response(raw: &str) -> ParsedResponse {
    let text = raw.replace(END_CODE, "");
    let blocks: Vec<_> = CODE_FENCE.captures_iter(&text).collect();

    let (reasoning, action) = match blocks.as_slice() {
        [] => (text.trim(), Action::Missing(ParseIssue::NoCodeBlock)),
        [block] => {
            let whole = block.get(0).expect("group 0 always matches");
            let reasoning = text[..whole.start()].trim();
            let code = block.get(1).map_or("", |m| m.as_str()).trim();
            if code.is_empty() {
                (reasoning, Action::Missing(ParseIssue::EmptyCodeBlock))
            } else {
                (reasoning, Action::Code(code.to_string()))
            }
        }
        many => (
            text.trim(),
            Action::Missing(ParseIssue::MultipleCodeBlocks(many.len())),
        ),
    };

    let reasoning = strip_code_label(reasoning).to_string();
    let summary = SUMMARY_LINE
        .captures(&reasoning)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches('*').trim().to_string())
        .filter(|s| !s.is_empty());

    ParsedResponse {
        reasoning,
        summary,
        action,
    }
}

/// Drop a trailing `Code:` label left between the thought and the fence
fn strip_code_label(reasoning: &str) -> &str {
    reasoning
        .strip_suffix("Code:")
        .map_or(reasoning, str::trim_end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_block() {
        let raw = "Thought: I can compute this directly.\nSummary: Add the numbers.\nCode:\n```py\nresult = 2 + 2\nfinal_answer(result)\n```<end_code>";
        let parsed = parse_response(raw);

        assert_eq!(parsed.code(), Some("result = 2 + 2\nfinal_answer(result)"));
        assert_eq!(
            parsed.reasoning,
            "Thought: I can compute this directly.\nSummary: Add the numbers."
        );
        assert_eq!(parsed.summary.as_deref(), Some("Add the numbers."));
    }

    #[test]
    fn test_python_tag_is_accepted() {
        let parsed = parse_response("ok\n```python\nprint(1)\n```");
        assert_eq!(parsed.code(), Some("print(1)"));
    }

    #[test]
    fn test_no_block() {
        let parsed = parse_response("The answer is clearly 4.");
        assert_eq!(parsed.action, Action::Missing(ParseIssue::NoCodeBlock));
        assert_eq!(parsed.reasoning, "The answer is clearly 4.");
        assert!(parsed.summary.is_none());
    }

    #[test]
    fn test_other_languages_do_not_count() {
        let parsed = parse_response("```json\n{\"a\": 1}\n```\n```pyx\nx = 1\n```");
        assert_eq!(parsed.action, Action::Missing(ParseIssue::NoCodeBlock));
    }

    #[test]
    fn test_multiple_blocks_are_ambiguous() {
        let raw = "Try:\n```py\nx = 1\n```\nor:\n```py\nx = 2\n```";
        let first = parse_response(raw);
        let second = parse_response(raw);

        assert_eq!(first.action, Action::Missing(ParseIssue::MultipleCodeBlocks(2)));
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_block() {
        let parsed = parse_response("Thinking\n```py\n\n```");
        assert_eq!(parsed.action, Action::Missing(ParseIssue::EmptyCodeBlock));
    }

    #[test]
    fn test_issue_message_has_no_code_prefix() {
        for issue in [
            ParseIssue::NoCodeBlock,
            ParseIssue::MultipleCodeBlocks(3),
            ParseIssue::EmptyCodeBlock,
        ] {
            assert!(issue.message().starts_with(NO_CODE_PRODUCED));
        }
    }

    #[test]
    fn test_backticks_inside_code_do_not_close_the_block() {
        let raw = "Print a fence.\n```py\nprint(\"```\")\nfinal_answer(\"done\")\n```<end_code>";
        let parsed = parse_response(raw);
        assert_eq!(
            parsed.code(),
            Some("print(\"```\")\nfinal_answer(\"done\")")
        );
    }

    #[test]
    fn test_indented_closing_fence() {
        let parsed = parse_response("```py\nx = 1\n   ```\n");
        assert_eq!(parsed.code(), Some("x = 1"));
    }

    #[test]
    fn test_bold_summary() {
        let parsed = parse_response("**Summary:** Search the web\n```py\nprint(web_search('x'))\n```");
        assert_eq!(parsed.summary.as_deref(), Some("Search the web"));
    }
}
