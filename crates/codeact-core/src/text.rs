//! Text helpers shared by the executor and the tool crates

/// Keep the head and tail of `content` when it is longer than `max_chars`
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_string();
    }

    let half = max_chars / 2;
    let head: String = content.chars().take(half).collect();
    let tail: String = content.chars().skip(total - half).collect();
    format!(
        "{head}\n..._This content has been truncated to stay below {max_chars} characters_...\n{tail}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncation_keeps_both_ends() {
        let text = "a".repeat(10) + &"b".repeat(10);
        let out = truncate_content(&text, 10);
        assert!(out.starts_with("aaaaa\n"));
        assert!(out.ends_with("\nbbbbb"));
        assert!(out.contains("below 10 characters"));
        assert_eq!(truncate_content("short", 10), "short");
    }

    #[test]
    fn test_counts_chars_not_bytes() {
        let text = "é".repeat(8);
        assert_eq!(truncate_content(&text, 8), text);
        assert!(truncate_content(&text, 4).starts_with("éé\n"));
    }
}
