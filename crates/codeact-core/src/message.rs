//! Conversation Messages
//!
//! Standard message format passed to LLM providers.

use serde::{Deserialize, Serialize};

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input (the task and every observation)
    User,
    /// Assistant (LLM) response
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Text content
    pub content: String,
}

impl Message {
    /// Create a new message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Estimate token count (rough approximation)
    #[allow(clippy::cast_possible_truncation)]
    pub fn estimate_tokens(&self) -> u32 {
        // ~4 characters per token is a rough estimate
        (self.content.len() / 4) as u32 + 4 // +4 for role overhead
    }
}

/// Check the role ordering a prompt must follow: one leading system
/// message, then user/assistant alternating, starting and ending with user.
pub fn is_well_ordered(messages: &[Message]) -> bool {
    let Some((first, rest)) = messages.split_first() else {
        return false;
    };
    if first.role != Role::System || rest.is_empty() {
        return false;
    }
    let alternates = rest.iter().enumerate().all(|(i, m)| {
        let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
        m.role == expected
    });
    alternates && rest.len() % 2 == 1
}

/// Estimate total tokens in a message list
pub fn estimate_tokens(messages: &[Message]) -> u32 {
    messages.iter().map(Message::estimate_tokens).sum()
}
