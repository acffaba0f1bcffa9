//! Conversation messages exchanged with the chat capability.

use serde::{Deserialize, Serialize};

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// Tool observation fed back to the model.
    Tool,
}

impl Role {
    /// String form used on the wire and in prompts.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    /// Whether this is a system message.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }
}

/// One message in a conversation, with its estimated token cost.
///
/// The estimate is computed once at construction so the context manager can
/// sum budgets without re-scanning content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who produced the message.
    pub role: Role,
    /// The message text.
    pub content: String,
    /// Heuristic token count of `content`.
    pub estimated_tokens: usize,
}

impl Message {
    /// Create a message with the given role.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        let estimated_tokens = estimate_tokens(&content);
        Self {
            role,
            content,
            estimated_tokens,
        }
    }

    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a tool observation message.
    #[must_use]
    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }
}

/// Estimate the token count of a text.
///
/// Used whenever the inference layer does not report usage. Blends the
/// classic 4-characters-per-token rule with a word-count estimate, since the
/// char rule alone undercounts code and overcounts prose.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let chars = text.chars().count();
    let words = text.split_whitespace().count();
    let by_chars = chars.div_ceil(4);
    let by_words = (words * 4).div_ceil(3);
    ((by_chars + by_words) / 2).max(1)
}

/// Sum of the estimated token counts of a message list.
#[must_use]
pub fn estimate_total(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.estimated_tokens).sum()
}
