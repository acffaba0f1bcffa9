//! Outbound capability contracts consumed by the core.
//!
//! The core never talks to an inference engine, an embedding service, or a
//! summarizer directly; it consumes these traits, and concrete bindings are
//! injected at process start. [`http`] binds them to sibling services over
//! JSON; [`mock`] provides scripted bindings for tests.

pub mod http;
pub mod mock;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::message::Message;

/// Token usage reported by a chat call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    pub input_tokens: u32,
    /// Tokens in the completion.
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Create a usage with the given counts.
    #[must_use]
    pub const fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens across prompt and completion.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    /// Whether nothing was reported.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}

impl std::ops::Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
        }
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

/// Sampling parameters forwarded to the inference layer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SamplingOptions {
    /// Temperature in `[0.0, 2.0]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Result of a chat call.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// The assistant reply text.
    pub content: String,
    /// Usage as reported by the inference layer, if it reports any.
    pub usage: Option<TokenUsage>,
}

impl ChatOutcome {
    /// Create an outcome with no reported usage.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }

    /// Attach reported usage.
    #[must_use]
    pub const fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// One incremental piece of a streaming chat reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatDelta {
    /// Incremental content.
    pub delta: String,
    /// Whether this is the last delta.
    pub done: bool,
    /// Usage, typically present only on the final delta.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Stream of chat deltas.
pub type ChatDeltaStream = Pin<Box<dyn Stream<Item = Result<ChatDelta>> + Send>>;

/// The chat capability: `(model, messages) -> reply`.
#[async_trait]
pub trait ChatCapability: Send + Sync {
    /// Generate a reply for the given conversation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ModelCall`] when the inference layer fails.
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        options: &SamplingOptions,
    ) -> Result<ChatOutcome>;

    /// Generate a reply incrementally.
    ///
    /// The default implementation performs one non-streaming call and yields
    /// a single terminal delta, so bindings only implement this when the
    /// backing service actually streams.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ModelCall`] when the inference layer fails.
    async fn stream_chat(
        &self,
        model: &str,
        messages: &[Message],
        options: &SamplingOptions,
    ) -> Result<ChatDeltaStream> {
        let outcome = self.chat(model, messages, options).await?;
        let delta = ChatDelta {
            delta: outcome.content,
            done: true,
            usage: outcome.usage,
        };
        Ok(Box::pin(futures::stream::once(async move { Ok(delta) })))
    }
}

/// The embedding capability: `(model, texts) -> vectors`.
///
/// Dimensionality is fixed per model but opaque to the core; the selector
/// only ever compares vectors produced by the same model.
#[async_trait]
pub trait EmbeddingCapability: Send + Sync {
    /// Embed a batch of texts.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CapabilityUnavailable`] when the embedding
    /// service cannot be reached; callers fall back per their own policy.
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// The summarization capability used by the context manager.
#[async_trait]
pub trait SummaryCapability: Send + Sync {
    /// Summarize `text` down to roughly `max_tokens` tokens.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CapabilityUnavailable`] on failure; the context
    /// manager then falls back to sliding-window truncation.
    async fn summarize(&self, text: &str, max_tokens: u32) -> Result<String>;
}

/// Helper for bindings that need a consistent unavailable error.
pub(crate) const fn unavailable(capability: &'static str) -> CoreError {
    CoreError::CapabilityUnavailable { capability }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_arithmetic() {
        let a = TokenUsage::new(100, 50);
        let b = TokenUsage::new(10, 5);
        assert_eq!((a + b).total(), 165);

        let mut acc = TokenUsage::default();
        assert!(acc.is_zero());
        acc += a;
        assert_eq!(acc, a);
    }

    #[tokio::test]
    async fn default_stream_falls_back_to_single_delta() {
        use futures::StreamExt;

        let chat = mock::MockChat::scripted(["hello"]);
        let stream = chat
            .stream_chat("m", &[Message::user("hi")], &SamplingOptions::default())
            .await
            .unwrap();
        let deltas: Vec<_> = stream.collect().await;
        assert_eq!(deltas.len(), 1);
        let delta = deltas[0].as_ref().unwrap();
        assert_eq!(delta.delta, "hello");
        assert!(delta.done);
    }
}
