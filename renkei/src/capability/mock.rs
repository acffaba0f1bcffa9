//! Scripted capability bindings for tests.
//!
//! These return predefined responses without touching the network, so the
//! whole execution core can be exercised hermetically. They are compiled
//! unconditionally: downstream crates use them in their own tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    ChatCapability, ChatOutcome, EmbeddingCapability, SamplingOptions, SummaryCapability,
    TokenUsage, unavailable,
};
use crate::error::Result;
use crate::message::Message;

/// A scripted chat capability.
///
/// Returns predefined replies in sequence, cycling when exhausted, so a test
/// that loops "always call the calculator" needs only one scripted reply.
#[derive(Debug)]
pub struct MockChat {
    replies: Vec<String>,
    index: AtomicUsize,
    delay: Option<Duration>,
    usage: Option<TokenUsage>,
}

impl MockChat {
    /// Create a mock that replays `replies` in order, cycling.
    #[must_use]
    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: replies.into_iter().map(Into::into).collect(),
            index: AtomicUsize::new(0),
            delay: None,
            usage: None,
        }
    }

    /// Sleep this long before every reply, to exercise deadlines.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Report this usage on every reply instead of leaving it unreported.
    #[must_use]
    pub const fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// How many calls have been made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatCapability for MockChat {
    async fn chat(
        &self,
        _model: &str,
        _messages: &[Message],
        _options: &SamplingOptions,
    ) -> Result<ChatOutcome> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let index = self.index.fetch_add(1, Ordering::SeqCst);
        let content = self
            .replies
            .get(index % self.replies.len().max(1))
            .cloned()
            .unwrap_or_default();
        let mut outcome = ChatOutcome::new(content);
        if let Some(usage) = self.usage {
            outcome = outcome.with_usage(usage);
        }
        Ok(outcome)
    }
}

/// A chat capability that always fails, for model-failure paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingChat;

#[async_trait]
impl ChatCapability for FailingChat {
    async fn chat(
        &self,
        _model: &str,
        _messages: &[Message],
        _options: &SamplingOptions,
    ) -> Result<ChatOutcome> {
        Err(crate::error::CoreError::model_call("mock chat failure"))
    }
}

/// A deterministic embedding capability.
///
/// Texts registered with [`MockEmbedder::vector`] get their fixed vector;
/// everything else gets a vector derived from a byte histogram, which is
/// stable across calls and processes.
#[derive(Debug, Default)]
pub struct MockEmbedder {
    fixed: Mutex<HashMap<String, Vec<f32>>>,
}

impl MockEmbedder {
    /// Create an embedder with no fixed vectors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the embedding of an exact text.
    #[must_use]
    pub fn vector(self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.fixed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(text.into(), vector);
        self
    }

    fn derive(text: &str) -> Vec<f32> {
        let mut v = [0f32; 8];
        for (i, byte) in text.bytes().enumerate() {
            v[i % 8] += f32::from(byte) / 255.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v.to_vec()
    }
}

#[async_trait]
impl EmbeddingCapability for MockEmbedder {
    async fn embed(&self, _model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let fixed = self
            .fixed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(texts
            .iter()
            .map(|t| fixed.get(t).cloned().unwrap_or_else(|| Self::derive(t)))
            .collect())
    }
}

/// An embedding capability that is always down, for fallback paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableEmbedder;

#[async_trait]
impl EmbeddingCapability for UnavailableEmbedder {
    async fn embed(&self, _model: &str, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(unavailable("embedding"))
    }
}

/// A summarizer that produces a fixed-form digest of its input length.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockSummarizer;

#[async_trait]
impl SummaryCapability for MockSummarizer {
    async fn summarize(&self, text: &str, _max_tokens: u32) -> Result<String> {
        Ok(format!("digest of {} chars", text.chars().count()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_replies_cycle() {
        let chat = MockChat::scripted(["first", "second"]);
        let options = SamplingOptions::default();
        let messages = [Message::user("x")];

        for expected in ["first", "second", "first"] {
            let outcome = chat.chat("m", &messages, &options).await.unwrap();
            assert_eq!(outcome.content, expected);
        }
        assert_eq!(chat.calls(), 3);
    }

    #[tokio::test]
    async fn derived_embeddings_are_deterministic() {
        let embedder = MockEmbedder::new();
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let a = embedder.embed("m", &texts).await.unwrap();
        let b = embedder.embed("m", &texts).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a[0], a[1]);
    }

    #[tokio::test]
    async fn fixed_vectors_win_over_derived() {
        let embedder = MockEmbedder::new().vector("pinned", vec![1.0, 0.0]);
        let out = embedder
            .embed("m", &["pinned".to_string()])
            .await
            .unwrap();
        assert_eq!(out[0], vec![1.0, 0.0]);
    }
}
