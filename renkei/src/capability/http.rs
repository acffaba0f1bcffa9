//! HTTP bindings for the capability contracts.
//!
//! The platform's inference and NLP utility services expose small JSON
//! endpoints on localhost; these clients bind the capability traits to them.
//! Streaming chat uses newline-delimited JSON, one [`ChatDelta`] per line.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    ChatCapability, ChatDelta, ChatDeltaStream, ChatOutcome, EmbeddingCapability, SamplingOptions,
    SummaryCapability, TokenUsage, unavailable,
};
use crate::error::{CoreError, Result};
use crate::message::Message;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

fn default_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

fn wire_messages(messages: &[Message]) -> Vec<WireMessage<'_>> {
    messages
        .iter()
        .map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(flatten)]
    options: SamplingOptions,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    content: String,
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// Chat capability backed by the platform's inference service.
#[derive(Clone)]
pub struct HttpChat {
    client: reqwest::Client,
    base_url: Arc<str>,
}

impl std::fmt::Debug for HttpChat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChat")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpChat {
    /// Create a client against the given base URL, e.g. `http://127.0.0.1:8091`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: default_client(),
            base_url: base_url.into().into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat", self.base_url)
    }
}

#[async_trait]
impl ChatCapability for HttpChat {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        options: &SamplingOptions,
    ) -> Result<ChatOutcome> {
        let body = ChatRequest {
            model,
            messages: wire_messages(messages),
            options: *options,
            stream: false,
        };
        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::model_call(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CoreError::model_call(format!(
                "inference service returned {}",
                response.status()
            )));
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CoreError::model_call(e.to_string()))?;
        debug!(model, output_tokens = parsed.output_tokens, "chat complete");
        let usage = TokenUsage::new(parsed.input_tokens, parsed.output_tokens);
        let mut outcome = ChatOutcome::new(parsed.content);
        if !usage.is_zero() {
            outcome = outcome.with_usage(usage);
        }
        Ok(outcome)
    }

    async fn stream_chat(
        &self,
        model: &str,
        messages: &[Message],
        options: &SamplingOptions,
    ) -> Result<ChatDeltaStream> {
        let body = ChatRequest {
            model,
            messages: wire_messages(messages),
            options: *options,
            stream: true,
        };
        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::model_call(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CoreError::model_call(format!(
                "inference service returned {}",
                response.status()
            )));
        }

        // One JSON document per line; a partial trailing line is carried
        // across chunk boundaries.
        let stream = async_stream::try_stream! {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| CoreError::model_call(e.to_string()))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let delta: ChatDelta = serde_json::from_str(line)
                        .map_err(|e| CoreError::model_call(e.to_string()))?;
                    yield delta;
                }
            }
            let tail = buffer.trim();
            if !tail.is_empty() {
                let delta: ChatDelta = serde_json::from_str(tail)
                    .map_err(|e| CoreError::model_call(e.to_string()))?;
                yield delta;
            }
        };
        Ok(Box::pin(stream))
    }
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding capability backed by the platform's NLP utility service.
#[derive(Clone)]
pub struct HttpEmbedding {
    client: reqwest::Client,
    base_url: Arc<str>,
}

impl std::fmt::Debug for HttpEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedding")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpEmbedding {
    /// Create a client against the given base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: default_client(),
            base_url: base_url.into().into(),
        }
    }
}

#[async_trait]
impl EmbeddingCapability for HttpEmbedding {
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .json(&EmbedRequest {
                model,
                input: texts,
            })
            .send()
            .await
            .map_err(|_| unavailable("embedding"))?;
        if !response.status().is_success() {
            return Err(unavailable("embedding"));
        }
        let parsed: EmbedResponse = response.json().await.map_err(|_| unavailable("embedding"))?;
        if parsed.embeddings.len() != texts.len() {
            return Err(unavailable("embedding"));
        }
        Ok(parsed.embeddings)
    }
}

// ---------------------------------------------------------------------------
// Summarization
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SummarizeRequest<'a> {
    text: &'a str,
    max_length: u32,
}

#[derive(Debug, Deserialize)]
struct SummarizeResponse {
    summary: String,
}

/// Summarization capability backed by the platform's NLP utility service.
#[derive(Clone)]
pub struct HttpSummarizer {
    client: reqwest::Client,
    base_url: Arc<str>,
}

impl std::fmt::Debug for HttpSummarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSummarizer")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpSummarizer {
    /// Create a client against the given base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: default_client(),
            base_url: base_url.into().into(),
        }
    }
}

#[async_trait]
impl SummaryCapability for HttpSummarizer {
    async fn summarize(&self, text: &str, max_tokens: u32) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/v1/summarize", self.base_url))
            .json(&SummarizeRequest {
                text,
                max_length: max_tokens,
            })
            .send()
            .await
            .map_err(|_| unavailable("summarization"))?;
        if !response.status().is_success() {
            return Err(unavailable("summarization"));
        }
        let parsed: SummarizeResponse = response
            .json()
            .await
            .map_err(|_| unavailable("summarization"))?;
        Ok(parsed.summary)
    }
}
