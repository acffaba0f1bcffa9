//! Service-backed text analysis and summarization tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::SummaryCapability;
use crate::error::{CoreError, Result};
use crate::tool::{InvocationCtx, ParamType, ToolDescriptor, ToolInvoker};

const DEFAULT_SUMMARY_LENGTH: u32 = 200;

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    language: String,
    sentiment: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    entities: Vec<String>,
}

/// Runs the NLP service's analysis over a text and renders the findings.
#[derive(Clone)]
pub struct TextAnalyzeTool {
    client: reqwest::Client,
    endpoint: Arc<str>,
}

impl std::fmt::Debug for TextAnalyzeTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextAnalyzeTool")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl TextAnalyzeTool {
    /// Create the tool against the NLP service base URL.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().into(),
        }
    }

    /// Descriptor for registration.
    #[must_use]
    pub fn descriptor(endpoint: &str) -> ToolDescriptor {
        ToolDescriptor::service(
            "text_analyze",
            "Detect language, sentiment, keywords and entities in a text",
            endpoint,
        )
        .param("text", ParamType::String)
    }
}

#[async_trait]
impl ToolInvoker for TextAnalyzeTool {
    async fn invoke(&self, args: Value, _ctx: &InvocationCtx) -> Result<String> {
        let text = args["text"].as_str().unwrap_or_default();
        if text.is_empty() {
            return Err(CoreError::bad_arguments("text_analyze", "empty text"));
        }
        let response = self
            .client
            .post(format!("{}/v1/analyze", self.endpoint))
            .json(&AnalyzeRequest { text })
            .send()
            .await
            .map_err(|e| CoreError::tool_internal("text_analyze", e.to_string()))?;
        if !response.status().is_success() {
            return Err(CoreError::tool_internal(
                "text_analyze",
                format!("nlp service returned {}", response.status()),
            ));
        }
        let parsed: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| CoreError::tool_internal("text_analyze", e.to_string()))?;
        Ok(format!(
            "language: {}; sentiment: {}; keywords: {}; entities: {}",
            parsed.language,
            parsed.sentiment,
            parsed.keywords.join(", "),
            parsed.entities.join(", "),
        ))
    }
}

/// Condenses a text through the injected summarization capability.
///
/// Shares its backend with the context manager, so both shrink text the same
/// way.
pub struct TextSummarizeTool {
    summarizer: Arc<dyn SummaryCapability>,
}

impl std::fmt::Debug for TextSummarizeTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextSummarizeTool").finish_non_exhaustive()
    }
}

impl TextSummarizeTool {
    /// Create the tool over a summarization capability.
    #[must_use]
    pub fn new(summarizer: Arc<dyn SummaryCapability>) -> Self {
        Self { summarizer }
    }

    /// Descriptor for registration.
    #[must_use]
    pub fn descriptor(endpoint: &str) -> ToolDescriptor {
        ToolDescriptor::service(
            "text_summarize",
            "Summarize a text down to a target length",
            endpoint,
        )
        .param("text", ParamType::String)
        .optional_param("max_length", ParamType::Number)
    }
}

#[async_trait]
impl ToolInvoker for TextSummarizeTool {
    async fn invoke(&self, args: Value, _ctx: &InvocationCtx) -> Result<String> {
        let text = args["text"].as_str().unwrap_or_default();
        if text.is_empty() {
            return Err(CoreError::bad_arguments("text_summarize", "empty text"));
        }
        let max_length = args["max_length"]
            .as_f64()
            .map_or(DEFAULT_SUMMARY_LENGTH, |v| v.max(1.0) as u32);
        self.summarizer.summarize(text, max_length).await
    }
}
