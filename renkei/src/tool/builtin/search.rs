//! Service-backed knowledge search tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::tool::{InvocationCtx, ParamType, ToolDescriptor, ToolInvoker};

const DEFAULT_TOP_K: u32 = 5;
const DEFAULT_MIN_SCORE: f32 = 0.0;

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    collection: Option<&'a str>,
    top_k: u32,
    min_score: f32,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: Option<String>,
    #[serde(alias = "text")]
    content: String,
    score: f32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

/// Queries the text-indexing service and renders the hits as an observation.
///
/// The executing agent's knowledge collection, when set, scopes the query
/// unless the model explicitly passes a `collection` argument.
#[derive(Clone)]
pub struct KnowledgeSearchTool {
    client: reqwest::Client,
    endpoint: Arc<str>,
}

impl std::fmt::Debug for KnowledgeSearchTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeSearchTool")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl KnowledgeSearchTool {
    /// Create the tool against the search service base URL.
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
            "knowledge_search",
            "Search the knowledge base for passages relevant to a query",
            endpoint,
        )
        .param("query", ParamType::String)
        .optional_param("top_k", ParamType::Number)
        .optional_param("min_score", ParamType::Number)
    }
}

#[async_trait]
impl ToolInvoker for KnowledgeSearchTool {
    async fn invoke(&self, args: Value, ctx: &InvocationCtx) -> Result<String> {
        let query = args["query"].as_str().unwrap_or_default();
        if query.is_empty() {
            return Err(CoreError::bad_arguments("knowledge_search", "empty query"));
        }
        let top_k = args["top_k"]
            .as_f64()
            .map_or(DEFAULT_TOP_K, |v| v.max(1.0) as u32);
        let min_score = args["min_score"]
            .as_f64()
            .map_or(DEFAULT_MIN_SCORE, |v| v as f32);
        let collection = args["collection"]
            .as_str()
            .map(String::from)
            .or_else(|| ctx.collection.clone());

        let body = SearchRequest {
            query,
            collection: collection.as_deref(),
            top_k,
            min_score,
        };
        let response = self
            .client
            .post(format!("{}/v1/search", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::tool_internal("knowledge_search", e.to_string()))?;
        if !response.status().is_success() {
            return Err(CoreError::tool_internal(
                "knowledge_search",
                format!("search service returned {}", response.status()),
            ));
        }
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| CoreError::tool_internal("knowledge_search", e.to_string()))?;

        debug!(hits = parsed.hits.len(), query, "search complete");
        if parsed.hits.is_empty() {
            return Ok("no results".to_string());
        }
        let mut out = String::new();
        for (i, hit) in parsed.hits.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            match &hit.title {
                Some(title) => {
                    out.push_str(&format!("{}. [{:.2}] {}: {}", i + 1, hit.score, title, hit.content));
                }
                None => out.push_str(&format!("{}. [{:.2}] {}", i + 1, hit.score, hit.content)),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_scopes_to_collection() {
        let body = SearchRequest {
            query: "ownership rules",
            collection: Some("rust-docs"),
            top_k: 3,
            min_score: 0.2,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["collection"], "rust-docs");
        assert_eq!(json["top_k"], 3);
    }

    #[test]
    fn hits_tolerate_text_alias_and_missing_title() {
        let parsed: SearchResponse = serde_json::from_str(
            r#"{"hits": [{"text": "borrow checker", "score": 0.9}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.hits[0].content, "borrow checker");
        assert!(parsed.hits[0].title.is_none());
    }
}
