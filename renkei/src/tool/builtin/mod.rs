//! Tools registered at process start-up.
//!
//! The in-process pair ([`CalculatorTool`], [`CurrentTimeTool`]) is always
//! available; the service-backed trio is registered when the platform config
//! names the backing services.

mod calculator;
mod nlp;
mod search;
mod time;

pub use calculator::CalculatorTool;
pub use nlp::{TextAnalyzeTool, TextSummarizeTool};
pub use search::KnowledgeSearchTool;
pub use time::CurrentTimeTool;

use std::sync::Arc;

use crate::capability::SummaryCapability;
use crate::error::Result;
use crate::tool::ToolRegistry;

/// Names of the tools this module can register.
pub const BUILTIN_TOOL_NAMES: &[&str] = &[
    "calculator",
    "current_time",
    "knowledge_search",
    "text_analyze",
    "text_summarize",
];

/// Endpoints for the service-backed tools.
#[derive(Debug, Clone, Default)]
pub struct ToolEndpoints {
    /// Base URL of the text-indexing/vector-search service.
    pub search: Option<String>,
    /// Base URL of the NLP utility service.
    pub nlp: Option<String>,
}

/// Register the in-process tools plus whichever service-backed tools have a
/// configured endpoint.
///
/// # Errors
///
/// Propagates duplicate-name failures, which indicate the registry was
/// bootstrapped twice.
pub fn register_defaults(
    registry: &ToolRegistry,
    endpoints: &ToolEndpoints,
    summarizer: Option<Arc<dyn SummaryCapability>>,
) -> Result<()> {
    registry.register(CalculatorTool::descriptor(), CalculatorTool)?;
    registry.register(CurrentTimeTool::descriptor(), CurrentTimeTool)?;

    if let Some(endpoint) = &endpoints.search {
        let tool = KnowledgeSearchTool::new(endpoint);
        registry.register(KnowledgeSearchTool::descriptor(endpoint), tool)?;
    }
    if let Some(endpoint) = &endpoints.nlp {
        let tool = TextAnalyzeTool::new(endpoint);
        registry.register(TextAnalyzeTool::descriptor(endpoint), tool)?;
        if let Some(summarizer) = summarizer {
            let tool = TextSummarizeTool::new(summarizer);
            registry.register(TextSummarizeTool::descriptor(endpoint), tool)?;
        }
    }
    Ok(())
}
