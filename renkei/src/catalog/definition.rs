//! Persistent agent definitions.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Default iteration cap.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
/// Allowed iteration cap range.
pub const MAX_ITERATIONS_RANGE: std::ops::RangeInclusive<u32> = 1..=50;
/// Default execution timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 120;
/// Allowed execution timeout range in seconds.
pub const TIMEOUT_SECONDS_RANGE: std::ops::RangeInclusive<u64> = 10..=600;

/// Name of the agent created implicitly at start-up and used as the
/// selector fallback.
pub const DEFAULT_AGENT_NAME: &str = "default";

/// A persistent configuration bundle under which the execution loop runs.
///
/// Unknown fields in the persisted document are tolerated on load; absent
/// numeric fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Opaque, unique, immutable identifier.
    #[serde(default)]
    pub id: String,
    /// Display name; feeds the selector verbatim.
    pub name: String,
    /// Free-form description; feeds the selector verbatim.
    #[serde(default)]
    pub description: String,
    /// Prepended to every conversation.
    #[serde(default)]
    pub system_prompt: String,
    /// Capability tag routed to the inference layer.
    pub model: String,
    /// Sampling temperature in `[0.0, 2.0]`.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Nucleus sampling parameter.
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Maximum output tokens per model call.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Iteration cap for one execution.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Wall-clock cap for one execution, in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Names of the tools this agent may invoke.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Optional knowledge collection passed to the search tool.
    #[serde(default)]
    pub knowledge_collection: Option<String>,
    /// Creation time, epoch seconds.
    #[serde(default)]
    pub created_at: i64,
    /// Last update time, epoch seconds.
    #[serde(default)]
    pub updated_at: i64,
}

const fn default_temperature() -> f32 {
    0.7
}
const fn default_top_p() -> f32 {
    1.0
}
const fn default_max_output_tokens() -> u32 {
    1024
}
const fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}
const fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl AgentDefinition {
    /// Create a definition with defaults for everything but name and model.
    #[must_use]
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            description: String::new(),
            system_prompt: String::new(),
            model: model.into(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_output_tokens: default_max_output_tokens(),
            max_iterations: default_max_iterations(),
            timeout_seconds: default_timeout_seconds(),
            tools: Vec::new(),
            knowledge_collection: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Set the enabled tool names.
    #[must_use]
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Set the iteration cap.
    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the execution timeout.
    #[must_use]
    pub const fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// The text the selector embeds for this agent.
    #[must_use]
    pub fn matching_text(&self) -> String {
        format!("{}\n{}", self.name, self.description)
    }

    /// Validate field ranges and requireds.
    ///
    /// # Errors
    ///
    /// [`CoreError::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::validation("agent name must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(CoreError::validation("agent model must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(CoreError::validation(format!(
                "temperature {} outside [0.0, 2.0]",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(CoreError::validation(format!(
                "top_p {} outside [0.0, 1.0]",
                self.top_p
            )));
        }
        if !MAX_ITERATIONS_RANGE.contains(&self.max_iterations) {
            return Err(CoreError::validation(format!(
                "max_iterations {} outside [{}, {}]",
                self.max_iterations,
                MAX_ITERATIONS_RANGE.start(),
                MAX_ITERATIONS_RANGE.end()
            )));
        }
        if !TIMEOUT_SECONDS_RANGE.contains(&self.timeout_seconds) {
            return Err(CoreError::validation(format!(
                "timeout_seconds {} outside [{}, {}]",
                self.timeout_seconds,
                TIMEOUT_SECONDS_RANGE.start(),
                TIMEOUT_SECONDS_RANGE.end()
            )));
        }
        Ok(())
    }
}
