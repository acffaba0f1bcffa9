//! Context window management.
//!
//! Keeps the message list fed to the model inside the model's token budget
//! while preserving as much continuity as possible: summarize the old tail
//! when a summarizer is wired up, slide the window otherwise. Processing an
//! already-compliant list is the identity.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::capability::SummaryCapability;
use crate::message::{Message, Role, estimate_total};

/// Tag prefixed to the synthetic summary message, so a summary is
/// recognisable and is not itself summarized on the next pass.
pub const SUMMARY_TAG: &str = "[Summary of earlier conversation]";

const SUMMARY_TARGET_TOKENS: u32 = 500;

/// Token budget of one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelBudget {
    /// Maximum total tokens the model accepts in one call.
    pub max_tokens: usize,
    /// Tokens reserved for the model's response.
    pub reserved_output: usize,
}

impl ModelBudget {
    /// Tokens usable by the prompt.
    #[must_use]
    pub const fn usable(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserved_output)
    }
}

impl Default for ModelBudget {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            reserved_output: 512,
        }
    }
}

/// Configuration for the context manager.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Budget applied when no entry matches the model name.
    pub default_budget: ModelBudget,
    /// Per-model budgets, matched by exact name first, then by longest
    /// prefix.
    pub budgets: Vec<(String, ModelBudget)>,
    /// Fraction of the usable budget above which summarization kicks in.
    pub summarize_threshold: f32,
    /// How many trailing messages are never summarized.
    pub keep_recent: usize,
    /// Floor below which the sliding window never drops, even over budget.
    pub min_keep: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_budget: ModelBudget::default(),
            budgets: Vec::new(),
            summarize_threshold: 0.75,
            keep_recent: 4,
            min_keep: 4,
        }
    }
}

impl ContextConfig {
    /// Resolve the budget for a model name.
    #[must_use]
    pub fn budget_for(&self, model: &str) -> ModelBudget {
        if let Some((_, budget)) = self.budgets.iter().find(|(name, _)| name == model) {
            return *budget;
        }
        self.budgets
            .iter()
            .filter(|(name, _)| model.starts_with(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map_or(self.default_budget, |(_, budget)| *budget)
    }
}

/// Keeps conversations inside the model's context window.
pub struct ContextManager {
    config: ContextConfig,
    summarizer: Option<Arc<dyn SummaryCapability>>,
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("config", &self.config)
            .field("has_summarizer", &self.summarizer.is_some())
            .finish()
    }
}

impl ContextManager {
    /// Create a manager with the given configuration.
    #[must_use]
    pub fn new(config: ContextConfig, summarizer: Option<Arc<dyn SummaryCapability>>) -> Self {
        Self { config, summarizer }
    }

    /// Create a manager with default budgets and no summarizer.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(ContextConfig::default(), None)
    }

    /// Bring a message list inside the budget of `model`.
    ///
    /// A list already under the summarization threshold is returned
    /// untouched. Never fails: summarizer trouble degrades to the sliding
    /// window, and an irreducible list is returned over budget with a log
    /// line (the inference layer tolerates small overflows).
    pub async fn process(&self, model: &str, messages: Vec<Message>) -> Vec<Message> {
        let budget = self.config.budget_for(model);
        let threshold =
            (budget.usable() as f32 * self.config.summarize_threshold).floor() as usize;
        let total = estimate_total(&messages);
        if total <= threshold {
            return messages;
        }

        debug!(model, total, threshold, "context over threshold");
        if let Some(summarizer) = &self.summarizer {
            match self.summarize(summarizer.as_ref(), &messages).await {
                Some(compacted) => return compacted,
                None => warn!("summarization failed, falling back to sliding window"),
            }
        }
        self.slide(messages, budget)
    }

    /// Compact by summarizing everything but the pinned head and the recent
    /// tail. Returns `None` when there is nothing worth summarizing or the
    /// capability fails.
    async fn summarize(
        &self,
        summarizer: &dyn SummaryCapability,
        messages: &[Message],
    ) -> Option<Vec<Message>> {
        let pinned = pinned_prefix(messages);
        let split = messages
            .len()
            .saturating_sub(self.config.keep_recent)
            .max(pinned);
        let old = &messages[pinned..split];
        if old.is_empty() {
            return None;
        }

        let transcript: String = old
            .iter()
            .map(|m| format!("{}: {}\n", m.role.as_str(), m.content))
            .collect();
        let summary = summarizer
            .summarize(&transcript, SUMMARY_TARGET_TOKENS)
            .await
            .ok()?;

        let mut out = Vec::with_capacity(pinned + 1 + self.config.keep_recent);
        out.extend_from_slice(&messages[..pinned]);
        out.push(Message::system(format!("{SUMMARY_TAG} {summary}")));
        out.extend_from_slice(&messages[split..]);
        debug!(
            summarized = old.len(),
            kept = out.len(),
            "conversation summarized"
        );
        Some(out)
    }

    /// Drop oldest unpinned messages until the list fits, never going below
    /// the keep floor.
    fn slide(&self, mut messages: Vec<Message>, budget: ModelBudget) -> Vec<Message> {
        let usable = budget.usable();
        let pinned = pinned_prefix(&messages);
        while estimate_total(&messages) > usable
            && messages.len() > self.config.min_keep
            && messages.len() > pinned
        {
            messages.remove(pinned);
        }
        let total = estimate_total(&messages);
        if total > usable {
            warn!(total, usable, "context still over budget at keep floor");
        }
        messages
    }
}

/// Length of the leading run of system messages (the agent prompt and any
/// earlier summary), which truncation and summarization never touch.
fn pinned_prefix(messages: &[Message]) -> usize {
    messages
        .iter()
        .take_while(|m| m.role == Role::System)
        .count()
}
