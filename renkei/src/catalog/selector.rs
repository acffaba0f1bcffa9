//! Embedding-based agent selection.
//!
//! Each agent is matched on `name + "\n" + description`. Agent embeddings
//! are cached per `(id, updated_at)`, so an unchanged agent is embedded once
//! per process lifetime; the cache is pruned against the live catalog on
//! every selection, which also evicts entries for updated or deleted agents.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::definition::AgentDefinition;
use super::store::AgentCatalog;
use crate::capability::EmbeddingCapability;
use crate::error::Result;

/// Selector tuning.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Model tag passed to the embedding capability.
    pub embed_model: String,
    /// Best-score floor below which the default agent is used instead.
    pub score_floor: f32,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            embed_model: "default-embed".into(),
            score_floor: 0.3,
        }
    }
}

/// The outcome of a selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Chosen agent id.
    pub agent_id: String,
    /// Normalised confidence in `[0, 1]`; `0.0` for the fallback.
    pub confidence: f32,
}

type EmbeddingKey = (String, i64);

/// Maps an incoming utterance to the best-matching agent.
pub struct AgentSelector {
    catalog: Arc<AgentCatalog>,
    embedder: Option<Arc<dyn EmbeddingCapability>>,
    config: SelectorConfig,
    fallback_model: String,
    cache: Mutex<HashMap<EmbeddingKey, Vec<f32>>>,
}

impl std::fmt::Debug for AgentSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSelector")
            .field("config", &self.config)
            .field("has_embedder", &self.embedder.is_some())
            .finish()
    }
}

impl AgentSelector {
    /// Create a selector over a catalog.
    ///
    /// `fallback_model` is the chat model given to the implicitly-created
    /// default agent.
    #[must_use]
    pub fn new(
        catalog: Arc<AgentCatalog>,
        embedder: Option<Arc<dyn EmbeddingCapability>>,
        config: SelectorConfig,
        fallback_model: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            embedder,
            config,
            fallback_model: fallback_model.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Pick the agent that best matches `user_text`.
    ///
    /// Falls back to the default agent (confidence `0.0`) when the embedding
    /// capability is missing or failing, or when the best score is under the
    /// floor.
    ///
    /// # Errors
    ///
    /// Only when even the fallback agent cannot be created (catalog
    /// persistence failure).
    pub async fn select_by_prompt(&self, user_text: &str) -> Result<Selection> {
        let Some(embedder) = self.embedder.clone() else {
            debug!("no embedding capability, using default agent");
            return self.fallback();
        };

        let mut agents = self.catalog.list();
        if agents.is_empty() {
            return self.fallback();
        }
        // Deterministic scan order doubles as the tie-break: earlier
        // created_at wins, then lexicographic id.
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let agent_vectors = match self.agent_vectors(embedder.as_ref(), &agents).await {
            Ok(vectors) => vectors,
            Err(err) => {
                warn!(error = %err, "agent embedding failed, using default agent");
                return self.fallback();
            }
        };
        let query = match embedder
            .embed(&self.config.embed_model, &[user_text.to_string()])
            .await
        {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            Ok(_) => return self.fallback(),
            Err(err) => {
                warn!(error = %err, "query embedding failed, using default agent");
                return self.fallback();
            }
        };

        let mut best: Option<(&AgentDefinition, f32)> = None;
        for (agent, vector) in agents.iter().zip(&agent_vectors) {
            let score = cosine_similarity(&query, vector);
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((agent, score));
            }
        }
        let Some((agent, score)) = best else {
            return self.fallback();
        };

        let confidence = score.clamp(0.0, 1.0);
        if confidence < self.config.score_floor {
            debug!(best = %agent.id, confidence, "best match under floor");
            return self.fallback();
        }
        debug!(agent = %agent.id, confidence, "agent selected");
        Ok(Selection {
            agent_id: agent.id.clone(),
            confidence,
        })
    }

    /// Embeddings for all agents, from cache where current.
    async fn agent_vectors(
        &self,
        embedder: &dyn EmbeddingCapability,
        agents: &[AgentDefinition],
    ) -> Result<Vec<Vec<f32>>> {
        let mut missing: Vec<(EmbeddingKey, String)> = Vec::new();
        {
            let cache = self
                .cache
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            for agent in agents {
                let key = (agent.id.clone(), agent.updated_at);
                if !cache.contains_key(&key) {
                    missing.push((key, agent.matching_text()));
                }
            }
        }

        if !missing.is_empty() {
            let texts: Vec<String> = missing.iter().map(|(_, text)| text.clone()).collect();
            let vectors = embedder.embed(&self.config.embed_model, &texts).await?;
            let mut cache = self
                .cache
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            for ((key, _), vector) in missing.into_iter().zip(vectors) {
                cache.insert(key, vector);
            }
        }

        // Entries for updated or deleted agents are stale; drop them.
        let live: std::collections::HashSet<EmbeddingKey> = agents
            .iter()
            .map(|a| (a.id.clone(), a.updated_at))
            .collect();
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        cache.retain(|key, _| live.contains(key));
        Ok(agents
            .iter()
            .map(|a| {
                cache
                    .get(&(a.id.clone(), a.updated_at))
                    .cloned()
                    .unwrap_or_default()
            })
            .collect())
    }

    fn fallback(&self) -> Result<Selection> {
        let agent = self.catalog.ensure_default(&self.fallback_model)?;
        Ok(Selection {
            agent_id: agent.id,
            confidence: 0.0,
        })
    }

    /// Number of cached agent embeddings; test hook.
    #[must_use]
    pub fn cached_embeddings(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

/// Cosine similarity of two vectors; `0.0` when either has no magnitude or
/// the dimensions disagree.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::mock::{MockEmbedder, UnavailableEmbedder};
    use crate::catalog::definition::DEFAULT_AGENT_NAME;

    fn catalog() -> (tempfile::TempDir, Arc<AgentCatalog>) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(AgentCatalog::open(dir.path().join("agents.json")));
        (dir, catalog)
    }

    fn agent(name: &str, description: &str) -> AgentDefinition {
        AgentDefinition::new(name, "default-chat").with_description(description)
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn picks_the_closest_agent() {
        let (_dir, catalog) = catalog();
        let translator = catalog
            .create(agent("translator", "Translates between languages"))
            .unwrap();
        catalog
            .create(agent("mathematician", "Solves equations"))
            .unwrap();

        let embedder = MockEmbedder::new()
            .vector(translator.matching_text(), vec![1.0, 0.0])
            .vector("mathematician\nSolves equations", vec![0.0, 1.0])
            .vector("translate this sentence", vec![0.9, 0.1]);
        let selector = AgentSelector::new(
            catalog,
            Some(Arc::new(embedder)),
            SelectorConfig::default(),
            "default-chat",
        );

        let selection = selector
            .select_by_prompt("translate this sentence")
            .await
            .unwrap();
        assert_eq!(selection.agent_id, translator.id);
        assert!(selection.confidence > 0.9);
    }

    #[tokio::test]
    async fn selection_is_deterministic() {
        let (_dir, catalog) = catalog();
        catalog.create(agent("a", "alpha agent")).unwrap();
        catalog.create(agent("b", "beta agent")).unwrap();
        let selector = AgentSelector::new(
            catalog,
            Some(Arc::new(MockEmbedder::new())),
            SelectorConfig {
                score_floor: 0.0,
                ..SelectorConfig::default()
            },
            "default-chat",
        );

        let first = selector.select_by_prompt("hello alpha").await.unwrap();
        for _ in 0..5 {
            let again = selector.select_by_prompt("hello alpha").await.unwrap();
            assert_eq!(again, first);
        }
    }

    #[tokio::test]
    async fn unavailable_embedder_falls_back_to_default_agent() {
        let (_dir, catalog) = catalog();
        catalog.create(agent("specialist", "Niche work")).unwrap();
        let selector = AgentSelector::new(
            Arc::clone(&catalog),
            Some(Arc::new(UnavailableEmbedder)),
            SelectorConfig::default(),
            "default-chat",
        );

        let selection = selector.select_by_prompt("anything").await.unwrap();
        assert_eq!(selection.confidence, 0.0);
        let chosen = catalog.get(&selection.agent_id).unwrap();
        assert_eq!(chosen.name, DEFAULT_AGENT_NAME);
    }

    #[tokio::test]
    async fn missing_embedder_falls_back_to_default_agent() {
        let (_dir, catalog) = catalog();
        let selector = AgentSelector::new(
            Arc::clone(&catalog),
            None,
            SelectorConfig::default(),
            "default-chat",
        );
        let selection = selector.select_by_prompt("anything").await.unwrap();
        assert_eq!(selection.confidence, 0.0);
        assert_eq!(
            catalog.get(&selection.agent_id).unwrap().name,
            DEFAULT_AGENT_NAME
        );
    }

    #[tokio::test]
    async fn unchanged_agents_are_embedded_once() {
        let (_dir, catalog) = catalog();
        catalog.create(agent("a", "alpha")).unwrap();
        catalog.create(agent("b", "beta")).unwrap();
        let selector = AgentSelector::new(
            catalog,
            Some(Arc::new(MockEmbedder::new())),
            SelectorConfig {
                score_floor: 0.0,
                ..SelectorConfig::default()
            },
            "default-chat",
        );

        selector.select_by_prompt("first").await.unwrap();
        assert_eq!(selector.cached_embeddings(), 2);
        selector.select_by_prompt("second").await.unwrap();
        assert_eq!(selector.cached_embeddings(), 2);
    }

    #[tokio::test]
    async fn updated_agent_evicts_its_cache_entry() {
        let (_dir, catalog) = catalog();
        let created = catalog.create(agent("a", "alpha")).unwrap();
        catalog.create(agent("b", "beta")).unwrap();
        let selector = AgentSelector::new(
            Arc::clone(&catalog),
            Some(Arc::new(MockEmbedder::new())),
            SelectorConfig {
                score_floor: 0.0,
                ..SelectorConfig::default()
            },
            "default-chat",
        );

        selector.select_by_prompt("warm the cache").await.unwrap();
        catalog
            .update(&created.id, agent("a", "rewritten"))
            .unwrap();
        selector.select_by_prompt("again").await.unwrap();
        // Still one entry per live agent; the stale key is gone.
        assert_eq!(selector.cached_embeddings(), 2);
    }
}
