//! The durable agent catalog.
//!
//! The whole catalog is one JSON document, rewritten atomically (write to a
//! temp file in the same directory, then rename) on every mutation while the
//! writer lock is held. A failed write rolls the in-memory state back, so
//! callers observe the mutation as if it never happened.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::definition::{AgentDefinition, DEFAULT_AGENT_NAME};
use crate::error::{CoreError, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    agents: Vec<AgentDefinition>,
}

/// Durable store of agent definitions.
///
/// Reads hand out clones; stored definitions can only change through
/// [`AgentCatalog::update`].
#[derive(Debug)]
pub struct AgentCatalog {
    path: PathBuf,
    agents: RwLock<BTreeMap<String, AgentDefinition>>,
}

impl AgentCatalog {
    /// Open the catalog at `path`, loading the existing document if any.
    ///
    /// A missing or malformed file falls back to an empty catalog; the
    /// condition is logged, never fatal.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let agents = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<CatalogDocument>(&bytes) {
                Ok(doc) => {
                    info!(agents = doc.agents.len(), path = %path.display(), "catalog loaded");
                    doc.agents.into_iter().map(|a| (a.id.clone(), a)).collect()
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "malformed catalog, starting empty");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no catalog file, starting empty");
                BTreeMap::new()
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "catalog unreadable, starting empty");
                BTreeMap::new()
            }
        };
        Self {
            path,
            agents: RwLock::new(agents),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, AgentDefinition>> {
        self.agents
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, AgentDefinition>> {
        self.agents
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
    }

    /// Serialize the given state to disk atomically.
    fn persist(path: &Path, agents: &BTreeMap<String, AgentDefinition>) -> Result<()> {
        let doc = CatalogDocument {
            agents: agents.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&doc)
            .map_err(|e| CoreError::persistence(e.to_string()))?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::persistence(e.to_string()))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &bytes).map_err(|e| CoreError::persistence(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| CoreError::persistence(e.to_string()))?;
        Ok(())
    }

    /// Create an agent.
    ///
    /// An empty id is replaced with a fresh uuid; a caller-supplied id is
    /// kept. Returns the stored definition with timestamps filled in.
    ///
    /// # Errors
    ///
    /// [`CoreError::Validation`], [`CoreError::DuplicateId`], or
    /// [`CoreError::CatalogPersistence`] (in which case nothing changed).
    pub fn create(&self, mut definition: AgentDefinition) -> Result<AgentDefinition> {
        definition.validate()?;
        if definition.id.is_empty() {
            definition.id = Uuid::new_v4().to_string();
        }
        let now = Self::now();
        definition.created_at = now;
        definition.updated_at = now;

        let mut agents = self.write();
        if agents.contains_key(&definition.id) {
            return Err(CoreError::DuplicateId(definition.id));
        }
        agents.insert(definition.id.clone(), definition.clone());
        if let Err(err) = Self::persist(&self.path, &agents) {
            agents.remove(&definition.id);
            return Err(err);
        }
        info!(agent = %definition.id, name = %definition.name, "agent created");
        Ok(definition)
    }

    /// Replace the mutable fields of an agent.
    ///
    /// The id and `created_at` are preserved; `updated_at` is refreshed.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`], [`CoreError::Validation`], or
    /// [`CoreError::CatalogPersistence`] (in which case nothing changed).
    pub fn update(&self, id: &str, mut definition: AgentDefinition) -> Result<AgentDefinition> {
        definition.validate()?;
        let mut agents = self.write();
        let previous = agents
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("agent", id))?;

        definition.id = previous.id.clone();
        definition.created_at = previous.created_at;
        definition.updated_at = Self::now().max(previous.updated_at + 1);

        agents.insert(id.to_string(), definition.clone());
        if let Err(err) = Self::persist(&self.path, &agents) {
            agents.insert(id.to_string(), previous);
            return Err(err);
        }
        info!(agent = %id, "agent updated");
        Ok(definition)
    }

    /// Delete an agent.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] or [`CoreError::CatalogPersistence`] (in
    /// which case nothing changed).
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut agents = self.write();
        let previous = agents
            .remove(id)
            .ok_or_else(|| CoreError::not_found("agent", id))?;
        if let Err(err) = Self::persist(&self.path, &agents) {
            agents.insert(id.to_string(), previous);
            return Err(err);
        }
        info!(agent = %id, "agent deleted");
        Ok(())
    }

    /// Fetch one agent by id.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`].
    pub fn get(&self, id: &str) -> Result<AgentDefinition> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("agent", id))
    }

    /// All agents, cloned out of the store.
    #[must_use]
    pub fn list(&self) -> Vec<AgentDefinition> {
        self.read().values().cloned().collect()
    }

    /// Number of agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Fetch the fallback agent, creating it if absent.
    ///
    /// # Errors
    ///
    /// [`CoreError::CatalogPersistence`] when the implicit create cannot be
    /// stored.
    pub fn ensure_default(&self, model: &str) -> Result<AgentDefinition> {
        if let Some(existing) = self
            .read()
            .values()
            .find(|a| a.name == DEFAULT_AGENT_NAME)
        {
            return Ok(existing.clone());
        }
        let definition = AgentDefinition::new(DEFAULT_AGENT_NAME, model)
            .with_description("General-purpose assistant used when no agent matches")
            .with_system_prompt("You are a helpful assistant.");
        self.create(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> (tempfile::TempDir, AgentCatalog) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = AgentCatalog::open(dir.path().join("agents.json"));
        (dir, catalog)
    }

    fn sample(name: &str) -> AgentDefinition {
        AgentDefinition::new(name, "default-chat").with_description("sample")
    }

    #[test]
    fn create_get_round_trip() {
        let (_dir, catalog) = scratch();
        let created = catalog.create(sample("a")).unwrap();
        assert!(!created.id.is_empty());
        assert!(created.created_at > 0);

        let fetched = catalog.get(&created.id).unwrap();
        assert_eq!(fetched, created);
    }

    #[test]
    fn caller_supplied_id_is_kept_and_duplicates_rejected() {
        let (_dir, catalog) = scratch();
        let mut def = sample("a");
        def.id = "my-id".into();
        catalog.create(def.clone()).unwrap();
        assert!(matches!(
            catalog.create(def),
            Err(CoreError::DuplicateId(_))
        ));
    }

    #[test]
    fn update_preserves_identity_and_bumps_updated_at() {
        let (_dir, catalog) = scratch();
        let created = catalog.create(sample("a")).unwrap();
        let modified = catalog
            .update(&created.id, sample("a-renamed"))
            .unwrap();
        assert_eq!(modified.id, created.id);
        assert_eq!(modified.created_at, created.created_at);
        assert!(modified.updated_at > created.updated_at);
        assert_eq!(catalog.get(&created.id).unwrap().name, "a-renamed");
    }

    #[test]
    fn update_of_fetched_definition_is_stable() {
        let (_dir, catalog) = scratch();
        let created = catalog.create(sample("a")).unwrap();
        let fetched = catalog.get(&created.id).unwrap();
        let after = catalog.update(&created.id, fetched.clone()).unwrap();
        let refetched = catalog.get(&created.id).unwrap();
        // Field-wise equal apart from updated_at.
        assert_eq!(
            AgentDefinition {
                updated_at: 0,
                ..after
            },
            AgentDefinition {
                updated_at: 0,
                ..refetched
            }
        );
    }

    #[test]
    fn delete_then_get_is_not_found() {
        let (_dir, catalog) = scratch();
        let created = catalog.create(sample("a")).unwrap();
        catalog.delete(&created.id).unwrap();
        assert!(matches!(
            catalog.get(&created.id),
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(
            catalog.delete(&created.id),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn reload_sees_persisted_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.json");
        let id = {
            let catalog = AgentCatalog::open(&path);
            catalog.create(sample("persisted")).unwrap().id
        };
        let reloaded = AgentCatalog::open(&path);
        assert_eq!(reloaded.get(&id).unwrap().name, "persisted");
    }

    #[test]
    fn malformed_file_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let catalog = AgentCatalog::open(&path);
        assert!(catalog.is_empty());
    }

    #[test]
    fn failed_persist_rolls_back_create() {
        let dir = tempfile::tempdir().unwrap();
        // A directory at the document path makes the rename fail.
        let path = dir.path().join("agents.json");
        std::fs::create_dir_all(&path).unwrap();
        let catalog = AgentCatalog::open(&path);
        let result = catalog.create(sample("doomed"));
        assert!(matches!(result, Err(CoreError::CatalogPersistence { .. })));
        assert!(catalog.is_empty());
    }

    #[test]
    fn ensure_default_is_idempotent() {
        let (_dir, catalog) = scratch();
        let first = catalog.ensure_default("default-chat").unwrap();
        let second = catalog.ensure_default("default-chat").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn no_fsync_gap_leaves_partial_documents() {
        // Crash-consistency proxy: the temp file never survives a mutation.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.json");
        let catalog = AgentCatalog::open(&path);
        catalog.create(sample("a")).unwrap();
        catalog.create(sample("b")).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
        let doc: CatalogDocument =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(doc.agents.len(), 2);
    }
}
