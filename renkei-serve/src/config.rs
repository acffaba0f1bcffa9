//! Daemon configuration.
//!
//! One TOML file with tolerant per-section defaults, so a missing file or a
//! partial file both yield a runnable local setup against the default
//! localhost ports.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServeConfig {
    /// Identity reported to service discovery.
    #[serde(default)]
    pub service: ServiceSection,
    /// Discovery client settings.
    #[serde(default)]
    pub discovery: DiscoverySection,
    /// Catalog persistence settings.
    #[serde(default)]
    pub catalog: CatalogSection,
    /// Capability endpoints and model tags.
    #[serde(default)]
    pub capabilities: CapabilitySection,
    /// Selector tuning.
    #[serde(default)]
    pub selector: SelectorSection,
    /// Context window budgets.
    #[serde(default)]
    pub context: ContextSection,
}

/// Identity of this process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSection {
    /// Service name registered with discovery.
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Listening port reported on registration.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-execution stream channel capacity.
    #[serde(default = "default_stream_capacity")]
    pub stream_capacity: usize,
}

fn default_service_name() -> String {
    "agent-core".to_string()
}
const fn default_port() -> u16 {
    8094
}
const fn default_stream_capacity() -> usize {
    32
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            port: default_port(),
            stream_capacity: default_stream_capacity(),
        }
    }
}

/// Discovery client settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoverySection {
    /// Discovery base URL; absent disables registration entirely.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Heartbeat interval in seconds.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

const fn default_heartbeat_secs() -> u64 {
    10
}

/// Catalog persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSection {
    /// Path of the catalog JSON document.
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("data/agents.json")
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
        }
    }
}

/// Capability endpoints; all default to localhost siblings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitySection {
    /// Inference service base URL.
    #[serde(default = "default_chat_endpoint")]
    pub chat_endpoint: String,
    /// NLP utility service base URL (embeddings, summarization, analysis).
    #[serde(default = "default_nlp_endpoint")]
    pub nlp_endpoint: String,
    /// Text-indexing/search service base URL; absent disables the search
    /// tool.
    #[serde(default)]
    pub search_endpoint: Option<String>,
    /// Default chat model tag.
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// Embedding model tag.
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
}

fn default_chat_endpoint() -> String {
    "http://127.0.0.1:8091".to_string()
}
fn default_nlp_endpoint() -> String {
    "http://127.0.0.1:8093".to_string()
}
fn default_chat_model() -> String {
    "default-chat".to_string()
}
fn default_embed_model() -> String {
    "default-embed".to_string()
}

impl Default for CapabilitySection {
    fn default() -> Self {
        Self {
            chat_endpoint: default_chat_endpoint(),
            nlp_endpoint: default_nlp_endpoint(),
            search_endpoint: None,
            chat_model: default_chat_model(),
            embed_model: default_embed_model(),
        }
    }
}

/// Selector tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorSection {
    /// Confidence floor under which the default agent is used.
    #[serde(default = "default_score_floor")]
    pub score_floor: f32,
}

const fn default_score_floor() -> f32 {
    0.3
}

impl Default for SelectorSection {
    fn default() -> Self {
        Self {
            score_floor: default_score_floor(),
        }
    }
}

/// One per-model context budget entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetEntry {
    /// Model name or prefix.
    pub model: String,
    /// Maximum total tokens.
    pub max_tokens: usize,
    /// Tokens reserved for the response.
    #[serde(default = "default_reserved_output")]
    pub reserved_output: usize,
}

/// Context window budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSection {
    /// Default maximum total tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Default tokens reserved for the response.
    #[serde(default = "default_reserved_output")]
    pub reserved_output: usize,
    /// Per-model overrides.
    #[serde(default)]
    pub budgets: Vec<BudgetEntry>,
}

const fn default_max_tokens() -> usize {
    4096
}
const fn default_reserved_output() -> usize {
    512
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            reserved_output: default_reserved_output(),
            budgets: Vec::new(),
        }
    }
}

/// Load configuration from `path`; a missing file yields the defaults.
pub async fn load(path: &Path) -> Result<ServeConfig, ConfigError> {
    if !path.exists() {
        info!(path = %path.display(), "config file not found, using defaults");
        return Ok(ServeConfig::default());
    }
    let content = tokio::fs::read_to_string(path).await?;
    let config: ServeConfig = toml::from_str(&content)?;
    debug!(path = %path.display(), "loaded config file");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let config = load(Path::new("/definitely/not/here.toml")).await.unwrap();
        assert_eq!(config.service.name, "agent-core");
        assert_eq!(config.selector.score_floor, 0.3);
        assert!(config.discovery.endpoint.is_none());
    }

    #[tokio::test]
    async fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renkei.toml");
        tokio::fs::write(
            &path,
            "[service]\nport = 9000\n\n[discovery]\nendpoint = \"http://127.0.0.1:8090\"\n",
        )
        .await
        .unwrap();

        let config = load(&path).await.unwrap();
        assert_eq!(config.service.port, 9000);
        assert_eq!(config.service.name, "agent-core");
        assert_eq!(
            config.discovery.endpoint.as_deref(),
            Some("http://127.0.0.1:8090")
        );
        assert_eq!(config.discovery.heartbeat_secs, 10);
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renkei.toml");
        tokio::fs::write(&path, "not = [valid").await.unwrap();
        assert!(matches!(
            load(&path).await,
            Err(ConfigError::TomlParse(_))
        ));
    }
}
