use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub index: IndexConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory for discussions, exchange logs, and source artifacts.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { window_size: default_window_size(), overlap: default_overlap() }
    }
}

fn default_window_size() -> usize {
    1024
}
fn default_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Hard cutoff in the index's native distance metric. Candidates at or
    /// beyond this distance are excluded entirely.
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            distance_threshold: default_distance_threshold(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_distance_threshold() -> f32 {
    1.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: Some("text-embedding-3-small".to_string()),
            dims: Some(1536),
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            api_base: default_api_base(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_generation_provider() -> String {
    "openai".to_string()
}
fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_generation_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Vector index backend: `chroma` (HTTP) or `memory` (in-process).
    #[serde(default = "default_index_provider")]
    pub provider: String,
    #[serde(default = "default_index_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// What `delete_source` does to indexed vectors:
    /// `keep-vectors` leaves them searchable, `retract-vectors` deletes
    /// every vector whose metadata filename matches the deleted source.
    #[serde(default = "default_delete_strategy")]
    pub delete_strategy: String,
    /// How vector ids are keyed: `filename` (`{filename}_{i}`, re-ingesting
    /// the same filename overwrites) or `source-id` (`{source_id}_{i}`,
    /// never overwrites, orphans accumulate until retracted).
    #[serde(default = "default_vector_id_strategy")]
    pub vector_id_strategy: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            provider: default_index_provider(),
            url: default_index_url(),
            collection: default_collection(),
            delete_strategy: default_delete_strategy(),
            vector_id_strategy: default_vector_id_strategy(),
        }
    }
}

fn default_index_provider() -> String {
    "chroma".to_string()
}
fn default_index_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_collection() -> String {
    "documents".to_string()
}
fn default_delete_strategy() -> String {
    "keep-vectors".to_string()
}
fn default_vector_id_strategy() -> String {
    "filename".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.window_size == 0 {
        anyhow::bail!("chunking.window_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.window_size {
        anyhow::bail!("chunking.overlap must be < chunking.window_size");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.distance_threshold <= 0.0 {
        anyhow::bail!("retrieval.distance_threshold must be > 0");
    }

    if config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified for provider '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0");
    }

    match config.index.provider.as_str() {
        "chroma" | "memory" => {}
        other => anyhow::bail!("Unknown index provider: '{}'. Must be chroma or memory.", other),
    }

    match config.index.delete_strategy.as_str() {
        "keep-vectors" | "retract-vectors" => {}
        other => anyhow::bail!(
            "Unknown index.delete_strategy: '{}'. Must be keep-vectors or retract-vectors.",
            other
        ),
    }

    match config.index.vector_id_strategy.as_str() {
        "filename" | "source-id" => {}
        other => anyhow::bail!(
            "Unknown index.vector_id_strategy: '{}'. Must be filename or source-id.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("grimoire.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[storage]
root = "./save"

[server]
bind = "127.0.0.1:5000"
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.chunking.window_size, 1024);
        assert_eq!(cfg.chunking.overlap, 100);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.retrieval.distance_threshold, 1.0);
        assert_eq!(cfg.index.delete_strategy, "keep-vectors");
        assert_eq!(cfg.index.vector_id_strategy, "filename");
    }

    #[test]
    fn test_overlap_must_be_below_window() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[storage]
root = "./save"

[chunking]
window_size = 100
overlap = 100

[server]
bind = "127.0.0.1:5000"
"#,
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_unknown_delete_strategy_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[storage]
root = "./save"

[index]
delete_strategy = "sometimes"

[server]
bind = "127.0.0.1:5000"
"#,
        );
        assert!(load_config(&path).is_err());
    }
}
