//! TOML configuration for the chunk store and retrieval engine.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Embedding dimensionality every stored and queried vector must share.
pub const EMBEDDING_DIM: usize = 768;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
}

fn default_embedding_dim() -> usize {
    EMBEDDING_DIM
}

/// ANN index tuning.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Set false to force exact-only search for the session.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum row count before an ANN index is attempted.
    #[serde(default = "default_threshold")]
    pub threshold: i64,
    /// Name the index configuration row is keyed by.
    #[serde(default = "default_index_name")]
    pub index_name: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
            index_name: default_index_name(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_threshold() -> i64 {
    64
}
fn default_index_name() -> String {
    "chunks_embedding_idx".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// ANN candidate multiplier applied before post-filtering.
    #[serde(default = "default_overfetch")]
    pub overfetch: usize,
    /// Similarity floor for the high-level post/media query helpers.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            overfetch: default_overfetch(),
            min_similarity: default_min_similarity(),
        }
    }
}

fn default_overfetch() -> usize {
    4
}
fn default_min_similarity() -> f64 {
    0.7
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// In-memory store with defaults, used by tests and embedding callers
    /// that own no config file.
    pub fn in_memory() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from(":memory:"),
                embedding_dim: EMBEDDING_DIM,
            },
            index: IndexConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config: Config = toml::from_str(
            r#"
[db]
path = "/tmp/recall.sqlite"
"#,
        )
        .unwrap();
        assert_eq!(config.db.embedding_dim, 768);
        assert!(config.index.enabled);
        assert_eq!(config.index.threshold, 64);
        assert_eq!(config.retrieval.overfetch, 4);
        assert!((config.retrieval.min_similarity - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_explicit_values_override_defaults() {
        let config: Config = toml::from_str(
            r#"
[db]
path = "/tmp/recall.sqlite"
embedding_dim = 512

[index]
enabled = false
threshold = 10

[retrieval]
overfetch = 8
"#,
        )
        .unwrap();
        assert_eq!(config.db.embedding_dim, 512);
        assert!(!config.index.enabled);
        assert_eq!(config.index.threshold, 10);
        assert_eq!(config.retrieval.overfetch, 8);
    }
}
