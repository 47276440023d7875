//! Engine configuration
//!
//! Every field has a default, so a config file only needs the values it
//! changes.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

use crate::query::descriptor::DEFAULT_SIZE;
use crate::query::executor::ExecutionConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),
}

/// Configuration for the embedding service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    /// HTTP timeout of one embedding request in milliseconds
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "text-embedding-ada-002".to_string(),
            endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Page size used when a search descriptor has no `size`
    pub default_size: u64,
    /// Per-statement timeout in milliseconds, none when unset
    pub query_timeout_ms: Option<u64>,
    /// Maximum number of statements in flight, unbounded when unset
    pub max_concurrent_queries: Option<usize>,
    pub log_level: String,
    /// Address of the Prometheus listener, disabled when unset
    pub metrics_addr: Option<SocketAddr>,
    pub embedding: EmbeddingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_size: DEFAULT_SIZE,
            query_timeout_ms: Some(30_000),
            max_concurrent_queries: None,
            log_level: "info".to_string(),
            metrics_addr: None,
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            max_concurrent_tasks: self.max_concurrent_queries,
            timeout: self.query_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn log_level(&self) -> Result<Level, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::InvalidLogLevel(self.log_level.clone()))
    }
}
