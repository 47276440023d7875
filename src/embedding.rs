//! Query vectors for descriptors that ask for similarity search by text.
//!
//! Embeddings are resolved before compilation. A failed fetch is reported
//! against its descriptor id and keeps that descriptor out of the batch,
//! without touching the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::metrics;
use crate::query::descriptor::QueryDescriptor;
use crate::query::executor::CancellationToken;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {0}")]
    Request(String),
    #[error("Malformed embedding response: {0}")]
    MalformedResponse(String),
    #[error("No API key configured for the embedding service")]
    MissingApiKey,
    #[error("No embedding service configured")]
    Unavailable,
    #[error("Embedding request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Embedding request cancelled")]
    Cancelled,
}

/// Turns text into a query vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbeddingError>;
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f64>,
}

/// Embedder backed by the OpenAI embeddings endpoint
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or(EmbeddingError::MissingApiKey)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbeddingError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({ "input": text, "model": self.model }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::MalformedResponse(e.to_string()))?;

        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|embedding| !embedding.is_empty())
            .ok_or_else(|| EmbeddingError::MalformedResponse("no embedding returned".to_string()))
    }
}

/// Vectors fetched for a batch, and the descriptors whose fetch failed
#[derive(Debug, Default)]
pub struct ResolvedEmbeddings {
    pub vectors: HashMap<String, Vec<f64>>,
    pub failures: Vec<(String, EmbeddingError)>,
}

impl ResolvedEmbeddings {
    pub fn vector(&self, id: &str) -> Option<&[f64]> {
        self.vectors.get(id).map(Vec::as_slice)
    }

    pub fn failed(&self, id: &str) -> bool {
        self.failures.iter().any(|(failed, _)| failed == id)
    }
}

async fn embed_with_deadline(
    embedder: &dyn Embedder,
    text: &str,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<Vec<f64>, EmbeddingError> {
    let deadline = async move {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = embedder.embed(text) => result,
        _ = deadline => Err(EmbeddingError::Timeout(timeout.unwrap_or_default())),
        _ = cancel.cancelled() => Err(EmbeddingError::Cancelled),
    }
}

/// Fetches a vector for every descriptor that wants one, concurrently.
/// Descriptors with an explicit `queryVector`, no `vectorDataField`, no
/// text value, or a non-search type are skipped. Each fetch is bounded by
/// `timeout` and abandoned once `cancel` fires.
pub async fn resolve_embeddings(
    embedder: Option<Arc<dyn Embedder>>,
    descriptors: &[QueryDescriptor],
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> ResolvedEmbeddings {
    let wanted: Vec<(String, String)> = descriptors
        .iter()
        .filter(|d| d.should_execute() && d.wants_embedding())
        .filter_map(|d| d.value_text().map(|text| (d.id().to_string(), text.to_string())))
        .collect();

    let mut resolved = ResolvedEmbeddings::default();
    if wanted.is_empty() {
        return resolved;
    }

    let Some(embedder) = embedder else {
        for (id, _) in wanted {
            warn!(id = %id, "Vector search requested without an embedding service");
            resolved.failures.push((id, EmbeddingError::Unavailable));
        }
        return resolved;
    };

    let fetches = wanted.into_iter().map(|(id, text)| {
        let embedder = Arc::clone(&embedder);
        async move {
            let start = Instant::now();
            let result = embed_with_deadline(embedder.as_ref(), &text, timeout, cancel).await;
            let took = start.elapsed().as_secs_f64() * 1000.0;
            metrics::record_embedding(took, result.is_ok());
            (id, result)
        }
    });

    for (id, result) in futures::future::join_all(fetches).await {
        match result {
            Ok(vector) => {
                debug!(id = %id, dimensions = vector.len(), "Resolved query vector");
                resolved.vectors.insert(id, vector);
            }
            Err(e) => {
                warn!(id = %id, error = %e, "Embedding fetch failed");
                resolved.failures.push((id, e));
            }
        }
    }
    resolved
}
