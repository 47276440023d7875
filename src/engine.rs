//! Batch entry points
//!
//! A batch is validated as a whole, then every descriptor is resolved and
//! compiled before anything runs. Validation and compile errors reject the
//! batch; embedding and execution failures are reported per id inside an
//! otherwise successful response.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::embedding::{resolve_embeddings, Embedder};
use crate::metrics;
use crate::query::compiler::{CompileError, QueryCompiler, SqlQueryObject};
use crate::query::descriptor::validator::{validate_batch, ValidationError};
use crate::query::descriptor::{DescriptorValidator, QueryDescriptor};
use crate::query::executor::{BatchExecutor, CancellationToken, SqlExecutor};
use crate::query::response::ResponseAssembler;

/// Status reported for a descriptor whose query vector could not be fetched
const EMBEDDING_FAILURE_STATUS: u16 = 502;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

impl EngineError {
    /// Renders the error as the 400 body returned to clients
    pub fn to_response(&self) -> Value {
        match self {
            EngineError::Validation(ValidationError::Rejected(messages)) => json!({
                "error": {
                    "error": messages,
                    "code": 400,
                    "status": "Bad Request",
                }
            }),
            EngineError::Validation(e) => json!({
                "error": {
                    "error": [e.to_string()],
                    "code": 400,
                    "status": "Bad Request",
                }
            }),
            EngineError::Compile(e) => json!({
                "error": {
                    "message": e.to_string(),
                    "code": 400,
                    "status": "Bad Request",
                }
            }),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Translates and runs batches of query descriptors
pub struct ReactiveSearch {
    config: EngineConfig,
    validator: Arc<dyn DescriptorValidator>,
    executor: BatchExecutor,
    embedder: Option<Arc<dyn Embedder>>,
}

impl ReactiveSearch {
    pub fn new(
        config: EngineConfig,
        validator: Arc<dyn DescriptorValidator>,
        executor: Arc<dyn SqlExecutor>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        let executor = BatchExecutor::new(executor, config.execution_config());
        Self {
            config,
            validator,
            executor,
            embedder,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn validate(&self, raw: &[Value]) -> EngineResult<Vec<QueryDescriptor>> {
        validate_batch(self.validator.as_ref(), raw).map_err(|e| {
            metrics::record_validation_failure();
            warn!(error = %e, "Rejected batch");
            EngineError::from(e)
        })
    }

    /// Compiles every executable descriptor without running anything.
    /// Search statements omit the window total count.
    pub fn translate(&self, raw: &[Value]) -> EngineResult<BTreeMap<String, SqlQueryObject>> {
        let descriptors = self.validate(raw)?;
        let compiler = QueryCompiler::for_validation();

        let mut translated = BTreeMap::new();
        for descriptor in descriptors.iter().filter(|d| d.should_execute()) {
            let resolved = descriptor.resolve_with_size(None, self.config.default_size)?;
            translated.insert(resolved.id.clone(), compiler.compile(&resolved)?);
        }
        Ok(translated)
    }

    pub async fn query(&self, raw: &[Value]) -> EngineResult<Value> {
        self.query_with_cancel(raw, &CancellationToken::new()).await
    }

    /// Runs a batch; cancelling `cancel` settles every embedding fetch and
    /// statement still in flight as cancelled
    pub async fn query_with_cancel(
        &self,
        raw: &[Value],
        cancel: &CancellationToken,
    ) -> EngineResult<Value> {
        let descriptors = self.validate(raw)?;
        let span = info_span!(
            "batch",
            batch_id = %Uuid::new_v4(),
            queries = descriptors.len()
        );
        self.run_batch(descriptors, cancel).instrument(span).await
    }

    async fn run_batch(
        &self,
        descriptors: Vec<QueryDescriptor>,
        cancel: &CancellationToken,
    ) -> EngineResult<Value> {
        info!("Batch started");
        let start = Instant::now();
        let descriptors: Vec<QueryDescriptor> = descriptors
            .into_iter()
            .filter(|d| d.should_execute())
            .collect();

        let timeout = self.config.execution_config().timeout;
        let embeddings =
            resolve_embeddings(self.embedder.clone(), &descriptors, timeout, cancel).await;
        let embedding_took = start.elapsed().as_secs_f64() * 1000.0;

        let compiler = QueryCompiler::new();
        let mut compiled = Vec::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            if embeddings.failed(descriptor.id()) {
                continue;
            }
            let resolved = descriptor
                .resolve_with_size(embeddings.vector(descriptor.id()), self.config.default_size)?;
            compiled.push((resolved.id.clone(), compiler.compile(&resolved)?));
        }

        let outcome = self.executor.run(compiled, cancel).await;

        let mut assembler = ResponseAssembler::new();
        for (id, error) in &embeddings.failures {
            assembler.push_error(id, &error.to_string(), EMBEDDING_FAILURE_STATUS, embedding_took);
        }
        for response in &outcome.responses {
            assembler.push_response(response);
        }

        let took = (start.elapsed().as_secs_f64() * 1000.0).max(1.0);
        metrics::record_batch(took, outcome.responses.len());
        info!(took, failed = embeddings.failures.len(), "Batch finished");
        Ok(assembler.finish(took))
    }
}
