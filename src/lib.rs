//! reactivesql - search-engine style query batches over SQL
//!
//! This crate translates batches of declarative query descriptors (full-text
//! search, term aggregation, range and histogram aggregation, vector
//! similarity ordering) into parameterized SQL, runs them concurrently and
//! reshapes the rows into a search-engine style response keyed by descriptor
//! id.

pub mod config;
pub mod embedding;
pub mod engine;
pub mod metrics;
pub mod query;

pub use config::{EmbeddingConfig, EngineConfig};
pub use embedding::{Embedder, OpenAiEmbedder};
pub use engine::{EngineError, ReactiveSearch};
pub use query::compiler::{QueryCompiler, SqlQueryObject, Statement};
pub use query::descriptor::{QueryDescriptor, SchemaValidator};
pub use query::executor::{CancellationToken, SqlExecutor};
