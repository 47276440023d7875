use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::metrics;
use crate::query::compiler::{CustomData, SqlQueryObject, Statement};
use crate::query::response::Row;

/// Error type for execution operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Failed(String),
    #[error("Query timed out after {0:?}")]
    Timeout(Duration),
    #[error("Query cancelled")]
    Cancelled,
}

/// Result type for execution operations
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Runs one statement against the backing store. Implementations own their
/// connection pooling and must be safe to call concurrently.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, statement: &Statement) -> ExecutionResult<Vec<Row>>;
}

/// Adapts an async function into a [`SqlExecutor`]
pub struct FnExecutor<F>(F);

pub fn from_fn<F, Fut>(f: F) -> FnExecutor<F>
where
    F: Fn(Statement) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Row>, String>> + Send,
{
    FnExecutor(f)
}

#[async_trait]
impl<F, Fut> SqlExecutor for FnExecutor<F>
where
    F: Fn(Statement) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Row>, String>> + Send,
{
    async fn execute(&self, statement: &Statement) -> ExecutionResult<Vec<Row>> {
        (self.0)(statement.clone()).await.map_err(ExecutionError::Failed)
    }
}

/// Configuration for query execution
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Maximum number of statements in flight, unbounded when `None`
    pub max_concurrent_tasks: Option<usize>,
    /// Per-statement timeout, none when `None`
    pub timeout: Option<Duration>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: None,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Cancels every statement of a batch that is still running
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Completes once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// The settled result of one compiled descriptor
#[derive(Debug, Clone)]
pub struct ResponseObject {
    pub id: String,
    pub result: ExecutionResult<Vec<Row>>,
    /// Milliseconds spent executing, at least 1
    pub took: f64,
    pub custom_data: CustomData,
}

/// Every settled query of a batch and the wall-clock time of the batch
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub responses: Vec<ResponseObject>,
    pub took: f64,
}

fn elapsed_ms(start: Instant) -> f64 {
    (start.elapsed().as_secs_f64() * 1000.0).max(1.0)
}

async fn execute_with_deadline(
    executor: &dyn SqlExecutor,
    statement: &Statement,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> ExecutionResult<Vec<Row>> {
    let deadline = async move {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = executor.execute(statement) => result,
        _ = deadline => Err(ExecutionError::Timeout(timeout.unwrap_or_default())),
        _ = cancel.cancelled() => Err(ExecutionError::Cancelled),
    }
}

/// Runs compiled statements concurrently, isolating each one's failure
#[derive(Clone)]
pub struct BatchExecutor {
    executor: Arc<dyn SqlExecutor>,
    config: ExecutionConfig,
}

impl BatchExecutor {
    pub fn new(executor: Arc<dyn SqlExecutor>, config: ExecutionConfig) -> Self {
        Self { executor, config }
    }

    /// Executes every entry in parallel and waits for all of them to settle.
    /// Entries without a statement settle immediately with no rows.
    pub async fn run(
        &self,
        compiled: Vec<(String, SqlQueryObject)>,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let batch_start = Instant::now();
        let limiter = self
            .config
            .max_concurrent_tasks
            .map(|permits| Arc::new(Semaphore::new(permits.max(1))));

        let mut pending = Vec::with_capacity(compiled.len());
        let mut tasks = Vec::with_capacity(compiled.len());
        for (id, object) in compiled {
            let SqlQueryObject {
                statement,
                custom_data,
            } = object;
            let executor = Arc::clone(&self.executor);
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            let timeout = self.config.timeout;
            let kind = custom_data.kind();
            debug!(id = %id, kind, "Dispatching query");

            tasks.push(tokio::spawn(async move {
                let Some(statement) = statement else {
                    return (Ok(Vec::new()), 1.0);
                };
                let _permit = match limiter {
                    Some(limiter) => match limiter.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(e) => return (Err(ExecutionError::Failed(e.to_string())), 1.0),
                    },
                    None => None,
                };

                let start = Instant::now();
                let result =
                    execute_with_deadline(executor.as_ref(), &statement, timeout, &cancel).await;
                let took = elapsed_ms(start);
                metrics::record_query(kind, took);
                (result, took)
            }));
            pending.push((id, custom_data));
        }

        // Wait for all tasks to settle
        let settled = futures::future::join_all(tasks).await;

        let responses = pending
            .into_iter()
            .zip(settled)
            .map(|((id, custom_data), joined)| {
                let (result, took) = match joined {
                    Ok(outcome) => outcome,
                    Err(e) => (Err(ExecutionError::Failed(e.to_string())), 1.0),
                };
                match &result {
                    Ok(rows) => debug!(id = %id, rows = rows.len(), took, "Query settled"),
                    Err(e) => {
                        warn!(id = %id, error = %e, took, "Query failed");
                        metrics::record_query_failure(custom_data.kind());
                    }
                }
                ResponseObject {
                    id,
                    result,
                    took,
                    custom_data,
                }
            })
            .collect();

        BatchOutcome {
            responses,
            took: elapsed_ms(batch_start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::compiler::ParamSet;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn search(sql: &str) -> SqlQueryObject {
        SqlQueryObject {
            statement: Some(Statement::new(sql, ParamSet::new())),
            custom_data: CustomData::Search,
        }
    }

    fn row(n: i64) -> Row {
        let mut row = Map::new();
        row.insert("n".to_string(), json!(n));
        row
    }

    /// Sleeps for the number of milliseconds in the statement, or fails
    /// when the statement is `fail`
    struct SleepyExecutor {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl SleepyExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SqlExecutor for SleepyExecutor {
        async fn execute(&self, statement: &Statement) -> ExecutionResult<Vec<Row>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let result = if statement.sql == "fail" {
                Err(ExecutionError::Failed("syntax error at or near \"fail\"".to_string()))
            } else {
                let ms: u64 = statement.sql.parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(vec![row(ms as i64)])
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let executor = BatchExecutor::new(SleepyExecutor::new(), ExecutionConfig::default());
        let compiled = vec![
            ("a".to_string(), search("100")),
            ("b".to_string(), search("fail")),
            ("c".to_string(), search("100")),
        ];

        let outcome = executor.run(compiled, &CancellationToken::new()).await;
        assert_eq!(outcome.responses.len(), 3);
        assert_eq!(outcome.responses[0].result, Ok(vec![row(100)]));
        assert!(matches!(outcome.responses[1].result, Err(ExecutionError::Failed(_))));
        assert_eq!(outcome.responses[2].result, Ok(vec![row(100)]));

        // Queries run in parallel, so the batch is shorter than the sum
        let summed: f64 = outcome.responses.iter().map(|r| r.took).sum();
        assert!(outcome.responses[0].took >= 100.0);
        assert!(outcome.took < summed);
    }

    #[tokio::test]
    async fn test_took_is_at_least_one() {
        let executor = BatchExecutor::new(SleepyExecutor::new(), ExecutionConfig::default());
        let outcome = executor
            .run(vec![("a".to_string(), search("0"))], &CancellationToken::new())
            .await;
        assert!(outcome.responses[0].took >= 1.0);
        assert!(outcome.took >= 1.0);
    }

    #[tokio::test]
    async fn test_timeout() {
        let config = ExecutionConfig {
            max_concurrent_tasks: None,
            timeout: Some(Duration::from_millis(20)),
        };
        let executor = BatchExecutor::new(SleepyExecutor::new(), config);
        let outcome = executor
            .run(
                vec![
                    ("slow".to_string(), search("5000")),
                    ("fast".to_string(), search("1")),
                ],
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(outcome.responses[0].result, Err(ExecutionError::Timeout(_))));
        assert!(outcome.responses[1].result.is_ok());
        assert!(outcome.took < 5000.0);
    }

    #[tokio::test]
    async fn test_cancellation() {
        let config = ExecutionConfig {
            max_concurrent_tasks: None,
            timeout: None,
        };
        let executor = BatchExecutor::new(SleepyExecutor::new(), config);
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let outcome = executor
            .run(vec![("slow".to_string(), search("5000"))], &token)
            .await;
        assert!(token.is_cancelled());
        assert_eq!(outcome.responses[0].result, Err(ExecutionError::Cancelled));
    }

    #[tokio::test]
    async fn test_empty_statement_is_not_executed() {
        let sql = SleepyExecutor::new();
        let executor = BatchExecutor::new(sql.clone(), ExecutionConfig::default());
        let empty = SqlQueryObject {
            statement: None,
            custom_data: CustomData::Range {
                data_field: None,
                min_field: None,
                max_field: None,
                histogram: false,
                empty_response: true,
            },
        };
        let outcome = executor
            .run(vec![("range".to_string(), empty)], &CancellationToken::new())
            .await;
        assert_eq!(outcome.responses[0].result, Ok(Vec::new()));
        assert_eq!(sql.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrency_limit() {
        let sql = SleepyExecutor::new();
        let config = ExecutionConfig {
            max_concurrent_tasks: Some(1),
            timeout: None,
        };
        let executor = BatchExecutor::new(sql.clone(), config);
        let compiled = (0..4).map(|i| (i.to_string(), search("10"))).collect();
        let outcome = executor.run(compiled, &CancellationToken::new()).await;
        assert!(outcome.responses.iter().all(|r| r.result.is_ok()));
        assert_eq!(sql.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fn_executor() {
        let executor = from_fn(|statement: Statement| async move {
            if statement.params.is_empty() {
                Ok(vec![row(1)])
            } else {
                Err("unexpected params".to_string())
            }
        });
        let rows = executor.execute(&Statement::raw("select 1")).await.unwrap();
        assert_eq!(rows, vec![row(1)]);
    }
}
