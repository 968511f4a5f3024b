//! Database Manager
//!
//! Entry point for both operations: `testConnection` and `executeQuery`.
//!
//! Every operation follows the same stateless lifecycle:
//!
//! ```text
//! resolve → connect → (health check | query) → disconnect
//! ```
//!
//! The handle opened for an operation is owned by that operation alone and is always
//! disconnected before the result is returned, whether the operation succeeded, failed
//! or timed out. Nothing is cached between calls: no pooling, no retries.
//!
//! Failures never escape as `Err`; they are folded into an [`OperationResult`] with a
//! stable error kind.

use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, warn};

use crate::engine::{ensure_statement, EngineAdapter, QueryLimits, QueryResult};
use crate::error::{DbError, Result};
use crate::output::{Metadata, OperationResult};
use crate::resolver::{resolve, ConnectionDescriptor, EngineType};

#[cfg(feature = "mongodb")]
use crate::engine::document::DocumentStoreAdapter;
#[cfg(feature = "redis")]
use crate::engine::keyvalue::KeyValueAdapter;
#[cfg(any(feature = "postgres", feature = "mysql"))]
use crate::engine::relational::{RelationalAdapter, SqlDialect};

/// Operation name reported for connection tests
pub const TEST_CONNECTION: &str = "testConnection";

/// Operation name reported for queries
pub const EXECUTE_QUERY: &str = "executeQuery";

/// Default connect budget
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default query budget
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Engines compiled into this build
#[must_use]
pub fn enabled_engines() -> Vec<EngineType> {
    EngineType::ALL.into_iter().filter(|engine| is_enabled(*engine)).collect()
}

/// Whether an engine's adapter was compiled in
#[must_use]
pub const fn is_enabled(engine: EngineType) -> bool {
    match engine {
        EngineType::Postgres => cfg!(feature = "postgres"),
        EngineType::MySql => cfg!(feature = "mysql"),
        EngineType::MongoDb => cfg!(feature = "mongodb"),
        EngineType::Redis => cfg!(feature = "redis"),
    }
}

fn not_enabled(engine: EngineType) -> DbError {
    DbError::unsupported_engine(format!(
        "{engine} is not enabled in this build. Rebuild with --features {engine}"
    ))
}

/// A resolved query, ready to run
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub descriptor: ConnectionDescriptor,
    pub statement: String,
    pub limits: QueryLimits,
}

impl QueryRequest {
    /// Resolve and validate a raw request
    pub fn new(engine_type: &str, connection_string: &str, statement: &str) -> Result<Self> {
        let descriptor = resolve(engine_type, connection_string)?;
        let statement = ensure_statement(statement)?.to_string();
        Ok(Self { descriptor, statement, limits: QueryLimits::default() })
    }

    #[must_use]
    pub fn with_limits(mut self, limits: QueryLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Runs operations against any supported engine
///
/// Holds only configuration, so a single manager can be shared across tasks.
#[derive(Debug, Clone)]
pub struct DatabaseManager {
    connect_timeout: Duration,
    query_timeout: Duration,
    max_rows: Option<usize>,
}

impl Default for DatabaseManager {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT, DEFAULT_QUERY_TIMEOUT)
    }
}

impl DatabaseManager {
    #[must_use]
    pub const fn new(connect_timeout: Duration, query_timeout: Duration) -> Self {
        Self { connect_timeout, query_timeout, max_rows: None }
    }

    /// Default row cap for queries that do not set one
    #[must_use]
    pub const fn with_max_rows(mut self, max_rows: Option<usize>) -> Self {
        self.max_rows = max_rows;
        self
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Verify that an engine is reachable and responsive
    ///
    /// Payload on success: `{"engine", "healthy": true, "server_version", "latency_ms"}`.
    pub async fn test_connection(&self, engine_type: &str, connection_string: &str) -> OperationResult {
        let start = Instant::now();

        let outcome = match resolve(engine_type, connection_string) {
            Ok(descriptor) => self.dispatch_test(&descriptor).await.map(|payload| (descriptor, payload)),
            Err(e) => Err(e),
        };
        let meta = Metadata::new(elapsed_ms(start));

        match outcome {
            Ok((descriptor, payload)) => {
                OperationResult::ok(descriptor.engine().as_str(), TEST_CONNECTION, payload, meta)
            }
            Err(e) => {
                debug!(engine = %engine_label(engine_type), kind = e.kind(), "connection test failed");
                OperationResult::from_error(engine_label(engine_type), TEST_CONNECTION, &e, meta)
            }
        }
    }

    /// Run one engine-native statement
    pub async fn execute_query(
        &self,
        engine_type: &str,
        connection_string: &str,
        statement: &str,
    ) -> OperationResult {
        self.execute_query_with_limits(engine_type, connection_string, statement, QueryLimits::default())
            .await
    }

    /// Run one engine-native statement with explicit limits
    pub async fn execute_query_with_limits(
        &self,
        engine_type: &str,
        connection_string: &str,
        statement: &str,
        limits: QueryLimits,
    ) -> OperationResult {
        let start = Instant::now();

        match QueryRequest::new(engine_type, connection_string, statement) {
            Ok(request) => self.run(&request.with_limits(limits)).await,
            Err(e) => OperationResult::from_error(
                engine_label(engine_type),
                EXECUTE_QUERY,
                &e,
                Metadata::new(elapsed_ms(start)),
            ),
        }
    }

    /// Run an already-resolved query request
    pub async fn run(&self, request: &QueryRequest) -> OperationResult {
        let start = Instant::now();
        let engine = request.descriptor.engine();

        match self.dispatch_query(request).await {
            Ok(result) => {
                let execution_ms = elapsed_ms(start);
                let meta = match result.rows_returned {
                    Some(rows) => Metadata::with_rows(execution_ms, rows, result.truncated),
                    None => Metadata::new(execution_ms),
                };
                OperationResult::ok(engine.as_str(), EXECUTE_QUERY, result.payload, meta)
            }
            Err(e) => {
                debug!(%engine, kind = e.kind(), "query failed");
                OperationResult::from_error(engine.as_str(), EXECUTE_QUERY, &e, Metadata::new(elapsed_ms(start)))
            }
        }
    }

    async fn dispatch_test(&self, descriptor: &ConnectionDescriptor) -> Result<serde_json::Value> {
        match descriptor.engine() {
            #[cfg(feature = "postgres")]
            EngineType::Postgres => {
                self.test_connection_with(&RelationalAdapter::new(SqlDialect::Postgres), descriptor).await
            }
            #[cfg(feature = "mysql")]
            EngineType::MySql => {
                self.test_connection_with(&RelationalAdapter::new(SqlDialect::MySql), descriptor).await
            }
            #[cfg(feature = "mongodb")]
            EngineType::MongoDb => {
                let adapter = DocumentStoreAdapter::within(self.connect_timeout);
                self.test_connection_with(&adapter, descriptor).await
            }
            #[cfg(feature = "redis")]
            EngineType::Redis => self.test_connection_with(&KeyValueAdapter, descriptor).await,
            #[allow(unreachable_patterns)]
            other => Err(not_enabled(other)),
        }
    }

    async fn dispatch_query(&self, request: &QueryRequest) -> Result<QueryResult> {
        let QueryRequest { descriptor, statement, limits } = request;
        match descriptor.engine() {
            #[cfg(feature = "postgres")]
            EngineType::Postgres => {
                let adapter = RelationalAdapter::new(SqlDialect::Postgres);
                self.execute_with(&adapter, descriptor, statement, limits).await
            }
            #[cfg(feature = "mysql")]
            EngineType::MySql => {
                let adapter = RelationalAdapter::new(SqlDialect::MySql);
                self.execute_with(&adapter, descriptor, statement, limits).await
            }
            #[cfg(feature = "mongodb")]
            EngineType::MongoDb => {
                let adapter = DocumentStoreAdapter::within(self.connect_timeout);
                self.execute_with(&adapter, descriptor, statement, limits).await
            }
            #[cfg(feature = "redis")]
            EngineType::Redis => self.execute_with(&KeyValueAdapter, descriptor, statement, limits).await,
            #[allow(unreachable_patterns)]
            other => Err(not_enabled(other)),
        }
    }

    /// Connection test lifecycle against a specific adapter
    ///
    /// A failed health check is reported as `ConnectionError`. A failed version lookup
    /// leaves `server_version` null.
    pub async fn test_connection_with<A: EngineAdapter>(
        &self,
        adapter: &A,
        descriptor: &ConnectionDescriptor,
    ) -> Result<serde_json::Value> {
        let start = Instant::now();
        let mut handle = self.open(adapter, descriptor).await?;
        let latency_ms = elapsed_ms(start);

        let healthy =
            tokio::time::timeout(self.query_timeout, adapter.health_check(&mut handle)).await.unwrap_or(false);
        let server_version = if healthy {
            tokio::time::timeout(self.query_timeout, adapter.server_version(&mut handle))
                .await
                .ok()
                .flatten()
        } else {
            None
        };

        self.release(adapter, &mut handle, descriptor).await;

        if !healthy {
            warn!(engine = %descriptor.engine(), "health check failed after connecting");
            return Err(DbError::connection_failed(format!(
                "{} accepted the connection but failed its health check",
                descriptor.engine()
            )));
        }

        Ok(json!({
            "engine": descriptor.engine(),
            "healthy": true,
            "server_version": server_version,
            "latency_ms": latency_ms,
        }))
    }

    /// Query lifecycle against a specific adapter
    ///
    /// The handle is disconnected on every path once `connect` has succeeded.
    pub async fn execute_with<A: EngineAdapter>(
        &self,
        adapter: &A,
        descriptor: &ConnectionDescriptor,
        statement: &str,
        limits: &QueryLimits,
    ) -> Result<QueryResult> {
        let statement = ensure_statement(statement)?;
        let limits = QueryLimits {
            max_rows: limits.max_rows.or(self.max_rows),
            timeout_ms: limits.timeout_ms,
        };
        let budget = limits.timeout().unwrap_or(self.query_timeout);

        let mut handle = self.open(adapter, descriptor).await?;

        debug!(engine = %descriptor.engine(), "executing statement");
        let outcome = match tokio::time::timeout(budget, adapter.query(&mut handle, statement, &limits)).await {
            Ok(result) => result,
            Err(_) => Err(DbError::timeout("query", budget)),
        };

        self.release(adapter, &mut handle, descriptor).await;
        outcome
    }

    /// Connect within the connect budget
    ///
    /// On timeout the pending connect future is dropped, which releases anything it
    /// had opened so far.
    async fn open<A: EngineAdapter>(&self, adapter: &A, descriptor: &ConnectionDescriptor) -> Result<A::Handle> {
        debug!(engine = %descriptor.engine(), target = %descriptor.redacted(), "connecting");
        match tokio::time::timeout(self.connect_timeout, adapter.connect(descriptor)).await {
            Ok(result) => result,
            Err(_) => Err(DbError::timeout("connect", self.connect_timeout)),
        }
    }

    /// Disconnect, logging instead of failing
    async fn release<A: EngineAdapter>(&self, adapter: &A, handle: &mut A::Handle, descriptor: &ConnectionDescriptor) {
        match tokio::time::timeout(self.connect_timeout, adapter.disconnect(handle)).await {
            Ok(Ok(())) => debug!(engine = %descriptor.engine(), "disconnected"),
            Ok(Err(e)) => warn!(engine = %descriptor.engine(), error = %e, "disconnect failed"),
            Err(_) => warn!(engine = %descriptor.engine(), "disconnect timed out"),
        }
    }
}

/// Engine name for results, falling back to the raw type when it did not resolve
fn engine_label(engine_type: &str) -> String {
    EngineType::parse(engine_type)
        .map_or_else(|_| engine_type.trim().to_ascii_lowercase(), |engine| engine.as_str().to_string())
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
