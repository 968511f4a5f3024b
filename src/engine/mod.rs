//! Engine Adapter Trait and Core Types
//!
//! This module defines the capability set every engine adapter implements:
//! connect, disconnect, query and health check.
//!
//! # Handle Ownership
//! `connect` returns an engine-specific handle that is owned by the caller (the
//! [`DatabaseManager`](crate::manager::DatabaseManager)) for exactly one operation.
//! Adapters hold no connection state of their own, so one adapter value can serve
//! any number of concurrent operations.
//!
//! # Engine Isolation
//! Each adapter is independent and gated behind its own cargo feature.
//! There is no cross-engine query language: statements are passed through as
//! SQL, JSON command documents or key-value command lines.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::resolver::ConnectionDescriptor;

#[cfg(any(feature = "postgres", feature = "mysql"))]
pub mod relational;

#[cfg(feature = "mongodb")]
pub mod document;

#[cfg(feature = "redis")]
pub mod keyvalue;

/// Per-query limits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryLimits {
    /// Maximum number of rows/documents to return
    /// None means no limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<usize>,

    /// Query timeout in milliseconds, enforced by the manager
    /// None means the manager default applies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl QueryLimits {
    /// Limits with a row cap
    #[must_use]
    pub fn with_max_rows(max_rows: usize) -> Self {
        Self { max_rows: Some(max_rows), ..Self::default() }
    }

    /// Query timeout as a `Duration`, if set
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// True once `count` items have reached the row cap
    #[must_use]
    pub fn reached(&self, count: usize) -> bool {
        self.max_rows.is_some_and(|max| count >= max)
    }
}

/// Normalized query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Engine result as a JSON tree
    pub payload: serde_json::Value,

    /// Rows, documents or elements returned (None for scalar replies)
    pub rows_returned: Option<usize>,

    /// Whether the result was cut off at `max_rows`
    pub truncated: bool,
}

impl QueryResult {
    /// A scalar result (no row count)
    #[must_use]
    pub fn scalar(payload: serde_json::Value) -> Self {
        Self { payload, rows_returned: None, truncated: false }
    }

    /// A result made of `rows` items
    #[must_use]
    pub fn rows(payload: serde_json::Value, rows: usize, truncated: bool) -> Self {
        Self { payload, rows_returned: Some(rows), truncated }
    }
}

/// Tabular result shared by the relational dialects
///
/// Rows are columnar (`rows[i][j]` is column `columns[j]`) to keep payloads compact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    /// Column names in result order
    pub columns: Vec<String>,

    /// Row values
    pub rows: Vec<Vec<serde_json::Value>>,

    /// Rows affected (statements that do not return rows)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
}

impl RowSet {
    /// Convert into a `QueryResult`
    pub fn into_result(self, truncated: bool) -> Result<QueryResult> {
        let count = self.rows.len();
        let returns_rows = self.rows_affected.is_none();
        let payload = serde_json::to_value(self).map_err(|e| {
            crate::error::DbError::query_failed(format!("Failed to serialize result: {e}"))
        })?;

        Ok(if returns_rows {
            QueryResult::rows(payload, count, truncated)
        } else {
            QueryResult::scalar(payload)
        })
    }
}

/// Engine adapter trait
///
/// Implemented once per engine family. Handles are opened by `connect`, passed back
/// into `query`/`health_check`, and released by `disconnect`.
pub trait EngineAdapter: Send + Sync {
    /// Live, engine-specific connection
    type Handle: Send;

    /// Open a connection to the engine
    ///
    /// Must not retry. Failures map to `ConnectionError`, or to
    /// `InvalidConnectionStringError` when the driver rejects the string itself.
    fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> impl Future<Output = Result<Self::Handle>> + Send;

    /// Execute an engine-native statement
    ///
    /// Failures map to `QueryExecutionError` with the engine's own message preserved.
    fn query(
        &self,
        handle: &mut Self::Handle,
        statement: &str,
        limits: &QueryLimits,
    ) -> impl Future<Output = Result<QueryResult>> + Send;

    /// Release the connection
    ///
    /// Idempotent: calling it on an already-closed handle is a no-op.
    fn disconnect(&self, handle: &mut Self::Handle) -> impl Future<Output = Result<()>> + Send;

    /// Lightweight liveness check; returns false on any failure
    fn health_check(&self, handle: &mut Self::Handle) -> impl Future<Output = bool> + Send;

    /// Server version string, if the engine reports one
    fn server_version(
        &self,
        _handle: &mut Self::Handle,
    ) -> impl Future<Output = Option<String>> + Send {
        async { None }
    }
}

/// Encode raw bytes for JSON: UTF-8 text as-is, anything else as Base64
#[must_use]
pub fn bytes_to_json(bytes: &[u8]) -> serde_json::Value {
    match std::str::from_utf8(bytes) {
        Ok(s) => serde_json::Value::String(s.to_string()),
        Err(_) => {
            use base64::Engine;
            serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
    }
}

/// Convert a float to JSON, mapping NaN/Infinity to null
#[must_use]
pub fn float_to_json(value: f64) -> serde_json::Value {
    serde_json::Number::from_f64(value).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

/// Reject empty statements before any connection is opened
pub fn ensure_statement(statement: &str) -> Result<&str> {
    let trimmed = statement.trim();
    if trimmed.is_empty() {
        return Err(crate::error::DbError::query_failed("Statement cannot be empty"));
    }
    Ok(trimmed)
}
