//! Operation Result Types
//!
//! This module defines the structured JSON shape returned by every manager operation.
//! Both the CLI and the server serialize `OperationResult` as-is.
//!
//! # Output Contract
//! - Success: `{"success": true, "engine": "...", "operation": "...", "payload": ..., "meta": {...}}`
//! - Failure: `{"success": false, "engine": "...", "operation": "...", "payload": null, "error": {"kind": "...", "message": "..."}, "meta": {...}}`
//!
//! `payload` is always present (it may be `null`, e.g. a key-value GET on a missing key).

use serde::{Deserialize, Serialize};

use crate::error::DbError;

/// Result of a single manager operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Whether the operation succeeded
    pub success: bool,

    /// Engine used (postgres, mysql, mongodb, redis), or the raw type when it could not be resolved
    pub engine: String,

    /// Operation that was attempted (testConnection, executeQuery)
    pub operation: String,

    /// Engine result normalized to a JSON tree
    pub payload: serde_json::Value,

    /// Structured error, present only on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,

    /// Execution metadata
    pub meta: Metadata,
}

impl OperationResult {
    /// Create a successful result
    pub fn ok(
        engine: impl Into<String>,
        operation: impl Into<String>,
        payload: serde_json::Value,
        meta: Metadata,
    ) -> Self {
        Self {
            success: true,
            engine: engine.into(),
            operation: operation.into(),
            payload,
            error: None,
            meta,
        }
    }

    /// Create a failed result from a `DbError`
    pub fn from_error(
        engine: impl Into<String>,
        operation: impl Into<String>,
        err: &DbError,
        meta: Metadata,
    ) -> Self {
        Self {
            success: false,
            engine: engine.into(),
            operation: operation.into(),
            payload: serde_json::Value::Null,
            error: Some(ErrorInfo::from(err)),
            meta,
        }
    }

    /// Error kind, if this result is a failure
    #[must_use]
    pub fn error_kind(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.kind.as_str())
    }
}

/// Error information structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error kind (e.g., "ConnectionError", "QueryExecutionError")
    pub kind: String,

    /// Human-readable message, engine message preserved, no credentials
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into() }
    }
}

impl From<&DbError> for ErrorInfo {
    fn from(err: &DbError) -> Self {
        Self::new(err.kind(), err.message())
    }
}

/// Execution metadata included in every result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Wall-clock time of the whole operation in milliseconds
    pub execution_ms: u64,

    /// Number of rows/documents/elements returned (queries only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_returned: Option<usize>,

    /// Set when the result was cut off at `max_rows`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl Metadata {
    /// Create metadata with just execution time
    pub fn new(execution_ms: u64) -> Self {
        Self { execution_ms, ..Self::default() }
    }

    /// Create metadata with execution time and row count
    pub fn with_rows(execution_ms: u64, rows_returned: usize, truncated: bool) -> Self {
        Self { execution_ms, rows_returned: Some(rows_returned), truncated }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_success_serialization() {
        let result = OperationResult::ok(
            "postgres",
            "executeQuery",
            json!({"columns": ["n"], "rows": [[1]]}),
            Metadata::with_rows(42, 1, false),
        );

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains(r#""success":true"#));
        assert!(json.contains(r#""engine":"postgres"#));
        assert!(json.contains(r#""operation":"executeQuery"#));
        assert!(json.contains(r#""execution_ms":42"#));
        assert!(json.contains(r#""rows_returned":1"#));
        assert!(!json.contains("error"));
        assert!(!json.contains("truncated"));
    }

    #[test]
    fn test_null_payload_is_serialized() {
        let result =
            OperationResult::ok("redis", "executeQuery", serde_json::Value::Null, Metadata::new(1));
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.as_object().unwrap().contains_key("payload"));
        assert_eq!(value["payload"], serde_json::Value::Null);
    }

    #[test]
    fn test_failure_from_error() {
        let err = DbError::connection_failed("password authentication failed for user \"u\"");
        let result = OperationResult::from_error("postgres", "testConnection", &err, Metadata::new(3));

        assert!(!result.success);
        assert_eq!(result.error_kind(), Some("ConnectionError"));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["error"]["kind"], "ConnectionError");
        assert!(value["error"]["message"]
            .as_str()
            .unwrap()
            .contains("password authentication failed"));
    }

    #[test]
    fn test_truncated_flag_serialized_when_set() {
        let meta = Metadata::with_rows(10, 5, true);
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains(r#""truncated":true"#));
    }

    #[test]
    fn test_round_trip_preserves_error() {
        let err = DbError::query_failed("ERR unknown command 'FOO'");
        let result = OperationResult::from_error("redis", "executeQuery", &err, Metadata::new(0));
        let json = serde_json::to_string(&result).unwrap();
        let back: OperationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
