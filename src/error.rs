//! Error Handling Infrastructure
//!
//! This module defines the error taxonomy shared by the resolver, the engine adapters
//! and the database manager. Every engine-specific failure is normalized into one of
//! these variants, so callers never need engine-specific error handling.
//!
//! # Error Kinds
//! - `InvalidConnectionStringError`: Connection string empty or malformed for the engine
//! - `UnsupportedEngineError`: Engine type unknown (or not compiled into this build)
//! - `ConnectionError`: Network, TLS or authentication failure while connecting
//! - `QueryExecutionError`: Engine-reported failure while running a statement
//! - `TimeoutError`: Connect or query exceeded its time budget
//! - `ConfigError`: Configuration file or profile errors (front-end only)

use std::time::Duration;

use thiserror::Error;

/// Main error type for database operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// Connection string is empty or not well-formed for the target engine
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// Engine type is not supported
    #[error("Unsupported engine: {0}")]
    UnsupportedEngine(String),

    /// Connecting to the engine failed (unreachable host, refused, auth failure)
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The engine rejected or failed to run the statement
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Operation exceeded its time budget
    #[error("{operation} timed out after {}ms", .elapsed.as_millis())]
    Timeout { operation: String, elapsed: Duration },

    /// Configuration error (file not found, invalid JSON, missing profile)
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl DbError {
    /// Stable error kind for structured output
    ///
    /// Kinds are part of the output contract and safe for programmatic matching.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConnectionString(_) => "InvalidConnectionStringError",
            Self::UnsupportedEngine(_) => "UnsupportedEngineError",
            Self::ConnectionFailed(_) => "ConnectionError",
            Self::QueryFailed(_) => "QueryExecutionError",
            Self::Timeout { .. } => "TimeoutError",
            Self::ConfigError(_) => "ConfigError",
        }
    }

    /// Human-readable message (no credentials)
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn invalid_connection_string(message: impl Into<String>) -> Self {
        Self::InvalidConnectionString(message.into())
    }

    pub fn unsupported_engine(message: impl Into<String>) -> Self {
        Self::UnsupportedEngine(message.into())
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout { operation: operation.into(), elapsed }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }
}

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            DbError::invalid_connection_string("test").kind(),
            "InvalidConnectionStringError"
        );
        assert_eq!(DbError::unsupported_engine("test").kind(), "UnsupportedEngineError");
        assert_eq!(DbError::connection_failed("test").kind(), "ConnectionError");
        assert_eq!(DbError::query_failed("test").kind(), "QueryExecutionError");
        assert_eq!(DbError::timeout("query", Duration::from_millis(5)).kind(), "TimeoutError");
        assert_eq!(DbError::config_error("test").kind(), "ConfigError");
    }

    #[test]
    fn test_error_messages() {
        let err = DbError::query_failed("syntax error at or near \"SELEC\"");
        assert!(err.message().contains("syntax error at or near"));

        let err = DbError::timeout("connect", Duration::from_millis(1500));
        assert_eq!(err.message(), "connect timed out after 1500ms");
    }

    #[test]
    fn test_error_constructors() {
        assert!(matches!(
            DbError::invalid_connection_string("x"),
            DbError::InvalidConnectionString(_)
        ));
        assert!(matches!(DbError::unsupported_engine("x"), DbError::UnsupportedEngine(_)));
        assert!(matches!(DbError::connection_failed("x"), DbError::ConnectionFailed(_)));
        assert!(matches!(DbError::query_failed("x"), DbError::QueryFailed(_)));
        assert!(matches!(DbError::config_error("x"), DbError::ConfigError(_)));
    }
}
