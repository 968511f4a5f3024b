//! Universal DB MCP - One Connect/Query Surface for Many Databases
//!
//! A uniform, stateless way to test connections to and run statements against
//! relational (`PostgreSQL`, `MySQL`), document (`MongoDB`) and key-value (`Redis`)
//! engines. Callers name an engine and a connection string; every engine-specific
//! detail stays behind an adapter.
//!
//! # Core Principles
//! - Structured JSON results with stable error kinds, never panics or raw driver errors
//! - No query language abstraction (statements are engine-native)
//! - One connection per operation, always released (no pooling, no retries)
//! - Credentials never appear in logs or error messages
//!
//! # Architecture
//! Both the CLI and the MCP server are thin wrappers around [`DatabaseManager`].
//!
//! # Module Organization
//! - [`error`] - Error taxonomy
//! - [`output`] - Operation result shape
//! - [`resolver`] - Engine type and connection string validation
//! - [`engine`] - Adapter trait and the per-engine adapters
//! - [`manager`] - Operation lifecycle (connect, run, disconnect, timeouts)
//! - [`config`] - Settings and named connection profiles
//! - [`server`] - MCP server (JSON-RPC 2.0 over TCP or stdio)
//! - [`logging`] - `tracing` subscriber setup

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod manager;
pub mod output;
pub mod resolver;
pub mod server;

pub use config::{ConfigLocation, Profile, Settings};
pub use engine::{EngineAdapter, QueryLimits, QueryResult, RowSet};
pub use error::{DbError, Result};
pub use manager::{enabled_engines, DatabaseManager, QueryRequest, EXECUTE_QUERY, TEST_CONNECTION};
pub use output::{ErrorInfo, Metadata, OperationResult};
pub use resolver::{resolve, ConnectionDescriptor, EngineType};
pub use server::McpServer;
