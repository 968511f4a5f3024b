//! Connection Resolver
//!
//! Turns a raw `(type, connection string)` pair into a validated [`ConnectionDescriptor`].
//! Resolution is pure: it never opens a socket, it only checks that the engine name is
//! known and that the connection string is a well-formed URI for that engine.
//!
//! # Normalization
//! - Engine names are trimmed and case-folded, and aliases are accepted
//!   (`postgresql`/`pg`, `mariadb`, `mongo`)
//! - Connection strings are trimmed
//! - `mariadb://` is rewritten to `mysql://` so the MySQL driver accepts it

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DbError, Result};

/// Supported database engine types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    /// `PostgreSQL` (relational)
    Postgres,
    /// `MySQL` / `MariaDB` (relational)
    MySql,
    /// `MongoDB` (document store)
    MongoDb,
    /// `Redis` (key-value store)
    Redis,
}

impl EngineType {
    /// Every supported engine, in display order
    pub const ALL: [Self; 4] = [Self::Postgres, Self::MySql, Self::MongoDb, Self::Redis];

    /// Canonical engine name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::MongoDb => "mongodb",
            Self::Redis => "redis",
        }
    }

    /// Engine family, as used in the glossary
    #[must_use]
    pub const fn family(&self) -> &'static str {
        match self {
            Self::Postgres | Self::MySql => "relational",
            Self::MongoDb => "document-store",
            Self::Redis => "key-value-store",
        }
    }

    /// URI schemes accepted for this engine
    #[must_use]
    pub const fn schemes(&self) -> &'static [&'static str] {
        match self {
            Self::Postgres => &["postgres", "postgresql"],
            Self::MySql => &["mysql", "mariadb"],
            Self::MongoDb => &["mongodb", "mongodb+srv"],
            Self::Redis => &["redis", "rediss", "redis+unix", "unix"],
        }
    }

    /// Parse an engine name (case-insensitive, aliases accepted)
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "mongodb" | "mongo" => Ok(Self::MongoDb),
            "redis" => Ok(Self::Redis),
            "" => Err(DbError::unsupported_engine("engine type cannot be empty")),
            other => Err(DbError::unsupported_engine(format!(
                "'{other}' (supported: postgres, mysql, mongodb, redis)"
            ))),
        }
    }
}

impl std::fmt::Display for EngineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EngineType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Validated, normalized connection request
///
/// Created per request and never persisted.
/// WARNING: `connection_string` may contain credentials, use [`Self::redacted`] for logs.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    engine: EngineType,
    connection_string: String,
}

impl ConnectionDescriptor {
    #[must_use]
    pub const fn engine(&self) -> EngineType {
        self.engine
    }

    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Connection string with any password replaced by `***`
    #[must_use]
    pub fn redacted(&self) -> String {
        redact(&self.connection_string)
    }
}

impl std::fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("engine", &self.engine)
            .field("connection_string", &self.redacted())
            .finish()
    }
}

/// Resolve a raw engine type and connection string into a descriptor
///
/// # Errors
/// - `UnsupportedEngineError` if `engine_type` is not a known engine
/// - `InvalidConnectionStringError` if the string is empty, not a URI, uses a scheme the
///   engine does not accept, or lacks a host for a network scheme
pub fn resolve(engine_type: &str, connection_string: &str) -> Result<ConnectionDescriptor> {
    let engine = EngineType::parse(engine_type)?;

    let trimmed = connection_string.trim();
    if trimmed.is_empty() {
        return Err(DbError::invalid_connection_string("connection string cannot be empty"));
    }

    let url = Url::parse(trimmed).map_err(|e| {
        DbError::invalid_connection_string(format!(
            "expected a {engine} URI such as {}://..., failed to parse: {e}",
            engine.schemes()[0]
        ))
    })?;

    let scheme = url.scheme();
    if !engine.schemes().contains(&scheme) {
        return Err(DbError::invalid_connection_string(format!(
            "scheme '{scheme}' does not match engine {engine} (expected one of: {})",
            engine.schemes().join(", ")
        )));
    }

    let is_socket_scheme = matches!(scheme, "redis+unix" | "unix");
    if !is_socket_scheme && url.host_str().map_or(true, str::is_empty) {
        return Err(DbError::invalid_connection_string(format!(
            "{engine} connection string must include a host"
        )));
    }

    let connection_string = if scheme == "mariadb" {
        format!("mysql{}", &trimmed["mariadb".len()..])
    } else {
        trimmed.to_string()
    };

    Ok(ConnectionDescriptor { engine, connection_string })
}

/// Replace the password component of a URI-shaped connection string
///
/// Strings that do not parse as URIs are returned with everything after the
/// scheme hidden, so nothing secret leaks through a malformed value.
#[must_use]
pub fn redact(connection_string: &str) -> String {
    match Url::parse(connection_string) {
        Ok(mut url) => {
            if url.password().is_some() {
                // set_password only fails for cannot-be-a-base URLs, which have no password
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => match connection_string.split_once("://") {
            Some((scheme, _)) => format!("{scheme}://***"),
            None => "***".to_string(),
        },
    }
}
