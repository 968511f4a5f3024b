//! Relational Engine Adapter
//!
//! One adapter for every SQL engine, parameterized by [`SqlDialect`].
//! Statements are passed to the server untouched (vendor-specific SQL).
//!
//! # Dialects
//! - `Postgres`: `tokio-postgres`, see [`postgres`]
//! - `MySql`: `mysql_async` (also `MariaDB`), see [`mysql`]
//!
//! Each dialect lives behind its own cargo feature; an adapter for a dialect that
//! was compiled out fails every `connect` with `UnsupportedEngineError`.

use crate::engine::{EngineAdapter, QueryLimits, QueryResult};
use crate::error::{DbError, Result};
use crate::resolver::ConnectionDescriptor;

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;

/// SQL dialect served by a [`RelationalAdapter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    MySql,
}

impl SqlDialect {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
        }
    }
}

/// Open relational connection
///
/// The inner `Option` is `None` once the handle has been disconnected.
pub enum RelationalHandle {
    #[cfg(feature = "postgres")]
    Postgres(Option<postgres::PgSession>),
    #[cfg(feature = "mysql")]
    MySql(Option<::mysql_async::Conn>),
}

/// Relational engine adapter
#[derive(Debug, Clone, Copy)]
pub struct RelationalAdapter {
    dialect: SqlDialect,
}

impl RelationalAdapter {
    #[must_use]
    pub const fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    #[must_use]
    pub const fn dialect(&self) -> SqlDialect {
        self.dialect
    }
}

fn closed_handle() -> DbError {
    DbError::query_failed("Connection is already closed")
}

impl EngineAdapter for RelationalAdapter {
    type Handle = RelationalHandle;

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<RelationalHandle> {
        match self.dialect {
            #[cfg(feature = "postgres")]
            SqlDialect::Postgres => {
                let session = postgres::connect(descriptor.connection_string()).await?;
                Ok(RelationalHandle::Postgres(Some(session)))
            }
            #[cfg(feature = "mysql")]
            SqlDialect::MySql => {
                let conn = mysql::connect(descriptor.connection_string()).await?;
                Ok(RelationalHandle::MySql(Some(conn)))
            }
            #[allow(unreachable_patterns)]
            other => Err(DbError::unsupported_engine(format!(
                "{} engine not enabled. Build with --features {}",
                other.as_str(),
                other.as_str()
            ))),
        }
    }

    async fn query(
        &self,
        handle: &mut RelationalHandle,
        statement: &str,
        limits: &QueryLimits,
    ) -> Result<QueryResult> {
        match handle {
            #[cfg(feature = "postgres")]
            RelationalHandle::Postgres(session) => {
                let session = session.as_ref().ok_or_else(closed_handle)?;
                postgres::execute(session, statement, limits).await
            }
            #[cfg(feature = "mysql")]
            RelationalHandle::MySql(conn) => {
                let conn = conn.as_mut().ok_or_else(closed_handle)?;
                mysql::execute(conn, statement, limits).await
            }
        }
    }

    async fn disconnect(&self, handle: &mut RelationalHandle) -> Result<()> {
        match handle {
            #[cfg(feature = "postgres")]
            RelationalHandle::Postgres(session) => {
                if let Some(session) = session.take() {
                    session.close().await;
                }
                Ok(())
            }
            #[cfg(feature = "mysql")]
            RelationalHandle::MySql(conn) => match conn.take() {
                Some(conn) => conn.disconnect().await.map_err(|e| {
                    DbError::connection_failed(format!("Failed to disconnect from MySQL: {e}"))
                }),
                None => Ok(()),
            },
        }
    }

    async fn health_check(&self, handle: &mut RelationalHandle) -> bool {
        match handle {
            #[cfg(feature = "postgres")]
            RelationalHandle::Postgres(session) => match session.as_ref() {
                Some(session) => postgres::ping(session).await,
                None => false,
            },
            #[cfg(feature = "mysql")]
            RelationalHandle::MySql(conn) => match conn.as_mut() {
                Some(conn) => mysql::ping(conn).await,
                None => false,
            },
        }
    }

    async fn server_version(&self, handle: &mut RelationalHandle) -> Option<String> {
        match handle {
            #[cfg(feature = "postgres")]
            RelationalHandle::Postgres(session) => postgres::server_version(session.as_ref()?).await,
            #[cfg(feature = "mysql")]
            RelationalHandle::MySql(conn) => mysql::server_version(conn.as_mut()?).await,
        }
    }
}
