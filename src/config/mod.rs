//! Configuration Management
//!
//! Settings for timeouts, row caps, the server listener and named connection profiles.
//!
//! # Configuration Locations
//! - Local: `.universal-db/config.json` (team-shareable, per-project)
//! - Global: `~/.config/universal-db-mcp/config.json` (per-user)
//!
//! # Resolution Precedence
//! 1. Command-line flags (applied by the CLI)
//! 2. Environment variables (`UNIVERSAL_DB_*`)
//! 3. Local config file
//! 4. Global config file
//! 5. Built-in defaults
//!
//! # Profiles
//! A profile names a connection so it can be used with `--profile NAME`:
//!
//! ```json
//! {
//!   "profiles": {
//!     "local": { "type": "postgres", "connection": "postgres://dev@localhost/app" },
//!     "prod": { "type": "postgres", "connection_env": "PROD_DATABASE_URL" }
//!   }
//! }
//! ```
//!
//! `connection_env` keeps the secret out of the file: the connection string is read
//! from that environment variable at resolution time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DbError, Result};
use crate::manager::{DatabaseManager, DEFAULT_CONNECT_TIMEOUT, DEFAULT_QUERY_TIMEOUT};

/// Overrides `connect_timeout_ms`
pub const ENV_CONNECT_TIMEOUT: &str = "UNIVERSAL_DB_CONNECT_TIMEOUT_MS";
/// Overrides `query_timeout_ms`
pub const ENV_QUERY_TIMEOUT: &str = "UNIVERSAL_DB_QUERY_TIMEOUT_MS";
/// Overrides `max_rows`
pub const ENV_MAX_ROWS: &str = "UNIVERSAL_DB_MAX_ROWS";

/// Default server port
pub const DEFAULT_PORT: u16 = 3000;
/// Default server bind address
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Named connection profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    /// Engine type (postgres, mysql, mongodb, redis)
    #[serde(rename = "type")]
    pub engine_type: String,

    /// Connection string stored directly in the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,

    /// Environment variable holding the connection string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_env: Option<String>,
}

impl Profile {
    /// Resolve to `(engine_type, connection_string)` using the process environment
    pub fn resolve(&self) -> Result<(String, String)> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Resolve with an explicit environment lookup
    pub fn resolve_with(&self, env: impl Fn(&str) -> Option<String>) -> Result<(String, String)> {
        let connection = match (&self.connection, &self.connection_env) {
            (_, Some(var)) => env(var).ok_or_else(|| {
                DbError::config_error(format!(
                    "Environment variable {var} not found for connection string"
                ))
            })?,
            (Some(connection), None) => connection.clone(),
            (None, None) => {
                return Err(DbError::config_error(
                    "Profile needs either \"connection\" or \"connection_env\"",
                ))
            }
        };

        Ok((self.engine_type.clone(), connection))
    }
}

/// Server section of a config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// One config file as written on disk (every field optional)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default)]
    pub server: ServerFile,
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl ConfigFile {
    /// Layer `other` on top of `self`; set fields in `other` win
    pub fn overlay(&mut self, other: Self) {
        if other.connect_timeout_ms.is_some() {
            self.connect_timeout_ms = other.connect_timeout_ms;
        }
        if other.query_timeout_ms.is_some() {
            self.query_timeout_ms = other.query_timeout_ms;
        }
        if other.max_rows.is_some() {
            self.max_rows = other.max_rows;
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
        if other.server.host.is_some() {
            self.server.host = other.server.host;
        }
        if other.server.port.is_some() {
            self.server.port = other.server.port;
        }
        self.profiles.extend(other.profiles);
    }
}

/// Server listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Effective settings after merging files, environment and defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub connect_timeout_ms: u64,
    pub query_timeout_ms: u64,
    pub max_rows: Option<usize>,
    pub log_level: Option<String>,
    pub server: ServerSettings,
    pub profiles: HashMap<String, Profile>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_file(ConfigFile::default())
    }
}

impl Settings {
    fn from_file(file: ConfigFile) -> Self {
        Self {
            connect_timeout_ms: file
                .connect_timeout_ms
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT.as_millis() as u64),
            query_timeout_ms: file.query_timeout_ms.unwrap_or(DEFAULT_QUERY_TIMEOUT.as_millis() as u64),
            max_rows: file.max_rows,
            log_level: file.log_level,
            server: ServerSettings {
                host: file.server.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: file.server.port.unwrap_or(DEFAULT_PORT),
            },
            profiles: file.profiles,
        }
    }

    /// Load from the standard locations and the process environment
    pub fn load() -> Result<Self> {
        let global = global_config_path().ok();
        let local = local_config_path().ok();
        Self::load_from(global.as_deref(), local.as_deref(), |name| std::env::var(name).ok())
    }

    /// Load from explicit paths (global first, local on top) and an environment lookup
    ///
    /// Missing files are skipped.
    pub fn load_from(
        global: Option<&Path>,
        local: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut merged = ConfigFile::default();
        for path in [global, local].into_iter().flatten() {
            if let Some(file) = load_file(path)? {
                merged.overlay(file);
            }
        }

        let mut settings = Self::from_file(merged);
        settings.apply_env(env)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `UNIVERSAL_DB_*` overrides
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(ms) = parse_env::<u64>(&env, ENV_CONNECT_TIMEOUT)? {
            self.connect_timeout_ms = ms;
        }
        if let Some(ms) = parse_env::<u64>(&env, ENV_QUERY_TIMEOUT)? {
            self.query_timeout_ms = ms;
        }
        if let Some(rows) = parse_env::<usize>(&env, ENV_MAX_ROWS)? {
            self.max_rows = Some(rows);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 || self.query_timeout_ms == 0 {
            return Err(DbError::config_error("Timeouts must be greater than zero"));
        }
        if self.max_rows == Some(0) {
            return Err(DbError::config_error("max_rows must be greater than zero"));
        }
        Ok(())
    }

    /// Look up a profile by name
    pub fn profile(&self, name: &str) -> Result<&Profile> {
        self.profiles.get(name).ok_or_else(|| {
            let mut available: Vec<_> = self.profiles.keys().collect();
            available.sort();
            DbError::config_error(format!(
                "Profile '{name}' not found. Available profiles: {available:?}"
            ))
        })
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Build a manager from these settings
    #[must_use]
    pub fn manager(&self) -> DatabaseManager {
        DatabaseManager::new(self.connect_timeout(), self.query_timeout()).with_max_rows(self.max_rows)
    }
}

fn parse_env<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    match env(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            DbError::config_error(format!("{name} must be a positive integer, got '{raw}'"))
        }),
    }
}

/// Configuration file location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLocation {
    /// Local config: `.universal-db/config.json` (team-shareable)
    Local,
    /// Global config: `~/.config/universal-db-mcp/config.json` (per-user)
    Global,
}

impl ConfigLocation {
    pub fn path(self) -> Result<PathBuf> {
        match self {
            Self::Local => local_config_path(),
            Self::Global => global_config_path(),
        }
    }
}

/// Get path to local config file (`.universal-db/config.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        DbError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".universal-db").join("config.json"))
}

/// Get path to global config file (`~/.config/universal-db-mcp/config.json`)
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| DbError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("universal-db-mcp").join("config.json"))
}

/// Load one config file; `None` if it does not exist
pub fn load_file(path: &Path) -> Result<Option<ConfigFile>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        DbError::config_error(format!("Could not read config file {}: {e}", path.display()))
    })?;

    serde_json::from_str(&contents).map(Some).map_err(|e| {
        DbError::config_error(format!("Invalid config file {}: {e}", path.display()))
    })
}

/// Write a config file, creating parent directories
pub fn save_file(path: &Path, file: &ConfigFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            DbError::config_error(format!("Could not create config directory: {e}"))
        })?;
    }

    let contents = serde_json::to_string_pretty(file)
        .map_err(|e| DbError::config_error(format!("Could not serialize config: {e}")))?;

    fs::write(path, contents)
        .map_err(|e| DbError::config_error(format!("Could not write config file: {e}")))
}

/// Add or replace a profile in the config file at `location`
pub fn save_profile(name: &str, profile: Profile, location: ConfigLocation) -> Result<PathBuf> {
    let path = location.path()?;
    let mut file = load_file(&path)?.unwrap_or_default();
    file.profiles.insert(name.to_string(), profile);
    save_file(&path, &file)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.connect_timeout_ms, 10_000);
        assert_eq!(settings.query_timeout_ms, 30_000);
        assert_eq!(settings.max_rows, None);
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert!(settings.profiles.is_empty());
    }

    #[test]
    fn test_missing_files_give_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(
            Some(&dir.path().join("nope.json")),
            Some(&dir.path().join("also-nope.json")),
            no_env,
        )
        .unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_local_overrides_global() {
        let dir = tempfile::tempdir().unwrap();
        let global = write(
            dir.path(),
            "global.json",
            r#"{
                "query_timeout_ms": 5000,
                "max_rows": 100,
                "server": {"port": 4000},
                "profiles": {
                    "shared": {"type": "redis", "connection": "redis://global:6379"},
                    "cache": {"type": "redis", "connection": "redis://cache:6379"}
                }
            }"#,
        );
        let local = write(
            dir.path(),
            "local.json",
            r#"{
                "max_rows": 10,
                "profiles": {"shared": {"type": "redis", "connection": "redis://local:6379"}}
            }"#,
        );

        let settings = Settings::load_from(Some(&global), Some(&local), no_env).unwrap();
        assert_eq!(settings.query_timeout_ms, 5000);
        assert_eq!(settings.max_rows, Some(10));
        assert_eq!(settings.server.port, 4000);
        assert_eq!(settings.profiles.len(), 2);
        assert_eq!(
            settings.profile("shared").unwrap().connection.as_deref(),
            Some("redis://local:6379")
        );
    }

    #[test]
    fn test_env_overrides_files() {
        let dir = tempfile::tempdir().unwrap();
        let local = write(dir.path(), "local.json", r#"{"connect_timeout_ms": 2000}"#);

        let env = |name: &str| match name {
            ENV_CONNECT_TIMEOUT => Some("750".to_string()),
            ENV_MAX_ROWS => Some(" 25 ".to_string()),
            _ => None,
        };
        let settings = Settings::load_from(None, Some(&local), env).unwrap();
        assert_eq!(settings.connect_timeout(), Duration::from_millis(750));
        assert_eq!(settings.max_rows, Some(25));
    }

    #[test]
    fn test_invalid_env_value() {
        let env = |name: &str| (name == ENV_QUERY_TIMEOUT).then(|| "soon".to_string());
        let err = Settings::load_from(None, None, env).unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
        assert!(err.message().contains(ENV_QUERY_TIMEOUT));
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let local = write(dir.path(), "local.json", "{ not json");
        let err = Settings::load_from(None, Some(&local), no_env).unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let local = write(dir.path(), "local.json", r#"{"query_timeout": 5}"#);
        assert!(Settings::load_from(None, Some(&local), no_env).is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let local = write(dir.path(), "local.json", r#"{"query_timeout_ms": 0}"#);
        let err = Settings::load_from(None, Some(&local), no_env).unwrap_err();
        assert!(err.message().contains("greater than zero"));
    }

    #[test]
    fn test_profile_direct_connection() {
        let profile = Profile {
            engine_type: "postgres".to_string(),
            connection: Some("postgres://u:p@localhost/db".to_string()),
            connection_env: None,
        };
        let (engine, conn) = profile.resolve_with(no_env).unwrap();
        assert_eq!(engine, "postgres");
        assert_eq!(conn, "postgres://u:p@localhost/db");
    }

    #[test]
    fn test_profile_env_connection() {
        let profile = Profile {
            engine_type: "mysql".to_string(),
            connection: None,
            connection_env: Some("APP_DB_URL".to_string()),
        };
        let env = |name: &str| (name == "APP_DB_URL").then(|| "mysql://root@db/app".to_string());
        let (_, conn) = profile.resolve_with(env).unwrap();
        assert_eq!(conn, "mysql://root@db/app");
    }

    #[test]
    fn test_profile_missing_env_var() {
        let profile = Profile {
            engine_type: "mysql".to_string(),
            connection: None,
            connection_env: Some("NONEXISTENT_VAR".to_string()),
        };
        let err = profile.resolve_with(no_env).unwrap_err();
        assert!(err.message().contains("Environment variable NONEXISTENT_VAR not found"));
    }

    #[test]
    fn test_profile_without_connection() {
        let profile =
            Profile { engine_type: "redis".to_string(), connection: None, connection_env: None };
        assert_eq!(profile.resolve_with(no_env).unwrap_err().kind(), "ConfigError");
    }

    #[test]
    fn test_unknown_profile_lists_available() {
        let mut settings = Settings::default();
        settings.profiles.insert(
            "dev".to_string(),
            Profile {
                engine_type: "redis".to_string(),
                connection: Some("redis://localhost".to_string()),
                connection_env: None,
            },
        );
        let err = settings.profile("prod").unwrap_err();
        assert!(err.message().contains("Profile 'prod' not found"));
        assert!(err.message().contains("dev"));
    }

    #[test]
    fn test_save_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut file = ConfigFile { max_rows: Some(50), ..ConfigFile::default() };
        file.profiles.insert(
            "local".to_string(),
            Profile {
                engine_type: "mongodb".to_string(),
                connection: Some("mongodb://localhost/app".to_string()),
                connection_env: None,
            },
        );
        save_file(&path, &file).unwrap();

        assert_eq!(load_file(&path).unwrap(), Some(file));
    }

    #[test]
    fn test_profile_serialization_uses_type_key() {
        let profile = Profile {
            engine_type: "redis".to_string(),
            connection: None,
            connection_env: Some("REDIS_URL".to_string()),
        };
        let json = serde_json::to_string(&profile).unwrap();
        assert_eq!(json, r#"{"type":"redis","connection_env":"REDIS_URL"}"#);
    }

    #[test]
    fn test_manager_from_settings() {
        let settings = Settings { connect_timeout_ms: 1234, ..Settings::default() };
        let manager = settings.manager();
        assert_eq!(manager.connect_timeout(), Duration::from_millis(1234));
        assert_eq!(manager.query_timeout(), Duration::from_secs(30));
    }
}
