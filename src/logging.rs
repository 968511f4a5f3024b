//! Logging setup
//!
//! Logs go to stderr so stdout stays reserved for JSON output. `RUST_LOG` wins over
//! the configured level.

use tracing_subscriber::EnvFilter;

/// Level used by one-shot CLI commands
pub const CLI_DEFAULT_LEVEL: &str = "warn";

/// Level used by the long-running server
pub const SERVER_DEFAULT_LEVEL: &str = "info";

/// Build the filter: `RUST_LOG`, else `level`, else `default_level`
#[must_use]
pub fn filter(level: Option<&str>, default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = level.unwrap_or(default_level);
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(default_level))
    })
}

/// Install the global subscriber; later calls are no-ops
pub fn init(level: Option<&str>, default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(level, default_level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
