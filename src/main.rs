//! Universal DB MCP CLI Entry Point
//!
//! Subcommands:
//! - `server` - MCP server over TCP (default port 3000) or stdio
//! - `connect` - Test a database connection (optionally save it as a profile)
//! - `query` - Execute one engine-native statement
//! - `health` - Report CLI health and the engines compiled into this build
//!
//! All output to stdout is JSON-only. Logs go to stderr.
//! Exit code is 0 on success and 1 on any failure.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use universal_db_mcp::config::{self, ConfigLocation, Profile, Settings};
use universal_db_mcp::logging::{self, CLI_DEFAULT_LEVEL, SERVER_DEFAULT_LEVEL};
use universal_db_mcp::server::{self, McpServer};
use universal_db_mcp::{enabled_engines, DbError, ErrorInfo, OperationResult, QueryLimits};

/// Universal Database MCP Server and CLI Tool
#[derive(Parser)]
#[command(name = "universal-db-mcp")]
#[command(about = "Universal Database MCP Server and CLI Tool")]
#[command(version)]
struct Cli {
    /// Log level for stderr logs (RUST_LOG takes precedence)
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server
    Server {
        /// Port to run the server on [default: 3000]
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind [default: 127.0.0.1]
        #[arg(long)]
        host: Option<String>,

        /// Serve JSON-RPC over stdin/stdout instead of TCP
        #[arg(long, conflicts_with_all = ["port", "host"])]
        stdio: bool,
    },

    /// Test database connection
    Connect {
        #[command(flatten)]
        target: Target,

        /// Save the connection as a named profile once the test succeeds
        #[arg(long, value_name = "NAME", conflicts_with = "profile")]
        save: Option<String>,

        /// Save to the global config instead of .universal-db/config.json
        #[arg(long, requires = "save")]
        global: bool,
    },

    /// Execute a query
    Query {
        #[command(flatten)]
        target: Target,

        /// Query to execute (SQL, a JSON command document, or a command line)
        #[arg(short, long)]
        query: String,

        /// Maximum rows/documents to return
        #[arg(long)]
        max_rows: Option<usize>,

        /// Query timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Check server health
    Health,
}

/// Which database to talk to: explicit type and connection string, or a profile
#[derive(Args)]
struct Target {
    /// Database type (postgres, mysql, mongodb, redis)
    #[arg(
        short = 't',
        long = "type",
        value_name = "TYPE",
        required_unless_present = "profile",
        requires = "connection"
    )]
    engine_type: Option<String>,

    /// Connection string
    #[arg(short, long, required_unless_present = "profile", requires = "engine_type")]
    connection: Option<String>,

    /// Named connection profile from the config files
    #[arg(long, conflicts_with_all = ["engine_type", "connection"])]
    profile: Option<String>,
}

impl Target {
    /// Resolve to `(engine_type, connection_string)`
    fn resolve(&self, settings: &Settings) -> universal_db_mcp::Result<(String, String)> {
        match (&self.profile, &self.engine_type, &self.connection) {
            (Some(name), _, _) => settings.profile(name)?.resolve(),
            (None, Some(engine_type), Some(connection)) => {
                Ok((engine_type.clone(), connection.clone()))
            }
            _ => Err(DbError::config_error("Provide --type and --connection, or --profile")),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if is_informational(e.kind()) { ExitCode::SUCCESS } else { ExitCode::FAILURE };
        }
    };

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init(cli.log_level.as_deref(), CLI_DEFAULT_LEVEL);
            return report_failure(&e);
        }
    };

    let default_level = match cli.command {
        Commands::Server { .. } => SERVER_DEFAULT_LEVEL,
        _ => CLI_DEFAULT_LEVEL,
    };
    logging::init(cli.log_level.as_deref().or(settings.log_level.as_deref()), default_level);

    match run(cli.command, &settings).await {
        Ok(code) => code,
        Err(e) => {
            // Front-end failures (I/O, bind errors) still produce JSON on stdout
            let _ = emit(&json!({
                "success": false,
                "error": ErrorInfo::new("ServerError", format!("{e:#}")),
            }));
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, settings: &Settings) -> Result<ExitCode> {
    match command {
        Commands::Server { port, host, stdio } => {
            let server = McpServer::new(settings.manager());
            if stdio {
                server.serve_stdio().await?;
            } else {
                let host = host.as_deref().unwrap_or(&settings.server.host);
                let port = port.unwrap_or(settings.server.port);
                let listener = server::bind(host, port).await?;
                Arc::new(server).serve_tcp(listener, shutdown_signal()).await?;
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Connect { target, save, global } => {
            let (engine_type, connection) = match target.resolve(settings) {
                Ok(pair) => pair,
                Err(e) => return Ok(report_failure(&e)),
            };

            let result = settings.manager().test_connection(&engine_type, &connection).await;

            if let (true, Some(name)) = (result.success, save) {
                let location = if global { ConfigLocation::Global } else { ConfigLocation::Local };
                let profile = Profile { engine_type, connection: Some(connection), connection_env: None };
                match config::save_profile(&name, profile, location) {
                    Ok(path) => info!(profile = %name, path = %path.display(), "profile saved"),
                    Err(e) => return Ok(report_failure(&e)),
                }
            }

            report(&result)
        }

        Commands::Query { target, query, max_rows, timeout_ms } => {
            let (engine_type, connection) = match target.resolve(settings) {
                Ok(pair) => pair,
                Err(e) => return Ok(report_failure(&e)),
            };

            let limits = QueryLimits { max_rows, timeout_ms };
            let result = settings
                .manager()
                .execute_query_with_limits(&engine_type, &connection, &query, limits)
                .await;
            report(&result)
        }

        Commands::Health => {
            let engines: Vec<&str> = enabled_engines().iter().map(|e| e.as_str()).collect();
            emit(&json!({
                "success": true,
                "status": "healthy",
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "engines": engines,
            }))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// `--help` and `--version` exit 0; every other parse error is a failure (exit 1)
const fn is_informational(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::DisplayHelp | ErrorKind::DisplayVersion)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available: run until the process is killed
        std::future::pending::<()>().await;
    }
}

fn emit(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report(result: &OperationResult) -> Result<ExitCode> {
    emit(result)?;
    Ok(if result.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn report_failure(err: &DbError) -> ExitCode {
    let _ = emit(&json!({ "success": false, "error": ErrorInfo::from(err) }));
    ExitCode::FAILURE
}
