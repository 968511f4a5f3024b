//! Key-Value Store Engine Adapter (`Redis`)
//!
//! Statements are command lines, tokenized the way `redis-cli` does:
//!
//! ```text
//! SET greeting "hello world"
//! HSET user:1 name 'Ada Lovelace' born 1815
//! GET "bin\x00key"
//! ```
//!
//! Double-quoted arguments support `\n \r \t \b \a \\ \" \xHH` escapes; single-quoted
//! arguments are literal except for `\'`. Replies are mapped to JSON: nil becomes
//! `null`, bulk strings become UTF-8 text (or Base64), arrays and sets become JSON
//! arrays and maps become objects.

use std::sync::Once;

use redis::aio::MultiplexedConnection;
use serde_json::Value;

use crate::engine::{bytes_to_json, float_to_json, EngineAdapter, QueryLimits, QueryResult};
use crate::error::{DbError, Result};
use crate::resolver::ConnectionDescriptor;

/// Commands that switch the connection into a streaming mode
const STREAMING_COMMANDS: &[&str] = &["SUBSCRIBE", "PSUBSCRIBE", "SSUBSCRIBE", "MONITOR"];

/// Open `Redis` connection
///
/// The inner `Option` is `None` once the handle has been disconnected.
pub struct KeyValueHandle(Option<MultiplexedConnection>);

/// Key-value engine adapter
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValueAdapter;

/// Install the process-wide rustls provider used by `rediss://` connections
fn install_tls_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // Err means another component already installed one
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

fn closed_handle() -> DbError {
    DbError::query_failed("Connection is already closed")
}

impl EngineAdapter for KeyValueAdapter {
    type Handle = KeyValueHandle;

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<KeyValueHandle> {
        if descriptor.connection_string().starts_with("rediss://") {
            install_tls_provider();
        }

        let client = redis::Client::open(descriptor.connection_string()).map_err(|e| {
            DbError::invalid_connection_string(format!("Redis rejected the connection string: {e}"))
        })?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| DbError::connection_failed(format!("Failed to connect to Redis: {e}")))?;

        Ok(KeyValueHandle(Some(conn)))
    }

    async fn query(
        &self,
        handle: &mut KeyValueHandle,
        statement: &str,
        _limits: &QueryLimits,
    ) -> Result<QueryResult> {
        let args = tokenize(statement)?;
        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        if STREAMING_COMMANDS.contains(&name.as_str()) {
            return Err(DbError::query_failed(format!(
                "{name} streams replies and is not supported for one-shot queries"
            )));
        }

        let conn = handle.0.as_mut().ok_or_else(closed_handle)?;

        let mut cmd = redis::Cmd::new();
        for arg in &args {
            cmd.arg(arg.as_slice());
        }

        let reply: redis::Value =
            cmd.query_async(conn).await.map_err(|e| DbError::query_failed(e.to_string()))?;

        Ok(match &reply {
            redis::Value::Array(items) | redis::Value::Set(items) => {
                QueryResult::rows(value_to_json(&reply), items.len(), false)
            }
            _ => QueryResult::scalar(value_to_json(&reply)),
        })
    }

    async fn disconnect(&self, handle: &mut KeyValueHandle) -> Result<()> {
        // Dropping the last clone closes the socket
        handle.0.take();
        Ok(())
    }

    async fn health_check(&self, handle: &mut KeyValueHandle) -> bool {
        match handle.0.as_mut() {
            Some(conn) => redis::cmd("PING").query_async::<String>(conn).await.is_ok(),
            None => false,
        }
    }

    async fn server_version(&self, handle: &mut KeyValueHandle) -> Option<String> {
        let conn = handle.0.as_mut()?;
        let info: String = redis::cmd("INFO").arg("server").query_async(conn).await.ok()?;
        parse_info_version(&info)
    }
}

/// Extract the version line from an `INFO server` reply
fn parse_info_version(info: &str) -> Option<String> {
    info.lines()
        .find_map(|line| line.strip_prefix("redis_version:"))
        .map(|v| format!("Redis {}", v.trim()))
}

/// Map a reply to JSON
fn value_to_json(value: &redis::Value) -> Value {
    use redis::Value as R;

    match value {
        R::Nil => Value::Null,
        R::Int(i) => Value::from(*i),
        R::BulkString(bytes) => bytes_to_json(bytes),
        R::SimpleString(s) => Value::String(s.clone()),
        R::Okay => Value::String("OK".to_string()),
        R::Double(d) => float_to_json(*d),
        R::Boolean(b) => Value::Bool(*b),
        R::VerbatimString { text, .. } => Value::String(text.clone()),
        R::Array(items) | R::Set(items) => Value::Array(items.iter().map(value_to_json).collect()),
        R::Map(pairs) => {
            Value::Object(pairs.iter().map(|(k, v)| (map_key(k), value_to_json(v))).collect())
        }
        R::Attribute { data, .. } => value_to_json(data),
        R::Push { data, .. } => Value::Array(data.iter().map(value_to_json).collect()),
        other => Value::String(format!("{other:?}")),
    }
}

fn map_key(key: &redis::Value) -> String {
    match value_to_json(key) {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Split a command line into arguments
///
/// # Errors
/// `QueryExecutionError` for an empty line, an unterminated quote, or a closing quote
/// that is not followed by whitespace.
pub fn tokenize(line: &str) -> Result<Vec<Vec<u8>>> {
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            break;
        };

        let mut arg = Vec::new();
        match first {
            '"' => {
                chars.next();
                loop {
                    match chars.next() {
                        None => return Err(DbError::query_failed("Unbalanced double quotes in command")),
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => arg.push(b'\n'),
                            Some('r') => arg.push(b'\r'),
                            Some('t') => arg.push(b'\t'),
                            Some('b') => arg.push(0x08),
                            Some('a') => arg.push(0x07),
                            Some('x') => {
                                let hex: String = chars.by_ref().take(2).collect();
                                match u8::from_str_radix(&hex, 16) {
                                    Ok(byte) if hex.len() == 2 => arg.push(byte),
                                    _ => {
                                        arg.extend_from_slice(b"x");
                                        arg.extend_from_slice(hex.as_bytes());
                                    }
                                }
                            }
                            Some(c) => push_char(&mut arg, c),
                            None => {
                                return Err(DbError::query_failed("Unbalanced double quotes in command"))
                            }
                        },
                        Some(c) => push_char(&mut arg, c),
                    }
                }
                ensure_separated(chars.peek())?;
            }
            '\'' => {
                chars.next();
                loop {
                    match chars.next() {
                        None => return Err(DbError::query_failed("Unbalanced single quotes in command")),
                        Some('\'') => break,
                        Some('\\') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            arg.push(b'\'');
                        }
                        Some(c) => push_char(&mut arg, c),
                    }
                }
                ensure_separated(chars.peek())?;
            }
            _ => {
                while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                    push_char(&mut arg, c);
                }
            }
        }
        args.push(arg);
    }

    if args.is_empty() {
        return Err(DbError::query_failed("Statement cannot be empty"));
    }
    Ok(args)
}

fn push_char(buf: &mut Vec<u8>, c: char) {
    let mut utf8 = [0u8; 4];
    buf.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
}

fn ensure_separated(next: Option<&char>) -> Result<()> {
    match next {
        Some(c) if !c.is_whitespace() => Err(DbError::query_failed(
            "Closing quote must be followed by a space or the end of the command",
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn words(line: &str) -> Vec<String> {
        tokenize(line).unwrap().into_iter().map(|a| String::from_utf8(a).unwrap()).collect()
    }

    #[test]
    fn test_tokenize_plain() {
        assert_eq!(words("  GET   user:1 "), vec!["GET", "user:1"]);
    }

    #[test]
    fn test_tokenize_quotes() {
        assert_eq!(words(r#"SET greeting "hello world""#), vec!["SET", "greeting", "hello world"]);
        assert_eq!(words("HSET u name 'Ada Lovelace'"), vec!["HSET", "u", "name", "Ada Lovelace"]);
        assert_eq!(words(r#"SET k """#), vec!["SET", "k", ""]);
    }

    #[test]
    fn test_tokenize_escapes() {
        assert_eq!(words(r#"SET k "a\"b\nc""#), vec!["SET", "k", "a\"b\nc"]);
        assert_eq!(words(r"SET k 'it\'s'"), vec!["SET", "k", "it's"]);
        assert_eq!(words(r"SET k 'raw\n'"), vec!["SET", "k", "raw\\n"]);

        let args = tokenize(r#"SET k "\x00\xff""#).unwrap();
        assert_eq!(args[2], vec![0x00, 0xff]);
    }

    #[test]
    fn test_tokenize_errors() {
        for line in ["", "   ", r#"SET k "open"#, "SET k 'open", r#"SET k "a"b"#] {
            let err = tokenize(line).unwrap_err();
            assert_eq!(err.kind(), "QueryExecutionError", "line {line:?}");
        }
    }

    #[test]
    fn test_value_to_json_scalars() {
        assert_eq!(value_to_json(&redis::Value::Nil), json!(null));
        assert_eq!(value_to_json(&redis::Value::Okay), json!("OK"));
        assert_eq!(value_to_json(&redis::Value::Int(42)), json!(42));
        assert_eq!(value_to_json(&redis::Value::BulkString(b"bar".to_vec())), json!("bar"));
        assert_eq!(value_to_json(&redis::Value::BulkString(vec![0xff])), json!("/w=="));
        assert_eq!(value_to_json(&redis::Value::Boolean(true)), json!(true));
    }

    #[test]
    fn test_value_to_json_aggregates() {
        let array = redis::Value::Array(vec![
            redis::Value::BulkString(b"a".to_vec()),
            redis::Value::Nil,
            redis::Value::Int(1),
        ]);
        assert_eq!(value_to_json(&array), json!(["a", null, 1]));

        let map = redis::Value::Map(vec![
            (redis::Value::SimpleString("name".into()), redis::Value::BulkString(b"Ada".to_vec())),
            (redis::Value::Int(7), redis::Value::Double(1.5)),
        ]);
        assert_eq!(value_to_json(&map), json!({"name": "Ada", "7": 1.5}));
    }

    #[test]
    fn test_parse_info_version() {
        let info = "# Server\r\nredis_version:7.2.4\r\nredis_git_sha1:00000000\r\n";
        assert_eq!(parse_info_version(info).as_deref(), Some("Redis 7.2.4"));
        assert_eq!(parse_info_version("# Server\r\n"), None);
    }

    #[tokio::test]
    async fn test_streaming_commands_rejected_before_use() {
        let mut handle = KeyValueHandle(None);
        let err = KeyValueAdapter
            .query(&mut handle, "subscribe news", &QueryLimits::default())
            .await
            .unwrap_err();
        assert!(err.message().contains("SUBSCRIBE"));
    }

    #[tokio::test]
    async fn test_closed_handle() {
        let mut handle = KeyValueHandle(None);
        assert!(KeyValueAdapter.disconnect(&mut handle).await.is_ok());
        assert!(!KeyValueAdapter.health_check(&mut handle).await);
        let err =
            KeyValueAdapter.query(&mut handle, "PING", &QueryLimits::default()).await.unwrap_err();
        assert!(err.message().contains("already closed"));
    }

    #[tokio::test]
    async fn test_tls_scheme_reaches_the_network() {
        let descriptor = crate::resolver::resolve("redis", "rediss://127.0.0.1:1").unwrap();
        let err = KeyValueAdapter.connect(&descriptor).await.err().expect("nothing listens on port 1");
        assert_eq!(err.kind(), "ConnectionError", "{}", err.message());
    }
}
