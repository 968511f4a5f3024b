//! `MySQL` / `MariaDB` dialect
//!
//! # Implementation Notes
//! - Uses `mysql_async` (pure Rust, rustls) with the text protocol, so any statement the
//!   server accepts can be run, including ones that cannot be prepared
//! - Only the first result set is returned; any further sets are drained and dropped
//! - Statements without result columns report `rows_affected`
//! - The text protocol sends every value as bytes; integer, float and JSON columns are
//!   converted back using the column type, DECIMAL stays an exact string
//! - Binary values that are not valid UTF-8 are Base64-encoded

use mysql_async::consts::ColumnType;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, Row, Value};

use crate::engine::{bytes_to_json, float_to_json, QueryLimits, QueryResult, RowSet};
use crate::error::{DbError, Result};

pub(super) async fn connect(connection_string: &str) -> Result<Conn> {
    let opts = Opts::from_url(connection_string).map_err(|e| {
        DbError::invalid_connection_string(format!("MySQL rejected the connection string: {e}"))
    })?;

    Conn::new(opts)
        .await
        .map_err(|e| DbError::connection_failed(format!("Failed to connect to MySQL: {e}")))
}

pub(super) async fn ping(conn: &mut Conn) -> bool {
    conn.ping().await.is_ok()
}

pub(super) async fn server_version(conn: &mut Conn) -> Option<String> {
    let version: String = conn.query_first("SELECT VERSION()").await.ok()??;
    Some(describe_version(&version))
}

/// Normalize a `VERSION()` string into "MySQL x.y.z" or "MariaDB x.y.z"
fn describe_version(version_string: &str) -> String {
    // MySQL: "8.0.35", MariaDB: "10.11.2-MariaDB-1:10.11.2+maria~ubu2204"
    if version_string.to_uppercase().contains("MARIADB") {
        let version = version_string.split('-').next().unwrap_or(version_string);
        format!("MariaDB {version}")
    } else {
        let version = version_string.split_whitespace().next().unwrap_or(version_string);
        format!("MySQL {version}")
    }
}

pub(super) async fn execute(
    conn: &mut Conn,
    statement: &str,
    limits: &QueryLimits,
) -> Result<QueryResult> {
    let mut result = conn.query_iter(statement).await.map_err(|e| DbError::query_failed(e.to_string()))?;

    let columns: Vec<String> =
        result.columns_ref().iter().map(|c| c.name_str().into_owned()).collect();
    let column_types: Vec<ColumnType> = result.columns_ref().iter().map(|c| c.column_type()).collect();

    let rows: Vec<Row> = result.collect().await.map_err(|e| DbError::query_failed(e.to_string()))?;
    let rows_affected = result.affected_rows();
    result.drop_result().await.map_err(|e| DbError::query_failed(e.to_string()))?;

    if columns.is_empty() {
        // INSERT, UPDATE, DELETE, DDL
        return RowSet { rows_affected: Some(rows_affected), ..RowSet::default() }.into_result(false);
    }

    let mut values = Vec::with_capacity(rows.len());
    let mut truncated = false;
    for row in &rows {
        if limits.reached(values.len()) {
            truncated = true;
            break;
        }
        values.push(row_to_json(row, &column_types)?);
    }

    RowSet { columns, rows: values, rows_affected: None }.into_result(truncated)
}

fn row_to_json(row: &Row, column_types: &[ColumnType]) -> Result<Vec<serde_json::Value>> {
    (0..row.len()).map(|idx| mysql_value_to_json(row, idx, column_types.get(idx).copied())).collect()
}

/// Convert a `MySQL` value to JSON
fn mysql_value_to_json(row: &Row, idx: usize, column_type: Option<ColumnType>) -> Result<serde_json::Value> {
    let value = row
        .as_ref(idx)
        .ok_or_else(|| DbError::query_failed(format!("Failed to get value at index {idx}")))?;

    Ok(match column_type {
        Some(column_type) => typed_value_to_json(value, column_type),
        None => value_to_json(value),
    })
}

/// Decode a text-protocol value using its column type
fn typed_value_to_json(value: &Value, column_type: ColumnType) -> serde_json::Value {
    let Value::Bytes(bytes) = value else {
        return value_to_json(value);
    };
    let Ok(text) = std::str::from_utf8(bytes) else {
        return bytes_to_json(bytes);
    };
    let as_text = || serde_json::Value::String(text.to_string());

    match column_type {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => text
            .parse::<i64>()
            .map(serde_json::Value::from)
            .or_else(|_| text.parse::<u64>().map(serde_json::Value::from))
            .unwrap_or_else(|_| as_text()),
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => {
            text.parse::<f64>().map_or_else(|_| as_text(), float_to_json)
        }
        ColumnType::MYSQL_TYPE_JSON => serde_json::from_str(text).unwrap_or_else(|_| as_text()),
        _ => as_text(),
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::NULL => serde_json::Value::Null,
        Value::Bytes(bytes) => bytes_to_json(bytes),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::UInt(u) => serde_json::Value::from(*u),
        Value::Float(f) => float_to_json(f64::from(*f)),
        Value::Double(d) => float_to_json(*d),
        Value::Date(year, month, day, hour, minute, second, micro) => serde_json::Value::String(
            format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{micro:06}"),
        ),
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if *is_negative { "-" } else { "" };
            let total_hours = days * 24 + u32::from(*hours);
            serde_json::Value::String(format!(
                "{sign}{total_hours}:{minutes:02}:{seconds:02}.{micros:06}"
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_describe_version() {
        assert_eq!(describe_version("8.0.35"), "MySQL 8.0.35");
        assert_eq!(describe_version("10.11.2-MariaDB-1:10.11.2+maria~ubu2204"), "MariaDB 10.11.2");
    }

    #[test]
    fn test_value_to_json() {
        assert_eq!(value_to_json(&Value::NULL), json!(null));
        assert_eq!(value_to_json(&Value::Bytes(b"alice".to_vec())), json!("alice"));
        assert_eq!(value_to_json(&Value::Bytes(vec![0xff, 0xfe])), json!("//4="));
        assert_eq!(value_to_json(&Value::Int(-7)), json!(-7));
        assert_eq!(value_to_json(&Value::UInt(u64::MAX)), json!(u64::MAX));
        assert_eq!(value_to_json(&Value::Double(f64::NAN)), json!(null));
    }

    #[test]
    fn test_text_protocol_numbers_follow_column_type() {
        let bytes = |s: &str| Value::Bytes(s.as_bytes().to_vec());

        assert_eq!(typed_value_to_json(&bytes("1"), ColumnType::MYSQL_TYPE_LONGLONG), json!(1));
        assert_eq!(typed_value_to_json(&bytes("-42"), ColumnType::MYSQL_TYPE_TINY), json!(-42));
        assert_eq!(
            typed_value_to_json(&bytes("18446744073709551615"), ColumnType::MYSQL_TYPE_LONGLONG),
            json!(u64::MAX)
        );
        assert_eq!(typed_value_to_json(&bytes("2.5"), ColumnType::MYSQL_TYPE_DOUBLE), json!(2.5));
        assert_eq!(typed_value_to_json(&bytes("2024"), ColumnType::MYSQL_TYPE_YEAR), json!(2024));
    }

    #[test]
    fn test_text_protocol_keeps_exact_and_textual_columns() {
        let bytes = |s: &str| Value::Bytes(s.as_bytes().to_vec());

        assert_eq!(typed_value_to_json(&bytes("1.50"), ColumnType::MYSQL_TYPE_NEWDECIMAL), json!("1.50"));
        assert_eq!(typed_value_to_json(&bytes("007"), ColumnType::MYSQL_TYPE_VAR_STRING), json!("007"));
        assert_eq!(
            typed_value_to_json(&bytes(r#"{"a": [1]}"#), ColumnType::MYSQL_TYPE_JSON),
            json!({"a": [1]})
        );
        assert_eq!(typed_value_to_json(&Value::NULL, ColumnType::MYSQL_TYPE_LONG), json!(null));
        assert_eq!(typed_value_to_json(&Value::Bytes(vec![0xff]), ColumnType::MYSQL_TYPE_BLOB), json!("/w=="));
    }

    #[test]
    fn test_temporal_values() {
        assert_eq!(
            value_to_json(&Value::Date(2024, 1, 15, 10, 30, 0, 0)),
            json!("2024-01-15T10:30:00.000000")
        );
        assert_eq!(
            value_to_json(&Value::Time(true, 1, 2, 3, 4, 5)),
            json!("-26:03:04.000005")
        );
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let err = connect("mysql://root@localhost:notaport/db").await.unwrap_err();
        assert_eq!(err.kind(), "InvalidConnectionStringError");
    }
}
