//! `PostgreSQL` dialect
//!
//! # Implementation Notes
//! - Uses `tokio-postgres` with `NoTls`; the connection task is spawned on connect and
//!   joined (or aborted) on close
//! - Statements are prepared first, so the column list is known before execution and
//!   statements without result columns report `rows_affected`
//! - Server messages keep their severity, text and SQLSTATE code
//! - JSON/JSONB preserved as nested JSON, BYTEA Base64-encoded, NUMERIC rendered as an
//!   exact decimal string
//! - INTERVAL rendered as an ISO 8601 duration, INET/CIDR in address/prefix notation,
//!   MONEY as a decimal string with two fraction digits, enums as their label
//! - Types without a dedicated mapping are returned as their Base64 wire value

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use base64::Engine;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_postgres::types::{FromSql, Kind, Type};
use tokio_postgres::{Client, Config, NoTls, Row};

use crate::engine::{float_to_json, QueryLimits, QueryResult, RowSet};
use crate::error::{DbError, Result};

/// Grace period for the connection task to finish after the client is dropped
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Open `PostgreSQL` session: client plus its background connection task
pub struct PgSession {
    client: Client,
    connection: JoinHandle<()>,
}

impl PgSession {
    /// Close the session
    ///
    /// Dropping the client makes the connection task send `Terminate` and exit.
    pub async fn close(mut self) {
        drop(self.client);
        if tokio::time::timeout(CLOSE_GRACE, &mut self.connection).await.is_err() {
            self.connection.abort();
        }
    }
}

/// Render a driver error, keeping the server's own message when there is one
fn describe(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => format!("{}: {} (SQLSTATE {})", db.severity(), db.message(), db.code().code()),
        None => e.to_string(),
    }
}

pub(super) async fn connect(connection_string: &str) -> Result<PgSession> {
    let config: Config = connection_string.parse().map_err(|e: tokio_postgres::Error| {
        DbError::invalid_connection_string(format!("PostgreSQL rejected the connection string: {e}"))
    })?;

    let (client, connection) = config.connect(NoTls).await.map_err(|e| {
        DbError::connection_failed(format!("Failed to connect to PostgreSQL: {}", describe(&e)))
    })?;

    // Connection errors are not logged here to prevent credential leakage
    let connection = tokio::spawn(async move {
        let _ = connection.await;
    });

    Ok(PgSession { client, connection })
}

pub(super) async fn ping(session: &PgSession) -> bool {
    !session.client.is_closed() && session.client.simple_query("SELECT 1").await.is_ok()
}

pub(super) async fn server_version(session: &PgSession) -> Option<String> {
    let row = session.client.query_one("SELECT version()", &[]).await.ok()?;
    row.try_get::<_, String>(0).ok()
}

pub(super) async fn execute(
    session: &PgSession,
    statement: &str,
    limits: &QueryLimits,
) -> Result<QueryResult> {
    let client = &session.client;
    let stmt = client.prepare(statement).await.map_err(|e| DbError::query_failed(describe(&e)))?;

    if stmt.columns().is_empty() {
        // INSERT, UPDATE, DELETE, DDL
        let rows_affected =
            client.execute(&stmt, &[]).await.map_err(|e| DbError::query_failed(describe(&e)))?;
        return RowSet { rows_affected: Some(rows_affected), ..RowSet::default() }.into_result(false);
    }

    let rows = client.query(&stmt, &[]).await.map_err(|e| DbError::query_failed(describe(&e)))?;
    let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();

    let mut values = Vec::with_capacity(rows.len());
    let mut truncated = false;
    for row in &rows {
        if limits.reached(values.len()) {
            truncated = true;
            break;
        }
        values.push(row_to_json(row)?);
    }

    RowSet { columns, rows: values, rows_affected: None }.into_result(truncated)
}

fn row_to_json(row: &Row) -> Result<Vec<Value>> {
    (0..row.len()).map(|idx| postgres_value_to_json(row, idx)).collect()
}

/// Read a nullable column
fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        DbError::query_failed(format!("Failed to decode column '{}': {e}", row.columns()[idx].name()))
    })
}

fn base64_json(bytes: &[u8]) -> Value {
    Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn array_to_json<T>(items: Option<Vec<Option<T>>>, f: impl Fn(T) -> Value) -> Value {
    items.map_or(Value::Null, |items| {
        Value::Array(items.into_iter().map(|item| item.map_or(Value::Null, &f)).collect())
    })
}

/// Convert a `PostgreSQL` value to JSON
fn postgres_value_to_json(row: &Row, idx: usize) -> Result<Value> {
    let col_type = row.columns()[idx].type_();

    if let Kind::Enum(_) = col_type.kind() {
        return Ok(get::<PgText>(row, idx)?.map_or(Value::Null, |v| Value::String(v.0)));
    }

    let value = match *col_type {
        Type::BOOL => get::<bool>(row, idx)?.map_or(Value::Null, Value::Bool),
        Type::CHAR => get::<i8>(row, idx)?.map_or(Value::Null, Value::from),
        Type::INT2 => get::<i16>(row, idx)?.map_or(Value::Null, Value::from),
        Type::INT4 => get::<i32>(row, idx)?.map_or(Value::Null, Value::from),
        Type::INT8 => get::<i64>(row, idx)?.map_or(Value::Null, Value::from),
        Type::OID => get::<u32>(row, idx)?.map_or(Value::Null, Value::from),
        Type::FLOAT4 => get::<f32>(row, idx)?.map_or(Value::Null, |v| float_to_json(f64::from(v))),
        Type::FLOAT8 => get::<f64>(row, idx)?.map_or(Value::Null, float_to_json),
        Type::NUMERIC => get::<PgNumeric>(row, idx)?.map_or(Value::Null, |v| Value::String(v.0)),
        Type::MONEY => get::<PgMoney>(row, idx)?.map_or(Value::Null, |v| Value::String(v.0)),

        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, idx)?.map_or(Value::Null, Value::String)
        }

        Type::JSON | Type::JSONB => get::<Value>(row, idx)?.unwrap_or(Value::Null),

        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map_or(Value::Null, |v| base64_json(&v)),

        // Timestamps as ISO 8601 strings
        Type::TIMESTAMP => get::<chrono::NaiveDateTime>(row, idx)?.map_or(Value::Null, naive_timestamp),
        Type::TIMESTAMPTZ => get::<chrono::DateTime<chrono::Utc>>(row, idx)?
            .map_or(Value::Null, |v| Value::String(v.to_rfc3339())),
        Type::DATE => get::<chrono::NaiveDate>(row, idx)?.map_or(Value::Null, date),
        Type::TIME => get::<chrono::NaiveTime>(row, idx)?
            .map_or(Value::Null, |v| Value::String(v.format("%H:%M:%S%.f").to_string())),
        Type::INTERVAL => get::<PgInterval>(row, idx)?.map_or(Value::Null, |v| Value::String(v.0)),

        Type::UUID => get::<uuid::Uuid>(row, idx)?.map_or(Value::Null, |v| Value::String(v.to_string())),
        Type::INET | Type::CIDR => get::<PgInet>(row, idx)?.map_or(Value::Null, |v| Value::String(v.0)),

        Type::BOOL_ARRAY => array_to_json(get::<Vec<Option<bool>>>(row, idx)?, Value::Bool),
        Type::INT2_ARRAY => array_to_json(get::<Vec<Option<i16>>>(row, idx)?, Value::from),
        Type::INT4_ARRAY => array_to_json(get::<Vec<Option<i32>>>(row, idx)?, Value::from),
        Type::INT8_ARRAY => array_to_json(get::<Vec<Option<i64>>>(row, idx)?, Value::from),
        Type::FLOAT4_ARRAY => {
            array_to_json(get::<Vec<Option<f32>>>(row, idx)?, |v| float_to_json(f64::from(v)))
        }
        Type::FLOAT8_ARRAY => array_to_json(get::<Vec<Option<f64>>>(row, idx)?, float_to_json),
        Type::NUMERIC_ARRAY => {
            array_to_json(get::<Vec<Option<PgNumeric>>>(row, idx)?, |v| Value::String(v.0))
        }
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::BPCHAR_ARRAY | Type::NAME_ARRAY => {
            array_to_json(get::<Vec<Option<String>>>(row, idx)?, Value::String)
        }
        Type::JSON_ARRAY | Type::JSONB_ARRAY => array_to_json(get::<Vec<Option<Value>>>(row, idx)?, std::convert::identity),
        Type::UUID_ARRAY => {
            array_to_json(get::<Vec<Option<uuid::Uuid>>>(row, idx)?, |v| Value::String(v.to_string()))
        }
        Type::TIMESTAMP_ARRAY => {
            array_to_json(get::<Vec<Option<chrono::NaiveDateTime>>>(row, idx)?, naive_timestamp)
        }
        Type::TIMESTAMPTZ_ARRAY => array_to_json(
            get::<Vec<Option<chrono::DateTime<chrono::Utc>>>>(row, idx)?,
            |v| Value::String(v.to_rfc3339()),
        ),
        Type::DATE_ARRAY => array_to_json(get::<Vec<Option<chrono::NaiveDate>>>(row, idx)?, date),

        _ => get::<RawValue>(row, idx)?.map_or(Value::Null, |v| base64_json(&v.0)),
    };

    Ok(value)
}

fn naive_timestamp(v: chrono::NaiveDateTime) -> Value {
    Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

fn date(v: chrono::NaiveDate) -> Value {
    Value::String(v.format("%Y-%m-%d").to_string())
}

type FromSqlError = Box<dyn std::error::Error + Sync + Send>;

/// Undecoded column bytes
struct RawValue(Vec<u8>);

impl<'a> FromSql<'a> for RawValue {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, FromSqlError> {
        Ok(Self(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Label of an enum value (sent as its text on the wire)
struct PgText(String);

impl<'a> FromSql<'a> for PgText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, FromSqlError> {
        Ok(Self(std::str::from_utf8(raw)?.to_string()))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
    }
}

/// INTERVAL decoded to an ISO 8601 duration
struct PgInterval(String);

impl<'a> FromSql<'a> for PgInterval {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, FromSqlError> {
        decode_interval(raw).map(Self).ok_or_else(|| "malformed INTERVAL value".into())
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INTERVAL
    }
}

/// INET/CIDR decoded to address/prefix notation
struct PgInet(String);

impl<'a> FromSql<'a> for PgInet {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, FromSqlError> {
        decode_inet(raw, *ty == Type::CIDR).map(Self).ok_or_else(|| "malformed INET value".into())
    }

    fn accepts(ty: &Type) -> bool {
        matches!(*ty, Type::INET | Type::CIDR)
    }
}

/// MONEY decoded from its integer minor units
///
/// Assumes two fraction digits, which holds for the common `lc_monetary` settings.
struct PgMoney(String);

impl<'a> FromSql<'a> for PgMoney {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, FromSqlError> {
        let cents = i64::from_be_bytes(raw.try_into()?);
        Ok(Self(format_money(cents)))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::MONEY
    }
}

fn format_money(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// Decode the binary INTERVAL format: microseconds (i64), days (i32), months (i32)
fn decode_interval(raw: &[u8]) -> Option<String> {
    if raw.len() != 16 {
        return None;
    }
    let micros = i64::from_be_bytes(raw[0..8].try_into().ok()?);
    let days = i32::from_be_bytes(raw[8..12].try_into().ok()?);
    let months = i32::from_be_bytes(raw[12..16].try_into().ok()?);
    Some(format_interval(months, days, micros))
}

fn format_interval(months: i32, days: i32, micros: i64) -> String {
    if months == 0 && days == 0 && micros == 0 {
        return "PT0S".to_string();
    }

    let mut out = String::from("P");
    let (years, months) = (months / 12, months % 12);
    if years != 0 {
        out.push_str(&format!("{years}Y"));
    }
    if months != 0 {
        out.push_str(&format!("{months}M"));
    }
    if days != 0 {
        out.push_str(&format!("{days}D"));
    }

    if micros != 0 {
        out.push('T');
        let hours = micros / 3_600_000_000;
        let minutes = micros % 3_600_000_000 / 60_000_000;
        let rest = micros % 60_000_000;
        if hours != 0 {
            out.push_str(&format!("{hours}H"));
        }
        if minutes != 0 {
            out.push_str(&format!("{minutes}M"));
        }
        if rest != 0 {
            let sign = if rest < 0 { "-" } else { "" };
            let rest = rest.unsigned_abs();
            let (secs, frac) = (rest / 1_000_000, rest % 1_000_000);
            if frac == 0 {
                out.push_str(&format!("{sign}{secs}S"));
            } else {
                let frac = format!("{frac:06}");
                out.push_str(&format!("{sign}{secs}.{}S", frac.trim_end_matches('0')));
            }
        }
    }

    out
}

/// Decode the binary INET/CIDR format: family, prefix bits, cidr flag, length, address
fn decode_inet(raw: &[u8], cidr: bool) -> Option<String> {
    let (family, bits, len) = (*raw.first()?, *raw.get(1)?, usize::from(*raw.get(3)?));
    let addr = raw.get(4..4 + len)?;

    let (text, max_bits) = match family {
        2 => (Ipv4Addr::from(<[u8; 4]>::try_from(addr).ok()?).to_string(), 32),
        3 => (Ipv6Addr::from(<[u8; 16]>::try_from(addr).ok()?).to_string(), 128),
        _ => return None,
    };

    Some(if cidr || bits != max_bits { format!("{text}/{bits}") } else { text })
}

/// NUMERIC decoded to an exact decimal string
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, FromSqlError> {
        decode_numeric(raw).map(Self).ok_or_else(|| "malformed NUMERIC value".into())
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Decode the binary NUMERIC format: base-10000 digits with a weight, sign and scale
fn decode_numeric(raw: &[u8]) -> Option<String> {
    let word = |i: usize| -> Option<u16> {
        raw.get(i * 2..i * 2 + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    };

    let ndigits = usize::from(word(0)?);
    let weight = i64::from(word(1)? as i16);
    let sign = word(2)?;
    let dscale = usize::from(word(3)?);
    let digits = (0..ndigits).map(|i| word(4 + i)).collect::<Option<Vec<u16>>>()?;

    match sign {
        0xC000 => return Some("NaN".to_string()),
        0xD000 => return Some("Infinity".to_string()),
        0xF000 => return Some("-Infinity".to_string()),
        _ => {}
    }

    let digit_at = |pos: i64| -> u16 {
        usize::try_from(pos).ok().and_then(|p| digits.get(p).copied()).unwrap_or(0)
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        for pos in 0..=weight {
            let d = digit_at(pos);
            if pos == 0 {
                out.push_str(&d.to_string());
            } else {
                out.push_str(&format!("{d:04}"));
            }
        }
    }

    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut pos = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit_at(pos)));
            pos += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(ndigits: u16, weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        for w in [ndigits, weight as u16, sign, dscale] {
            raw.extend_from_slice(&w.to_be_bytes());
        }
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_decode_numeric_integer_and_fraction() {
        // 12345.678 = [1][2345].[6780]
        let raw = numeric(3, 1, 0, 3, &[1, 2345, 6780]);
        assert_eq!(decode_numeric(&raw).as_deref(), Some("12345.678"));
    }

    #[test]
    fn test_decode_numeric_negative_small() {
        // -0.0005 = weight -1, digit [5]
        let raw = numeric(1, -1, 0x4000, 4, &[5]);
        assert_eq!(decode_numeric(&raw).as_deref(), Some("-0.0005"));
    }

    #[test]
    fn test_decode_numeric_trailing_zero_groups() {
        // 1000000 = [100][0000], trailing group omitted on the wire
        let raw = numeric(1, 1, 0, 0, &[100]);
        assert_eq!(decode_numeric(&raw).as_deref(), Some("1000000"));
    }

    #[test]
    fn test_decode_numeric_zero_and_nan() {
        assert_eq!(decode_numeric(&numeric(0, 0, 0, 2, &[])).as_deref(), Some("0.00"));
        assert_eq!(decode_numeric(&numeric(0, 0, 0xC000, 0, &[])).as_deref(), Some("NaN"));
    }

    #[test]
    fn test_decode_numeric_truncated_input() {
        assert!(decode_numeric(&[0, 2, 0]).is_none());
        assert!(decode_numeric(&numeric(2, 0, 0, 0, &[7])).is_none());
    }

    fn interval(micros: i64, days: i32, months: i32) -> Vec<u8> {
        let mut raw = micros.to_be_bytes().to_vec();
        raw.extend_from_slice(&days.to_be_bytes());
        raw.extend_from_slice(&months.to_be_bytes());
        raw
    }

    #[test]
    fn test_decode_interval() {
        assert_eq!(decode_interval(&interval(0, 1, 0)).as_deref(), Some("P1D"));
        assert_eq!(decode_interval(&interval(0, 0, 0)).as_deref(), Some("PT0S"));

        // 1 year 2 mons 3 days 04:05:06.5
        let micros = ((4 * 60 + 5) * 60 + 6) * 1_000_000 + 500_000;
        assert_eq!(decode_interval(&interval(micros, 3, 14)).as_deref(), Some("P1Y2M3DT4H5M6.5S"));
    }

    #[test]
    fn test_decode_negative_interval() {
        assert_eq!(decode_interval(&interval(-30 * 60_000_000, 0, 0)).as_deref(), Some("PT-30M"));
        assert_eq!(decode_interval(&interval(-500_000, 0, 0)).as_deref(), Some("PT-0.5S"));
        assert!(decode_interval(&[0; 12]).is_none());
    }

    #[test]
    fn test_decode_inet() {
        assert_eq!(decode_inet(&[2, 32, 0, 4, 192, 168, 0, 1], false).as_deref(), Some("192.168.0.1"));
        assert_eq!(decode_inet(&[2, 24, 1, 4, 10, 0, 0, 0], true).as_deref(), Some("10.0.0.0/24"));

        let mut v6 = vec![3, 64, 0, 16, 0x20, 0x01, 0x0d, 0xb8];
        v6.extend_from_slice(&[0; 12]);
        assert_eq!(decode_inet(&v6, false).as_deref(), Some("2001:db8::/64"));

        assert!(decode_inet(&[2, 32, 0, 4, 127], false).is_none());
    }

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(123_456), "1234.56");
        assert_eq!(format_money(-5), "-0.05");
        assert_eq!(format_money(0), "0.00");
    }

    #[test]
    fn test_unmapped_bytes_are_base64() {
        // A binary value that happens to be valid UTF-8 must not come back as text
        let raw = interval(0, 1, 0);
        assert_eq!(base64_json(&raw), Value::String("AAAAAAAAAAAAAAABAAAAAA==".to_string()));
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_option() {
        let err = connect("postgres://u@localhost/db?connect_timeout=abc")
            .await
            .err()
            .expect("malformed option should be rejected");
        assert_eq!(err.kind(), "InvalidConnectionStringError");
    }
}
