//! Positional cell values moved from a source row to a destination insert.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// One cell of a fetched row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Decimal(Decimal),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Uuid(Uuid),
}

/// A row in introspected column order.
pub type Row = Vec<SqlValue>;

impl SqlValue {
    /// Text form accepted by PostgreSQL input functions, or `None` for NULL.
    ///
    /// The destination binds every value as text and casts it to the column
    /// type, so this is the single conversion point for inserts.
    pub fn to_pg_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(v) => Some(if *v { "true" } else { "false" }.to_string()),
            SqlValue::I64(v) => Some(v.to_string()),
            SqlValue::F64(v) => Some(format_float(*v)),
            SqlValue::Decimal(v) => Some(v.to_string()),
            SqlValue::String(v) => Some(v.clone()),
            SqlValue::Bytes(v) => Some(format!("\\x{}", hex::encode(v))),
            SqlValue::Date(v) => Some(v.format("%Y-%m-%d").to_string()),
            SqlValue::Time(v) => Some(v.format("%H:%M:%S%.f").to_string()),
            SqlValue::DateTime(v) => Some(v.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            SqlValue::DateTimeOffset(v) => Some(v.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string()),
            SqlValue::Uuid(v) => Some(v.to_string()),
        }
    }

    /// Calendar date carried by the value, if any.
    ///
    /// Strings are parsed with the formats the source drivers produce.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            SqlValue::Date(d) => Some(*d),
            SqlValue::DateTime(dt) => Some(dt.date()),
            SqlValue::DateTimeOffset(dt) => Some(dt.date_naive()),
            SqlValue::String(s) => parse_datetime(s)
                .map(|dt| dt.date())
                .or_else(|| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()),
            _ => None,
        }
    }
}

fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        v.to_string()
    }
}

/// Parse the timestamp layouts emitted by ODBC text buffers and TDS.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SqlValue::Null => serializer.serialize_none(),
            SqlValue::Bool(v) => serializer.serialize_bool(*v),
            SqlValue::I64(v) => serializer.serialize_i64(*v),
            SqlValue::F64(v) if v.is_finite() => serializer.serialize_f64(*v),
            other => match other.to_pg_text() {
                Some(text) => serializer.serialize_str(&text),
                None => serializer.serialize_none(),
            },
        }
    }
}
