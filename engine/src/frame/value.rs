//! Scalar values and data types.

use chrono::{DateTime, SecondsFormat, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;

/// Logical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Boolean,
    Int64,
    Float64,
    Utf8,
    /// UTC timestamp with microsecond precision.
    Timestamp,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Boolean => "boolean",
            DataType::Int64 => "int64",
            DataType::Float64 => "float64",
            DataType::Utf8 => "utf8",
            DataType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// A single cell value.
///
/// Equality follows [`Value::compare`] for floats (NaN equals NaN, negative
/// zero equals zero) and never crosses types.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Type of a non-null value.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Int64(_) => Some(DataType::Int64),
            Value::Float64(_) => Some(DataType::Float64),
            Value::Utf8(_) => Some(DataType::Utf8),
            Value::Timestamp(_) => Some(DataType::Timestamp),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value may be stored in a column of `data_type`.
    pub fn fits(&self, data_type: DataType) -> bool {
        self.data_type().map_or(true, |t| t == data_type)
    }

    /// SQL-style comparison: `None` when either side is null or the types
    /// are not comparable. Int64 and Float64 compare numerically; NaN equals
    /// NaN and sorts above every other number.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Float64(a), Value::Float64(b)) => Some(float_cmp(*a, *b)),
            (Value::Int64(a), Value::Float64(b)) => Some(float_cmp(*a as f64, *b)),
            (Value::Float64(a), Value::Int64(b)) => Some(float_cmp(*a, *b as f64)),
            (Value::Utf8(a), Value::Utf8(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order used for sorting: nulls first, then by [`Value::compare`].
    /// Values of incomparable types are treated as equal.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }

    /// Hashable representation used for grouping and key lookups.
    pub fn key(&self) -> KeyValue {
        match self {
            Value::Null => KeyValue::Null,
            Value::Boolean(b) => KeyValue::Boolean(*b),
            Value::Int64(i) => KeyValue::Int64(*i),
            Value::Float64(f) => KeyValue::Float64(canonical_float(*f).to_bits()),
            Value::Utf8(s) => KeyValue::Utf8(s.clone()),
            Value::Timestamp(t) => KeyValue::Timestamp(t.timestamp_micros()),
        }
    }

    /// Encode as JSON for the table codec.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Boolean(b) => JsonValue::Bool(*b),
            Value::Int64(i) => JsonValue::from(*i),
            // JSON numbers cannot hold NaN or infinities
            Value::Float64(f) => match serde_json::Number::from_f64(*f) {
                Some(n) => JsonValue::Number(n),
                None => JsonValue::String(f.to_string()),
            },
            Value::Utf8(s) => JsonValue::String(s.clone()),
            Value::Timestamp(t) => {
                JsonValue::String(t.to_rfc3339_opts(SecondsFormat::Micros, true))
            }
        }
    }

    /// Decode a JSON value written by [`Value::to_json`]. Returns `None`
    /// when the JSON does not match `data_type`.
    pub fn from_json(json: &JsonValue, data_type: DataType) -> Option<Value> {
        if json.is_null() {
            return Some(Value::Null);
        }
        match data_type {
            DataType::Boolean => json.as_bool().map(Value::Boolean),
            DataType::Int64 => json.as_i64().map(Value::Int64),
            DataType::Float64 => json
                .as_f64()
                .or_else(|| json.as_str().and_then(|s| s.parse::<f64>().ok()).filter(|f| !f.is_finite()))
                .map(Value::Float64),
            DataType::Utf8 => json.as_str().map(|s| Value::Utf8(s.to_string())),
            DataType::Timestamp => json
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| Value::Timestamp(t.with_timezone(&Utc))),
        }
    }

    /// Parse a text cell into the given type. Empty strings are null.
    pub fn parse_as(text: &str, data_type: DataType) -> Option<Value> {
        let text = text.trim();
        if text.is_empty() {
            return Some(Value::Null);
        }
        match data_type {
            DataType::Boolean => match text.to_lowercase().as_str() {
                "true" => Some(Value::Boolean(true)),
                "false" => Some(Value::Boolean(false)),
                _ => None,
            },
            DataType::Int64 => text.parse::<i64>().ok().map(Value::Int64),
            DataType::Float64 => text.parse::<f64>().ok().map(Value::Float64),
            DataType::Utf8 => Some(Value::Utf8(text.to_string())),
            DataType::Timestamp => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|t| Value::Timestamp(t.with_timezone(&Utc))),
        }
    }

    /// Build a timestamp from microseconds since the epoch.
    pub fn timestamp_micros(micros: i64) -> Value {
        match Utc.timestamp_micros(micros).single() {
            Some(t) => Value::Timestamp(t),
            None => Value::Null,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => float_cmp(*a, *b) == Ordering::Equal,
            (Value::Utf8(a), Value::Utf8(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int64(i) => write!(f, "{}", i),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Utf8(s) => f.write_str(s),
            Value::Timestamp(t) => f.write_str(&t.to_rfc3339_opts(SecondsFormat::Micros, true)),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int64(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Utf8(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Utf8(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

fn float_cmp(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Collapse every NaN payload and negative zero so equal floats hash alike.
fn canonical_float(f: f64) -> f64 {
    if f.is_nan() {
        f64::NAN
    } else if f == 0.0 {
        0.0
    } else {
        f
    }
}

/// Current UTC time truncated to the microsecond precision tables store.
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Hashable, exactly-comparable projection of a [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Null,
    Boolean(bool),
    Int64(i64),
    Float64(u64),
    Utf8(String),
    Timestamp(i64),
}

impl KeyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, KeyValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sorts_first() {
        assert_eq!(Value::Null.sort_cmp(&Value::Int64(i64::MIN)), Ordering::Less);
        assert_eq!(Value::Int64(2).sort_cmp(&Value::Null), Ordering::Greater);
        assert_eq!(Value::Null.compare(&Value::Int64(1)), None);
    }

    #[test]
    fn test_numeric_cross_compare() {
        assert_eq!(Value::Int64(2).compare(&Value::Float64(1.5)), Some(Ordering::Greater));
        assert_eq!(Value::Utf8("a".into()).compare(&Value::Int64(1)), None);
    }

    #[test]
    fn test_timestamp_json_roundtrip_keeps_micros() {
        let ts = Value::timestamp_micros(1_733_486_400_123_456);
        let json = ts.to_json();
        assert_eq!(json, JsonValue::String("2024-12-06T12:00:00.123456Z".into()));
        assert_eq!(Value::from_json(&json, DataType::Timestamp), Some(ts));
    }

    #[test]
    fn test_from_json_rejects_wrong_type() {
        assert_eq!(Value::from_json(&JsonValue::from("x"), DataType::Int64), None);
        assert_eq!(Value::from_json(&JsonValue::Null, DataType::Int64), Some(Value::Null));
    }

    #[test]
    fn test_non_finite_floats_survive_json() {
        for f in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let value = Value::Float64(f);
            let json = value.to_json();
            assert!(json.is_string(), "{json}");
            let back = Value::from_json(&json, DataType::Float64).unwrap();
            assert_eq!(back.compare(&value), Some(Ordering::Equal));
        }
        assert_eq!(Value::from_json(&JsonValue::from("1.5"), DataType::Float64), None);
    }

    #[test]
    fn test_nan_orders_above_numbers() {
        let nan = Value::Float64(f64::NAN);
        assert_eq!(nan.compare(&Value::Float64(-f64::NAN)), Some(Ordering::Equal));
        assert_eq!(nan.compare(&Value::Float64(f64::INFINITY)), Some(Ordering::Greater));
        assert_eq!(Value::Int64(3).sort_cmp(&nan), Ordering::Less);
        assert_eq!(nan, Value::Float64(-f64::NAN));
        assert_ne!(Value::Int64(1), Value::Float64(1.0));
        assert_eq!(nan.key(), Value::Float64(-f64::NAN).key());
        assert_eq!(Value::Float64(0.0).key(), Value::Float64(-0.0).key());

        let c = crate::frame::Column::float64("v", [1.0, f64::NAN, 7.0]);
        assert!(matches!(c.max(), Some(Value::Float64(f)) if f.is_nan()));
    }

    #[test]
    fn test_parse_as() {
        assert_eq!(Value::parse_as(" 42 ", DataType::Int64), Some(Value::Int64(42)));
        assert_eq!(Value::parse_as("", DataType::Int64), Some(Value::Null));
        assert_eq!(Value::parse_as("TRUE", DataType::Boolean), Some(Value::Boolean(true)));
        assert_eq!(Value::parse_as("4x", DataType::Int64), None);
    }
}
