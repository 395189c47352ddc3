//! Typed values carried by records and by condition literals.

use chrono::{NaiveDate, NaiveDateTime};
use sea_query::Value;
use serde_json::{json, Value as Json};
use std::cmp::Ordering;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A single value of a record field, custom field or condition literal.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Int(i64),
    Decimal(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// Id of another row (foreign key, user, enum value)
    Ref(u64),
    /// Multi-valued custom fields
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    /// NULL or blank string; the two are not distinguished by "is empty".
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.is_empty(),
            FieldValue::List(values) => values.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn year(&self) -> Option<i32> {
        use chrono::Datelike;
        match self {
            FieldValue::Date(d) => Some(d.year()),
            FieldValue::DateTime(dt) => Some(dt.date().year()),
            FieldValue::Int(y) => i32::try_from(*y).ok(),
            _ => None,
        }
    }

    /// Storage-safe JSON form, used in persisted condition payloads.
    pub fn to_json(&self) -> Json {
        match self {
            FieldValue::Null => Json::Null,
            FieldValue::Text(s) => json!(s),
            FieldValue::Int(i) => json!(i),
            FieldValue::Decimal(f) => json!(f),
            FieldValue::Bool(b) => json!(b),
            FieldValue::Date(d) => json!(d.format(DATE_FORMAT).to_string()),
            FieldValue::DateTime(dt) => json!(dt.format(DATETIME_FORMAT).to_string()),
            FieldValue::Ref(id) => json!(id),
            FieldValue::List(values) => Json::Array(values.iter().map(|v| v.to_json()).collect()),
        }
    }

    /// Value bound into the store query.
    pub fn to_sql_value(&self) -> Value {
        match self {
            FieldValue::Null => Value::String(None),
            FieldValue::Text(s) => Value::from(s.clone()),
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::Decimal(f) => Value::from(*f),
            FieldValue::Bool(b) => Value::from(*b),
            FieldValue::Date(d) => Value::from(*d),
            FieldValue::DateTime(dt) => Value::from(*dt),
            FieldValue::Ref(id) => Value::from(*id),
            FieldValue::List(values) => Value::from(
                values
                    .iter()
                    .map(|v| v.to_json().to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        }
    }

    /// Ordering across compatible variants; numbers compare across
    /// Int/Decimal and dates compare with datetimes on their date part.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        use FieldValue::*;
        match (self, other) {
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Int(a), Decimal(b)) => (*a as f64).partial_cmp(b),
            (Decimal(a), Int(b)) => a.partial_cmp(&(*b as f64)),
            (Decimal(a), Decimal(b)) => a.partial_cmp(b),
            (Text(a), Text(b)) => Some(a.cmp(b)),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (DateTime(a), DateTime(b)) => Some(a.cmp(b)),
            (DateTime(a), Date(b)) => Some(a.date().cmp(b)),
            (Date(a), DateTime(b)) => Some(a.cmp(&b.date())),
            (Ref(a), Ref(b)) => Some(a.cmp(b)),
            (Ref(a), Int(b)) => Some((*a as i128).cmp(&(*b as i128))),
            (Int(a), Ref(b)) => Some((*a as i128).cmp(&(*b as i128))),
            _ => None,
        }
    }

    /// Equality with the text comparison policy given by the caller.
    pub fn equals(&self, other: &FieldValue, case_sensitive: bool) -> bool {
        match (self, other) {
            (FieldValue::Text(a), FieldValue::Text(b)) => {
                if case_sensitive {
                    a == b
                } else {
                    a.to_lowercase() == b.to_lowercase()
                }
            }
            (FieldValue::List(items), _) => items.iter().any(|i| i.equals(other, case_sensitive)),
            (FieldValue::Null, _) | (_, FieldValue::Null) => false,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(d: NaiveDate) -> Self {
        FieldValue::Date(d)
    }
}

impl From<NaiveDateTime> for FieldValue {
    fn from(dt: NaiveDateTime) -> Self {
        FieldValue::DateTime(dt)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .ok()
        .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}
