//! Type registry: a closed set of value kinds, each able to classify, cast,
//! compare and test equality of runtime [`Value`]s.

use std::cmp::Ordering;
use std::str::FromStr;

use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::config::CursorConfig;
use crate::cursor::CursorRef;
use crate::error::{Fault, FaultResult};
use crate::value::{format_iso, format_number, ObjectId, RegExpValue, Value};

lazy_static! {
    static ref BASE64_PATTERN: Regex =
        Regex::new(r"^(?:[A-Za-z0-9+/]{4})*(?:[A-Za-z0-9+/]{2}==|[A-Za-z0-9+/]{3}=)?$").unwrap();
    static ref HEX_PATTERN: Regex = Regex::new(r"^(?:[0-9a-fA-F]{2})*$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryEncoding {
    Base64,
    Hex,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CastOptions {
    /// Refuse cross-kind coercion; only values already of the kind pass.
    pub strict: bool,
    /// Degrade cast failures in `equals`/`compare` instead of failing.
    pub silent: bool,
    pub force_encoding: Option<BinaryEncoding>,
}

impl CastOptions {
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Default::default()
        }
    }

    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Default::default()
        }
    }

    pub fn with_encoding(encoding: BinaryEncoding) -> Self {
        Self {
            force_encoding: Some(encoding),
            ..Default::default()
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter,
)]
pub enum TypeKind {
    String,
    Number,
    Boolean,
    Date,
    ObjectId,
    Binary,
    Array,
    Object,
    RegExp,
    Cursor,
    Null,
    Unknown,
}

/// Classification order. `Unknown` matches everything and must stay last.
pub const REGISTERED_TYPES: [TypeKind; 12] = [
    TypeKind::Null,
    TypeKind::Boolean,
    TypeKind::Number,
    TypeKind::String,
    TypeKind::Date,
    TypeKind::ObjectId,
    TypeKind::Binary,
    TypeKind::RegExp,
    TypeKind::Array,
    TypeKind::Cursor,
    TypeKind::Object,
    TypeKind::Unknown,
];

impl TypeKind {
    /// The single registered kind matching `value`.
    pub fn of(value: &Value) -> TypeKind {
        REGISTERED_TYPES
            .iter()
            .copied()
            .find(|kind| kind.is_a(value))
            .unwrap_or(TypeKind::Unknown)
    }

    pub fn is_a(&self, value: &Value) -> bool {
        match self {
            TypeKind::String => matches!(value, Value::String(_)),
            TypeKind::Number => matches!(value, Value::Number(_)),
            TypeKind::Boolean => matches!(value, Value::Boolean(_)),
            TypeKind::Date => matches!(value, Value::Date(_)),
            TypeKind::ObjectId => matches!(value, Value::ObjectId(_)),
            TypeKind::Binary => matches!(value, Value::Binary(_)),
            TypeKind::Array => matches!(value, Value::Array(_)),
            TypeKind::Object => matches!(value, Value::Object(_)),
            TypeKind::RegExp => matches!(value, Value::RegExp(_)),
            TypeKind::Cursor => matches!(value, Value::Cursor(_)),
            TypeKind::Null => matches!(value, Value::Null),
            TypeKind::Unknown => true,
        }
    }

    pub fn cast(&self, value: &Value, opts: &CastOptions) -> FaultResult<Value> {
        if self.is_a(value) {
            return Ok(value.clone());
        }
        match self {
            TypeKind::Null => return Ok(Value::Null),
            TypeKind::Unknown => return Ok(value.clone()),
            _ => {}
        }
        if value.is_nullish() {
            return Ok(value.clone());
        }
        if opts.strict {
            return Err(self.cast_failure(value));
        }
        match self {
            TypeKind::String => cast_string(value),
            TypeKind::Number => cast_number(value),
            TypeKind::Boolean => cast_boolean(value),
            TypeKind::Date => cast_date(value),
            TypeKind::ObjectId => cast_object_id(value),
            TypeKind::Binary => cast_binary(value, opts.force_encoding),
            TypeKind::Array => Ok(Value::Array(vec![value.clone()])),
            TypeKind::RegExp => match value {
                Value::String(s) => RegExpValue::parse(s).map(Value::RegExp),
                _ => Err(self.cast_failure(value)),
            },
            TypeKind::Cursor => match value {
                Value::Array(items) => Ok(Value::Cursor(CursorRef::from_values(
                    items.clone(),
                    &CursorConfig::default(),
                ))),
                _ => Err(self.cast_failure(value)),
            },
            TypeKind::Object | TypeKind::Null | TypeKind::Unknown => Err(self.cast_failure(value)),
        }
        .map_err(|e| {
            if e.code == crate::error::INVALID_CAST {
                e
            } else {
                self.cast_failure(value)
            }
        })
    }

    pub fn equals(&self, a: &Value, b: &Value, opts: &CastOptions) -> FaultResult<bool> {
        let (a, b) = match (self.cast(a, opts), self.cast(b, opts)) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => {
                return if opts.silent { Ok(false) } else { Err(e) };
            }
        };
        Ok(match (&a, &b) {
            (Value::Number(x), Value::Number(y)) => x == y,
            _ => compare_same_kind(&a, &b) == Some(Ordering::Equal),
        })
    }

    /// Returns -1, 0 or 1.
    pub fn compare(&self, a: &Value, b: &Value, opts: &CastOptions) -> FaultResult<i8> {
        let (a, b) = match (self.cast(a, opts), self.cast(b, opts)) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => {
                return if opts.silent { Ok(-1) } else { Err(e) };
            }
        };
        Ok(match compare_same_kind(&a, &b) {
            Some(Ordering::Less) | None => -1,
            Some(Ordering::Equal) => 0,
            Some(Ordering::Greater) => 1,
        })
    }

    fn cast_failure(&self, value: &Value) -> Fault {
        Fault::cast_error(format!("Cannot cast {} to {}", value.type_name(), self))
    }
}

/// Convenience wrappers using silent mode, the default for comparisons.
pub fn equals(kind: TypeKind, a: &Value, b: &Value) -> bool {
    kind.equals(a, b, &CastOptions::silent()).unwrap_or(false)
}

pub fn compare(kind: TypeKind, a: &Value, b: &Value) -> i8 {
    kind.compare(a, b, &CastOptions::silent()).unwrap_or(-1)
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Undefined => 0,
        Value::Null => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Object(_) => 4,
        Value::Array(_) => 5,
        Value::Binary(_) => 6,
        Value::ObjectId(_) => 7,
        Value::Boolean(_) => 8,
        Value::Date(_) => 9,
        Value::RegExp(_) => 10,
        Value::Cursor(_) => 11,
    }
}

/// Total-ish ordering used after both sides were cast to the same kind.
/// Mixed kinds fall back to a fixed rank order.
fn compare_same_kind(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Boolean(x), Value::Boolean(y)) => Some(x.cmp(y)),
        (Value::Date(x), Value::Date(y)) => Some(x.cmp(y)),
        (Value::ObjectId(x), Value::ObjectId(y)) => Some(x.cmp(y)),
        (Value::Binary(x), Value::Binary(y)) => Some(x.cmp(y)),
        (Value::RegExp(x), Value::RegExp(y)) => {
            Some((&x.pattern, &x.flags).cmp(&(&y.pattern, &y.flags)))
        }
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                match compare_same_kind(l, r)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(x.len().cmp(&y.len()))
        }
        (Value::Object(_), Value::Object(_)) | (Value::Cursor(_), Value::Cursor(_)) => {
            (a == b).then_some(Ordering::Equal)
        }
        _ => Some(rank(a).cmp(&rank(b))),
    }
}

fn cast_string(value: &Value) -> FaultResult<Value> {
    Ok(Value::String(match value {
        Value::Number(n) => format_number(*n),
        Value::Boolean(b) => b.to_string(),
        Value::Date(d) => format_iso(d),
        Value::ObjectId(id) => id.to_hex(),
        Value::Binary(bytes) => base64::engine::general_purpose::STANDARD.encode(bytes),
        Value::RegExp(re) => re.to_string(),
        _ => {
            return Err(Fault::cast_error(format!(
                "Cannot cast {} to String",
                value.type_name()
            )))
        }
    }))
}

fn cast_number(value: &Value) -> FaultResult<Value> {
    let n = match value {
        Value::Boolean(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|n| !trimmed.is_empty() && !n.is_nan())
                .ok_or_else(|| Fault::cast_error(format!("Cannot cast \"{}\" to Number", s)))?
        }
        Value::Date(d) => d.timestamp_millis() as f64,
        _ => {
            return Err(Fault::cast_error(format!(
                "Cannot cast {} to Number",
                value.type_name()
            )))
        }
    };
    Ok(Value::Number(n))
}

fn cast_boolean(value: &Value) -> FaultResult<Value> {
    match value {
        Value::Number(n) => Ok(Value::Boolean(*n != 0.0 && !n.is_nan())),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "y" | "yes" | "on" => Ok(Value::Boolean(true)),
            "false" | "0" | "n" | "no" | "off" | "" => Ok(Value::Boolean(false)),
            _ => Err(Fault::cast_error(format!("Cannot cast \"{}\" to Boolean", s))),
        },
        _ => Err(Fault::cast_error(format!(
            "Cannot cast {} to Boolean",
            value.type_name()
        ))),
    }
}

/// Parses ISO-8601 forms: full RFC 3339, naive date-times (taken as UTC)
/// and bare dates (midnight UTC).
pub fn parse_date_string(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

pub fn date_from_millis(millis: f64) -> Option<DateTime<Utc>> {
    if !millis.is_finite() {
        return None;
    }
    Utc.timestamp_millis_opt(millis as i64).single()
}

fn cast_date(value: &Value) -> FaultResult<Value> {
    let date = match value {
        Value::Number(n) => date_from_millis(*n),
        Value::ObjectId(id) => Some(id.timestamp()),
        Value::String(s) if ObjectId::is_valid_hex(s) => {
            ObjectId::from_str(s).ok().map(|id| id.timestamp())
        }
        Value::String(s) => parse_date_string(s),
        _ => None,
    };
    date.map(Value::Date).ok_or_else(|| {
        Fault::cast_error(format!("Cannot cast {} to Date", value.type_name()))
    })
}

fn cast_object_id(value: &Value) -> FaultResult<Value> {
    match value {
        Value::String(s) => ObjectId::from_str(s).map(Value::ObjectId),
        _ => Err(Fault::cast_error(format!(
            "Cannot cast {} to ObjectId",
            value.type_name()
        ))),
    }
}

fn decode_binary(s: &str, encoding: BinaryEncoding) -> FaultResult<Vec<u8>> {
    match encoding {
        BinaryEncoding::Base64 => base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|e| Fault::cast_error(format!("Invalid base64 string: {}", e))),
        BinaryEncoding::Hex => {
            hex::decode(s).map_err(|e| Fault::cast_error(format!("Invalid hex string: {}", e)))
        }
    }
}

fn cast_binary(value: &Value, force: Option<BinaryEncoding>) -> FaultResult<Value> {
    match value {
        Value::String(s) => {
            let encoding = match force {
                Some(encoding) => encoding,
                None if BASE64_PATTERN.is_match(s) => BinaryEncoding::Base64,
                None if HEX_PATTERN.is_match(s) => BinaryEncoding::Hex,
                None => {
                    return Err(Fault::cast_error(
                        "String is neither base64 nor hex encoded",
                    ))
                }
            };
            decode_binary(s, encoding).map(Value::Binary)
        }
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Number(n) if n.fract() == 0.0 && (0.0..=255.0).contains(n) => {
                    Ok(*n as u8)
                }
                _ => Err(Fault::cast_error("Binary arrays may only hold bytes")),
            })
            .collect::<FaultResult<Vec<u8>>>()
            .map(Value::Binary),
        _ => Err(Fault::cast_error(format!(
            "Cannot cast {} to Binary",
            value.type_name()
        ))),
    }
}
