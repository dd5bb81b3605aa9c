use core::fmt;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use lazy_static::lazy_static;
use rand::Rng;

use crate::cursor::CursorRef;
use crate::error::{Fault, FaultResult};

// 評価結果の値
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Date(DateTime<Utc>),
    ObjectId(ObjectId),
    Binary(Vec<u8>),
    RegExp(RegExpValue),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
    Cursor(CursorRef),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// JavaScript-like truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::ObjectId(_) => "objectId",
            Value::Binary(_) => "binary",
            Value::RegExp(_) => "regexp",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Cursor(_) => "cursor",
        }
    }

    pub fn object<I, K>(entries: I) -> Value
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        Value::from(json.clone())
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Date(d) => serde_json::Value::String(format_iso(d)),
            Value::ObjectId(id) => serde_json::Value::String(id.to_hex()),
            Value::Binary(bytes) => serde_json::Value::String(
                base64::engine::general_purpose::STANDARD.encode(bytes),
            ),
            Value::RegExp(re) => serde_json::Value::String(re.to_string()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .filter(|(_, v)| !v.is_undefined())
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Cursor(_) => serde_json::json!({ "object": "cursor" }),
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        (if n > 0.0 { "Infinity" } else { "-Infinity" }).to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i128)
    } else {
        format!("{}", n)
    }
}

pub fn format_iso(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", format_iso(d)),
            Value::ObjectId(id) => write!(f, "{}", id),
            Value::RegExp(re) => write!(f, "{}", re),
            _ => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

/// Safe nested property access. Missing intermediate segments yield
/// `Undefined` instead of failing.
pub fn read_object(value: &Value, path: &str) -> Value {
    if path.is_empty() {
        return value.clone();
    }
    let mut current = value.clone();
    for segment in path.split('.') {
        let next = match &current {
            Value::Object(map) => map.get(segment).cloned(),
            Value::Array(items) => {
                if segment == "length" {
                    Some(Value::Number(items.len() as f64))
                } else {
                    segment.parse::<usize>().ok().and_then(|i| items.get(i).cloned())
                }
            }
            Value::String(s) if segment == "length" => {
                Some(Value::Number(s.chars().count() as f64))
            }
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return Value::Undefined,
        }
    }
    current
}

/// A JavaScript-style regular expression literal, kept as pattern + flags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegExpValue {
    pub pattern: String,
    pub flags: String,
}

const REGEXP_FLAGS: &str = "gimsuy";

impl RegExpValue {
    pub fn new(pattern: &str, flags: &str) -> FaultResult<Self> {
        if let Some(flag) = flags.chars().find(|c| !REGEXP_FLAGS.contains(*c)) {
            return Err(Fault::cast_error(format!(
                "Invalid regular expression flag: {}",
                flag
            )));
        }
        let re = Self {
            pattern: pattern.to_string(),
            flags: flags.to_string(),
        };
        re.compile()?;
        Ok(re)
    }

    /// Parses `/pattern/flags` notation, falling back to a bare pattern.
    pub fn parse(literal: &str) -> FaultResult<Self> {
        if literal.len() >= 2 && literal.starts_with('/') {
            if let Some(end) = literal.rfind('/') {
                if end > 0 {
                    return Self::new(&literal[1..end], &literal[end + 1..]);
                }
            }
        }
        Self::new(literal, "")
    }

    pub fn compile(&self) -> FaultResult<regex::Regex> {
        let mut builder = regex::RegexBuilder::new(&self.pattern);
        builder
            .case_insensitive(self.flags.contains('i'))
            .multi_line(self.flags.contains('m'))
            .dot_matches_new_line(self.flags.contains('s'));
        builder
            .build()
            .map_err(|e| Fault::cast_error(format!("Invalid regular expression: {}", e)))
    }
}

impl fmt::Display for RegExpValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "/{}/{}", self.pattern, self.flags)
    }
}

lazy_static! {
    static ref OBJECT_ID_COUNTER: AtomicU32 = AtomicU32::new(rand::thread_rng().gen());
    static ref OBJECT_ID_PROCESS: [u8; 5] = rand::thread_rng().gen();
}

/// 12-byte identifier: 4 bytes of big-endian epoch seconds, 5 process bytes,
/// 3 counter bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    pub fn new() -> Self {
        Self::from_timestamp(Utc::now())
    }

    pub fn from_timestamp(time: DateTime<Utc>) -> Self {
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&(time.timestamp() as u32).to_be_bytes());
        bytes[4..9].copy_from_slice(&*OBJECT_ID_PROCESS);
        let counter = OBJECT_ID_COUNTER.fetch_add(1, Ordering::SeqCst);
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    pub fn is_valid_hex(s: &str) -> bool {
        s.len() == 24 && s.chars().all(|c| c.is_ascii_hexdigit())
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        let secs = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        Utc.timestamp_opt(secs as i64, 0)
            .single()
            .unwrap_or_default()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for ObjectId {
    type Err = Fault;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !Self::is_valid_hex(s) {
            return Err(Fault::cast_error(format!("Invalid ObjectId: {}", s)));
        }
        let decoded =
            hex::decode(s).map_err(|e| Fault::cast_error(format!("Invalid ObjectId: {}", e)))?;
        let mut bytes = [0u8; 12];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_read_object_nested() {
        let value = Value::from(json!({"a": {"b": [10, {"c": "deep"}]}}));
        assert_eq!(read_object(&value, "a.b.1.c"), Value::from("deep"));
        assert_eq!(read_object(&value, "a.b.length"), Value::Number(2.0));
        assert_eq!(read_object(&value, ""), value);
    }

    #[test]
    fn test_read_object_missing_segments() {
        let value = Value::from(json!({"a": 1}));
        assert_eq!(read_object(&value, "a.b.c"), Value::Undefined);
        assert_eq!(read_object(&value, "missing"), Value::Undefined);
        assert_eq!(read_object(&Value::Null, "x"), Value::Undefined);
    }

    #[test]
    fn test_json_round_trip_drops_undefined() {
        let value = Value::object([("a", Value::Undefined), ("b", Value::Number(2.0))]);
        assert_eq!(value.to_json(), json!({"b": 2}));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(-0.25), "-0.25");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn test_object_id_timestamp() {
        let time = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let id = ObjectId::from_timestamp(time);
        assert_eq!(id.timestamp(), time);
        let parsed: ObjectId = id.to_hex().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("zz".parse::<ObjectId>().is_err());
    }

    #[test]
    fn test_regexp_literal() {
        let re = RegExpValue::parse("/^ab+c$/i").unwrap();
        assert_eq!(re.pattern, "^ab+c$");
        assert_eq!(re.flags, "i");
        assert!(re.compile().unwrap().is_match("ABBC"));
        assert!(RegExpValue::parse("/a/q").is_err());
        assert!(RegExpValue::parse("(").is_err());
    }
}
