//! Attribute Values
//!
//! Tagged variant used for every desired and observed attribute. Maps are
//! sorted by key and integral numbers are normalised so that two
//! structurally-equal values always compare (and serialize) equal.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Value Kind
// =============================================================================

/// Kind of a value, as declared by a resource schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Number,
    Bool,
    List,
    Map,
    /// Flat map whose entries are coerced to strings (tags, metadata)
    #[serde(rename = "string_map")]
    StringMap,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::String => write!(f, "string"),
            ValueKind::Number => write!(f, "number"),
            ValueKind::Bool => write!(f, "bool"),
            ValueKind::List => write!(f, "list"),
            ValueKind::Map => write!(f, "map"),
            ValueKind::StringMap => write!(f, "map of strings"),
        }
    }
}

// =============================================================================
// Value
// =============================================================================

/// An attribute value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    String(String),
    Number(serde_json::Number),
    Bool(bool),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Build a map value from key/value pairs
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a list value
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    /// Kind of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Number(_) => ValueKind::Number,
            Value::Bool(_) => ValueKind::Bool,
            Value::List(_) => ValueKind::List,
            Value::Map(_) => ValueKind::Map,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Canonical form: integral floats become integers, recursively
    pub fn normalized(self) -> Self {
        match self {
            Value::Number(n) => Value::Number(normalize_number(n)),
            Value::List(items) => Value::List(items.into_iter().map(Value::normalized).collect()),
            Value::Map(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, v.normalized()))
                    .collect(),
            ),
            other => other,
        }
    }

    /// Convert to `kind` where a lossless conversion exists
    pub fn coerce(self, kind: ValueKind) -> Option<Self> {
        if self.kind() == kind {
            return Some(self.normalized());
        }

        match (self, kind) {
            (Value::String(s), ValueKind::Bool) => match s.trim() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            (Value::String(s), ValueKind::Number) => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    Some(Value::from(i))
                } else {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                        .map(|n| Value::Number(normalize_number(n)))
                }
            }
            (Value::Bool(b), ValueKind::String) => Some(Value::String(b.to_string())),
            (Value::Number(n), ValueKind::String) => {
                Some(Value::String(normalize_number(n).to_string()))
            }
            (Value::Map(entries), ValueKind::StringMap) => entries
                .into_iter()
                .map(|(k, v)| v.coerce(ValueKind::String).map(|v| (k, v)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(Value::Map),
            _ => None,
        }
    }

    /// Scalar rendering; composite values render as JSON
    pub fn render(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            composite => serde_json::Value::from(composite.clone()).to_string(),
        }
    }

    /// Flatten into dotted string keys (`tags.%`, `tags.Department`, `list.#`)
    pub fn flatten_into(&self, prefix: &str, out: &mut BTreeMap<String, String>) {
        match self {
            Value::List(items) => {
                out.insert(format!("{}.#", prefix), items.len().to_string());
                for (i, item) in items.iter().enumerate() {
                    item.flatten_into(&format!("{}.{}", prefix, i), out);
                }
            }
            Value::Map(entries) => {
                out.insert(format!("{}.%", prefix), entries.len().to_string());
                for (k, v) in entries {
                    v.flatten_into(&format!("{}.{}", prefix, k), out);
                }
            }
            scalar => {
                out.insert(prefix.to_string(), scalar.render());
            }
        }
    }
}

fn normalize_number(n: serde_json::Number) -> serde_json::Number {
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                return serde_json::Number::from(f as i64);
            }
        }
    }
    n
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl TryFrom<serde_json::Value> for Value {
    type Error = String;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Null => Err("null is not a valid attribute value".to_string()),
            serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
            serde_json::Value::Number(n) => Ok(Value::Number(normalize_number(n))),
            serde_json::Value::String(s) => Ok(Value::String(s)),
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(Value::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            serde_json::Value::Object(entries) => entries
                .into_iter()
                .map(|(k, v)| Value::try_from(v).map(|v| (k, v)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Value::Map),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => serde_json::Value::String(s),
            Value::Number(n) => serde_json::Value::Number(n),
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
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

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Number(i.into())
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Number(i.into())
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Value::Number(u.into())
    }
}

impl From<serde_json::Number> for Value {
    fn from(n: serde_json::Number) -> Self {
        Value::Number(normalize_number(n))
    }
}

impl From<BTreeMap<String, String>> for Value {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Value::Map(entries.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
    }
}

impl<V: Into<Value>> From<Vec<V>> for Value {
    fn from(items: Vec<V>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integral_floats_normalize() {
        let a = Value::try_from(serde_json::json!(50.0)).unwrap();
        let b = Value::from(50i64);
        assert_eq!(a, b);
        assert_eq!(a.render(), "50");
    }

    #[test]
    fn test_null_rejected() {
        assert!(Value::try_from(serde_json::Value::Null).is_err());
    }

    #[test]
    fn test_coerce_strings() {
        assert_eq!(
            Value::from("false").coerce(ValueKind::Bool),
            Some(Value::Bool(false))
        );
        assert_eq!(Value::from("42").coerce(ValueKind::Number), Some(Value::from(42i64)));
        assert_eq!(Value::from(true).coerce(ValueKind::String), Some(Value::from("true")));
        assert_eq!(Value::from("yes").coerce(ValueKind::Bool), None);
        assert_eq!(Value::from("x").coerce(ValueKind::Map), None);
    }

    #[test]
    fn test_coerce_string_map() {
        let tags = Value::map([
            ("Count", Value::from(5i64)),
            ("Enabled", Value::from(true)),
            ("Team", Value::from("Network")),
        ]);
        assert_eq!(
            tags.coerce(ValueKind::StringMap),
            Some(Value::map([("Count", "5"), ("Enabled", "true"), ("Team", "Network")]))
        );

        let nested = Value::map([("Operations", Value::map([("CostCenter", "42")]))]);
        assert_eq!(nested.coerce(ValueKind::StringMap), None);
        assert_eq!(Value::from("x").coerce(ValueKind::StringMap), None);
    }

    #[test]
    fn test_flatten() {
        let tags = Value::map([("Department", "Finance")]);
        let mut out = BTreeMap::new();
        tags.flatten_into("freeform_tags", &mut out);
        Value::list(["a", "b"]).flatten_into("names", &mut out);
        Value::from(false).flatten_into("enabled", &mut out);

        assert_eq!(out["freeform_tags.%"], "1");
        assert_eq!(out["freeform_tags.Department"], "Finance");
        assert_eq!(out["names.#"], "2");
        assert_eq!(out["names.1"], "b");
        assert_eq!(out["enabled"], "false");
    }

    #[test]
    fn test_serde_is_plain_json() {
        let value = Value::map([("b", Value::from(1i64)), ("a", Value::from(true))]);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"a":true,"b":1}"#);

        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
