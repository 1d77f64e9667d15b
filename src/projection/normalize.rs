//! Normalisation of provider-specific representations
//!
//! Everything here is a pure function of its input so that two
//! structurally-equal remote states project to byte-equal observed state.

use crate::domain::value::Value;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;

/// Canonical timestamp: RFC 3339, UTC, millisecond precision, `Z` suffix
pub fn timestamp(raw: &str) -> Result<String, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| {
            dt.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Millis, true)
        })
        .map_err(|e| format!("invalid timestamp '{}': {}", raw, e))
}

/// Freeform tags as a sorted string map
pub fn freeform_tags(tags: &BTreeMap<String, String>) -> Value {
    Value::from(tags.clone())
}

/// Defined tags `{namespace: {key: value}}` flattened to `"namespace.key" -> value`
pub fn defined_tags(tags: &BTreeMap<String, BTreeMap<String, serde_json::Value>>) -> Value {
    let mut flat = BTreeMap::new();
    for (namespace, entries) in tags {
        for (key, value) in entries {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            flat.insert(format!("{}.{}", namespace, key), Value::String(rendered));
        }
    }
    Value::Map(flat)
}

/// Inverse of [`defined_tags`]: split keys on the first `.`
pub fn nest_defined_tags(
    flat: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, BTreeMap<String, serde_json::Value>>, String> {
    let mut nested: BTreeMap<String, BTreeMap<String, serde_json::Value>> = BTreeMap::new();
    for (qualified, value) in flat {
        let (namespace, key) = qualified
            .split_once('.')
            .filter(|(ns, key)| !ns.is_empty() && !key.is_empty())
            .ok_or_else(|| format!("defined tag '{}' is not of the form namespace.key", qualified))?;
        nested
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), serde_json::Value::String(value.clone()));
    }
    Ok(nested)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_canonical() {
        let a = timestamp("2026-10-19T12:00:00.123456+02:00").unwrap();
        let b = timestamp("2026-10-19T10:00:00.123Z").unwrap();
        assert_eq!(a, "2026-10-19T10:00:00.123Z");
        assert_eq!(a, b);
        assert!(timestamp("yesterday").is_err());
    }

    #[test]
    fn test_defined_tags_roundtrip() {
        let mut inner = BTreeMap::new();
        inner.insert("CostCenter".to_string(), serde_json::json!("42"));
        let mut tags = BTreeMap::new();
        tags.insert("Operations".to_string(), inner);

        let flat = defined_tags(&tags);
        let map = flat.as_map().unwrap();
        assert_eq!(map["Operations.CostCenter"], Value::from("42"));

        let strings: BTreeMap<String, String> =
            map.iter().map(|(k, v)| (k.clone(), v.render())).collect();
        assert_eq!(nest_defined_tags(&strings).unwrap(), tags);
    }

    #[test]
    fn test_defined_tags_require_namespace() {
        let mut flat = BTreeMap::new();
        flat.insert("nonamespace".to_string(), "v".to_string());
        assert!(nest_defined_tags(&flat).is_err());
    }
}
