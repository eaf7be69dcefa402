//! Order-independent metadata normalization and comparison

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata after normalization: null values dropped, `tags` deduplicated
/// and sorted, keys in lexicographic order. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedMetadata(Map<String, Value>);

impl NormalizedMetadata {
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String tags, if a `tags` array is present
    pub fn tags(&self) -> Vec<&str> {
        match self.0.get("tags") {
            Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Stable serialization, suitable for persistence and comparison
    pub fn to_stable_string(&self) -> String {
        stable_serialize(&Value::Object(self.0.clone()))
    }

    /// Parse persisted metadata back, renormalizing on the way in
    pub fn from_json_str(raw: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => normalize_metadata(Some(&map)),
            _ => None,
        }
    }
}

/// Normalize raw metadata. Returns `None` when nothing survives, so that
/// "no metadata" and "empty metadata" compare equal.
pub fn normalize_metadata(raw: Option<&Map<String, Value>>) -> Option<NormalizedMetadata> {
    let raw = raw?;

    let mut keys: Vec<&String> = raw
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, _)| key)
        .collect();
    keys.sort();

    if keys.is_empty() {
        return None;
    }

    // Insert in sorted order so the map is ordered even with serde_json's
    // preserve_order feature enabled somewhere in the dependency graph.
    let mut normalized = Map::new();
    for key in keys {
        let value = &raw[key.as_str()];
        let value = if key == "tags" {
            normalize_tags(value)
        } else {
            value.clone()
        };
        normalized.insert(key.clone(), value);
    }

    Some(NormalizedMetadata(normalized))
}

fn normalize_tags(value: &Value) -> Value {
    let Value::Array(items) = value else {
        return value.clone();
    };

    let mut keyed: Vec<(String, Value)> = items
        .iter()
        .filter(|item| !item.is_null())
        .map(|item| {
            let key = match item {
                Value::String(s) => s.clone(),
                other => stable_serialize(other),
            };
            (key, item.clone())
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.dedup_by(|a, b| a.0 == b.0);

    Value::Array(keyed.into_iter().map(|(_, item)| item).collect())
}

/// Serialize with object keys sorted at every depth; arrays keep their order.
pub fn stable_serialize(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_stable(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Compare two metadata maps after normalizing both sides
pub fn metadata_equals(a: Option<&Map<String, Value>>, b: Option<&Map<String, Value>>) -> bool {
    let a = normalize_metadata(a).map(|m| m.to_stable_string());
    let b = normalize_metadata(b).map(|m| m.to_stable_string());
    a == b
}

/// Shallow merge where incoming keys win; an incoming null removes the key.
pub fn merge_metadata(
    existing: Option<&Map<String, Value>>,
    incoming: Option<&Map<String, Value>>,
) -> Option<NormalizedMetadata> {
    let mut merged = existing.cloned().unwrap_or_default();
    if let Some(incoming) = incoming {
        for (key, value) in incoming {
            merged.insert(key.clone(), value.clone());
        }
    }
    normalize_metadata(Some(&merged))
}
