//! The JSON value model.
//!
//! A tagged union over the six JSON kinds. Object keys preserve insertion
//! order because LLMs emit keys in a meaningful order and both the diff
//! output and the per-path content hash depend on it. Containers carry a
//! completeness flag distinguishing "observed and syntactically closed"
//! from "observed so far but still open to extension"; the flag is
//! metadata and never participates in value equality.

use std::fmt;

use serde_json::Value;

/// A JSON number with its source representation preserved.
///
/// Streamed model output frequently contains numbers whose textual form
/// matters (`1.50`, `1e3`); round-tripping through `f64` would lose it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JsonNumber {
    text: String,
}

impl JsonNumber {
    /// Wrap a numeric literal as it appeared in the source text.
    ///
    /// The caller is responsible for the text being a valid JSON number.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn from_i64(n: i64) -> Self {
        Self { text: n.to_string() }
    }

    pub fn from_f64(n: f64) -> Self {
        Self { text: n.to_string() }
    }

    /// The literal as it appeared in the source.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.text.parse().ok()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.text.parse().ok()
    }

    fn to_json(&self) -> Value {
        if let Ok(n) = self.text.parse::<i64>() {
            return Value::Number(n.into());
        }
        if let Ok(n) = self.text.parse::<u64>() {
            return Value::Number(n.into());
        }
        match self.text.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            Some(n) => Value::Number(n),
            None => Value::Null,
        }
    }
}

impl fmt::Display for JsonNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// An insertion-ordered string-keyed mapping.
#[derive(Clone, Debug, Default)]
pub struct ObjectMap {
    entries: Vec<(String, JsonValue)>,
    /// Whether the closing `}` has been observed.
    pub closed: bool,
}

impl ObjectMap {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            closed: true,
        }
    }

    pub fn open() -> Self {
        Self {
            entries: Vec::new(),
            closed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a key, replacing in place if it already exists. Position in
    /// the insertion order is preserved on replacement.
    pub fn insert(&mut self, key: impl Into<String>, value: JsonValue) -> Option<JsonValue> {
        let key = key.into();
        for (k, v) in &mut self.entries {
            if *k == key {
                return Some(std::mem::replace(v, value));
            }
        }
        self.entries.push((key, value));
        None
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut JsonValue> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JsonValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut JsonValue)> {
        self.entries.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    pub fn last(&self) -> Option<(&str, &JsonValue)> {
        self.entries.last().map(|(k, v)| (k.as_str(), v))
    }

    pub fn last_mut(&mut self) -> Option<&mut JsonValue> {
        self.entries.last_mut().map(|(_, v)| v)
    }

    /// Consume the map in insertion order.
    pub fn into_entries(self) -> Vec<(String, JsonValue)> {
        self.entries
    }
}

impl PartialEq for ObjectMap {
    /// Content equality; the completeness flag is excluded.
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl FromIterator<(String, JsonValue)> for ObjectMap {
    fn from_iter<I: IntoIterator<Item = (String, JsonValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
            closed: true,
        }
    }
}

/// An array whose closing `]` may not have been observed yet.
#[derive(Clone, Debug, Default)]
pub struct JsonArray {
    pub items: Vec<JsonValue>,
    /// Whether the closing `]` has been observed.
    pub closed: bool,
}

impl JsonArray {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            closed: true,
        }
    }

    pub fn open() -> Self {
        Self {
            items: Vec::new(),
            closed: false,
        }
    }
}

impl PartialEq for JsonArray {
    /// Content equality; the completeness flag is excluded.
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl FromIterator<JsonValue> for JsonArray {
    fn from_iter<I: IntoIterator<Item = JsonValue>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
            closed: true,
        }
    }
}

/// A JSON value.
#[derive(Clone, Debug, PartialEq)]
pub enum JsonValue {
    Null,
    Bool(bool),
    Number(JsonNumber),
    String(String),
    Array(JsonArray),
    Object(ObjectMap),
}

impl Default for JsonValue {
    fn default() -> Self {
        Self::Null
    }
}

impl JsonValue {
    /// Short kind name for logging and error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::Array(_) | Self::Object(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&JsonNumber> {
        match self {
            Self::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&JsonArray> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectMap> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Whether this node and all of its descendants are closed.
    pub fn is_complete(&self) -> bool {
        match self {
            Self::Array(a) => a.closed && a.items.iter().all(JsonValue::is_complete),
            Self::Object(o) => o.closed && o.iter().all(|(_, v)| v.is_complete()),
            _ => true,
        }
    }

    /// Parse strict JSON text into a fully-closed value.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from(&value))
    }

    /// Render the canonical serialization: compact JSON with object keys in
    /// insertion order and numbers in their source representation. This is
    /// the byte sequence the per-path content hash is computed over.
    pub fn canonical_string(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }

    fn write_canonical(&self, out: &mut String) {
        match self {
            Self::Null => out.push_str("null"),
            Self::Bool(true) => out.push_str("true"),
            Self::Bool(false) => out.push_str("false"),
            Self::Number(n) => out.push_str(n.text()),
            Self::String(s) => {
                // serde_json escapes exactly the JSON string grammar.
                out.push_str(&serde_json::to_string(s).unwrap_or_else(|_| "\"\"".into()));
            }
            Self::Array(a) => {
                out.push('[');
                for (i, item) in a.items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_canonical(out);
                }
                out.push(']');
            }
            Self::Object(o) => {
                out.push('{');
                for (i, (k, v)) in o.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::to_string(k).unwrap_or_else(|_| "\"\"".into()));
                    out.push(':');
                    v.write_canonical(out);
                }
                out.push('}');
            }
        }
    }

    /// Convert to a `serde_json::Value` for event payloads and hosts.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => n.to_json(),
            Self::String(s) => Value::String(s.clone()),
            Self::Array(a) => Value::Array(a.items.iter().map(JsonValue::to_json).collect()),
            Self::Object(o) => {
                let mut map = serde_json::Map::new();
                for (k, v) in o.iter() {
                    let _ = map.insert(k.to_string(), v.to_json());
                }
                Value::Object(map)
            }
        }
    }

    /// A compact sketch of the value for `old_value` fields: scalars are
    /// carried whole, containers are summarized by kind and size.
    pub fn sketch(&self) -> Value {
        match self {
            Self::Array(a) => {
                serde_json::json!({ "kind": "array", "len": a.items.len() })
            }
            Self::Object(o) => {
                serde_json::json!({ "kind": "object", "len": o.len() })
            }
            other => other.to_json(),
        }
    }
}

impl From<&Value> for JsonValue {
    /// Strict-parser output is fully closed by construction.
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(JsonNumber::from_text(n.to_string())),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => Self::Array(JsonArray {
                items: items.iter().map(Self::from).collect(),
                closed: true,
            }),
            Value::Object(map) => Self::Object(ObjectMap {
                entries: map.iter().map(|(k, v)| (k.clone(), Self::from(v))).collect(),
                closed: true,
            }),
        }
    }
}

impl From<Value> for JsonValue {
    fn from(value: Value) -> Self {
        Self::from(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_preserves_insertion_order() {
        let mut obj = ObjectMap::new();
        let _ = obj.insert("zebra", JsonValue::Bool(true));
        let _ = obj.insert("apple", JsonValue::Null);
        let _ = obj.insert("mango", JsonValue::String("m".into()));

        let keys: Vec<&str> = obj.keys().collect();
        assert_eq!(keys, vec!["zebra", "apple", "mango"]);
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut obj = ObjectMap::new();
        let _ = obj.insert("a", JsonValue::Bool(false));
        let _ = obj.insert("b", JsonValue::Null);
        let old = obj.insert("a", JsonValue::Bool(true));

        assert_eq!(old, Some(JsonValue::Bool(false)));
        let keys: Vec<&str> = obj.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(obj.get("a"), Some(&JsonValue::Bool(true)));
    }

    #[test]
    fn equality_ignores_completeness() {
        let closed: JsonValue = JsonValue::Array(JsonArray {
            items: vec![JsonValue::Bool(true)],
            closed: true,
        });
        let open = JsonValue::Array(JsonArray {
            items: vec![JsonValue::Bool(true)],
            closed: false,
        });
        assert_eq!(closed, open);
    }

    #[test]
    fn number_preserves_source_text() {
        let n = JsonNumber::from_text("1.50");
        assert_eq!(n.text(), "1.50");
        assert_eq!(n.as_f64(), Some(1.5));
        assert_eq!(n.as_i64(), None);
    }

    #[test]
    fn canonical_string_keeps_key_order() {
        let value = JsonValue::from_json_str(r#"{"b":1,"a":[true,null]}"#).unwrap();
        assert_eq!(value.canonical_string(), r#"{"b":1,"a":[true,null]}"#);
    }

    #[test]
    fn canonical_string_escapes() {
        let value = JsonValue::String("a\"b\n".into());
        assert_eq!(value.canonical_string(), r#""a\"b\n""#);
    }

    #[test]
    fn from_json_str_roundtrip() {
        let value = JsonValue::from_json_str(r#"{"x":[1,"two",false]}"#).unwrap();
        assert!(value.is_complete());
        let obj = value.as_object().unwrap();
        let arr = obj.get("x").unwrap().as_array().unwrap();
        assert_eq!(arr.items.len(), 3);
        assert_eq!(arr.items[1].as_str(), Some("two"));
    }

    #[test]
    fn sketch_summarizes_containers() {
        let value = JsonValue::from_json_str(r#"{"a":1,"b":2}"#).unwrap();
        assert_eq!(
            value.sketch(),
            serde_json::json!({"kind": "object", "len": 2})
        );
        assert_eq!(JsonValue::Bool(true).sketch(), serde_json::json!(true));
    }
}
