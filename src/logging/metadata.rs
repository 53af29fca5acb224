//! Structured metadata attached to log records
//!
//! Values are recursive: a string, an ordered list of values, or a string-keyed
//! map of values. Maps are kept in a `BTreeMap` so encoding is deterministic.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Metadata attached to a record
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A single metadata value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Array(Vec<MetadataValue>),
    Map(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, MetadataValue>> {
        match self {
            MetadataValue::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{}", s),
            MetadataValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            MetadataValue::Map(map) => {
                write!(f, "[")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

impl From<Vec<MetadataValue>> for MetadataValue {
    fn from(items: Vec<MetadataValue>) -> Self {
        MetadataValue::Array(items)
    }
}

impl From<BTreeMap<String, MetadataValue>> for MetadataValue {
    fn from(map: BTreeMap<String, MetadataValue>) -> Self {
        MetadataValue::Map(map)
    }
}

impl TryFrom<serde_json::Value> for MetadataValue {
    type Error = String;

    /// Numbers and booleans are kept as their text; `null` has no representation.
    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;

        match value {
            Value::String(s) => Ok(MetadataValue::String(s)),
            Value::Number(n) => Ok(MetadataValue::String(n.to_string())),
            Value::Bool(b) => Ok(MetadataValue::String(b.to_string())),
            Value::Array(items) => items
                .into_iter()
                .map(MetadataValue::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(MetadataValue::Array),
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| MetadataValue::try_from(v).map(|v| (k, v)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(MetadataValue::Map),
            Value::Null => Err("null is not a metadata value".to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for MetadataValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        MetadataValue::try_from(value).map_err(serde::de::Error::custom)
    }
}

/// Decode an optional metadata field, turning anything malformed into `None`
pub(crate) fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Option<Metadata>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| serde_json::from_value::<Metadata>(value).ok()))
}

/// Whether any key or rendered value contains `term`
///
/// `term` must already be lowercase.
pub fn metadata_matches(metadata: &Metadata, term: &str) -> bool {
    metadata.iter().any(|(key, value)| {
        key.to_lowercase().contains(term) || value.to_string().to_lowercase().contains(term)
    })
}
