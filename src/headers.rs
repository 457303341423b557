//! Message headers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::Value;

/// Header key carrying the payload content type.
pub const CONTENT_TYPE: &str = "contentType";

/// Wire spelling of the content-type key, accepted case-insensitively.
const CONTENT_TYPE_WIRE: &str = "content-type";

/// Identity header assigned by the messaging framework.
pub const ID: &str = "id";

/// Creation timestamp assigned by the messaging framework.
pub const TIMESTAMP: &str = "timestamp";

/// Headers that identify a message and must never be rewritten.
pub const IMMUTABLE: [&str; 2] = [ID, TIMESTAMP];

/// Returns `true` when `name` is a structurally immutable header.
pub fn is_immutable(name: &str) -> bool {
    IMMUTABLE.contains(&name)
}

/// Metadata attached to a message.
///
/// Keys are unique and insertion order is irrelevant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(HashMap<String, Value>);

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a header, matched by exact name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Whether a header is present, even with a null value.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Set a header, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(name.into(), value.into())
    }

    /// Iterate over all headers, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Content type of the payload, if declared.
    ///
    /// Looks up [`CONTENT_TYPE`] first, then any key equal to `content-type`
    /// ignoring ASCII case.
    pub fn content_type(&self) -> Option<String> {
        self.0
            .get(CONTENT_TYPE)
            .or_else(|| {
                self.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(CONTENT_TYPE_WIRE))
                    .map(|(_, v)| v)
            })
            .filter(|v| !v.is_null())
            .map(ToString::to_string)
    }

    /// View the headers as a map value, for expression evaluation.
    pub fn to_value(&self) -> Value {
        Value::Map(self.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl IntoIterator for Headers {
    type Item = (String, Value);
    type IntoIter = std::collections::hash_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_prefers_canonical_key() {
        let headers: Headers = [(CONTENT_TYPE, "application/json"), ("Content-Type", "text/plain")]
            .into_iter()
            .collect();
        assert_eq!(headers.content_type().as_deref(), Some("application/json"));
    }

    #[test]
    fn content_type_accepts_wire_spelling() {
        let headers: Headers = [("Content-Type", "text/plain")].into_iter().collect();
        assert_eq!(headers.content_type().as_deref(), Some("text/plain"));
        assert_eq!(Headers::new().content_type(), None);
    }

    #[test]
    fn identity_headers_are_immutable() {
        assert!(is_immutable(ID));
        assert!(is_immutable(TIMESTAMP));
        assert!(!is_immutable("priority"));
    }
}
