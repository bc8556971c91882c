//! Payloads exchanged with the relational store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Field that carries the natural id inside document data.
pub const ID_FIELD: &str = "id";
/// Field that carries the revision inside document data.
pub const REV_FIELD: &str = "rev";

/// Opaque revision token assigned by the store.
///
/// Revisions look like `<generation>-<digest>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Wraps a revision string.
    pub fn new(rev: impl Into<String>) -> Self {
        Self(rev.into())
    }

    /// Builds a revision from its parts.
    pub fn from_parts(generation: u64, digest: &str) -> Self {
        Self(format!("{generation}-{digest}"))
    }

    /// Returns the generation number, if the token has one.
    pub fn generation(&self) -> Option<u64> {
        self.0.split_once('-')?.0.parse().ok()
    }

    /// Returns the revision as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a find: records grouped under their payload keys.
///
/// ```text
/// { "posts": [ { "id": "1", "rev": "1-..", ... } ], "authors": [ ... ] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    /// Creates an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the records stored under `key`.
    pub fn records(&self, key: &str) -> &[Value] {
        match self.0.get(key) {
            Some(Value::Array(records)) => records,
            _ => &[],
        }
    }

    /// Returns true if any of `keys` holds at least one record.
    pub fn has_records(&self, keys: &[&str]) -> bool {
        keys.iter().any(|key| !self.records(key).is_empty())
    }

    /// Ensures `key` is present, even with no records.
    pub fn ensure_key(&mut self, key: &str) {
        self.0
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
    }

    /// Appends a record under `key` unless a record with the same id is there.
    ///
    /// Returns true if the record was added.
    pub fn push_unique(&mut self, key: &str, record: Value) -> bool {
        let id = record.get(ID_FIELD).cloned();
        let slot = self
            .0
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !slot.is_array() {
            *slot = Value::Array(Vec::new());
        }
        let Some(records) = slot.as_array_mut() else {
            return false;
        };
        if id.is_some() && records.iter().any(|r| r.get(ID_FIELD) == id.as_ref()) {
            return false;
        }
        records.push(record);
        true
    }

    /// Returns the payload keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Consumes the payload and returns the underlying JSON map.
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Result of saving a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveResult {
    /// Natural id of the saved document.
    pub id: String,
    /// New revision.
    pub rev: Revision,
}

/// Result of deleting a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    /// Natural id of the deleted document.
    pub id: String,
    /// Revision of the tombstone.
    pub rev: Revision,
    /// Always true once the store confirmed removal.
    pub deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn revision_generation() {
        assert_eq!(Revision::new("3-abc").generation(), Some(3));
        assert_eq!(Revision::from_parts(12, "ff").as_str(), "12-ff");
        assert_eq!(Revision::new("garbage").generation(), None);
    }

    #[test]
    fn payload_records() {
        let payload: Payload =
            serde_json::from_value(json!({"posts": [{"id": "1"}], "authors": []})).unwrap();
        assert_eq!(payload.records("posts").len(), 1);
        assert!(payload.records("authors").is_empty());
        assert!(payload.records("missing").is_empty());
        assert!(payload.has_records(&["post", "posts"]));
        assert!(!payload.has_records(&["author", "authors"]));
    }

    #[test]
    fn push_unique_dedupes_by_id() {
        let mut payload = Payload::new();
        assert!(payload.push_unique("authors", json!({"id": "a"})));
        assert!(!payload.push_unique("authors", json!({"id": "a", "name": "x"})));
        assert!(payload.push_unique("authors", json!({"id": "b"})));
        assert_eq!(payload.records("authors").len(), 2);
    }
}
