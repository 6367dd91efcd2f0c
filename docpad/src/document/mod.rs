//! Untyped document representation for collections without a declared type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A schemaless document: field name -> JSON value, in stored order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.0.get_mut(field)
    }

    /// Set a field, returning the previous value if there was one.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Document {
    type Error = crate::DriverError;

    fn try_from(value: Value) -> crate::Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(crate::DriverError::Serialization(format!(
                "expected a JSON object for a document, got {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_serializes_transparently() {
        let mut doc = Document::new();
        doc.insert("_id", "abc");
        doc.insert("count", 3);

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value, json!({ "_id": "abc", "count": 3 }));

        let back: Document = serde_json::from_value(value).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_try_from_rejects_non_objects() {
        assert!(Document::try_from(json!([1, 2])).is_err());
        let doc = Document::try_from(json!({ "a": 1 })).unwrap();
        assert_eq!(doc.get("a"), Some(&json!(1)));
    }
}
