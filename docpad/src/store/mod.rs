use crate::error::{DriverError, Result};
use crate::interceptor::{Identifier, ID_FIELD};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// The driver's view of a live store connection.
///
/// The wire protocol lives behind this trait; generated access layers only
/// ever see JSON documents keyed by database and collection name.
pub trait StoreConnection: Send + Sync {
    /// Every document of a collection, in store order.
    fn find(&self, database: &str, collection: &str) -> Result<Vec<Value>>;

    /// Replace the document with identity `id`, inserting it if absent.
    fn replace(&self, database: &str, collection: &str, id: &Identifier, document: Value)
        -> Result<()>;
}

// ── In-memory store ────────────────────────────────────────────

/// A process-local store, mainly for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<(String, String), Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a document. It must be a JSON object with an `_id`.
    pub fn insert(&self, database: &str, collection: &str, document: Value) -> Result<()> {
        document
            .get(ID_FIELD)
            .and_then(Identifier::from_value)
            .ok_or_else(|| DriverError::Store(format!("document in {database}.{collection} has no {ID_FIELD}")))?;

        let mut collections = self.write()?;
        collections
            .entry((database.to_string(), collection.to_string()))
            .or_default()
            .push(document);
        Ok(())
    }

    /// Snapshot of a collection's documents.
    pub fn documents(&self, database: &str, collection: &str) -> Result<Vec<Value>> {
        let collections = self
            .collections
            .read()
            .map_err(|_| DriverError::Store("memory store lock poisoned".into()))?;
        Ok(collections
            .get(&(database.to_string(), collection.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<(String, String), Vec<Value>>>> {
        self.collections
            .write()
            .map_err(|_| DriverError::Store("memory store lock poisoned".into()))
    }
}

impl StoreConnection for MemoryStore {
    fn find(&self, database: &str, collection: &str) -> Result<Vec<Value>> {
        self.documents(database, collection)
    }

    fn replace(
        &self,
        database: &str,
        collection: &str,
        id: &Identifier,
        document: Value,
    ) -> Result<()> {
        let mut collections = self.write()?;
        let docs = collections
            .entry((database.to_string(), collection.to_string()))
            .or_default();

        let existing = docs.iter_mut().find(|doc| {
            doc.get(ID_FIELD)
                .and_then(Identifier::from_value)
                .as_ref()
                == Some(id)
        });
        match existing {
            Some(slot) => *slot = document,
            None => docs.push(document),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_requires_identity() {
        let store = MemoryStore::new();
        let err = store.insert("db", "c", json!({ "name": "x" })).unwrap_err();
        assert!(matches!(err, DriverError::Store(_)));
    }

    #[test]
    fn test_replace_existing_and_upsert() {
        let store = MemoryStore::new();
        store.insert("db", "c", json!({ "_id": "a", "v": 1 })).unwrap();

        store
            .replace("db", "c", &Identifier::from("a"), json!({ "_id": "a", "v": 2 }))
            .unwrap();
        store
            .replace("db", "c", &Identifier::from("b"), json!({ "_id": "b", "v": 3 }))
            .unwrap();

        let docs = store.find("db", "c").unwrap();
        assert_eq!(docs, vec![json!({ "_id": "a", "v": 2 }), json!({ "_id": "b", "v": 3 })]);
    }

    #[test]
    fn test_unknown_collection_is_empty() {
        let store = MemoryStore::new();
        assert!(store.find("db", "missing").unwrap().is_empty());
    }
}
