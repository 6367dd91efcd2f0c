use crate::error::Result;
use crate::interceptor::{Interceptor, Tracked};
use crate::store::StoreConnection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::marker::PhantomData;
use std::sync::Arc;

/// Types that can be the element type of a typed collection.
///
/// Any owned serde type qualifies; the generated access layer asserts this
/// bound for every mapped type so a bad mapping fails at build time.
///
/// Change detection hashes sequences in order, so hash-ordered set fields
/// should be [`UnorderedSet`](crate::UnorderedSet) rather than `HashSet`.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Entity for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// A typed handle on one collection of one database.
pub struct TypedCollection<T> {
    connection: Arc<dyn StoreConnection>,
    database: String,
    name: String,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> TypedCollection<T> {
    pub fn new(connection: Arc<dyn StoreConnection>, database: &str, name: &str) -> Self {
        Self {
            connection,
            database: database.to_string(),
            name: name.to_string(),
            _phantom: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn connection(&self) -> &Arc<dyn StoreConnection> {
        &self.connection
    }
}

impl<T> Clone for TypedCollection<T> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            database: self.database.clone(),
            name: self.name.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for TypedCollection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedCollection")
            .field("database", &self.database)
            .field("name", &self.name)
            .field("element", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: Entity> TypedCollection<T> {
    /// Fetch and deserialize every document of the collection.
    pub fn find_all(&self) -> Result<Vec<T>> {
        self.connection
            .find(&self.database, &self.name)?
            .into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(Into::into))
            .collect()
    }

    /// Fetch every document with a baseline fingerprint captured right after
    /// deserialization.
    pub fn find_tracked(&self) -> Result<Vec<Tracked<T>>> {
        self.find_all()?.into_iter().map(Tracked::new).collect()
    }

    /// Replace the stored document that has `entity`'s identity.
    pub fn save(&self, entity: &T) -> Result<()> {
        let id = Interceptor::<T>::get_id(entity)?;
        let document = serde_json::to_value(entity)?;
        log::debug!("Saving {}.{} {}", self.database, self.name, id);
        self.connection
            .replace(&self.database, &self.name, &id, document)
    }

    /// An interceptor over this collection, tracing its decisions to `sink`.
    pub fn interceptor(&self, sink: impl Write + Send + 'static) -> Interceptor<T> {
        Interceptor::new(self.clone(), sink)
    }
}
