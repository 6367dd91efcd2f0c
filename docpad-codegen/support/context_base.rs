// Scaffolding shared by generated contexts.

use ::docpad::{Entity, StoreConnection, TypedCollection};
use std::sync::Arc;

/// Connection state wrapped by every generated context.
#[derive(Clone)]
pub struct BaseContext {
    connection: Arc<dyn StoreConnection>,
    database: &'static str,
}

impl BaseContext {
    pub fn new(connection: Arc<dyn StoreConnection>, database: &'static str) -> Self {
        Self {
            connection,
            database,
        }
    }

    pub fn database(&self) -> &'static str {
        self.database
    }

    pub fn connection(&self) -> &Arc<dyn StoreConnection> {
        &self.connection
    }

    /// A typed handle on any collection of this context's database,
    /// including ones without a generated accessor.
    pub fn collection<T: Entity>(&self, name: &str) -> TypedCollection<T> {
        TypedCollection::new(Arc::clone(&self.connection), self.database, name)
    }
}
