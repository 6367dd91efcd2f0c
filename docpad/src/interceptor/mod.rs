//! Change tracking for entities fetched through a typed collection.
//!
//! The static operations ([`Interceptor::get_id`], [`Interceptor::deep_hash`],
//! [`Interceptor::has_changed`]) are the whole decision contract. An
//! interceptor instance adds a collection handle and a trace sink so that the
//! decision for a given entity is made, and recorded, in one place. When a
//! write-back actually happens is left to the caller.

mod identity;
mod tracked;

pub use identity::{identify, Identifier, ID_FIELD};
pub use tracked::{Tracked, TrackingState};

use crate::collection::{Entity, TypedCollection};
use crate::error::Result;
use crate::hash::{self, Fingerprint};
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::sync::Mutex;

pub struct Interceptor<T> {
    collection: TypedCollection<T>,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl<T: Serialize> Interceptor<T> {
    /// Identity of `entity`, taken from the member serialized as `_id`.
    pub fn get_id(entity: &T) -> Result<Identifier> {
        identify(entity)
    }

    /// Fingerprint of `entity`'s persisted fields.
    pub fn deep_hash(entity: &T) -> Result<Fingerprint> {
        hash::deep_hash(entity)
    }

    /// Whether `entity` no longer matches `baseline`. Does not touch `entity`.
    pub fn has_changed(entity: &T, baseline: Fingerprint) -> Result<bool> {
        Ok(Self::deep_hash(entity)? != baseline)
    }
}

impl<T: Entity> Interceptor<T> {
    pub fn new(collection: TypedCollection<T>, sink: impl Write + Send + 'static) -> Self {
        Self {
            collection,
            sink: Mutex::new(Box::new(sink)),
        }
    }

    pub fn collection(&self) -> &TypedCollection<T> {
        &self.collection
    }

    /// Capture the baseline for an entity about to be handed to caller code.
    pub fn track(&self, entity: T) -> Result<Tracked<T>> {
        Tracked::new(entity)
    }

    /// Decide whether `tracked` has to be written back, tracing the decision
    /// to the sink.
    pub fn needs_write_back(&self, tracked: &Tracked<T>) -> Result<bool> {
        let changed = Self::has_changed(tracked.entity(), tracked.baseline())?;
        let id = match Self::get_id(tracked.entity()) {
            Ok(id) => id.to_string(),
            Err(_) => "<no id>".to_string(),
        };
        self.trace(format_args!(
            "{}.{} {}: {}",
            self.collection.database(),
            self.collection.name(),
            id,
            if changed { "changed, write-back required" } else { "unchanged" }
        ));
        Ok(changed)
    }

    fn trace(&self, line: fmt::Arguments<'_>) {
        match self.sink.lock() {
            Ok(mut sink) => {
                if let Err(e) = writeln!(sink, "{line}") {
                    log::warn!("Failed to write interceptor trace: {e}");
                }
            }
            Err(_) => log::warn!("Interceptor sink lock poisoned; dropping trace line"),
        }
    }
}

impl<T> fmt::Debug for Interceptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("database", &self.collection.database())
            .field("collection", &self.collection.name())
            .finish_non_exhaustive()
    }
}
